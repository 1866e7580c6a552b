//! Configuration loading for Blady.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the Blady home directory (~/.blady).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".blady"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.blady/settings.json
pub fn load_settings() -> Result<Settings> {
    let path = get_settings_path()?;

    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}. Run the setup wizard or write it by hand.",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path)?;
    let settings: Settings = serde_json::from_str(&content)?;

    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings or return default if not found.
pub fn load_settings_or_default() -> Settings {
    load_settings().unwrap_or_else(|e| {
        tracing::warn!("Failed to load settings: {}, using defaults", e);
        Settings::default()
    })
}

fn validate_settings(settings: &Settings) -> Result<()> {
    match settings.models.provider.as_str() {
        "ollama" | "cerebras" | "openai" => {}
        other => {
            return Err(Error::Config(format!(
                "models.provider '{}' is not one of ollama, cerebras, openai",
                other
            )))
        }
    }
    if settings.agent.max_tool_rounds == 0 {
        return Err(Error::Config(
            "agent.max_tool_rounds must be at least 1".to_string(),
        ));
    }
    if settings.agent.bot_name.trim().is_empty() {
        return Err(Error::Config("agent.bot_name must not be empty".to_string()));
    }
    Ok(())
}

/// Workspace configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Workspace {
    /// Data directory; defaults to ~/.blady.
    pub path: Option<PathBuf>,
}

/// Provider model configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ProviderModel {
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_key_file: Option<PathBuf>,
    pub base_url: Option<String>,
}

/// Models configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Models {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub ollama: ProviderModel,
    #[serde(default)]
    pub cerebras: ProviderModel,
    #[serde(default)]
    pub openai: ProviderModel,
    /// Model override for the watcher judge; same provider as the agent.
    pub watcher_model: Option<String>,
    /// Where prompt/response transcripts are written. Disabled when unset.
    pub transcript_dir: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_request_timeout() -> u64 {
    222
}

fn default_retries() -> u32 {
    2
}

impl Default for Models {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            ollama: ProviderModel::default(),
            cerebras: ProviderModel::default(),
            openai: ProviderModel::default(),
            watcher_model: None,
            transcript_dir: None,
            request_timeout_seconds: default_request_timeout(),
            retries: default_retries(),
        }
    }
}

/// Agent loop configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AgentSettings {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Number of recent chat lines given to the model as context.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Ceiling on re-prompts caused by tool output.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

fn default_bot_name() -> String {
    "Blady".to_string()
}

fn default_language() -> String {
    "English".to_string()
}

fn default_context_window() -> usize {
    9
}

fn default_max_tool_rounds() -> usize {
    5
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            language: default_language(),
            context_window: default_context_window(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

/// Background task scheduling.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TaskSettings {
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: u64,
    #[serde(default = "default_ticker_seconds")]
    pub ticker_seconds: u64,
    /// How long shutdown waits for in-flight workers.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

fn default_debounce_seconds() -> u64 {
    5
}

fn default_ticker_seconds() -> u64 {
    60
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            debounce_seconds: default_debounce_seconds(),
            ticker_seconds: default_ticker_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

/// Operator ("master") configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Master {
    /// Operator address; defaults to the transport's own address.
    pub address: Option<String>,
}

/// Blady settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub workspace: Workspace,

    #[serde(default)]
    pub models: Models,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub tasks: TaskSettings,

    #[serde(default)]
    pub master: Master,
}

impl Settings {
    /// Resolve every on-disk location from the data directory.
    pub fn paths(&self) -> Result<DataPaths> {
        let root = match &self.workspace.path {
            Some(path) => path.clone(),
            None => get_home_dir()?,
        };
        Ok(DataPaths::new(root))
    }

    /// Prefix put in front of every operator-facing message, e.g. `[Blady] : `.
    pub fn bot_prefix(&self) -> String {
        format!("[{}] : ", self.agent.bot_name)
    }
}

/// On-disk layout under the data directory.
#[derive(Clone, Debug)]
pub struct DataPaths {
    pub root: PathBuf,
    pub tasks_dir: PathBuf,
    pub behaviors_dir: PathBuf,
    pub behavior_templates_dir: PathBuf,
    pub memory_file: PathBuf,
    pub history_db: PathBuf,
    pub actions_dir: PathBuf,
    /// Inbound attachments, one file per media id.
    pub media_dir: PathBuf,
}

impl DataPaths {
    pub fn new(root: PathBuf) -> Self {
        Self {
            tasks_dir: root.join("tasks"),
            behaviors_dir: root.join("behaviors"),
            behavior_templates_dir: root.join("behaviors").join("templates"),
            memory_file: root.join("memories.txt"),
            history_db: root.join("history.db"),
            actions_dir: root.join("actions"),
            media_dir: root.join("media"),
            root,
        }
    }

    /// Ensure the directories exist.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.root, &self.tasks_dir, &self.behaviors_dir, &self.actions_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                tracing::debug!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }
}
