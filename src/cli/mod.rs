//! CLI commands for Blady using clap.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{load_settings_or_default, DataPaths, Settings};
use crate::daemon::Daemon;
use crate::memory::MemoryFile;
use crate::providers::create_provider;
use crate::store::{BehaviorStore, Task, TaskStore};
use crate::transport::ConsoleTransport;

/// Blady - personal messaging agent with tasks, behaviors and a watcher.
#[derive(Parser)]
#[command(name = "blady")]
#[command(version)]
#[command(about = "Blady - delegate conversations to an LLM, safely", long_about = None)]
pub struct Commands {
    /// Data directory (defaults to ~/.blady)
    #[arg(long, global = true, env = "BLADY_HOME")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the agent on the console transport until Ctrl-C
    Run,

    /// Show configuration and store summary
    Status,

    /// Task commands
    #[command(subcommand, alias = "t")]
    Task(TaskCommand),

    /// Behavior commands
    #[command(subcommand, alias = "b")]
    Behavior(BehaviorCommand),

    /// Memory commands
    #[command(subcommand)]
    Memory(MemoryCommand),

    /// Print the schema of every registered action
    Actions,
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// List open tasks
    List,

    /// Show one task as JSON
    Show {
        /// Task ID
        id: u64,
    },

    /// Confirm an unconfirmed task
    Confirm {
        /// Task ID
        id: u64,
    },

    /// Pause a running task
    Pause {
        /// Task ID
        id: u64,
    },

    /// Resume a paused task
    Resume {
        /// Task ID
        id: u64,
    },

    /// Mark a task finished
    Finish {
        /// Task ID
        id: u64,
    },

    /// Delete (archive) a task
    Delete {
        /// Task ID
        id: u64,
    },
}

#[derive(Subcommand)]
pub enum BehaviorCommand {
    /// List enabled behaviors and available templates
    List,

    /// Enable a behavior template for a contact
    Enable {
        /// Contact address
        contact: String,

        /// Template name
        name: String,

        /// Contact-specific notes
        #[arg(long, default_value = "")]
        comments: String,
    },

    /// Disable a behavior
    Disable {
        /// Behavior ID
        id: u64,
    },
}

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// Print the memory file
    Show,
}

impl Commands {
    /// Whether this invocation runs the long-lived daemon.
    pub fn is_daemon(&self) -> bool {
        matches!(self.command, Command::Run)
    }

    fn settings(&self) -> Settings {
        let mut settings = load_settings_or_default();
        if let Some(dir) = &self.data_dir {
            settings.workspace.path = Some(dir.clone());
        }
        settings
    }

    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        let settings = self.settings();
        match &self.command {
            Command::Run => cmd_run(settings).await,
            Command::Status => cmd_status(&settings),
            Command::Task(cmd) => cmd_task(&settings, cmd),
            Command::Behavior(cmd) => cmd_behavior(&settings, cmd),
            Command::Memory(cmd) => cmd_memory(&settings, cmd),
            Command::Actions => cmd_actions(settings),
        }
    }
}

fn paths(settings: &Settings) -> Result<DataPaths> {
    let paths = settings.paths()?;
    paths.ensure()?;
    Ok(paths)
}

fn build_daemon(settings: Settings) -> Result<Daemon> {
    let paths = paths(&settings)?;
    let transport = ConsoleTransport::with_contacts_file(&paths.root.join("contacts.json"))
        .context("loading contacts.json")?;
    let provider = create_provider(&settings)?;
    Ok(Daemon::new(settings, Arc::new(transport), provider.clone(), provider)?)
}

// Command implementations

async fn cmd_run(settings: Settings) -> Result<()> {
    let prefix = settings.bot_prefix();
    let daemon = build_daemon(settings)?;
    println!("{}ready. Type to talk, '@<address> <text>' to play a contact, Ctrl-C to stop.", prefix);

    daemon
        .run(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    println!("Blady stopped.");
    Ok(())
}

fn cmd_status(settings: &Settings) -> Result<()> {
    let paths = paths(settings)?;
    let tasks = TaskStore::new(&paths.tasks_dir).list_active()?;
    let behaviors = BehaviorStore::new(&paths.behaviors_dir, &paths.behavior_templates_dir);
    let memory = MemoryFile::new(&paths.memory_file).read()?;

    println!("Blady status");
    println!("  Data dir: {}", paths.root.display());
    println!("  Provider: {}", settings.models.provider);
    println!(
        "  Watcher model: {}",
        settings.models.watcher_model.as_deref().unwrap_or("(provider default)")
    );
    println!(
        "  Master: {}",
        settings.master.address.as_deref().unwrap_or("(transport account)")
    );
    println!("  Open tasks: {}", tasks.len());
    for status in ["unconfirmed", "pending", "running", "paused"] {
        let count = tasks.iter().filter(|t| t.status.to_string() == status).count();
        if count > 0 {
            println!("    {}: {}", status, count);
        }
    }
    println!("  Enabled behaviors: {}", behaviors.all_active()?.len());
    println!("  Behavior templates: {}", behaviors.templates()?.join(", "));
    println!("  Memory: {} lines", memory.lines().count());
    Ok(())
}

fn print_task_line(task: &Task) {
    let schedule = task
        .schedule_datetime
        .map(|at| format!(" at {}", at.format("%Y-%m-%d %H:%M")))
        .unwrap_or_default();
    println!(
        "- [{}] {} | {} | {}{}",
        task.id,
        task.status,
        task.contact,
        task.objective,
        schedule
    );
}

fn cmd_task(settings: &Settings, cmd: &TaskCommand) -> Result<()> {
    let store = TaskStore::new(paths(settings)?.tasks_dir);

    match cmd {
        TaskCommand::List => {
            let tasks = store.list_active()?;
            if tasks.is_empty() {
                println!("No open tasks.");
            }
            for task in &tasks {
                print_task_line(task);
            }
        }
        TaskCommand::Show { id } => {
            let task = store.load(*id)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskCommand::Confirm { id } => {
            store.confirm_and_get(*id)?;
            println!("Task {} confirmed. It starts on the contact's next message.", id);
        }
        TaskCommand::Pause { id } => {
            store.pause(*id)?;
            println!("Task {} paused.", id);
        }
        TaskCommand::Resume { id } => {
            store.resume(*id)?;
            println!("Task {} resumed.", id);
        }
        TaskCommand::Finish { id } => {
            store.finish(*id)?;
            println!("Task {} finished.", id);
        }
        TaskCommand::Delete { id } => {
            store.delete(*id)?;
            println!("Task {} deleted.", id);
        }
    }
    Ok(())
}

fn cmd_behavior(settings: &Settings, cmd: &BehaviorCommand) -> Result<()> {
    let paths = paths(settings)?;
    let store = BehaviorStore::new(&paths.behaviors_dir, &paths.behavior_templates_dir);

    match cmd {
        BehaviorCommand::List => {
            let active = store.all_active()?;
            println!("Enabled behaviors:");
            if active.is_empty() {
                println!("  (none)");
            }
            for behavior in &active {
                println!(
                    "  [{}] {} -> {}{}",
                    behavior.id,
                    behavior.name,
                    behavior.contact,
                    if behavior.comments.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", behavior.comments)
                    }
                );
            }
            println!("Templates: {}", store.templates()?.join(", "));
        }
        BehaviorCommand::Enable { contact, name, comments } => {
            store.template(name)?;
            let behavior = store.enable(contact, name, comments)?;
            println!("Behavior {} enabled for {}.", behavior.id, behavior.contact);
        }
        BehaviorCommand::Disable { id } => {
            store.disable(*id)?;
            println!("Behavior {} disabled.", id);
        }
    }
    Ok(())
}

fn cmd_memory(settings: &Settings, cmd: &MemoryCommand) -> Result<()> {
    match cmd {
        MemoryCommand::Show => {
            let memory = MemoryFile::new(paths(settings)?.memory_file).read()?;
            if memory.trim().is_empty() {
                println!("(memory is empty)");
            } else {
                println!("{}", memory);
            }
        }
    }
    Ok(())
}

fn cmd_actions(settings: Settings) -> Result<()> {
    let daemon = build_daemon(settings)?;
    let schemas = daemon.agent().registry().schemas();
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Commands::command().debug_assert();
    }

    #[test]
    fn test_parses_nested_commands() {
        let args = Commands::try_parse_from(["blady", "task", "pause", "3"]).unwrap();
        assert!(matches!(args.command, Command::Task(TaskCommand::Pause { id: 3 })));
        assert!(!args.is_daemon());

        let args = Commands::try_parse_from([
            "blady",
            "--data-dir",
            "/tmp/b",
            "behavior",
            "enable",
            "12345@domain",
            "away",
            "--comments",
            "until Monday",
        ])
        .unwrap();
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/b")));
        match args.command {
            Command::Behavior(BehaviorCommand::Enable { contact, name, comments }) => {
                assert_eq!(contact, "12345@domain");
                assert_eq!(name, "away");
                assert_eq!(comments, "until Monday");
            }
            _ => panic!("wrong command"),
        }

        assert!(Commands::try_parse_from(["blady", "run"]).unwrap().is_daemon());
    }

    #[tokio::test]
    async fn test_task_commands_drive_the_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.workspace.path = Some(dir.path().to_path_buf());
        let store = TaskStore::new(dir.path().join("tasks"));
        let task = store.create("o", "12345@domain", "x", None).unwrap();

        cmd_task(&settings, &TaskCommand::Confirm { id: task.id }).unwrap();
        cmd_task(&settings, &TaskCommand::Finish { id: task.id }).unwrap();
        assert_eq!(store.load(task.id).unwrap().status.to_string(), "finished");
        assert!(cmd_task(&settings, &TaskCommand::Pause { id: task.id }).is_err());
        assert!(cmd_task(&settings, &TaskCommand::Show { id: 99 }).is_err());
    }
}
