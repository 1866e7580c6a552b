//! Behavior store: standing per-contact instructions.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::counter::IdCounter;
use crate::error::{Error, Result};

pub const STATUS_ENABLED: &str = "enabled";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Behavior {
    pub id: u64,
    pub contact: String,
    /// Template name under `behaviors/templates/`.
    pub name: String,
    #[serde(default)]
    pub comments: String,
    /// `enabled`, anything else (or absent) means disabled.
    #[serde(default)]
    pub status: String,
    /// Unix seconds of creation.
    #[serde(default)]
    pub timestamp: i64,
}

impl Behavior {
    pub fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }
}

pub struct BehaviorStore {
    dir: PathBuf,
    templates_dir: PathBuf,
    counter: IdCounter,
}

impl BehaviorStore {
    pub fn new(dir: impl Into<PathBuf>, templates_dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            counter: IdCounter::new(&dir),
            templates_dir: templates_dir.into(),
            dir,
        }
    }

    fn behavior_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn enable(&self, contact: &str, name: &str, comments: &str) -> Result<Behavior> {
        if contact.trim().is_empty() || name.trim().is_empty() {
            return Err(Error::Parse(
                "enable_behavior needs both contact and name".to_string(),
            ));
        }

        let behavior = Behavior {
            id: self.counter.next_id()?,
            contact: contact.trim().to_string(),
            name: name.trim().to_string(),
            comments: comments.to_string(),
            status: STATUS_ENABLED.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };

        fs::create_dir_all(&self.dir)?;
        fs::write(
            self.behavior_path(behavior.id),
            serde_json::to_string_pretty(&behavior)?,
        )?;

        tracing::info!(
            behavior_id = behavior.id,
            contact = %behavior.contact,
            "Enabled behavior {}",
            behavior.name
        );
        Ok(behavior)
    }

    /// Remove the behavior file.
    pub fn disable(&self, id: u64) -> Result<()> {
        let path = self.behavior_path(id);
        if !path.exists() {
            return Err(Error::NotFound(format!("behavior {}", id)));
        }
        fs::remove_file(&path)?;
        tracing::info!(behavior_id = id, "Disabled (removed) behavior");
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Behavior>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|c| serde_json::from_str::<Behavior>(&c).map_err(Error::from))
            {
                Ok(b) if b.is_enabled() => found.push(b),
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping behavior file {}: {}", path.display(), e),
            }
        }
        found.sort_by_key(|b| b.id);
        Ok(found)
    }

    pub fn active_for(&self, contact: &str) -> Result<Vec<Behavior>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|b| b.contact == contact)
            .collect())
    }

    pub fn all_active(&self) -> Result<Vec<Behavior>> {
        self.scan()
    }

    /// Instruction text for a behavior template.
    pub fn template(&self, name: &str) -> Result<String> {
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(Error::NotFound(format!("behavior template '{}'", name)));
        }
        let path = self.templates_dir.join(format!("{}.txt", name));
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("behavior template '{}'", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of every available template, sorted.
    pub fn templates(&self) -> Result<Vec<String>> {
        list_templates(&self.templates_dir)
    }
}

fn list_templates(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| {
            let path = e.path();
            if path.extension().and_then(|x| x.to_str()) == Some("txt") {
                path.file_stem().map(|s| s.to_string_lossy().to_string())
            } else {
                None
            }
        })
        .collect();
    names.sort();
    Ok(names)
}
