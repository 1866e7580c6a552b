//! Task store: one JSON file per task plus a `deleted/` archive.
//!
//! Layout:
//! - `<dir>/_last_id`     : id counter
//! - `<dir>/<id>.json`    : live tasks
//! - `<dir>/deleted/`     : archived tasks
//!
//! The store does not lock. Flows that read-modify-write the same task from
//! several workers hold the `task:<id>` keyed lock around the whole sequence.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::counter::IdCounter;
use crate::error::{Error, Result};

const SAMPLE_FILE: &str = "0_sample.json";

/// Accepted shapes for `schedule_datetime`, local time.
const SCHEDULE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Unconfirmed,
    Pending,
    Running,
    Paused,
    Finished,
}

impl TaskStatus {
    /// Statuses listed by [`TaskStore::list_active`].
    pub fn is_open(self) -> bool {
        !matches!(self, TaskStatus::Finished)
    }

    /// Statuses that route inbound messages to the task.
    pub fn is_live(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Pending)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Unconfirmed => "unconfirmed",
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Finished => "finished",
        };
        write!(f, "{}", s)
    }
}

/// A unit of delegated background work.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: u64,
    pub objective: String,
    pub original_orders: String,
    /// Address the task acts on behalf of.
    pub contact: String,
    /// Channel actually in use; may diverge from `contact`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chat_id: String,
    pub status: TaskStatus,
    /// Unix seconds of the newest inbound message already handled; 0 = never.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_processed_timestamp: i64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "schedule_format"
    )]
    pub schedule_datetime: Option<NaiveDateTime>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Task {
    /// Channel to talk on: `chat_id` when set, else the contact itself.
    pub fn target(&self) -> &str {
        if self.chat_id.is_empty() {
            &self.contact
        } else {
            &self.chat_id
        }
    }

    pub fn matches(&self, contact_or_chat: &str) -> bool {
        self.contact == contact_or_chat || (!self.chat_id.is_empty() && self.chat_id == contact_or_chat)
    }

    pub fn is_scheduled_after(&self, now: NaiveDateTime) -> bool {
        self.schedule_datetime.map(|at| at > now).unwrap_or(false)
    }
}

/// Parse a schedule string in any of the accepted shapes.
pub fn parse_schedule(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    SCHEDULE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(|| {
            Error::Parse(format!(
                "schedule '{}' is not YYYY-MM-DDTHH:MM[:SS]",
                value
            ))
        })
}

mod schedule_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(at) => serializer.serialize_str(&at.format("%Y-%m-%dT%H:%M:%S").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => super::parse_schedule(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// File-backed task store.
pub struct TaskStore {
    dir: PathBuf,
    deleted_dir: PathBuf,
    counter: IdCounter,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            deleted_dir: dir.join("deleted"),
            counter: IdCounter::new(&dir),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn task_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Create a task in `unconfirmed`.
    pub fn create(
        &self,
        objective: &str,
        contact: &str,
        original_orders: &str,
        schedule: Option<NaiveDateTime>,
    ) -> Result<Task> {
        let contact = contact.trim();
        if contact.is_empty() {
            return Err(Error::InvalidContact(
                "a task needs a contact address".to_string(),
            ));
        }

        let id = self.counter.next_id()?;
        let task = Task {
            id,
            objective: objective.to_string(),
            original_orders: original_orders.to_string(),
            contact: contact.to_string(),
            chat_id: String::new(),
            status: TaskStatus::Unconfirmed,
            last_processed_timestamp: 0,
            schedule_datetime: schedule,
        };
        self.save(&task)?;

        tracing::info!(task_id = id, contact, "Created task: {}", task.objective);
        Ok(task)
    }

    pub fn load(&self, id: u64) -> Result<Task> {
        let path = self.task_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("task {}", id)))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map_err(|e| Error::Parse(format!("task {}: {}", id, e)))
    }

    /// Overwrite the task file.
    pub fn save(&self, task: &Task) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(task)?;
        let path = self.task_path(task.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load, check the current status, flip it, save.
    fn transition(
        &self,
        id: u64,
        allowed: &[TaskStatus],
        to: TaskStatus,
        verb: &str,
    ) -> Result<Task> {
        let mut task = self.load(id)?;
        if !allowed.contains(&task.status) {
            return Err(Error::InvalidState(format!(
                "task {} cannot be {} (current status: {})",
                id, verb, task.status
            )));
        }
        let from = task.status;
        task.status = to;
        self.save(&task)?;
        tracing::info!(task_id = id, %from, %to, "Task status changed");
        Ok(task)
    }

    /// `unconfirmed -> pending`, returning the updated task.
    pub fn confirm_and_get(&self, id: u64) -> Result<Task> {
        self.transition(id, &[TaskStatus::Unconfirmed], TaskStatus::Pending, "confirmed")
    }

    /// `pending -> running`; already running is fine.
    pub fn set_running(&self, id: u64) -> Result<()> {
        let task = self.load(id)?;
        if task.status == TaskStatus::Running {
            return Ok(());
        }
        self.transition(id, &[TaskStatus::Pending], TaskStatus::Running, "started")?;
        Ok(())
    }

    pub fn pause(&self, id: u64) -> Result<Task> {
        self.transition(
            id,
            &[TaskStatus::Running, TaskStatus::Pending],
            TaskStatus::Paused,
            "paused",
        )
    }

    pub fn resume(&self, id: u64) -> Result<Task> {
        self.transition(id, &[TaskStatus::Paused], TaskStatus::Running, "resumed")
    }

    /// Terminal state; only reached through explicit marking.
    pub fn finish(&self, id: u64) -> Result<Task> {
        self.transition(
            id,
            &[TaskStatus::Pending, TaskStatus::Running, TaskStatus::Paused],
            TaskStatus::Finished,
            "finished",
        )
    }

    /// Move the task into `deleted/`. An archived file with the same id is
    /// replaced (last write wins).
    pub fn delete(&self, id: u64) -> Result<()> {
        let src = self.task_path(id);
        if !src.exists() {
            return Err(Error::NotFound(format!("task {}", id)));
        }
        fs::create_dir_all(&self.deleted_dir)?;
        let dst = self.deleted_dir.join(format!("{}.json", id));
        if dst.exists() {
            tracing::warn!(task_id = id, "Replacing archived copy of task");
        }
        fs::rename(&src, &dst)?;
        tracing::info!(task_id = id, "Deleted task (moved to deleted/)");
        Ok(())
    }

    /// Read every parsable task file, ordered by id.
    fn scan(&self) -> Result<Vec<Task>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tasks = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".json") || name == SAMPLE_FILE || !entry.path().is_file() {
                continue;
            }
            let parsed = fs::read_to_string(entry.path())
                .map_err(Error::from)
                .and_then(|c| serde_json::from_str::<Task>(&c).map_err(Error::from));
            match parsed {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!("Skipping task file {}: {}", name, e),
            }
        }
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    /// Every non-archived task that is not finished.
    pub fn list_active(&self) -> Result<Vec<Task>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|t| t.status.is_open())
            .collect())
    }

    /// The live task for a contact or chat address. `running` beats `pending`;
    /// ties go to the lowest id.
    pub fn find_by_contact_or_chat(&self, key: &str) -> Result<Option<Task>> {
        let mut matches: Vec<Task> = self
            .scan()?
            .into_iter()
            .filter(|t| t.status.is_live() && t.matches(key))
            .collect();
        if matches.len() > 1 {
            tracing::warn!(
                chat = key,
                count = matches.len(),
                "Several live tasks match one address"
            );
        }
        matches.sort_by_key(|t| (t.status != TaskStatus::Running, t.id));
        Ok(matches.into_iter().next())
    }

    pub fn set_chat_id(&self, id: u64, chat_id: &str) -> Result<()> {
        let mut task = self.load(id)?;
        let old = std::mem::replace(&mut task.chat_id, chat_id.to_string());
        self.save(&task)?;
        tracing::info!(task_id = id, "Task chat id updated: '{}' -> '{}'", old, chat_id);
        Ok(())
    }

    pub fn set_processed_timestamp(&self, id: u64, timestamp: i64) -> Result<()> {
        let mut task = self.load(id)?;
        task.last_processed_timestamp = timestamp;
        self.save(&task)
    }

    /// Pending tasks whose schedule has come due.
    pub fn due_scheduled(&self, now: NaiveDateTime) -> Result<Vec<Task>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.schedule_datetime.map(|at| at <= now).unwrap_or(false)
            })
            .collect())
    }

    pub fn clear_schedule(&self, id: u64) -> Result<()> {
        let mut task = self.load(id)?;
        if task.schedule_datetime.take().is_some() {
            self.save(&task)?;
        }
        Ok(())
    }
}
