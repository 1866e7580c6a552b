//! Task creation and the task state-machine actions.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{payload_id, payload_object, payload_string, Action, ActionContext, ActionSchema, Services};
use crate::error::{Error, Result};
use crate::store::{parse_schedule, Task};

/// Sent to the daemon when a task should start being worked.
#[derive(Debug, Clone)]
pub enum TaskSignal {
    Started(Task),
    Resumed(Task),
}

impl TaskSignal {
    pub fn task(&self) -> &Task {
        match self {
            TaskSignal::Started(task) | TaskSignal::Resumed(task) => task,
        }
    }
}

#[derive(Deserialize)]
struct CreateTaskInput {
    objective: String,
    contact: String,
    #[serde(default)]
    original_orders: String,
    #[serde(default)]
    schedule_datetime: Option<String>,
}

pub struct CreateTask {
    services: Services,
}

impl CreateTask {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Action for CreateTask {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "create_task".to_string(),
            description: "A new task to be added to the task list. Contains objective and contact."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "objective": {"type": "string"},
                    "contact": {"type": "string", "description": "The contact number (e.g. 12345@domain)"},
                    "original_orders": {"type": "string"},
                    "schedule_datetime": {
                        "type": "string",
                        "description": "ISO 8601 without timezone (e.g. 2024-12-31T23:59), optional"
                    }
                },
                "required": ["objective", "contact", "original_orders"]
            }),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        let input: CreateTaskInput = payload_object(payload)?;
        let prefix = self.services.task_prefix(ctx.task.as_ref());
        let contact = input.contact.trim();

        if !self.services.contacts.contains(contact) {
            tracing::warn!(contact, "create_task with unknown contact");
            self.services
                .outbox
                .send_master(&format!("{}Error: contact '{}' not found.", prefix, contact))
                .await?;
            return Err(Error::InvalidContact(contact.to_string()));
        }

        let schedule = input
            .schedule_datetime
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_schedule)
            .transpose()?;

        let task = self.services.tasks.create(
            &input.objective,
            contact,
            &input.original_orders,
            schedule,
        )?;
        let pretty = serde_json::to_string_pretty(&task)?;
        self.services
            .outbox
            .send_master(&format!("{}Task created:\n```json\n{}\n```", prefix, pretty))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOp {
    Delete,
    Confirm,
    Pause,
    Resume,
}

impl TaskOp {
    fn name(self) -> &'static str {
        match self {
            TaskOp::Delete => "delete_task",
            TaskOp::Confirm => "confirm_task",
            TaskOp::Pause => "pause_task",
            TaskOp::Resume => "resume_task",
        }
    }

    fn description(self) -> &'static str {
        match self {
            TaskOp::Delete => "Delete a task. Content is ID. ONLY BY USER REQUEST.",
            TaskOp::Confirm => "Confirm a newly created task to start working. Content is ID.",
            TaskOp::Pause => "Pause a task. Content is ID.",
            TaskOp::Resume => "Resume a task. Content is ID.",
        }
    }
}

pub struct TaskManagement {
    op: TaskOp,
    services: Services,
}

impl TaskManagement {
    pub fn new(op: TaskOp, services: Services) -> Self {
        Self { op, services }
    }

    fn signal(&self, signal: TaskSignal) {
        let id = signal.task().id;
        if self.services.signals.send(signal).is_err() {
            tracing::warn!(task_id = id, "Nobody is listening for task signals");
        }
    }
}

#[async_trait]
impl Action for TaskManagement {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: self.op.name().to_string(),
            description: self.op.description().to_string(),
            parameters: json!({"type": "string", "description": "The Task ID."}),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        // Inside a task an empty payload means the current task.
        let id = match (&ctx.task, payload_string(payload).trim().is_empty()) {
            (Some(task), true) => task.id,
            _ => payload_id(payload)?,
        };
        // A task-mode run already holds its own task's lock.
        let _guard = match &ctx.task {
            Some(task) if task.id == id => None,
            _ => Some(self.services.locks.lock(&format!("task:{}", id)).await),
        };

        match self.op {
            TaskOp::Delete => self.services.tasks.delete(id)?,
            TaskOp::Confirm => {
                let task = self.services.tasks.confirm_and_get(id)?;
                self.signal(TaskSignal::Started(task));
            }
            TaskOp::Pause => {
                let task = self.services.tasks.pause(id)?;
                if let Some(current) = ctx.task.as_mut().filter(|t| t.id == id) {
                    current.status = task.status;
                }
            }
            TaskOp::Resume => {
                let task = self.services.tasks.resume(id)?;
                self.signal(TaskSignal::Resumed(task));
            }
        }
        tracing::info!(task_id = id, action = self.op.name(), "Task action applied");
        Ok(())
    }
}
