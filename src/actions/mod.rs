//! Actions the model can invoke.
//!
//! Each action publishes a schema (shown to the model verbatim) and an
//! `execute` that performs its side effect. The agent loop looks actions up
//! by name in a [`Registry`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::agent::outbox::{Counterparty, Outbox};
use crate::buttons::InteractiveStore;
use crate::contacts::ContactDirectory;
use crate::core::KeyedLock;
use crate::error::{Error, Result};
use crate::memory::MemoryFile;
use crate::store::{BehaviorStore, Task, TaskStore};
use crate::watcher::{Watcher, WithheldSlot};

pub mod behaviors;
pub mod contacts;
pub mod custom;
pub mod memory;
pub mod messaging;
pub mod tasks;

pub use custom::{load_custom_actions, CustomAction, CustomActionConfig};
pub use tasks::TaskSignal;

/// Which entry point of the agent is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// The operator talking to the bot in their own chat.
    Command,
    /// Working a task with its contact.
    Task,
    /// Standing behaviors for a contact without a task.
    Behavior,
}

impl Mode {
    /// Actions hidden from the model in this mode.
    pub fn excluded_actions(self) -> &'static [&'static str] {
        match self {
            Mode::Command => &["button_response"],
            Mode::Task => &[
                "create_task",
                "delete_task",
                "confirm_task",
                "resume_task",
                "enable_behavior",
                "disable_behavior",
            ],
            Mode::Behavior => &[
                "create_task",
                "delete_task",
                "confirm_task",
                "pause_task",
                "resume_task",
            ],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Command => "command",
            Mode::Task => "task",
            Mode::Behavior => "behavior",
        }
    }
}

/// Per-call state handed to every action of one agent invocation.
pub struct ActionContext {
    pub mode: Mode,
    /// Rolling conversation window, oldest first.
    pub conversation: Vec<String>,
    pub task: Option<Task>,
    pub behaviors: Arc<BehaviorStore>,
    /// Where task/behavior mode replies go.
    pub counterparty: Option<Counterparty>,
    /// Results to feed back to the model on the next round.
    pub tool_outputs: Vec<String>,
}

impl ActionContext {
    pub fn new(mode: Mode, behaviors: Arc<BehaviorStore>) -> Self {
        Self {
            mode,
            conversation: Vec::new(),
            task: None,
            behaviors,
            counterparty: None,
            tool_outputs: Vec::new(),
        }
    }

    pub fn with_conversation(mut self, conversation: Vec<String>) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_counterparty(mut self, counterparty: Counterparty) -> Self {
        self.counterparty = Some(counterparty);
        self
    }

    /// Chat the current mode talks to: the counterparty if any, else the operator.
    pub fn reply_target(&self) -> &str {
        self.counterparty
            .as_ref()
            .map(|c| c.target())
            .unwrap_or(crate::transport::MASTER)
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ActionSchema {
    pub name: String,
    pub description: String,
    /// JSON-schema fragment describing `content`.
    pub parameters: Value,
}

#[async_trait]
pub trait Action: Send + Sync {
    fn schema(&self) -> ActionSchema;

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()>;
}

/// Name-indexed action table. Iteration is sorted by name.
#[derive(Default, Clone)]
pub struct Registry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action; a later registration with the same name replaces it.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        let name = action.schema().name;
        if self.actions.insert(name.clone(), action).is_some() {
            tracing::warn!(action = %name, "Action registered twice, keeping the newest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if self.actions.contains_key(name) {
            Ok(())
        } else {
            Err(Error::UnknownAction(format!(
                "action '{}' is not registered",
                name
            )))
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn schemas(&self) -> Vec<ActionSchema> {
        self.schemas_excluding(&[])
    }

    pub fn schemas_excluding(&self, exclude: &[&str]) -> Vec<ActionSchema> {
        self.actions
            .iter()
            .filter(|(name, _)| !exclude.contains(&name.as_str()))
            .map(|(_, action)| action.schema())
            .collect()
    }
}

/// Everything the built-in actions act upon.
#[derive(Clone)]
pub struct Services {
    pub tasks: Arc<TaskStore>,
    pub memory: Arc<MemoryFile>,
    pub outbox: Arc<Outbox>,
    pub contacts: Arc<ContactDirectory>,
    pub interactive: Arc<InteractiveStore>,
    pub watcher: Arc<Watcher>,
    pub withheld: Arc<WithheldSlot>,
    pub signals: mpsc::UnboundedSender<TaskSignal>,
    /// `task:<id>` guards every read-modify-write of a task file.
    pub locks: KeyedLock,
    pub bot_name: String,
}

impl Services {
    /// `[Blady] : `
    pub fn prefix(&self) -> String {
        format!("[{}] : ", self.bot_name)
    }

    /// `[Blady][Task 3] : ` in task mode, otherwise the plain prefix.
    pub fn task_prefix(&self, task: Option<&Task>) -> String {
        match task {
            Some(task) => format!("[{}][Task {}] : ", self.bot_name, task.id),
            None => self.prefix(),
        }
    }
}

/// Registry holding every built-in action.
pub fn builtin_registry(services: &Services) -> Registry {
    let mut registry = Registry::new();
    registry.register(Arc::new(memory::MemoryUpdate::new(services.memory.clone())));
    registry.register(Arc::new(memory::MemoryAppend::new(services.memory.clone())));
    registry.register(Arc::new(messaging::Response::new(services.clone())));
    registry.register(Arc::new(messaging::MessageMaster::new(services.clone())));
    registry.register(Arc::new(messaging::SendMedia::to_conversation(services.clone())));
    registry.register(Arc::new(messaging::SendMedia::to_master(services.clone())));
    registry.register(Arc::new(messaging::ButtonResponse::new(services.clone())));
    registry.register(Arc::new(tasks::CreateTask::new(services.clone())));
    for op in [
        tasks::TaskOp::Delete,
        tasks::TaskOp::Confirm,
        tasks::TaskOp::Pause,
        tasks::TaskOp::Resume,
    ] {
        registry.register(Arc::new(tasks::TaskManagement::new(op, services.clone())));
    }
    registry.register(Arc::new(behaviors::EnableBehavior));
    registry.register(Arc::new(behaviors::DisableBehavior));
    registry.register(Arc::new(contacts::SearchContacts::new(services.contacts.clone())));
    registry
}

/// Payload as text: strings as-is, anything else as compact JSON.
pub fn payload_string(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decode an object payload, also accepting the object stringified.
pub fn payload_object<T: DeserializeOwned>(payload: &Value) -> Result<T> {
    let parsed = match payload {
        Value::String(s) => serde_json::from_str(s),
        other => serde_json::from_value(other.clone()),
    };
    parsed.map_err(|e| Error::Parse(format!("invalid payload: {}", e)))
}

/// Numeric id given as a number, `"7"` or `"\"7\""`.
pub fn payload_id(payload: &Value) -> Result<u64> {
    match payload {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::Parse(format!("invalid id: {}", n))),
        Value::String(s) => s
            .trim()
            .trim_matches('"')
            .trim()
            .parse()
            .map_err(|_| Error::Parse(format!("invalid id: {}", s))),
        other => Err(Error::Parse(format!("invalid id: {}", other))),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! A fully wired set of services over temp directories.

    use super::*;
    use crate::history::HistoryStore;
    use crate::testing::{RecordingTransport, ScriptedProvider};
    use crate::transport::Contact;
    use tempfile::TempDir;

    pub struct Fixture {
        pub dir: TempDir,
        pub services: Services,
        pub behaviors: Arc<BehaviorStore>,
        pub transport: Arc<RecordingTransport>,
        pub history: Arc<HistoryStore>,
        pub judge: Arc<ScriptedProvider>,
        pub signals: mpsc::UnboundedReceiver<TaskSignal>,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let transport = Arc::new(RecordingTransport::new());
            let history = Arc::new(HistoryStore::open_in_memory().unwrap());
            let outbox = Arc::new(Outbox::new(transport.clone(), history.clone(), "me@x"));
            let judge = Arc::new(ScriptedProvider::new());
            let (tx, rx) = mpsc::unbounded_channel();
            let contacts = ContactDirectory::new(vec![Contact {
                name: "Ana".to_string(),
                number: "12345@domain".to_string(),
            }]);
            let behaviors = Arc::new(BehaviorStore::new(
                dir.path().join("behaviors"),
                dir.path().join("behaviors").join("templates"),
            ));
            let services = Services {
                tasks: Arc::new(TaskStore::new(dir.path().join("tasks"))),
                memory: Arc::new(MemoryFile::new(dir.path().join("memories.txt"))),
                outbox,
                contacts: Arc::new(contacts),
                interactive: Arc::new(InteractiveStore::new()),
                watcher: Arc::new(Watcher::new(judge.clone(), "English")),
                withheld: Arc::new(WithheldSlot::new()),
                signals: tx,
                locks: KeyedLock::new(),
                bot_name: "Blady".to_string(),
            };
            Self {
                dir,
                services,
                behaviors,
                transport,
                history,
                judge,
                signals: rx,
            }
        }

        pub fn registry(&self) -> Registry {
            builtin_registry(&self.services)
        }

        pub fn command_ctx(&self) -> ActionContext {
            ActionContext::new(Mode::Command, self.behaviors.clone())
        }

        /// Task-mode context for a task, replying to its target.
        pub fn task_ctx(&self, task: Task) -> ActionContext {
            let counterparty = Counterparty::new(self.services.outbox.clone(), task.target());
            ActionContext::new(Mode::Task, self.behaviors.clone())
                .with_task(task)
                .with_counterparty(counterparty)
        }

        /// A confirmed (pending) task for the known contact.
        pub fn pending_task(&self) -> Task {
            let task = self
                .services
                .tasks
                .create("follow up", "12345@domain", "ask Ana about Friday", None)
                .unwrap();
            self.services.tasks.confirm_and_get(task.id).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_lists_sorted_and_filters() {
        let fx = fixtures::Fixture::new();
        let registry = fx.registry();

        let names = registry.names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"response".to_string()));
        assert!(names.contains(&"search_contacts".to_string()));

        let task_schemas = registry.schemas_excluding(Mode::Task.excluded_actions());
        assert!(task_schemas.iter().all(|s| s.name != "create_task"));
        assert!(task_schemas.iter().any(|s| s.name == "pause_task"));
        assert_eq!(registry.schemas().len(), registry.len());
    }

    #[test]
    fn test_validate_unknown() {
        let registry = fixtures::Fixture::new().registry();
        assert!(registry.validate("memory_append").is_ok());
        let err = registry.validate("launch_rockets").unwrap_err();
        assert!(matches!(err, Error::UnknownAction(_)));
        assert!(err.to_string().contains("'launch_rockets' is not registered"));
    }

    #[test]
    fn test_payload_helpers() {
        assert_eq!(payload_string(&json!("hi")), "hi");
        assert_eq!(payload_string(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(payload_id(&json!(7)).unwrap(), 7);
        assert_eq!(payload_id(&json!(" \"12\" ")).unwrap(), 12);
        assert!(payload_id(&json!("twelve")).is_err());
        assert!(payload_id(&json!(-1)).is_err());

        #[derive(serde::Deserialize)]
        struct Q {
            query: String,
        }
        let direct: Q = payload_object(&json!({"query": "ana"})).unwrap();
        let nested: Q = payload_object(&json!("{\"query\": \"bob\"}")).unwrap();
        assert_eq!(direct.query, "ana");
        assert_eq!(nested.query, "bob");
        assert!(payload_object::<Q>(&json!(3)).is_err());
    }
}
