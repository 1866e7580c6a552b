//! The long-running side of Blady.
//!
//! One dispatcher loop reads transport events and task signals. Everything
//! slow (LLM rounds, debounce windows, the scheduled-task ticker) runs on the
//! worker pool so shutdown can cancel and await it.

mod ticker;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::{builtin_registry, load_custom_actions, Services, TaskSignal};
use crate::agent::outbox::{Counterparty, Outbox};
use crate::agent::Agent;
use crate::buttons::{InteractiveContext, InteractiveStore};
use crate::config::{DataPaths, Settings};
use crate::contacts::ContactDirectory;
use crate::core::{ConversationScheduler, KeyedLock, WorkerPool};
use crate::error::Result;
use crate::history::{HistoryStore, StoredMessage};
use crate::memory::MemoryFile;
use crate::providers::Provider;
use crate::store::{BehaviorStore, TaskStatus, TaskStore};
use crate::transport::{InboundMessage, MediaRef, MessageContent, Transport, TransportEvent};
use crate::watcher::{Watcher, WithheldSlot, OVERRIDE_PHRASE};

struct Shared {
    settings: Settings,
    paths: DataPaths,
    transport: Arc<dyn Transport>,
    history: Arc<HistoryStore>,
    behaviors: Arc<BehaviorStore>,
    services: Services,
    agent: Agent,
    pool: WorkerPool,
    conversations: ConversationScheduler,
    /// Per-chat watermark for behavior batches. Not persisted.
    behavior_watermarks: Mutex<HashMap<String, i64>>,
    signals: Mutex<Option<mpsc::UnboundedReceiver<TaskSignal>>>,
}

#[derive(Clone)]
pub struct Daemon {
    shared: Arc<Shared>,
}

impl Daemon {
    /// Wire every store and service under the configured data directory.
    ///
    /// `provider` drives the agent, `judge` the watcher. They are usually the
    /// same stack.
    pub fn new(
        settings: Settings,
        transport: Arc<dyn Transport>,
        provider: Arc<dyn Provider>,
        judge: Arc<dyn Provider>,
    ) -> Result<Self> {
        let paths = settings.paths()?;
        paths.ensure()?;

        let history = Arc::new(HistoryStore::open(&paths.history_db)?);
        let behaviors = Arc::new(BehaviorStore::new(
            &paths.behaviors_dir,
            &paths.behavior_templates_dir,
        ));
        let master = settings
            .master
            .address
            .clone()
            .unwrap_or_else(|| transport.own_address());
        let outbox = Arc::new(Outbox::new(transport.clone(), history.clone(), master));
        let watcher = Watcher::new(judge, settings.agent.language.clone())
            .with_bot_name(settings.agent.bot_name.clone())
            .with_model(settings.models.watcher_model.clone());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let services = Services {
            tasks: Arc::new(TaskStore::new(&paths.tasks_dir)),
            memory: Arc::new(MemoryFile::new(&paths.memory_file)),
            outbox,
            contacts: Arc::new(ContactDirectory::default()),
            interactive: Arc::new(InteractiveStore::new()),
            watcher: Arc::new(watcher),
            withheld: Arc::new(WithheldSlot::new()),
            signals: signal_tx,
            locks: KeyedLock::new(),
            bot_name: settings.agent.bot_name.clone(),
        };

        let mut registry = builtin_registry(&services);
        let custom = load_custom_actions(&paths.actions_dir, &mut registry)?;
        info!(
            builtin = registry.len() - custom,
            custom,
            "Action registry ready"
        );

        let agent = Agent::new(
            provider,
            Arc::new(registry),
            services.clone(),
            behaviors.clone(),
            &settings.agent,
        );
        let pool = WorkerPool::new();

        Ok(Self {
            shared: Arc::new(Shared {
                conversations: ConversationScheduler::new(pool.clone()),
                pool,
                behavior_watermarks: Mutex::new(HashMap::new()),
                signals: Mutex::new(Some(signal_rx)),
                settings,
                paths,
                transport,
                history,
                behaviors,
                services,
                agent,
            }),
        })
    }

    pub fn services(&self) -> &Services {
        &self.shared.services
    }

    pub fn agent(&self) -> &Agent {
        &self.shared.agent
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.shared.pool
    }

    fn debounce(&self) -> Duration {
        Duration::from_secs(self.shared.settings.tasks.debounce_seconds)
    }

    fn context_window(&self) -> usize {
        self.shared.settings.agent.context_window
    }

    fn bot_tag(&self) -> String {
        format!("[{}]", self.shared.settings.agent.bot_name)
    }

    /// Run until `shutdown` resolves or the transport closes its stream.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut events = self.shared.transport.start().await?;
        let mut signals = self
            .shared
            .signals
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        self.refresh_contacts().await;

        ticker::spawn(self.clone(), self.shared.settings.tasks.ticker_seconds);
        info!(
            transport = self.shared.transport.name(),
            master = self.shared.services.outbox.master(),
            "Blady is listening"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Transport event stream closed");
                        break;
                    }
                },
                Some(signal) = recv_signal(&mut signals) => self.handle_signal(signal),
            }
        }

        if let Err(e) = self.shared.transport.stop().await {
            warn!("Transport stop warning: {}", e);
        }
        let grace = Duration::from_secs(self.shared.settings.tasks.shutdown_grace_seconds);
        if self.shared.pool.shutdown(grace).await {
            info!("All workers finished");
        }
        Ok(())
    }

    async fn refresh_contacts(&self) {
        match self.shared.transport.contacts().await {
            Ok(contacts) => {
                self.shared.services.contacts.refresh(contacts);
                info!(count = self.shared.services.contacts.len(), "Contacts loaded");
            }
            Err(e) => warn!("Contact refresh warning: {}", e),
        }
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.handle_message(message).await,
            TransportEvent::HistorySync(messages) => {
                let stored = messages
                    .iter()
                    .filter(|m| self.store_message(m) == Some(true))
                    .count();
                info!(received = messages.len(), stored, "History sync");
            }
            TransportEvent::Connected => {
                info!("Transport connected");
                self.refresh_contacts().await;
            }
            TransportEvent::Disconnected => warn!("Transport disconnected"),
        }
    }

    /// `Some(true)` when newly stored, `Some(false)` for a duplicate id,
    /// `None` when there is no text or the write failed.
    fn store_message(&self, message: &InboundMessage) -> Option<bool> {
        let text = message.content.to_text()?;
        let stored = StoredMessage {
            id: &message.id,
            chat: &message.chat,
            sender: &message.sender,
            text: &text,
            timestamp: message.timestamp,
            from_me: message.from_me,
        };
        match self.shared.history.save_message(stored) {
            Ok(new) => Some(new),
            Err(e) => {
                warn!(chat = %message.chat, "History write warning: {}", e);
                None
            }
        }
    }

    async fn handle_message(&self, message: InboundMessage) {
        match self.store_message(&message) {
            Some(true) => {}
            Some(false) => {
                debug!(id = %message.id, "Duplicate message ignored");
                return;
            }
            None => {
                debug!(id = %message.id, "Nothing to process in message");
                return;
            }
        }

        if let Some(options) = message.content.options() {
            self.shared.services.interactive.record(
                &message.chat,
                InteractiveContext {
                    message_id: message.id.clone(),
                    chat: message.chat.clone(),
                    sender: message.sender.clone(),
                    options: options.to_vec(),
                },
            );
        }
        if let MessageContent::Media { media } = &message.content {
            self.archive_media(media.clone());
        }

        if message.is_group {
            return;
        }
        if message.is_self_chat() {
            self.handle_self_chat(message).await;
            return;
        }
        if message.from_me {
            return;
        }
        self.route_contact_message(&message);
    }

    async fn handle_self_chat(&self, message: InboundMessage) {
        let Some(text) = message.content.to_text() else {
            return;
        };
        if text.starts_with(&self.bot_tag()) {
            return;
        }

        if text.trim() == OVERRIDE_PHRASE {
            let reply = match self.shared.services.withheld.release().await {
                Ok(true) => "Message sent.".to_string(),
                Ok(false) => "No blocked message to release.".to_string(),
                Err(e) => format!("Failed to send blocked message: {}", e),
            };
            let reply = format!("{}[Watcher] : {}", self.bot_tag(), reply);
            if let Err(e) = self.shared.services.outbox.send_master(&reply).await {
                warn!("Watcher reply warning: {}", e);
            }
            return;
        }

        let daemon = self.clone();
        let chat = message.chat.clone();
        self.shared.conversations.start(&message.chat, move |cancel| async move {
            daemon.run_command(text, chat, cancel).await;
        });
    }

    async fn run_command(&self, text: String, chat: String, cancel: CancellationToken) {
        let context = self.recent_context(&chat);
        match self.shared.agent.process(&text, context, &cancel).await {
            Ok(actions) => debug!(chat = %chat, executed = actions.len(), "Command handled"),
            Err(e) => {
                error!(chat = %chat, "Command failed: {}", e);
                self.report(&format!("{}Error: {}", self.shared.services.prefix(), e))
                    .await;
            }
        }
    }

    fn route_contact_message(&self, message: &InboundMessage) {
        let tasks = &self.shared.services.tasks;
        let found = tasks.find_by_contact_or_chat(&message.chat).and_then(|task| match task {
            None if message.sender != message.chat => tasks.find_by_contact_or_chat(&message.sender),
            other => Ok(other),
        });

        match found {
            Ok(Some(task)) if task.is_scheduled_after(chrono::Local::now().naive_local()) => {
                debug!(task_id = task.id, "Task not due yet, message goes to behaviors");
                self.route_behaviors(message);
            }
            Ok(Some(task)) => {
                let daemon = self.clone();
                let chat = message.chat.clone();
                self.shared
                    .pool
                    .spawn(async move { daemon.task_batch(task.id, chat).await });
            }
            Ok(None) => self.route_behaviors(message),
            Err(e) => warn!(chat = %message.chat, "Task lookup warning: {}", e),
        }
    }

    fn route_behaviors(&self, message: &InboundMessage) {
        let active = match self.shared.behaviors.active_for(&message.chat) {
            Ok(active) => active,
            Err(e) => {
                warn!(chat = %message.chat, "Behavior lookup warning: {}", e);
                return;
            }
        };
        if active.is_empty() {
            debug!(chat = %message.chat, "No task or behavior for chat");
            return;
        }

        // First contact since start: only this message onwards counts.
        self.shared
            .behavior_watermarks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(message.chat.clone())
            .or_insert(message.timestamp - 1);

        let daemon = self.clone();
        let chat = message.chat.clone();
        self.shared
            .pool
            .spawn(async move { daemon.behavior_batch(chat).await });
    }

    /// Sleep out the debounce window; false when shutdown interrupted it.
    async fn debounce_window(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.debounce()) => true,
            _ = self.shared.pool.cancelled() => false,
        }
    }

    /// Process everything a task's contact said since the watermark. `chat`
    /// is where the contact last wrote from.
    async fn task_batch(&self, task_id: u64, chat: String) {
        if !self.debounce_window().await {
            return;
        }
        let _guard = self.shared.services.locks.lock(&format!("task:{}", task_id)).await;

        let tasks = &self.shared.services.tasks;
        let mut task = match tasks.load(task_id) {
            Ok(task) if task.status.is_live() => task,
            Ok(task) => {
                debug!(task_id, status = %task.status, "Task no longer live, batch dropped");
                return;
            }
            Err(e) => {
                warn!(task_id, "Task reload warning: {}", e);
                return;
            }
        };
        if task.is_scheduled_after(chrono::Local::now().naive_local()) {
            debug!(task_id, "Task not due yet, batch dropped");
            return;
        }
        if task.chat_id != chat {
            if let Err(e) = tasks.set_chat_id(task_id, &chat) {
                warn!(task_id, "Chat id update warning: {}", e);
            }
            task.chat_id = chat;
        }

        let target = task.target().to_string();
        let (lines, watermark) = match self.shared.history.messages_since(
            &target,
            task.last_processed_timestamp,
            self.context_window(),
        ) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(task_id, "History read warning: {}", e);
                return;
            }
        };
        if lines.is_empty() {
            debug!(task_id, "No new messages since watermark");
            return;
        }

        // The contact answered: the task is under way.
        if task.status == TaskStatus::Pending {
            match tasks.set_running(task_id) {
                Ok(()) => task.status = TaskStatus::Running,
                Err(e) => warn!(task_id, "Status update warning: {}", e),
            }
        }

        info!(task_id, messages = lines.len(), "Processing task batch");
        let message = lines.join("\n");
        let context = self.recent_context(&target);
        let prefix = self.shared.services.task_prefix(Some(&task));
        let counterparty = Counterparty::new(self.shared.services.outbox.clone(), &target);
        let cancel = self.shared.pool.child_token();

        if let Err(e) = self
            .shared
            .agent
            .process_task(task, &message, context, counterparty, &cancel)
            .await
        {
            error!(task_id, "Task processing failed: {}", e);
            self.report(&format!("{}Error: {}", prefix, e)).await;
        }
        // Advance even on failure so one bad batch is not replayed forever.
        if let Err(e) = tasks.set_processed_timestamp(task_id, watermark) {
            warn!(task_id, "Watermark update warning: {}", e);
        }
    }

    async fn behavior_batch(&self, chat: String) {
        if !self.debounce_window().await {
            return;
        }
        let _guard = self.shared.services.locks.lock(&format!("behavior:{}", chat)).await;

        let watermark = self
            .shared
            .behavior_watermarks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&chat)
            .copied()
            .unwrap_or(0);
        let (lines, next) =
            match self
                .shared
                .history
                .messages_since(&chat, watermark, self.context_window())
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(chat = %chat, "History read warning: {}", e);
                    return;
                }
            };
        if lines.is_empty() {
            return;
        }
        let active = match self.shared.behaviors.active_for(&chat) {
            Ok(active) if !active.is_empty() => active,
            Ok(_) => return,
            Err(e) => {
                warn!(chat = %chat, "Behavior lookup warning: {}", e);
                return;
            }
        };

        info!(chat = %chat, behaviors = active.len(), messages = lines.len(), "Processing behavior batch");
        let context = self.recent_context(&chat);
        let counterparty = Counterparty::new(self.shared.services.outbox.clone(), &chat);
        let cancel = self.shared.pool.child_token();
        if let Err(e) = self
            .shared
            .agent
            .process_behaviors(&active, &lines.join("\n"), context, counterparty, &cancel)
            .await
        {
            error!(chat = %chat, "Behavior processing failed: {}", e);
            self.report(&format!("{}Error: {}", self.shared.services.prefix(), e))
                .await;
        }
        self.shared
            .behavior_watermarks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(chat, next);
    }

    /// A confirmed or resumed task gets its first turn.
    pub fn handle_signal(&self, signal: TaskSignal) {
        let task_id = signal.task().id;
        debug!(task_id, "Task signal received");
        let daemon = self.clone();
        self.shared
            .pool
            .spawn(async move { daemon.kickoff(task_id, None).await });
    }

    /// First turn of a task. `due` is the tick time of a scheduled kickoff,
    /// which clears the schedule under the lock and skips if another
    /// kickoff already did.
    async fn kickoff(&self, task_id: u64, due: Option<chrono::NaiveDateTime>) {
        let _guard = self.shared.services.locks.lock(&format!("task:{}", task_id)).await;
        let tasks = &self.shared.services.tasks;

        let mut task = match tasks.load(task_id) {
            Ok(task) if task.status.is_live() => task,
            Ok(task) => {
                debug!(task_id, status = %task.status, "Kickoff skipped");
                return;
            }
            Err(e) => {
                warn!(task_id, "Task reload warning: {}", e);
                return;
            }
        };
        if let Some(tick) = due {
            match task.schedule_datetime {
                Some(at) if at <= tick => {}
                _ => {
                    debug!(task_id, "Scheduled kickoff already handled");
                    return;
                }
            }
            if let Err(e) = tasks.clear_schedule(task_id) {
                warn!(task_id, "Schedule clear warning: {}", e);
                return;
            }
            task.schedule_datetime = None;
        }
        if task.chat_id.is_empty() {
            if let Err(e) = tasks.set_chat_id(task_id, &task.contact) {
                warn!(task_id, "Chat id update warning: {}", e);
            }
            task.chat_id = task.contact.clone();
        }

        if task.is_scheduled_after(chrono::Local::now().naive_local()) {
            info!(task_id, "Task scheduled for later");
            return;
        }

        let target = task.target().to_string();
        // Whatever the contact said before the kickoff is context, not a reply.
        if task.last_processed_timestamp == 0 {
            match self.shared.history.latest_inbound(&target) {
                Ok(Some(ts)) => {
                    if let Err(e) = tasks.set_processed_timestamp(task_id, ts) {
                        warn!(task_id, "Watermark update warning: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(task_id, "History read warning: {}", e),
            }
        }

        info!(task_id, contact = %task.contact, "Starting task");
        let prefix = self.shared.services.task_prefix(Some(&task));
        let context = self.recent_context(&target);
        let counterparty = Counterparty::new(self.shared.services.outbox.clone(), &target);
        let cancel = self.shared.pool.child_token();
        if let Err(e) = self
            .shared
            .agent
            .process_task(task, "", context, counterparty, &cancel)
            .await
        {
            error!(task_id, "Task kickoff failed: {}", e);
            self.report(&format!("{}Error: {}", prefix, e)).await;
        }
    }

    /// Kick off every pending task whose schedule has passed.
    pub fn kick_due(&self, now: chrono::NaiveDateTime) -> usize {
        let tasks = &self.shared.services.tasks;
        let due = match tasks.due_scheduled(now) {
            Ok(due) => due,
            Err(e) => {
                warn!("Scheduled task scan warning: {}", e);
                return 0;
            }
        };
        for task in &due {
            info!(task_id = task.id, "Scheduled task is due");
            let daemon = self.clone();
            let task_id = task.id;
            self.shared
                .pool
                .spawn(async move { daemon.kickoff(task_id, Some(now)).await });
        }
        due.len()
    }

    fn recent_context(&self, chat: &str) -> Vec<String> {
        self.shared
            .history
            .recent_messages(chat, self.context_window())
            .unwrap_or_else(|e| {
                warn!(chat, "History read warning: {}", e);
                Vec::new()
            })
    }

    async fn report(&self, text: &str) {
        if let Err(e) = self.shared.services.outbox.send_master(text).await {
            warn!("Could not notify master: {}", e);
        }
    }

    fn archive_media(&self, media: MediaRef) {
        let transport = self.shared.transport.clone();
        let dir = self.shared.paths.media_dir.clone();
        self.shared.pool.spawn(async move {
            let bytes = match transport.download(&media).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(media = %media.id, "Media download warning: {}", e);
                    return;
                }
            };
            let path = dir.join(&media.id);
            let written = async {
                tokio::fs::create_dir_all(&dir).await?;
                tokio::fs::write(&path, &bytes).await
            };
            match written.await {
                Ok(()) => debug!(media = %media.id, bytes = bytes.len(), "Media archived"),
                Err(e) => warn!(media = %media.id, "Media write warning: {}", e),
            }
        });
    }
}

async fn recv_signal(
    signals: &mut Option<mpsc::UnboundedReceiver<TaskSignal>>,
) -> Option<TaskSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
