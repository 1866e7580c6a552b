//! The agent loop.
//!
//! One invocation builds a prompt from the current state, asks the model for
//! an action list, dispatches the actions in order and, while actions keep
//! producing tool output, re-prompts with that output appended. The number of
//! re-prompts is capped by `agent.max_tool_rounds`.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::actions::{ActionContext, Mode, Registry, Services};
use crate::config::AgentSettings;
use crate::error::Result;
use crate::prompt::{self, ModeData};
use crate::providers::{ChatMessage, ChatOptions, Provider};
use crate::store::{Behavior, BehaviorStore, Task};

pub mod outbox;
pub mod parse;

use outbox::Counterparty;
use parse::{parse_actions, ExecutedAction};

pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: Arc<Registry>,
    services: Services,
    behaviors: Arc<BehaviorStore>,
    language: String,
    max_tool_rounds: usize,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<Registry>,
        services: Services,
        behaviors: Arc<BehaviorStore>,
        settings: &AgentSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            services,
            behaviors,
            language: settings.language.clone(),
            max_tool_rounds: settings.max_tool_rounds,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Command mode: the operator talking in their own chat.
    pub async fn process(
        &self,
        message: &str,
        context: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutedAction>> {
        let ctx = ActionContext::new(Mode::Command, self.behaviors.clone())
            .with_conversation(context);
        self.run(ctx, message, String::new(), ChatOptions::tagged("command"), cancel)
            .await
    }

    /// Task mode. An empty `message` means the task is being kicked off.
    pub async fn process_task(
        &self,
        task: Task,
        message: &str,
        context: Vec<String>,
        counterparty: Counterparty,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutedAction>> {
        let options = ChatOptions::tagged(format!("task-{}", task.id));
        let ctx = ActionContext::new(Mode::Task, self.behaviors.clone())
            .with_conversation(context)
            .with_task(task)
            .with_counterparty(counterparty);
        self.run(ctx, message, String::new(), options, cancel).await
    }

    /// Behavior mode: a contact without a task but with enabled behaviors.
    pub async fn process_behaviors(
        &self,
        behaviors: &[Behavior],
        message: &str,
        context: Vec<String>,
        counterparty: Counterparty,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutedAction>> {
        let enabled = self.describe_behaviors(behaviors);
        let ctx = ActionContext::new(Mode::Behavior, self.behaviors.clone())
            .with_conversation(context)
            .with_counterparty(counterparty);
        self.run(ctx, message, enabled, ChatOptions::tagged("behavior"), cancel)
            .await
    }

    fn describe_behaviors(&self, behaviors: &[Behavior]) -> String {
        behaviors
            .iter()
            .map(|b| {
                let instructions = self.behaviors.template(&b.name).unwrap_or_else(|e| {
                    tracing::warn!(behavior_id = b.id, "Behavior template missing: {}", e);
                    String::new()
                });
                let mut text = format!("### {} (id {})\n{}", b.name, b.id, instructions.trim());
                if !b.comments.trim().is_empty() {
                    text.push_str(&format!("\nComments: {}", b.comments.trim()));
                }
                text
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn mode_data(&self, ctx: &ActionContext, message: &str, enabled: &str) -> Result<ModeData> {
        let mut data = ModeData {
            memories: self.services.memory.read()?,
            tasks: "[]".to_string(),
            contacts: self.services.contacts.to_json(),
            context: ctx.conversation.join("\n"),
            message: message.to_string(),
            available_actions: serde_json::to_string_pretty(
                &self.registry.schemas_excluding(ctx.mode.excluded_actions()),
            )?,
            enabled_behaviors: enabled.to_string(),
            ..ModeData::default()
        };

        match ctx.mode {
            Mode::Command => {
                let tasks = self.services.tasks.list_active().unwrap_or_else(|e| {
                    tracing::warn!("Failed to load tasks: {}", e);
                    Vec::new()
                });
                data.tasks = serde_json::to_string(&tasks)?;
                data.active_behaviors = serde_json::to_string(&self.behaviors.all_active()?)?;
                data.behaviors = self.behaviors.templates()?.join(", ");
            }
            Mode::Task => {
                if let Some(task) = &ctx.task {
                    data.current_task = serde_json::to_string_pretty(task)?;
                }
            }
            Mode::Behavior => {}
        }
        Ok(data)
    }

    fn build_messages(&self, ctx: &ActionContext, data: &ModeData) -> Vec<ChatMessage> {
        let body = match ctx.mode {
            Mode::Behavior => prompt::behavior_prompt(data),
            mode => prompt::mode_prompt(mode, data),
        };
        vec![
            ChatMessage::system(prompt::system_prompt(
                &self.services.bot_name,
                &self.language,
                chrono::Local::now(),
            )),
            ChatMessage::user(body),
        ]
    }

    async fn run(
        &self,
        mut ctx: ActionContext,
        message: &str,
        enabled_behaviors: String,
        options: ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutedAction>> {
        let mode = ctx.mode;
        let excluded = mode.excluded_actions();
        let mut current_msg = message.to_string();
        let mut executed = Vec::new();

        for round in 0..=self.max_tool_rounds {
            if cancel.is_cancelled() {
                tracing::info!(mode = mode.as_str(), round, "Agent run cancelled");
                return Ok(executed);
            }

            let data = self.mode_data(&ctx, &current_msg, &enabled_behaviors)?;
            let messages = self.build_messages(&ctx, &data);
            let reply = self.provider.chat(&messages, &options).await?;
            let actions = parse_actions(&reply.content)?;
            tracing::debug!(mode = mode.as_str(), round, count = actions.len(), "Model chose actions");

            ctx.tool_outputs.clear();
            for raw in &actions {
                if cancel.is_cancelled() {
                    tracing::info!(mode = mode.as_str(), "Agent run cancelled between actions");
                    return Ok(executed);
                }
                if excluded.contains(&raw.kind.as_str()) {
                    tracing::warn!(action = %raw.kind, mode = mode.as_str(), "Action not allowed in this mode");
                    continue;
                }
                let Some(action) = self.registry.get(&raw.kind) else {
                    tracing::warn!(action = %raw.kind, "Unknown action type");
                    continue;
                };

                if let Err(e) = action.execute(&mut ctx, &raw.content).await {
                    tracing::warn!(action = %raw.kind, "Action failed: {}", e);
                }
                executed.push(ExecutedAction::from_raw(raw));
            }

            if ctx.tool_outputs.is_empty() {
                return Ok(executed);
            }
            if round == self.max_tool_rounds {
                tracing::warn!(
                    mode = mode.as_str(),
                    rounds = self.max_tool_rounds,
                    "Tool round limit reached, dropping pending tool output"
                );
                break;
            }
            current_msg = format!(
                "{}\n\n[System: Tool Outputs]\n{}",
                current_msg,
                ctx.tool_outputs.join("\n")
            );
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::fixtures::Fixture;
    use crate::error::Error;
    use crate::store::TaskStatus;
    use crate::testing::ScriptedProvider;

    fn agent(fx: &Fixture, brain: Arc<ScriptedProvider>) -> Agent {
        Agent::new(
            brain,
            Arc::new(fx.registry()),
            fx.services.clone(),
            fx.behaviors.clone(),
            &AgentSettings::default(),
        )
    }

    const SEARCH: &str = r#"{"actions": [{"type": "search_contacts", "content": {"query": "ana"}}]}"#;

    #[tokio::test]
    async fn test_tool_output_is_fed_back() {
        let fx = Fixture::new();
        let brain = Arc::new(ScriptedProvider::new());
        brain.push_reply(SEARCH);
        brain.push_reply(r#"{"actions": [{"type": "response", "content": "Ana is 12345@domain"}]}"#);

        let executed = agent(&fx, brain.clone())
            .process("who is ana?", vec![], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(brain.call_count(), 2);
        let second = brain.last_prompt(1);
        assert!(second.contains("who is ana?\n\n[System: Tool Outputs]\n[search_contacts] Results for 'ana':"));
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[1].kind, "response");
        assert_eq!(fx.transport.sent_to("me@x"), vec!["[Blady] : Ana is 12345@domain"]);
    }

    #[tokio::test]
    async fn test_recursion_is_capped() {
        let fx = Fixture::new();
        let brain = Arc::new(ScriptedProvider::new());
        for _ in 0..10 {
            brain.push_reply(SEARCH);
        }

        let executed = agent(&fx, brain.clone())
            .process("loop forever", vec![], &CancellationToken::new())
            .await
            .unwrap();

        // One initial call plus five re-prompts.
        assert_eq!(brain.call_count(), 6);
        assert_eq!(executed.len(), 6);
    }

    #[tokio::test]
    async fn test_unparsable_reply_runs_nothing() {
        let fx = Fixture::new();
        let brain = Arc::new(ScriptedProvider::new());
        brain.push_reply("Sure, I will tell Ana! (no json here)");

        let err = agent(&fx, brain)
            .process("tell Ana hi", vec![], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(fx.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_failing_actions_do_not_stop_the_batch() {
        let fx = Fixture::new();
        let brain = Arc::new(ScriptedProvider::new());
        brain.push_reply(
            r#"{"actions": [
                {"type": "teleport", "content": "mars"},
                {"type": "confirm_task", "content": "999"},
                {"type": "memory_append", "content": "Ana prefers mornings"}
            ]}"#,
        );

        let executed = agent(&fx, brain)
            .process("note it", vec![], &CancellationToken::new())
            .await
            .unwrap();
        let kinds: Vec<_> = executed.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(kinds, vec!["confirm_task", "memory_append"]);
        assert_eq!(fx.services.memory.read().unwrap(), "Ana prefers mornings");
    }

    #[tokio::test]
    async fn test_send_failure_mid_batch_keeps_going() {
        let fx = Fixture::new();
        fx.transport.fail_sends(true);
        let brain = Arc::new(ScriptedProvider::new());
        brain.push_reply(
            r#"{"actions": [
                {"type": "response", "content": "Noted."},
                {"type": "memory_append", "content": "Dentist on Friday"}
            ]}"#,
        );

        let executed = agent(&fx, brain)
            .process("remember the dentist", vec![], &CancellationToken::new())
            .await
            .unwrap();
        let kinds: Vec<_> = executed.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(kinds, vec!["response", "memory_append"]);
        assert!(fx.transport.sent().is_empty());
        assert_eq!(fx.services.memory.read().unwrap(), "Dentist on Friday");
    }

    #[tokio::test]
    async fn test_task_mode_hides_management_actions() {
        let fx = Fixture::new();
        let task = fx.pending_task();
        let brain = Arc::new(ScriptedProvider::new());
        brain.push_reply(
            r#"{"actions": [{"type": "create_task", "content": {"objective": "x", "contact": "12345@domain", "original_orders": "y"}}]}"#,
        );

        let counterparty = Counterparty::new(fx.services.outbox.clone(), task.target());
        agent(&fx, brain.clone())
            .process_task(task, "", vec![], counterparty, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fx.services.tasks.list_active().unwrap().len(), 1);
        let prompt = brain.last_prompt(0);
        assert!(prompt.contains("## Current Task"));
        assert!(!prompt.contains("\"name\": \"create_task\""));
        assert!(prompt.contains("\"name\": \"pause_task\""));
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_call_the_model() {
        let fx = Fixture::new();
        let brain = Arc::new(ScriptedProvider::new());
        brain.push_reply(SEARCH);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let executed = agent(&fx, brain.clone())
            .process("hi", vec![], &cancel)
            .await
            .unwrap();
        assert!(executed.is_empty());
        assert_eq!(brain.call_count(), 0);
    }

    #[tokio::test]
    async fn test_create_confirm_and_first_reply() {
        let mut fx = Fixture::new();
        let brain = Arc::new(ScriptedProvider::new());
        let agent = agent(&fx, brain.clone());
        let cancel = CancellationToken::new();

        brain.push_reply(
            r#"{"actions": [{"type": "create_task", "content": {"objective": "follow up", "contact": "12345@domain", "original_orders": "ask about Friday"}}]}"#,
        );
        agent.process("ask Ana about Friday", vec![], &cancel).await.unwrap();
        let task = fx.services.tasks.list_active().unwrap().remove(0);
        assert_eq!(task.status, TaskStatus::Unconfirmed);

        brain.push_reply(&format!(
            r#"{{"actions": [{{"type": "confirm_task", "content": "{}"}}]}}"#,
            task.id
        ));
        agent.process("yes, go", vec![], &cancel).await.unwrap();
        let started = match fx.signals.try_recv().unwrap() {
            crate::actions::TaskSignal::Started(t) => t,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(started.status, TaskStatus::Pending);

        fx.judge.push_reply(r#"{"action": "allow", "reason": ""}"#);
        brain.push_reply(r#"{"actions": [{"type": "response", "content": "Hi there"}]}"#);
        let counterparty = Counterparty::new(fx.services.outbox.clone(), started.target());
        agent
            .process_task(started.clone(), "", vec![], counterparty, &cancel)
            .await
            .unwrap();

        assert_eq!(
            fx.services.tasks.load(task.id).unwrap().status,
            TaskStatus::Running
        );
        assert_eq!(fx.transport.sent_to("12345@domain"), vec!["Hi there"]);
    }

    #[tokio::test]
    async fn test_behavior_prompt_includes_templates() {
        let fx = Fixture::new();
        let templates = fx.dir.path().join("behaviors").join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join("away.txt"), "Tell them the Master is on holiday.").unwrap();
        let behavior = fx.behaviors.enable("12345@domain", "away", "back on the 9th").unwrap();

        let brain = Arc::new(ScriptedProvider::new());
        brain.push_reply(r#"{"actions": []}"#);
        let counterparty = Counterparty::new(fx.services.outbox.clone(), "12345@domain");
        agent(&fx, brain.clone())
            .process_behaviors(&[behavior], "User: hello?", vec![], counterparty, &CancellationToken::new())
            .await
            .unwrap();

        let prompt = brain.last_prompt(0);
        assert!(prompt.starts_with("## Enabled Behaviors\n\n### away (id 1)\nTell them the Master is on holiday."));
        assert!(prompt.contains("Comments: back on the 9th"));
    }
}
