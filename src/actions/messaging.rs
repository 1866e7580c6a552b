//! Actions that put a message on the wire.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{payload_id, payload_object, payload_string, Action, ActionContext, ActionSchema, Mode, Services};
use crate::error::{Error, Result};
use crate::store::TaskStatus;
use crate::transport::MASTER;
use crate::watcher::{WithheldMessage, OVERRIDE_PHRASE};

/// Flip the context task from `pending` to `running` after the first send.
fn mark_running(services: &Services, ctx: &mut ActionContext) {
    let Some(task) = ctx.task.as_mut() else {
        return;
    };
    if task.status != TaskStatus::Pending {
        return;
    }
    match services.tasks.set_running(task.id) {
        Ok(()) => task.status = TaskStatus::Running,
        Err(e) => tracing::warn!(task_id = task.id, "Failed to set task running: {}", e),
    }
}

pub struct Response {
    services: Services,
}

impl Response {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Action for Response {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "response".to_string(),
            description: "A message sent to the current conversation. In task mode it goes to \
                the task's contact (as the Master); otherwise to the Master."
                .to_string(),
            parameters: json!({"type": "string", "description": "The message text."}),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        let text = payload_string(payload);
        if text.trim().is_empty() {
            return Err(Error::Parse("response needs a message text".to_string()));
        }

        if ctx.mode == Mode::Command {
            self.services
                .outbox
                .send_master(&format!("{}{}", self.services.prefix(), text))
                .await?;
            return Ok(());
        }

        let counterparty = ctx
            .counterparty
            .clone()
            .ok_or_else(|| Error::InvalidState("no conversation to answer".to_string()))?;
        let prefix = self.services.task_prefix(ctx.task.as_ref());

        let verdict = match self
            .services
            .watcher
            .check(&text, &ctx.conversation)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::error!(chat = counterparty.target(), "Watcher check failed: {}", e);
                self.services
                    .outbox
                    .send_master(&format!("{}Error in Watcher check: {}", prefix, e))
                    .await?;
                return Err(e);
            }
        };

        if !verdict.allow {
            self.services
                .withheld
                .withhold(WithheldMessage::new(text.clone(), counterparty));
            self.services
                .outbox
                .send_master(&format!(
                    "{}[Watcher] : Blocked: \"{}\". Reason: {} ('{}' cancels block)",
                    prefix, text, verdict.reason, OVERRIDE_PHRASE
                ))
                .await?;
            return Ok(());
        }

        counterparty.send(&text).await?;
        mark_running(&self.services, ctx);
        Ok(())
    }
}

pub struct MessageMaster {
    services: Services,
}

impl MessageMaster {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Action for MessageMaster {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "message_master".to_string(),
            description: "A private note or summary for the Master.".to_string(),
            parameters: json!({"type": "string", "description": "The message content."}),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        let text = payload_string(payload);
        if text.trim().is_empty() {
            return Err(Error::Parse("message_master needs a message".to_string()));
        }
        let prefix = self.services.task_prefix(ctx.task.as_ref());
        self.services
            .outbox
            .send_master(&format!("{}{}", prefix, text))
            .await?;
        Ok(())
    }
}

pub struct SendMedia {
    services: Services,
    to_master: bool,
}

impl SendMedia {
    pub fn to_conversation(services: Services) -> Self {
        Self {
            services,
            to_master: false,
        }
    }

    pub fn to_master(services: Services) -> Self {
        Self {
            services,
            to_master: true,
        }
    }
}

#[async_trait]
impl Action for SendMedia {
    fn schema(&self) -> ActionSchema {
        let (name, description) = if self.to_master {
            ("send_media_to_master", "Send a media file private to the master.")
        } else {
            (
                "send_media",
                "Send a media file back to the contact (in task mode) or to the current conversation.",
            )
        };
        ActionSchema {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({"type": "string", "description": "The Media ID."}),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        let media_id = match payload {
            Value::Number(_) => payload_id(payload)?.to_string(),
            _ => payload_string(payload).trim().trim_matches('"').to_string(),
        };
        if media_id.is_empty() {
            return Err(Error::Parse("send_media needs a media id".to_string()));
        }
        let target = if self.to_master {
            MASTER
        } else {
            ctx.reply_target()
        };
        self.services.outbox.send_media(target, &media_id).await?;
        Ok(())
    }
}

#[derive(Deserialize, Default)]
struct ButtonChoice {
    #[serde(default, rename = "displayText")]
    display_text: String,
    #[serde(default, rename = "buttonID")]
    button_id: String,
}

pub struct ButtonResponse {
    services: Services,
}

impl ButtonResponse {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Action for ButtonResponse {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "button_response".to_string(),
            description: "Click a button option.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "displayText": {"type": "string"},
                    "buttonID": {"type": "string"}
                },
                "required": ["displayText"]
            }),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        let mut choice: ButtonChoice = match payload {
            Value::String(s) => payload_object(payload).unwrap_or_else(|_| ButtonChoice {
                display_text: s.clone(),
                button_id: String::new(),
            }),
            _ => payload_object(payload)?,
        };
        let chat = ctx.reply_target().to_string();

        if choice.button_id.is_empty() {
            let option = self
                .services
                .interactive
                .resolve(&chat, &choice.display_text)
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "no button '{}' in the last interactive message of {}",
                        choice.display_text, chat
                    ))
                })?;
            choice.button_id = option.id;
        } else if choice.display_text.is_empty() {
            if let Some(option) = self
                .services
                .interactive
                .get(&chat)
                .and_then(|c| c.options.into_iter().find(|o| o.id == choice.button_id))
            {
                choice.display_text = option.display_text;
            }
        }

        self.services
            .outbox
            .send_button_reply(&chat, &choice.display_text, &choice.button_id)
            .await?;
        mark_running(&self.services, ctx);
        Ok(())
    }
}
