//! Safety gate for outbound task messages.
//!
//! A second, independent model call judges each message the agent wants to
//! send to a contact. Only an explicit `"block"` verdict blocks. Blocked
//! messages wait in a single slot until the operator releases them with
//! `LET IT BE`.

use std::sync::{Arc, Mutex};

use crate::agent::outbox::Counterparty;
use crate::agent::parse::parse_verdict;
use crate::error::{Error, Result};
use crate::prompt;
use crate::providers::{ChatMessage, ChatOptions, Provider};

/// Operator phrase that releases the withheld message.
pub const OVERRIDE_PHRASE: &str = "LET IT BE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allow: bool,
    pub reason: String,
}

pub struct Watcher {
    provider: Arc<dyn Provider>,
    bot_name: String,
    language: String,
    model: Option<String>,
}

impl Watcher {
    pub fn new(provider: Arc<dyn Provider>, language: impl Into<String>) -> Self {
        Self {
            provider,
            bot_name: "Blady".to_string(),
            language: language.into(),
            model: None,
        }
    }

    pub fn with_bot_name(mut self, bot_name: impl Into<String>) -> Self {
        self.bot_name = bot_name.into();
        self
    }

    /// Judge with a different model than the agent.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Any failure of the judge call itself is a `Gate` error: callers must
    /// not send.
    pub async fn check(&self, proposed: &str, context: &[String]) -> Result<Verdict> {
        let messages = [
            ChatMessage::system(prompt::system_prompt(
                &self.bot_name,
                &self.language,
                chrono::Local::now(),
            )),
            ChatMessage::user(prompt::watcher_prompt(proposed, context)),
        ];
        let options = ChatOptions::tagged("watcher").with_model(self.model.clone());

        let reply = self
            .provider
            .chat(&messages, &options)
            .await
            .map_err(|e| Error::Gate(e.to_string()))?;
        let verdict = parse_verdict(&reply.content).map_err(|e| Error::Gate(e.to_string()))?;

        if verdict.action == "block" {
            tracing::warn!(reason = %verdict.reason, "Watcher blocked a message");
            Ok(Verdict {
                allow: false,
                reason: verdict.reason,
            })
        } else {
            tracing::debug!("Watcher allowed a message");
            Ok(Verdict {
                allow: true,
                reason: String::new(),
            })
        }
    }
}

/// A blocked message and the means to send it anyway.
#[derive(Clone)]
pub struct WithheldMessage {
    pub text: String,
    resend: Counterparty,
}

impl WithheldMessage {
    pub fn new(text: impl Into<String>, resend: Counterparty) -> Self {
        Self {
            text: text.into(),
            resend,
        }
    }

    pub fn target(&self) -> &str {
        self.resend.target()
    }
}

/// Holds the most recently blocked message. A new block replaces the old one.
#[derive(Default)]
pub struct WithheldSlot {
    slot: Mutex<Option<WithheldMessage>>,
}

impl WithheldSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn withhold(&self, message: WithheldMessage) {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.as_ref() {
            tracing::info!(target_chat = previous.target(), "Dropping older withheld message");
        }
        *slot = Some(message);
    }

    /// (text, target) of the withheld message, if any.
    pub fn peek(&self) -> Option<(String, String)> {
        self.slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|m| (m.text.clone(), m.target().to_string()))
    }

    pub fn take(&self) -> Option<WithheldMessage> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    /// Send the withheld message once and clear the slot. `Ok(false)` when
    /// there was nothing to send. A failed send puts the message back unless
    /// a newer block took the slot meanwhile.
    pub async fn release(&self) -> Result<bool> {
        let Some(message) = self.take() else {
            return Ok(false);
        };
        if let Err(e) = message.resend.send(&message.text).await {
            tracing::warn!(target_chat = message.target(), "Withheld message not released: {}", e);
            let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
            if slot.is_none() {
                *slot = Some(message);
            }
            return Err(e);
        }
        tracing::info!(target_chat = message.target(), "Released withheld message");
        Ok(true)
    }
}
