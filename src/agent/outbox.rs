//! Outbound messages: every send goes through the transport and is written
//! to history as our own message.

use std::sync::Arc;

use crate::error::Result;
use crate::history::{HistoryStore, StoredMessage};
use crate::transport::{Transport, MASTER};

pub struct Outbox {
    transport: Arc<dyn Transport>,
    history: Arc<HistoryStore>,
    master: String,
}

impl Outbox {
    /// `master` is the operator's address; the `MASTER` sentinel resolves to it.
    pub fn new(
        transport: Arc<dyn Transport>,
        history: Arc<HistoryStore>,
        master: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            history,
            master: master.into(),
        }
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    fn resolve<'a>(&'a self, target: &'a str) -> &'a str {
        if target == MASTER {
            &self.master
        } else {
            target
        }
    }

    fn record(&self, id: &str, chat: &str, text: &str) {
        let saved = self.history.save_message(StoredMessage {
            id,
            chat,
            sender: &self.master,
            text,
            timestamp: chrono::Utc::now().timestamp(),
            from_me: true,
        });
        if let Err(e) = saved {
            tracing::warn!(chat, "Failed to record outbound message: {}", e);
        }
    }

    pub async fn send(&self, target: &str, text: &str) -> Result<String> {
        let chat = self.resolve(target);
        let id = self.transport.send_message(chat, text).await?;
        tracing::debug!(chat, message_id = %id, "Sent message");
        self.record(&id, chat, text);
        Ok(id)
    }

    pub async fn send_master(&self, text: &str) -> Result<String> {
        self.send(MASTER, text).await
    }

    pub async fn send_button_reply(
        &self,
        target: &str,
        display_text: &str,
        button_id: &str,
    ) -> Result<String> {
        let chat = self.resolve(target);
        let id = self
            .transport
            .send_button_reply(chat, display_text, button_id)
            .await?;
        self.record(&id, chat, display_text);
        Ok(id)
    }

    pub async fn send_media(&self, target: &str, media_id: &str) -> Result<String> {
        let chat = self.resolve(target);
        let id = self.transport.send_media(chat, media_id).await?;
        tracing::debug!(chat, media_id, "Sent media");
        Ok(id)
    }
}

/// The other side of a conversation: an outbox bound to one target.
#[derive(Clone)]
pub struct Counterparty {
    outbox: Arc<Outbox>,
    target: String,
}

impl Counterparty {
    pub fn new(outbox: Arc<Outbox>, target: impl Into<String>) -> Self {
        Self {
            outbox,
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn send(&self, text: &str) -> Result<String> {
        self.outbox.send(&self.target, text).await
    }
}
