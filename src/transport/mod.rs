//! Messaging transport abstraction.
//!
//! The real network client lives outside this crate; Blady only needs to
//! send text, button replies and media, list contacts, download attachments
//! and receive an event stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

pub mod console;

pub use console::ConsoleTransport;

/// Sentinel target meaning "the operator".
pub const MASTER: &str = "master";

/// One selectable option of a buttons or list message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ButtonOption {
    pub id: String,
    pub display_text: String,
}

/// Attachment reference handed out by the transport.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaRef {
    pub id: String,
    /// `image`, `audio`, `video`, `document`, ...
    pub kind: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    ExtendedText {
        text: String,
        #[serde(default)]
        quoted: Option<String>,
    },
    Buttons {
        body: String,
        buttons: Vec<ButtonOption>,
    },
    List {
        body: String,
        rows: Vec<ButtonOption>,
    },
    Media {
        media: MediaRef,
    },
    Unsupported,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    /// Render the content the way the model reads it. `None` when there is
    /// nothing textual to show.
    pub fn to_text(&self) -> Option<String> {
        let rendered = match self {
            MessageContent::Text { text } => text.clone(),
            MessageContent::ExtendedText { text, quoted } => match quoted {
                Some(q) if !q.is_empty() => format!("> {}\n{}", q, text),
                _ => text.clone(),
            },
            MessageContent::Buttons { body, buttons } => {
                let mut out = body.clone();
                if !buttons.is_empty() {
                    out.push_str("\n\n[Reply options - answer with the buttonID]:");
                    for b in buttons {
                        out.push_str(&format!("\n- \"{}\" -> buttonID: {}", b.display_text, b.id));
                    }
                }
                out
            }
            MessageContent::List { body, rows } => {
                let mut out = body.clone();
                if !rows.is_empty() {
                    out.push_str("\n\n[List options - answer with the rowID]:");
                    for r in rows {
                        out.push_str(&format!("\n- \"{}\" -> rowID: {}", r.display_text, r.id));
                    }
                }
                out
            }
            MessageContent::Media { media } => match &media.caption {
                Some(caption) if !caption.is_empty() => {
                    format!("[{} Media ID: {}] {}", media.kind, media.id, caption)
                }
                _ => format!("[{} Media ID: {}]", media.kind, media.id),
            },
            MessageContent::Unsupported => return None,
        };
        if rendered.is_empty() {
            None
        } else {
            Some(rendered)
        }
    }

    /// Options of an interactive message, if this is one.
    pub fn options(&self) -> Option<&[ButtonOption]> {
        match self {
            MessageContent::Buttons { buttons, .. } => Some(buttons),
            MessageContent::List { rows, .. } => Some(rows),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub sender: String,
    pub chat: String,
    pub from_me: bool,
    pub is_group: bool,
    pub content: MessageContent,
}

impl InboundMessage {
    /// A message the operator wrote to their own chat.
    pub fn is_self_chat(&self) -> bool {
        self.from_me && self.chat == self.sender
    }
}

#[derive(Clone, Debug)]
pub enum TransportEvent {
    Message(InboundMessage),
    /// Backfilled messages; stored, never acted on.
    HistorySync(Vec<InboundMessage>),
    Connected,
    Disconnected,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    pub number: String,
}

/// Messaging network client.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Connect and hand back the event stream.
    async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Send plain text; returns the message id.
    async fn send_message(&self, target: &str, text: &str) -> Result<String>;

    /// Answer an interactive message by selecting one option.
    async fn send_button_reply(
        &self,
        target: &str,
        display_text: &str,
        button_id: &str,
    ) -> Result<String>;

    /// Forward previously received media.
    async fn send_media(&self, target: &str, media_id: &str) -> Result<String>;

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>>;

    async fn contacts(&self) -> Result<Vec<Contact>>;

    /// Address of the logged-in account (the operator's self chat).
    fn own_address(&self) -> String;

    async fn stop(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buttons_render_with_ids() {
        let content = MessageContent::Buttons {
            body: "Confirm your booking?".to_string(),
            buttons: vec![
                ButtonOption {
                    id: "yes-1".to_string(),
                    display_text: "Yes".to_string(),
                },
                ButtonOption {
                    id: "no-1".to_string(),
                    display_text: "No".to_string(),
                },
            ],
        };
        let text = content.to_text().unwrap();
        assert!(text.starts_with("Confirm your booking?\n\n[Reply options"));
        assert!(text.contains("- \"Yes\" -> buttonID: yes-1"));
        assert!(text.contains("- \"No\" -> buttonID: no-1"));
        assert_eq!(content.options().unwrap().len(), 2);
    }

    #[test]
    fn test_media_and_unsupported() {
        let media = MessageContent::Media {
            media: MediaRef {
                id: "42".to_string(),
                kind: "image".to_string(),
                mime_type: None,
                caption: Some("receipt".to_string()),
            },
        };
        assert_eq!(media.to_text().unwrap(), "[image Media ID: 42] receipt");
        assert!(MessageContent::Unsupported.to_text().is_none());
        assert!(MessageContent::text("").to_text().is_none());
    }

    #[test]
    fn test_self_chat_detection() {
        let mut msg = InboundMessage {
            id: "1".to_string(),
            timestamp: 0,
            sender: "me@x".to_string(),
            chat: "me@x".to_string(),
            from_me: true,
            is_group: false,
            content: MessageContent::text("hi"),
        };
        assert!(msg.is_self_chat());
        msg.chat = "friend@x".to_string();
        assert!(!msg.is_self_chat());
    }
}
