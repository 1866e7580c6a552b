//! Terminal transport for local runs.
//!
//! Every stdin line is a message the operator sends to their own chat.
//! A line of the form `@<address> <text>` is instead delivered as a message
//! from that contact, which makes task flows testable by hand.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Contact, InboundMessage, MediaRef, MessageContent, Transport, TransportEvent};
use crate::error::{Error, Result};

pub const CONSOLE_ADDRESS: &str = "me@console";

pub struct ConsoleTransport {
    address: String,
    contacts: Mutex<Vec<Contact>>,
    stop: CancellationToken,
}

impl ConsoleTransport {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self {
            address: CONSOLE_ADDRESS.to_string(),
            contacts: Mutex::new(contacts),
            stop: CancellationToken::new(),
        }
    }

    /// Load `contacts.json` (`[{"name": .., "number": ..}]`); missing file means none.
    pub fn with_contacts_file(path: &std::path::Path) -> Result<Self> {
        let contacts = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self::new(contacts))
    }
}

fn parse_line(address: &str, line: &str) -> Option<InboundMessage> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    let now = chrono::Utc::now().timestamp();
    let id = ulid::Ulid::new().to_string();

    if let Some(rest) = line.strip_prefix('@') {
        let (from, text) = rest.split_once(' ')?;
        return Some(InboundMessage {
            id,
            timestamp: now,
            sender: from.to_string(),
            chat: from.to_string(),
            from_me: false,
            is_group: false,
            content: MessageContent::text(text),
        });
    }

    Some(InboundMessage {
        id,
        timestamp: now,
        sender: address.to_string(),
        chat: address.to_string(),
        from_me: true,
        is_group: false,
        content: MessageContent::text(line),
    })
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(64);
        let stop = self.stop.clone();
        let address = self.address.clone();

        tokio::spawn(async move {
            let _ = tx.send(TransportEvent::Connected).await;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(msg) = parse_line(&address, &line) {
                                if tx.send(TransportEvent::Message(msg)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("stdin read failed: {}", e);
                            break;
                        }
                    }
                }
            }
            let _ = tx.send(TransportEvent::Disconnected).await;
        });

        Ok(rx)
    }

    async fn send_message(&self, target: &str, text: &str) -> Result<String> {
        println!("-> {}: {}", target, text);
        Ok(ulid::Ulid::new().to_string())
    }

    async fn send_button_reply(
        &self,
        target: &str,
        display_text: &str,
        button_id: &str,
    ) -> Result<String> {
        println!("-> {}: [button {}] {}", target, button_id, display_text);
        Ok(ulid::Ulid::new().to_string())
    }

    async fn send_media(&self, target: &str, media_id: &str) -> Result<String> {
        println!("-> {}: [media {}]", target, media_id);
        Ok(ulid::Ulid::new().to_string())
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>> {
        Err(Error::Transport(format!(
            "console transport holds no media ({})",
            media.id
        )))
    }

    async fn contacts(&self) -> Result<Vec<Contact>> {
        Ok(self
            .contacts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    fn own_address(&self) -> String {
        self.address.clone()
    }

    async fn stop(&self) -> Result<()> {
        self.stop.cancel();
        Ok(())
    }
}
