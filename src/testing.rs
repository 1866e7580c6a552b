//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::providers::{ChatMessage, ChatOptions, Provider, ProviderError};
use crate::transport::{Contact, MediaRef, Transport, TransportEvent};

/// Answers from a FIFO script and remembers every prompt it was given.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<std::result::Result<String, ProviderError>>>,
    calls: Mutex<Vec<(Vec<ChatMessage>, ChatOptions)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, content: &str) {
        self.script.lock().unwrap().push_back(Ok(content.to_string()));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(Vec<ChatMessage>, ChatOptions)> {
        self.calls.lock().unwrap().clone()
    }

    /// Content of the last message of the n-th call.
    pub fn last_prompt(&self, call: usize) -> String {
        let calls = self.calls.lock().unwrap();
        calls[call].0.last().map(|m| m.content.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> crate::providers::Result<ChatMessage> {
        self.calls
            .lock()
            .unwrap()
            .push((messages.to_vec(), options.clone()));
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(content)) => Ok(ChatMessage::assistant(content)),
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::other("script exhausted")),
        }
    }

    fn default_model(&self) -> Option<&str> {
        None
    }
}

/// Captures every outbound send; inbound events are pushed by the test.
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    media: Mutex<Vec<(String, String)>>,
    buttons: Mutex<Vec<(String, String, String)>>,
    contacts: Vec<Contact>,
    fail_sends: Mutex<bool>,
    events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    injector: mpsc::Sender<TransportEvent>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_contacts(Vec::new())
    }

    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            sent: Mutex::new(Vec::new()),
            media: Mutex::new(Vec::new()),
            buttons: Mutex::new(Vec::new()),
            contacts,
            fail_sends: Mutex::new(false),
            events: Mutex::new(Some(rx)),
            injector: tx,
        }
    }

    /// Feed an event to whoever called `start`.
    pub fn injector(&self) -> mpsc::Sender<TransportEvent> {
        self.injector.clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, target: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(t, _)| t == target)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn media(&self) -> Vec<(String, String)> {
        self.media.lock().unwrap().clone()
    }

    pub fn buttons(&self) -> Vec<(String, String, String)> {
        self.buttons.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        self.events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Transport("already started".to_string()))
    }

    async fn send_message(&self, target: &str, text: &str) -> Result<String> {
        if *self.fail_sends.lock().unwrap() {
            return Err(Error::Transport("send refused".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((target.to_string(), text.to_string()));
        Ok(format!("out-{}", sent.len()))
    }

    async fn send_button_reply(
        &self,
        target: &str,
        display_text: &str,
        button_id: &str,
    ) -> Result<String> {
        let mut buttons = self.buttons.lock().unwrap();
        buttons.push((
            target.to_string(),
            display_text.to_string(),
            button_id.to_string(),
        ));
        Ok(format!("btn-{}", buttons.len()))
    }

    async fn send_media(&self, target: &str, media_id: &str) -> Result<String> {
        let mut media = self.media.lock().unwrap();
        media.push((target.to_string(), media_id.to_string()));
        Ok(format!("media-{}", media.len()))
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>> {
        Ok(media.id.as_bytes().to_vec())
    }

    async fn contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.contacts.clone())
    }

    fn own_address(&self) -> String {
        "me@x".to_string()
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_http(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
