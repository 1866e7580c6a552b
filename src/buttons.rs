//! Last interactive (buttons/list) message per chat.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::transport::ButtonOption;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractiveContext {
    pub message_id: String,
    pub chat: String,
    pub sender: String,
    pub options: Vec<ButtonOption>,
}

/// Owned by the daemon and shared with `button_response`.
#[derive(Default)]
pub struct InteractiveStore {
    last: Mutex<HashMap<String, InteractiveContext>>,
}

impl InteractiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the newest interactive message of a chat, replacing the previous one.
    pub fn record(&self, chat: &str, context: InteractiveContext) {
        tracing::debug!(
            chat,
            message_id = %context.message_id,
            options = context.options.len(),
            "Stored interactive context"
        );
        self.last
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(chat.to_string(), context);
    }

    pub fn get(&self, chat: &str) -> Option<InteractiveContext> {
        self.last
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(chat)
            .cloned()
    }

    /// Find the option whose display text matches, ignoring case and
    /// surrounding whitespace.
    pub fn resolve(&self, chat: &str, display_text: &str) -> Option<ButtonOption> {
        let wanted = display_text.trim();
        self.get(chat)?
            .options
            .into_iter()
            .find(|o| o.display_text.trim().eq_ignore_ascii_case(wanted))
    }
}
