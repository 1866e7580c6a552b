//! LLM provider trait for Blady.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not available: {0}")]
    NotAvailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn other(s: impl Into<String>) -> Self {
        ProviderError::Other(s.into())
    }
}

/// One chat turn, as sent to and received from a backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call knobs. Unset fields fall back to the backend's defaults.
#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Label for transcripts, e.g. `watcher` or `task-3`.
    pub tag: Option<String>,
}

impl ChatOptions {
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if model.is_some() {
            self.model = model;
        }
        self
    }
}

/// Chat-completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Check if the backend answers at all.
    async fn is_available(&self) -> bool {
        true
    }

    /// Send the whole conversation and return the assistant's reply.
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatMessage>;

    /// Get the default model.
    fn default_model(&self) -> Option<&str>;
}
