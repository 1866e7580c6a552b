//! Timeout and retry wrapper around any provider.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::provider::{ChatMessage, ChatOptions, Provider, ProviderError, Result};

/// How long one attempt may take and how long to wait between attempts.
#[derive(Debug, Clone)]
pub struct ExecutionContract {
    pub timeout_seconds: u64,
    /// One entry per retry; the number of attempts is `backoff.len() + 1`.
    pub backoff: Vec<Duration>,
}

impl Default for ExecutionContract {
    fn default() -> Self {
        Self {
            timeout_seconds: 222,
            backoff: vec![Duration::from_secs(7), Duration::from_secs(29)],
        }
    }
}

impl ExecutionContract {
    pub fn new(timeout_seconds: u64, retries: u32) -> Self {
        let schedule = Self::default().backoff;
        let backoff = (0..retries as usize)
            .map(|i| {
                schedule
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| Duration::from_secs(29))
            })
            .collect();
        Self {
            timeout_seconds,
            backoff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    Timeout,
    Unauthorized,
    ProviderUnavailable,
    BadResponse,
    Unknown,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCode::Timeout => write!(f, "timeout"),
            FailureCode::Unauthorized => write!(f, "unauthorized"),
            FailureCode::ProviderUnavailable => write!(f, "provider_unavailable"),
            FailureCode::BadResponse => write!(f, "bad_response"),
            FailureCode::Unknown => write!(f, "unknown"),
        }
    }
}

pub fn classify_error(error: &ProviderError) -> FailureCode {
    match error {
        ProviderError::Timeout(_) => FailureCode::Timeout,
        ProviderError::Unauthorized(_) => FailureCode::Unauthorized,
        ProviderError::NotAvailable(_) => FailureCode::ProviderUnavailable,
        ProviderError::ParseError(_) => FailureCode::BadResponse,
        ProviderError::HttpError(e) if e.is_connect() || e.is_timeout() => {
            FailureCode::ProviderUnavailable
        }
        other => {
            let m = other.to_string().to_lowercase();
            if m.contains("unauthorized") || m.contains("forbidden") {
                FailureCode::Unauthorized
            } else if m.contains("connection") || m.contains("timeout") || m.contains("503") {
                FailureCode::ProviderUnavailable
            } else {
                FailureCode::Unknown
            }
        }
    }
}

/// Provider decorator applying an [`ExecutionContract`].
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    contract: ExecutionContract,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, contract: ExecutionContract) -> Self {
        Self { inner, contract }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatMessage> {
        let attempts = self.contract.backoff.len() + 1;
        let timeout = Duration::from_secs(self.contract.timeout_seconds);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let error = match tokio::time::timeout(timeout, self.inner.chat(messages, options)).await
            {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(self.contract.timeout_seconds),
            };

            let code = classify_error(&error);
            tracing::warn!(
                provider = self.inner.name(),
                %code,
                "Chat attempt {}/{} failed: {}",
                attempt,
                attempts,
                error
            );
            last_error = Some(error);

            // Unauthorized is terminal.
            if code == FailureCode::Unauthorized {
                break;
            }
            if let Some(delay) = self.contract.backoff.get(attempt - 1) {
                tokio::time::sleep(*delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::other("chat failed for unknown reason")))
    }

    fn default_model(&self) -> Option<&str> {
        self.inner.default_model()
    }
}
