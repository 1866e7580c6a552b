//! LLM providers module.

use std::sync::Arc;

pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod transcript;

pub use provider::{ChatMessage, ChatOptions, Provider, ProviderError, Result};
pub use retry::{ExecutionContract, RetryingProvider};

use crate::config::{ProviderModel, Settings};
use crate::error::Error;

/// Build the configured provider stack: backend, then retry, then transcripts.
pub fn create_provider(settings: &Settings) -> crate::error::Result<Arc<dyn Provider>> {
    let models = &settings.models;
    let backend: Arc<dyn Provider> = match models.provider.as_str() {
        "ollama" => {
            let mut provider = match &models.ollama.base_url {
                Some(url) => ollama::OllamaProvider::with_base_url(url.clone()),
                None => ollama::OllamaProvider::new(),
            };
            if let Some(model) = &models.ollama.model {
                provider = provider.model(model.clone());
            }
            Arc::new(provider)
        }
        "cerebras" => Arc::new(openai_compatible(
            "cerebras",
            &models.cerebras,
            openai::CEREBRAS_BASE_URL,
            openai::CEREBRAS_MODEL,
        )?),
        "openai" => Arc::new(openai_compatible(
            "openai",
            &models.openai,
            openai::OPENAI_BASE_URL,
            openai::OPENAI_MODEL,
        )?),
        other => return Err(Error::Config(format!("Unknown provider: {}", other))),
    };

    let contract = ExecutionContract::new(models.request_timeout_seconds, models.retries);
    tracing::debug!(
        provider = backend.name(),
        timeout = contract.timeout_seconds,
        attempts = contract.backoff.len() + 1,
        "Configured LLM provider"
    );
    let mut stack: Arc<dyn Provider> = Arc::new(RetryingProvider::new(backend, contract));

    if let Some(dir) = &models.transcript_dir {
        stack = Arc::new(transcript::TranscriptProvider::new(stack, dir.clone()));
    }
    Ok(stack)
}

fn openai_compatible(
    name: &str,
    config: &ProviderModel,
    default_url: &str,
    default_model: &str,
) -> crate::error::Result<openai::OpenAiProvider> {
    let key = match (&config.api_key, &config.api_key_file) {
        (Some(key), _) => key.clone(),
        (None, Some(path)) => openai::OpenAiProvider::read_key_file(path)?,
        (None, None) => {
            return Err(Error::Config(format!(
                "models.{}.api_key or api_key_file is required",
                name
            )))
        }
    };
    Ok(openai::OpenAiProvider::new(
        name,
        config.base_url.as_deref().unwrap_or(default_url),
        key,
        config.model.as_deref().unwrap_or(default_model),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cerebras_requires_key() {
        let settings: Settings =
            serde_json::from_str(r#"{"models": {"provider": "cerebras"}}"#).unwrap();
        assert!(matches!(create_provider(&settings), Err(Error::Config(_))));
    }

    #[test]
    fn test_cerebras_key_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("key");
        std::fs::write(&key, "abc\n").unwrap();
        let mut settings = Settings::default();
        settings.models.provider = "cerebras".to_string();
        settings.models.cerebras.api_key_file = Some(key);

        let provider = create_provider(&settings).unwrap();
        assert_eq!(provider.name(), "cerebras");
        assert_eq!(provider.default_model(), Some(openai::CEREBRAS_MODEL));
    }
}
