//! OpenAI-compatible `/chat/completions` provider (OpenAI, Cerebras and friends).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::provider::{ChatMessage, ChatOptions, Provider, ProviderError, Result};

pub const CEREBRAS_BASE_URL: &str = "https://api.cerebras.ai/v1";
pub const CEREBRAS_MODEL: &str = "gpt-oss-120b";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiProvider {
    client: Client,
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl OpenAiProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Unauthorized("API key is empty".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            default_model: model.into(),
        })
    }

    /// Read the bearer key from a file, trimming whitespace.
    pub fn read_key_file(path: &Path) -> Result<String> {
        let key = std::fs::read_to_string(path)?;
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(ProviderError::Unauthorized(format!(
                "API key file {} is empty",
                path.display()
            )));
        }
        Ok(key)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatMessage> {
        let request = ChatRequest {
            model: options.model.as_deref().unwrap_or(&self.default_model),
            messages,
            stream: false,
            max_tokens: options.max_tokens.unwrap_or(32768),
            temperature: options.temperature.unwrap_or(0.2),
            top_p: 0.99,
        };

        tracing::debug!(
            provider = %self.name,
            model = request.model,
            messages = messages.len(),
            "chat completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::Unauthorized(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ProviderError::ParseError("no choices in response".to_string()))
    }

    fn default_model(&self) -> Option<&str> {
        Some(&self.default_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_http;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_chat_sends_bearer_and_reads_first_choice() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": format!("{}|{}|{}", auth, body["model"], body["messages"][0]["content"])
                        }
                    }]
                }))
            }),
        );
        let base = spawn_http(app).await;

        let provider =
            OpenAiProvider::new("cerebras", format!("{}/v1", base), " secret \n", "m1").unwrap();
        let reply = provider
            .chat(&[ChatMessage::user("hello")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.role, "assistant");
        assert_eq!(reply.content, "Bearer secret|\"m1\"|\"hello\"");
    }

    #[tokio::test]
    async fn test_unauthorized_status_is_classified() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "nope") }),
        );
        let base = spawn_http(app).await;

        let provider = OpenAiProvider::new("openai", base, "k", "m").unwrap();
        let err = provider
            .chat(&[ChatMessage::user("x")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized(_)));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(OpenAiProvider::new("openai", OPENAI_BASE_URL, "  ", OPENAI_MODEL).is_err());
    }
}
