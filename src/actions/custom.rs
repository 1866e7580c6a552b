//! HTTP actions configured by the operator.
//!
//! Every `*.json` file in the actions directory describes one action:
//!
//! ```json
//! {
//!   "name": "lookup_order",
//!   "description": "Fetch an order by id",
//!   "method": "GET",
//!   "url": "https://shop.example/orders/{order_id}",
//!   "headers": {"Authorization": "Bearer ..."},
//!   "parameters": {"type": "object", "properties": {"order_id": {"type": "string"}}},
//!   "response_to_llm": true
//! }
//! ```
//!
//! `{field}` placeholders in the URL are filled from the payload and those
//! fields are dropped. GET sends what is left as query parameters, any
//! other method as a JSON body.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{payload_object, payload_string, Action, ActionContext, ActionSchema, Registry};
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest response body fed back to the model.
const MAX_OUTPUT_CHARS: usize = 4000;

fn default_method() -> String {
    "POST".to_string()
}

fn default_parameters() -> Value {
    serde_json::json!({"type": "object"})
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CustomActionConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    #[serde(default)]
    pub response_to_llm: bool,
}

pub struct CustomAction {
    config: CustomActionConfig,
    client: reqwest::Client,
    placeholder: Regex,
}

fn placeholder_regex() -> Result<Regex> {
    Regex::new(r"\{(\w+)\}").map_err(|e| Error::Config(e.to_string()))
}

/// Substitute `{field}` from `fields`, removing every field used.
fn fill_url(placeholder: &Regex, template: &str, fields: &mut Map<String, Value>) -> String {
    let mut used = Vec::new();
    let url = placeholder
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match fields.get(key) {
                Some(value) => {
                    used.push(key.to_string());
                    payload_string(value)
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned();
    for key in used {
        fields.remove(&key);
    }
    url
}

impl CustomAction {
    pub fn new(config: CustomActionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            config,
            client,
            placeholder: placeholder_regex()?,
        })
    }
}

#[async_trait]
impl Action for CustomAction {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            parameters: self.config.parameters.clone(),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        let mut fields: Map<String, Value> = match payload {
            Value::Null => Map::new(),
            _ => payload_object(payload)?,
        };
        let url = fill_url(&self.placeholder, &self.config.url, &mut fields);
        let method = reqwest::Method::from_bytes(self.config.method.trim().to_uppercase().as_bytes())
            .map_err(|_| Error::Config(format!("invalid HTTP method '{}'", self.config.method)))?;

        let mut request = self.client.request(method.clone(), &url);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        request = if method == reqwest::Method::GET {
            let query: Vec<(String, String)> = fields
                .iter()
                .map(|(k, v)| (k.clone(), payload_string(v)))
                .collect();
            request.query(&query)
        } else {
            request.json(&fields)
        };

        tracing::info!(action = %self.config.name, %method, %url, "Calling custom action");
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Other(format!(
                "custom action '{}' returned HTTP {}: {}",
                self.config.name,
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        if self.config.response_to_llm {
            let body: String = body.chars().take(MAX_OUTPUT_CHARS).collect();
            ctx.tool_outputs
                .push(format!("[{}] Response: {}", self.config.name, body));
        }
        Ok(())
    }
}

/// Register every action file in `dir`. Files that fail to parse, and names
/// already taken, are skipped with a warning. Returns how many were added.
pub fn load_custom_actions(dir: &Path, registry: &mut Registry) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut added = 0;
    for path in paths {
        let parsed = std::fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|c| serde_json::from_str::<CustomActionConfig>(&c).map_err(Error::from));
        let config = match parsed {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Skipping custom action {}: {}", path.display(), e);
                continue;
            }
        };
        if registry.validate(&config.name).is_ok() {
            tracing::warn!(action = %config.name, "Custom action name already registered, skipping");
            continue;
        }
        let name = config.name.clone();
        registry.register(Arc::new(CustomAction::new(config)?));
        tracing::info!(action = %name, "Loaded custom action");
        added += 1;
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::Fixture;
    use super::*;
    use crate::testing::spawn_http;
    use axum::body::Bytes;
    use axum::extract::OriginalUri;
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::json;
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<String>>>;

    fn config(name: &str, method: &str, url: String) -> CustomActionConfig {
        CustomActionConfig {
            name: name.to_string(),
            description: String::new(),
            method: method.to_string(),
            url,
            headers: HashMap::new(),
            parameters: default_parameters(),
            response_to_llm: false,
        }
    }

    #[tokio::test]
    async fn test_loaded_post_action_sends_json_body() {
        let seen: Seen = Arc::default();
        let record = seen.clone();
        let app = Router::new().route(
            "/hook",
            post(move |body: Bytes| async move {
                record.lock().unwrap().push(String::from_utf8_lossy(&body).to_string());
                r#"{"status": "ok"}"#
            }),
        );
        let base = spawn_http(app).await;

        let fx = Fixture::new();
        let dir = fx.dir.path().join("actions");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("test_action.json"),
            json!({
                "name": "test_action",
                "description": "A test action",
                "url": format!("{}/hook", base),
                "response_to_llm": true,
                "parameters": {"type": "object"}
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.join("broken.json"), "{ not json").unwrap();
        std::fs::write(
            dir.join("shadow.json"),
            json!({"name": "response", "url": "http://127.0.0.1:1"}).to_string(),
        )
        .unwrap();

        let mut registry = fx.registry();
        let before = registry.len();
        assert_eq!(load_custom_actions(&dir, &mut registry).unwrap(), 1);
        assert_eq!(registry.len(), before + 1);

        let mut ctx = fx.command_ctx();
        registry
            .get("test_action")
            .unwrap()
            .execute(&mut ctx, &json!({"foo": "bar"}))
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), [r#"{"foo":"bar"}"#]);
        assert_eq!(ctx.tool_outputs, vec![r#"[test_action] Response: {"status": "ok"}"#]);
    }

    #[tokio::test]
    async fn test_get_uses_query_and_templating() {
        let seen: Seen = Arc::default();
        let record = seen.clone();
        let app = Router::new().route(
            "/docs/:doc_id",
            get(move |OriginalUri(uri): OriginalUri| async move {
                record.lock().unwrap().push(uri.to_string());
                "found"
            }),
        );
        let base = spawn_http(app).await;

        let action =
            CustomAction::new(config("get_doc", "get", format!("{}/docs/{{doc_id}}", base))).unwrap();
        let fx = Fixture::new();
        let mut ctx = fx.command_ctx();
        action
            .execute(&mut ctx, &json!({"doc_id": "456", "extra": "val"}))
            .await
            .unwrap();

        let uri = seen.lock().unwrap()[0].clone();
        assert!(uri.starts_with("/docs/456"), "{}", uri);
        assert!(uri.contains("extra=val"));
        assert!(!uri.contains("doc_id"));
        // response_to_llm is off
        assert!(ctx.tool_outputs.is_empty());
    }

    #[tokio::test]
    async fn test_http_error_fails_the_action() {
        let app = Router::new().route(
            "/boom",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "kaput") }),
        );
        let base = spawn_http(app).await;
        let action = CustomAction::new(config("boom", "POST", format!("{}/boom", base))).unwrap();
        let fx = Fixture::new();
        let mut ctx = fx.command_ctx();
        let err = action.execute(&mut ctx, &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_fill_url_keeps_unknown_placeholders() {
        let mut fields = Map::new();
        fields.insert("a".to_string(), json!(1));
        fields.insert("b".to_string(), json!("x"));
        let url = fill_url(&placeholder_regex().unwrap(), "http://h/{a}/{missing}", &mut fields);
        assert_eq!(url, "http://h/1/{missing}");
        assert!(fields.contains_key("b"));
        assert!(!fields.contains_key("a"));
    }
}
