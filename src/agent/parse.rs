//! Model output parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::payload_string;
use crate::error::{Error, Result};

/// Strip chatter and code fences around the JSON object in a model reply.
pub fn clean_json(content: &str) -> &str {
    let content = content.trim();
    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
        if end > start {
            return &content[start..=end];
        }
    }
    let content = content.strip_prefix("```json").unwrap_or(content);
    let content = content.strip_prefix("```").unwrap_or(content);
    content.strip_suffix("```").unwrap_or(content).trim()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    actions: Vec<RawAction>,
}

/// An action that was dispatched, with its payload as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

impl ExecutedAction {
    pub fn from_raw(raw: &RawAction) -> Self {
        Self {
            kind: raw.kind.clone(),
            content: payload_string(&raw.content),
        }
    }
}

/// Parse `{"actions": [...]}` out of a model reply.
pub fn parse_actions(reply: &str) -> Result<Vec<RawAction>> {
    let cleaned = clean_json(reply);
    let parsed: RawResponse = serde_json::from_str(cleaned)
        .map_err(|e| Error::Parse(format!("model reply is not an action list: {}", e)))?;
    Ok(parsed.actions)
}

/// Judge verdict as the watcher model writes it.
#[derive(Debug, Deserialize)]
pub struct RawVerdict {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub reason: String,
}

pub fn parse_verdict(reply: &str) -> Result<RawVerdict> {
    serde_json::from_str(clean_json(reply))
        .map_err(|e| Error::Parse(format!("watcher reply is not a verdict: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_json_extracts_object() {
        assert_eq!(clean_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(clean_json("Sure! {\"a\": {\"b\": 2}} hope it helps"), "{\"a\": {\"b\": 2}}");
        assert_eq!(clean_json("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(clean_json("} nothing {"), "} nothing {");
    }

    #[test]
    fn test_parse_actions_keeps_payload_shapes() {
        let actions = parse_actions(
            r#"```json
            {"actions": [
                {"type": "response", "content": "Hola"},
                {"type": "confirm_task", "content": 3},
                {"type": "search_contacts", "content": {"query": "ana"}},
                {"type": "memory_append"}
            ]}
            ```"#,
        )
        .unwrap();
        assert_eq!(actions.len(), 4);
        assert_eq!(ExecutedAction::from_raw(&actions[0]).content, "Hola");
        assert_eq!(ExecutedAction::from_raw(&actions[1]).content, "3");
        assert_eq!(
            ExecutedAction::from_raw(&actions[2]).content,
            r#"{"query":"ana"}"#
        );
        assert_eq!(ExecutedAction::from_raw(&actions[3]).content, "");
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(parse_actions("I cannot help"), Err(Error::Parse(_))));
        assert!(parse_actions("{\"actions\": \"nope\"}").is_err());
        assert!(parse_actions("{}").unwrap().is_empty());
    }

    #[test]
    fn test_verdict() {
        let v = parse_verdict("{\"action\": \"block\", \"reason\": \"leaks address\"}").unwrap();
        assert_eq!(v.action, "block");
        assert_eq!(v.reason, "leaks address");
        assert_eq!(parse_verdict("{}").unwrap().action, "");
        assert!(parse_verdict("allow").is_err());
    }
}
