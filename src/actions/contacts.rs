//! `search_contacts`: look up an address by name or number.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{payload_object, Action, ActionContext, ActionSchema};
use crate::contacts::ContactDirectory;
use crate::error::Result;

#[derive(Deserialize)]
struct SearchInput {
    query: String,
}

pub struct SearchContacts {
    contacts: Arc<ContactDirectory>,
}

impl SearchContacts {
    pub fn new(contacts: Arc<ContactDirectory>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl Action for SearchContacts {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "search_contacts".to_string(),
            description: "Search for a contact's JID by name (fuzzy match) or number. Use this \
                to find the JID before sending messages or creating tasks if the exact JID is \
                unknown."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The name or number term to search for (case-insensitive)"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        // A bare string is taken as the query.
        let query = match payload {
            Value::String(s) => payload_object::<SearchInput>(payload)
                .map(|i| i.query)
                .unwrap_or_else(|_| s.clone()),
            _ => payload_object::<SearchInput>(payload)?.query,
        };

        let found = self.contacts.search(&query);
        let result = if found.is_empty() {
            "No contacts found.".to_string()
        } else {
            found
                .iter()
                .map(|c| format!("- {} ({})", c.name, c.number))
                .collect::<Vec<_>>()
                .join("\n")
        };
        tracing::debug!(query = %query, hits = found.len(), "Contact search");
        ctx.tool_outputs
            .push(format!("[search_contacts] Results for '{}':\n{}", query, result));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::Fixture;
    use serde_json::json;

    #[tokio::test]
    async fn test_results_become_tool_output() {
        let fx = Fixture::new();
        let registry = fx.registry();
        let mut ctx = fx.command_ctx();
        let search = registry.get("search_contacts").unwrap();

        search.execute(&mut ctx, &json!({"query": "ana"})).await.unwrap();
        search.execute(&mut ctx, &json!("zed")).await.unwrap();

        assert_eq!(
            ctx.tool_outputs,
            vec![
                "[search_contacts] Results for 'ana':\n- Ana (12345@domain)".to_string(),
                "[search_contacts] Results for 'zed':\nNo contacts found.".to_string(),
            ]
        );
    }
}
