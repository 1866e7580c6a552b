//! `enable_behavior` / `disable_behavior`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{payload_id, payload_object, Action, ActionContext, ActionSchema};
use crate::error::Result;

#[derive(Deserialize)]
struct EnableInput {
    contact: String,
    name: String,
    #[serde(default)]
    comments: String,
}

pub struct EnableBehavior;

#[async_trait]
impl Action for EnableBehavior {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "enable_behavior".to_string(),
            description: "Enable a standing behavior for a contact. The name must be one of the \
                behavior templates. Use comments for contact-specific details."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "contact": {"type": "string", "description": "The contact number"},
                    "name": {"type": "string", "description": "Behavior template name"},
                    "comments": {"type": "string"}
                },
                "required": ["contact", "name"]
            }),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        let input: EnableInput = payload_object(payload)?;
        // Unknown templates are refused before anything is written.
        ctx.behaviors.template(input.name.trim())?;
        ctx.behaviors
            .enable(&input.contact, &input.name, &input.comments)?;
        Ok(())
    }
}

pub struct DisableBehavior;

#[async_trait]
impl Action for DisableBehavior {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "disable_behavior".to_string(),
            description: "Disable an active behavior. Content is the behavior ID.".to_string(),
            parameters: json!({"type": "string", "description": "The Behavior ID."}),
        }
    }

    async fn execute(&self, ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        ctx.behaviors.disable(payload_id(payload)?)
    }
}
