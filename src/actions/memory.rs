//! `memory_update` and `memory_append`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{payload_string, Action, ActionContext, ActionSchema};
use crate::error::Result;
use crate::memory::MemoryFile;

pub struct MemoryUpdate {
    memory: Arc<MemoryFile>,
}

impl MemoryUpdate {
    pub fn new(memory: Arc<MemoryFile>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Action for MemoryUpdate {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "memory_update".to_string(),
            description: "The **full, updated version** of the Global Memory. Use this ONLY to \
                REWRITE the entire memory. For adding lines, use memory_append. Global memory \
                IS NOT FOR TASKS."
                .to_string(),
            parameters: json!({"type": "string", "description": "The full memory text."}),
        }
    }

    async fn execute(&self, _ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        self.memory.replace(&payload_string(payload))?;
        tracing::info!("Memory rewritten");
        Ok(())
    }
}

pub struct MemoryAppend {
    memory: Arc<MemoryFile>,
}

impl MemoryAppend {
    pub fn new(memory: Arc<MemoryFile>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Action for MemoryAppend {
    fn schema(&self) -> ActionSchema {
        ActionSchema {
            name: "memory_append".to_string(),
            description: "Append a new line or lines to the Global Memory. Use this for \
                incremental updates. Global memory IS NOT FOR TASKS."
                .to_string(),
            parameters: json!({"type": "string", "description": "The text to append."}),
        }
    }

    async fn execute(&self, _ctx: &mut ActionContext, payload: &Value) -> Result<()> {
        let text = payload_string(payload);
        if text.trim().is_empty() {
            return Ok(());
        }
        self.memory.append(&text)?;
        tracing::info!("Memory appended");
        Ok(())
    }
}
