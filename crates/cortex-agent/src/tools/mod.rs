//! Synchronous tool runtime.
//!
//! Sync tools execute locally and return text before the next model round;
//! the loop bounds rounds per turn. The async dispatch tool
//! (`sessions_spawn`) never returns data in-turn — it is declared here but
//! handled by the dispatch path, and is withheld entirely on ops-trigger
//! turns.

pub mod fetch_history;
pub mod memory_query;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::ToolDefinition;

/// Name of the asynchronous dispatch tool.
pub const SPAWN_TOOL_NAME: &str = "sessions_spawn";

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Text content returned to the model.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Failures come back as a JSON error object so the model can recover
    /// in the next round.
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: serde_json::json!({ "error": message.to_string() }).to_string(),
            is_error: true,
        }
    }
}

/// Trait all synchronous tools implement.
#[async_trait]
pub trait SyncTool: Send + Sync {
    /// Unique name (e.g. "fetch_chat_history").
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, args: serde_json::Value) -> ToolOutcome;
}

/// Registry of the synchronous tools available this turn.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn SyncTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn SyncTool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SyncTool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}

/// Definition of the async dispatch tool, appended to the tool list on
/// every turn except ops triggers.
pub fn spawn_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: SPAWN_TOOL_NAME.to_string(),
        description: "Dispatch a task to a background executor. The result arrives later \
                      as a task update; acknowledge the dispatch in your reply."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "What the executor should do" },
                "context": { "type": "string", "description": "Optional supporting context" }
            },
            "required": ["task"]
        }),
    }
}
