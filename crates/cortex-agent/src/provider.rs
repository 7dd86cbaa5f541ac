use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cortex_context::ToolExchange;

/// A single message in the model's conversation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One model-turn request.
///
/// `tool_round_trip` carries the results of synchronous tool calls executed
/// since the first round; providers append them to the conversation in
/// whatever block format their API wants.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    /// Chronological; always ends with a user-role message.
    pub messages: Vec<TurnMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_round_trip: Vec<ToolExchange>,
}

/// Non-streaming model response.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },
}

/// Injected model contract. Implementations wrap whatever provider or SDK
/// the deployment uses; the loop only sees request/response structs.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;
}
