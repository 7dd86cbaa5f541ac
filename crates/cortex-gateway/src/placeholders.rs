//! Default collaborators for a bare binary run.
//!
//! These keep the full pipeline observable without external services: the
//! model stays silent, the evaluator sizes everything mid-range, and the
//! executor fails jobs visibly so they flow back through the normal
//! failure path.

use async_trait::async_trait;

use cortex_agent::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use cortex_router::{Executor, WeightModel};

/// Answers every turn with the silence sentinel.
pub struct SilentModel;

#[async_trait]
impl ModelProvider for SilentModel {
    async fn complete(&self, _request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        Ok(ModelResponse {
            content: "HEARTBEAT_OK".to_string(),
            tool_calls: Vec::new(),
        })
    }
}

/// Sizes every task at the midpoint.
pub struct MidweightEvaluator;

#[async_trait]
impl WeightModel for MidweightEvaluator {
    async fn assess(&self, _task: &str) -> cortex_router::Result<String> {
        Ok(r#"{"weight": 5, "reasoning": "no evaluator configured"}"#.to_string())
    }
}

/// Rejects all work; jobs fail through the normal notifier path.
pub struct UnconfiguredExecutor;

#[async_trait]
impl Executor for UnconfiguredExecutor {
    async fn execute(&self, _prompt: &str, _model: &str) -> Result<String, String> {
        Err("no executor configured".to_string())
    }
}
