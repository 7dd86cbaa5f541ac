use std::collections::BTreeMap;

use cortex_sessions::{PendingOp, SessionMessage};
use serde::{Deserialize, Serialize};

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// One named layer of the assembled context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextLayer {
    pub name: &'static str,
    pub content: String,
    pub tokens: usize,
}

impl ContextLayer {
    pub fn new(name: &'static str, content: String) -> Self {
        let tokens = estimate_tokens(&content);
        Self {
            name,
            content,
            tokens,
        }
    }
}

/// One executed synchronous tool call carried back into the next model round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExchange {
    /// Provider-assigned call id, echoed back with the result.
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: String,
}

/// The full per-turn context handed to the model call.
///
/// Layers always appear in the fixed order `system_floor`, `foreground`,
/// `background`, `archived`; the last is always empty and present only so
/// downstream handling stays uniform.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub layers: Vec<ContextLayer>,
    /// Foreground session messages, chronological.
    pub foreground: Vec<SessionMessage>,
    /// Per-channel one-line background summaries.
    pub background: BTreeMap<String, String>,
    pub pending_ops: Vec<PendingOp>,
    pub is_ops_trigger: bool,
    /// Filled by the loop during the tool round-trip sub-loop.
    pub tool_round_trip: Vec<ToolExchange>,
}

impl AssembledContext {
    pub fn total_tokens(&self) -> usize {
        self.layers.iter().map(|l| l.tokens).sum()
    }

    pub fn system_floor(&self) -> &str {
        &self.layers[0].content
    }

    pub fn layer(&self, name: &str) -> Option<&ContextLayer> {
        self.layers.iter().find(|l| l.name == name)
    }
}
