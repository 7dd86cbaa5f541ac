use cortex_core::types::Envelope;
use serde::{Deserialize, Serialize};

/// Bus entry lifecycle. The only valid transitions are
/// pending→processing, processing→completed, processing→failed and
/// failed→pending (retry); completed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for BusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusState::Pending => write!(f, "pending"),
            BusState::Processing => write!(f, "processing"),
            BusState::Completed => write!(f, "completed"),
            BusState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for BusState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BusState::Pending),
            "processing" => Ok(BusState::Processing),
            "completed" => Ok(BusState::Completed),
            "failed" => Ok(BusState::Failed),
            other => Err(format!("unknown bus state: {}", other)),
        }
    }
}

/// An envelope plus its queue tracking fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEntry {
    pub envelope: Envelope,
    pub state: BusState,
    pub enqueued_at: String,
    /// Set when the entry reaches a terminal state; a failed→pending retry
    /// keeps the value from the previous attempt.
    pub processed_at: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
    pub checkpoint_id: Option<i64>,
}

/// What gets written at the end of every completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Short human-readable snapshot (last envelope id, counts).
    pub session_snapshot: String,
    pub channel_states: serde_json::Value,
    pub pending_ops: serde_json::Value,
}

/// A persisted checkpoint row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub created_at: String,
    pub session_snapshot: String,
    pub channel_states: serde_json::Value,
    pub pending_ops: serde_json::Value,
}
