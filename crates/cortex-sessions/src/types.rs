use cortex_core::types::Priority;
use serde::{Deserialize, Serialize};

/// Which half of a turn a session row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// One row in the unified conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: i64,
    pub envelope_id: Option<String>,
    pub role: Role,
    pub channel: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: String,
    pub metadata: Option<serde_json::Value>,
}

/// Attention layer for a channel: foreground conversation goes into context
/// verbatim, background as a one-line summary, archived not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttentionLayer {
    #[default]
    Foreground,
    Background,
    Archived,
}

impl std::fmt::Display for AttentionLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionLayer::Foreground => write!(f, "foreground"),
            AttentionLayer::Background => write!(f, "background"),
            AttentionLayer::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for AttentionLayer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "foreground" => Ok(AttentionLayer::Foreground),
            "background" => Ok(AttentionLayer::Background),
            "archived" => Ok(AttentionLayer::Archived),
            other => Err(format!("unknown attention layer: {}", other)),
        }
    }
}

/// Per-channel lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel: String,
    pub last_message_at: String,
    pub unread_count: u32,
    /// Compressed conversation summary, filled by the background compactor.
    pub summary: Option<String>,
    pub layer: AttentionLayer,
}

/// What kind of async work a pending op tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    RouterJob,
    Subagent,
    CronTask,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::RouterJob => write!(f, "router_job"),
            OpKind::Subagent => write!(f, "subagent"),
            OpKind::CronTask => write!(f, "cron_task"),
        }
    }
}

impl std::str::FromStr for OpKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "router_job" => Ok(OpKind::RouterJob),
            "subagent" => Ok(OpKind::Subagent),
            "cron_task" => Ok(OpKind::CronTask),
            other => Err(format!("unknown op kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Pending,
    Completed,
    Failed,
}

impl OpStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpStatus::Completed | OpStatus::Failed)
    }
}

impl std::fmt::Display for OpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpStatus::Pending => write!(f, "pending"),
            OpStatus::Completed => write!(f, "completed"),
            OpStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for OpStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OpStatus::Pending),
            "completed" => Ok(OpStatus::Completed),
            "failed" => Ok(OpStatus::Failed),
            other => Err(format!("unknown op status: {}", other)),
        }
    }
}

/// An asynchronous task the model dispatched and the system tracks to
/// completion. The id is generated and owned by the core, never by the
/// external executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOp {
    pub id: String,
    pub kind: OpKind,
    pub description: String,
    pub dispatched_at: String,
    /// Where the result is expected to surface.
    pub expected_channel: String,
    pub status: OpStatus,
    pub completed_at: Option<String>,
    /// Result text on completion, error text on failure.
    pub result: Option<String>,
    /// User channel the follow-up reply should route to.
    pub reply_channel: Option<String>,
    pub result_priority: Option<Priority>,
}

impl PendingOp {
    pub fn new(
        id: impl Into<String>,
        kind: OpKind,
        description: impl Into<String>,
        expected_channel: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            dispatched_at: chrono::Utc::now().to_rfc3339(),
            expected_channel: expected_channel.into(),
            status: OpStatus::Pending,
            completed_at: None,
            result: None,
            reply_channel: None,
            result_priority: None,
        }
    }

    /// Channel the archived result row lands on.
    pub fn target_channel(&self) -> &str {
        self.reply_channel.as_deref().unwrap_or(&self.expected_channel)
    }
}
