use async_trait::async_trait;

use cortex_sessions::PendingOp;

/// Dispatched descriptions are truncated to this length in evidence rows.
const DESCRIPTION_TRUNCATE: usize = 120;

/// One async task handed to the external executor (the Router).
///
/// The id is generated by the core and persisted in the pending-ops table
/// before the spawner ever runs, so a crashed dispatcher leaves a
/// recoverable row behind rather than an untracked task.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub id: String,
    pub description: String,
    /// Serialized payload forwarded opaquely to the executor.
    pub payload: serde_json::Value,
    /// Channel the eventual result should route back to.
    pub reply_channel: String,
}

/// Injected spawn callback. Returns the accepted job id, or `None` when the
/// dispatch failed — the caller then fails the pending op immediately.
#[async_trait]
pub trait TaskSpawner: Send + Sync {
    async fn spawn(&self, request: &SpawnRequest) -> Option<String>;
}

/// Render the dispatch-evidence session row for an op.
///
/// Written as an assistant row in the same turn as the dispatch, so the
/// model sees its own past action on subsequent turns — its tool-use blocks
/// are not retained across turns.
pub fn evidence_row(op: &PendingOp) -> String {
    format!(
        "[DISPATCHED] [TASK_ID]={}, Message='{}', Status=Pending, Channel={}, DispatchedAt={}",
        op.id,
        truncate(&op.description, DESCRIPTION_TRUNCATE),
        op.target_channel(),
        op.dispatched_at,
    )
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_sessions::OpKind;

    #[test]
    fn evidence_row_has_wire_format() {
        let mut op = PendingOp::new("task-1", OpKind::RouterJob, "check the logs", "webchat");
        op.reply_channel = Some("whatsapp".to_string());
        let row = evidence_row(&op);
        assert!(row.starts_with("[DISPATCHED] [TASK_ID]=task-1, Message='check the logs', "));
        assert!(row.contains("Status=Pending"));
        assert!(row.contains("Channel=whatsapp"));
        assert!(row.contains("DispatchedAt="));
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let op = PendingOp::new("t", OpKind::RouterJob, "x".repeat(500), "webchat");
        let row = evidence_row(&op);
        assert!(row.contains(&format!("{}…", "x".repeat(120))));
    }
}
