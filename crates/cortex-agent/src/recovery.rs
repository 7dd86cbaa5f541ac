use tracing::{info, warn};

use cortex_bus::MessageBus;
use cortex_sessions::SessionStore;

use crate::error::Result;

/// Reason written onto pending ops abandoned by a previous process.
pub const ORPHANED_OP_ERROR: &str = "orphaned from prior session";

/// What the startup sweep found and fixed.
#[derive(Debug)]
pub struct RecoveryReport {
    pub checkpoint_id: Option<i64>,
    pub stalled_reset: usize,
    pub queue_depth: usize,
    pub orphans_removed: usize,
    pub integrity: String,
    pub ops_failed: usize,
}

/// Crash-time sweep, run before the loop is allowed to tick.
///
/// Order matters: the latest checkpoint is informational, stalled
/// `processing` rows go back to `pending` (attempts increment on the next
/// pick-up), rows outside the allowed state set are deleted, the backing
/// store is integrity-checked, and pending ops left over from the prior
/// process are failed out so the model sees them once and they archive
/// normally.
pub fn run_startup_recovery(bus: &MessageBus, sessions: &SessionStore) -> Result<RecoveryReport> {
    let checkpoint = bus.load_latest_checkpoint()?;
    if let Some(cp) = &checkpoint {
        info!(checkpoint_id = cp.id, created_at = %cp.created_at, "latest checkpoint loaded");
    } else {
        info!("no checkpoint found, fresh store");
    }

    let stalled_reset = bus.reset_stalled()?;
    let queue_depth = bus.peek_pending()?.len();
    info!(stalled_reset, queue_depth, "bus swept");

    let orphans_removed = bus.remove_orphans()?;

    let integrity = bus.integrity_check()?;
    if integrity != "ok" {
        warn!(verdict = %integrity, "store integrity check reported issues");
    }

    // Single-process system: any still-pending op predates this process.
    let mut ops_failed = 0;
    for op in sessions.pending_ops()? {
        warn!(op_id = %op.id, "failing orphaned pending op");
        sessions.fail_op(&op.id, ORPHANED_OP_ERROR)?;
        ops_failed += 1;
    }

    Ok(RecoveryReport {
        checkpoint_id: checkpoint.map(|cp| cp.id),
        stalled_reset,
        queue_depth,
        orphans_removed,
        integrity,
        ops_failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use cortex_core::types::{Envelope, Priority, Relationship, SenderRef};
    use cortex_sessions::{OpKind, OpStatus, PendingOp};
    use rusqlite::Connection;

    fn stores() -> (Arc<MessageBus>, Arc<SessionStore>) {
        let conn = Connection::open_in_memory().unwrap();
        cortex_bus::db::init_db(&conn).unwrap();
        cortex_sessions::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        (
            Arc::new(MessageBus::new(db.clone())),
            Arc::new(SessionStore::new(db)),
        )
    }

    fn envelope(content: &str) -> Envelope {
        Envelope::new(
            "webchat",
            SenderRef::new("u1", "U", Relationship::External),
            content,
            Priority::Normal,
        )
    }

    #[test]
    fn recovery_resets_stalled_and_reports_depth() {
        let (bus, sessions) = stores();
        let a = envelope("a");
        let b = envelope("b");
        let c = envelope("c");
        for env in [&a, &b, &c] {
            bus.enqueue(env).unwrap();
        }
        bus.mark_processing(&a.id).unwrap();
        bus.mark_completed(&a.id).unwrap();
        bus.mark_processing(&b.id).unwrap();

        let report = run_startup_recovery(&bus, &sessions).unwrap();
        assert_eq!(report.stalled_reset, 1);
        assert_eq!(report.queue_depth, 2);
        assert_eq!(report.integrity, "ok");

        let next = bus.dequeue_next().unwrap().unwrap();
        assert_eq!(next.envelope.content, "b");
    }

    #[test]
    fn orphaned_pending_ops_are_failed_once() {
        let (bus, sessions) = stores();
        sessions
            .add_op(&PendingOp::new("job-old", OpKind::RouterJob, "left behind", "router"))
            .unwrap();

        let report = run_startup_recovery(&bus, &sessions).unwrap();
        assert_eq!(report.ops_failed, 1);

        let op = sessions.op("job-old").unwrap().unwrap();
        assert_eq!(op.status, OpStatus::Failed);
        assert_eq!(op.result.as_deref(), Some(ORPHANED_OP_ERROR));

        // The failed op surfaces once, then archives through the normal path.
        assert_eq!(sessions.copy_and_delete_terminal_ops().unwrap(), 1);
        assert!(sessions.op("job-old").unwrap().is_none());
    }
}
