use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use cortex_bus::MessageBus;
use cortex_core::config::CORTEX_ISSUER;
use cortex_core::types::{Envelope, Priority};
use cortex_router::{DeliveryHandler, RouterJob, RouterQueue};
use cortex_sessions::store::SYSTEM_SENDER;
use cortex_sessions::SessionStore;

use crate::dispatch::{SpawnRequest, TaskSpawner};

/// Job type used for model-dispatched work.
const DISPATCH_JOB_TYPE: &str = "general";

/// The cortex→router half of the contract: hands a pre-generated task id
/// and payload to the router queue. The pending-op row already exists by
/// the time this runs.
pub struct RouterSpawner {
    queue: Arc<RouterQueue>,
}

impl RouterSpawner {
    pub fn new(queue: Arc<RouterQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl TaskSpawner for RouterSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Option<String> {
        let payload = serde_json::json!({
            "task": request.description,
            "context": request.payload,
        })
        .to_string();
        match self
            .queue
            .enqueue(&request.id, DISPATCH_JOB_TYPE, &payload, CORTEX_ISSUER)
        {
            Ok(job) => Some(job.id),
            Err(e) => {
                error!(op_id = %request.id, error = %e, "router enqueue failed");
                None
            }
        }
    }
}

/// Closes the loop between the router and the core.
///
/// For Cortex-issued jobs the result is never pushed into a channel
/// directly: the pending op flips to its terminal state and a synthetic
/// ops-trigger envelope wakes the loop, which surfaces the result to the
/// model for acknowledgement. Jobs from other issuers get a system-labelled
/// row in their own conversation instead.
pub struct CortexDeliveryHandler {
    sessions: Arc<SessionStore>,
    bus: Arc<MessageBus>,
}

impl CortexDeliveryHandler {
    pub fn new(sessions: Arc<SessionStore>, bus: Arc<MessageBus>) -> Self {
        Self { sessions, bus }
    }

    fn finish_and_wake(&self, job: &RouterJob, text: &str, failed: bool) {
        let result = if failed {
            self.sessions.fail_op(&job.id, text)
        } else {
            self.sessions.complete_op(&job.id, text)
        };
        if let Err(e) = result {
            warn!(job_id = %job.id, error = %e, "could not record op result");
            return;
        }

        let priority = self
            .sessions
            .op(&job.id)
            .ok()
            .flatten()
            .and_then(|op| op.result_priority)
            .unwrap_or(Priority::Normal);

        let trigger = Envelope::ops_trigger(&job.id, priority);
        match self.bus.enqueue(&trigger) {
            Ok(_) => info!(job_id = %job.id, "ops trigger enqueued"),
            Err(e) => error!(job_id = %job.id, error = %e, "failed to enqueue ops trigger"),
        }
    }

    fn notify_issuer(&self, job: &RouterJob, text: &str, failed: bool) {
        let label = if failed { "failed" } else { "completed" };
        let content = format!("[system] Task {} {}: {}", job.id, label, text);
        if let Err(e) = self
            .sessions
            .append_user(&job.issuer, SYSTEM_SENDER, &content, None)
        {
            warn!(job_id = %job.id, issuer = %job.issuer, error = %e, "could not notify issuer");
        }
    }
}

#[async_trait]
impl DeliveryHandler for CortexDeliveryHandler {
    async fn on_delivered(&self, job: &RouterJob) {
        let result = job.result.clone().unwrap_or_default();
        if job.issuer == CORTEX_ISSUER {
            self.finish_and_wake(job, &result, false);
        } else {
            self.notify_issuer(job, &result, false);
        }
    }

    async fn on_failed(&self, job: &RouterJob, error: &str) {
        if job.issuer == CORTEX_ISSUER {
            self.finish_and_wake(job, error, true);
        } else {
            self.notify_issuer(job, error, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use cortex_router::JobStatus;
    use cortex_sessions::{OpKind, OpStatus, PendingOp};
    use rusqlite::Connection;

    fn fixture() -> (Arc<SessionStore>, Arc<MessageBus>, CortexDeliveryHandler) {
        let conn = Connection::open_in_memory().unwrap();
        cortex_bus::db::init_db(&conn).unwrap();
        cortex_sessions::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let sessions = Arc::new(SessionStore::new(db.clone()));
        let bus = Arc::new(MessageBus::new(db));
        let handler = CortexDeliveryHandler::new(sessions.clone(), bus.clone());
        (sessions, bus, handler)
    }

    fn job(id: &str, issuer: &str, result: Option<&str>) -> RouterJob {
        RouterJob {
            id: id.to_string(),
            job_type: "general".to_string(),
            status: JobStatus::Completed,
            weight: Some(3),
            tier: None,
            issuer: issuer.to_string(),
            payload: "{}".to_string(),
            result: result.map(str::to_string),
            error: None,
            retry_count: 0,
            worker_id: None,
            last_checkpoint: None,
            created_at: String::new(),
            updated_at: String::new(),
            started_at: None,
            finished_at: None,
            delivered_at: None,
        }
    }

    #[tokio::test]
    async fn cortex_delivery_completes_op_and_enqueues_trigger() {
        let (sessions, bus, handler) = fixture();
        let mut op = PendingOp::new("job-1", OpKind::RouterJob, "do a thing", "router");
        op.reply_channel = Some("webchat".to_string());
        op.result_priority = Some(Priority::Urgent);
        sessions.add_op(&op).unwrap();

        handler
            .on_delivered(&job("job-1", CORTEX_ISSUER, Some("all done")))
            .await;

        let stored = sessions.op("job-1").unwrap().unwrap();
        assert_eq!(stored.status, OpStatus::Completed);
        assert_eq!(stored.result.as_deref(), Some("all done"));

        let entry = bus.dequeue_next().unwrap().expect("ops trigger enqueued");
        assert!(entry.envelope.is_ops_trigger());
        assert_eq!(entry.envelope.meta.job_id.as_deref(), Some("job-1"));
        assert_eq!(entry.envelope.priority, Priority::Urgent);
        // No channel received anything — the result rides the trigger.
    }

    #[tokio::test]
    async fn cortex_failure_fails_op_and_still_wakes_loop() {
        let (sessions, bus, handler) = fixture();
        sessions
            .add_op(&PendingOp::new("job-2", OpKind::RouterJob, "doomed", "router"))
            .unwrap();

        handler
            .on_failed(&job("job-2", CORTEX_ISSUER, None), "gateway crash: max retries exceeded")
            .await;

        let stored = sessions.op("job-2").unwrap().unwrap();
        assert_eq!(stored.status, OpStatus::Failed);
        assert!(bus.dequeue_next().unwrap().is_some());
    }

    #[tokio::test]
    async fn foreign_issuer_gets_conversation_row_not_trigger() {
        let (sessions, bus, handler) = fixture();

        handler
            .on_delivered(&job("job-3", "scheduler", Some("tick done")))
            .await;

        let rows = sessions.history(Some("scheduler"), None, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].content.contains("[system] Task job-3 completed: tick done"));
        assert!(bus.dequeue_next().unwrap().is_none());
    }
}
