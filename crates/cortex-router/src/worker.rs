use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::queue::RouterQueue;
use crate::types::RouterEvent;

/// Injected executor contract: run one prompt against one model id.
///
/// The error type is a plain string — the router records it verbatim on the
/// job row and moves on.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, prompt: &str, model: &str) -> std::result::Result<String, String>;
}

/// Run one dispatched job to completion and emit the delivery event.
///
/// Spawned fire-and-forget by the engine. While the executor runs, the
/// job's checkpoint is refreshed every `heartbeat` so the watchdog's stale
/// rule only trips on a worker that actually died — `heartbeat` must be
/// shorter than the hang threshold. All outcomes (success, executor error,
/// timeout) end in a terminal row plus a [`RouterEvent`] so the notifier
/// path always fires.
pub async fn run_job(
    queue: Arc<RouterQueue>,
    executor: Arc<dyn Executor>,
    events: mpsc::Sender<RouterEvent>,
    job_id: String,
    prompt: String,
    model: String,
    timeout: Duration,
    heartbeat: Duration,
) {
    let execute = executor.execute(&prompt, &model);
    tokio::pin!(execute);
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(heartbeat);
    // The first tick resolves immediately; the dispatch stamp covers it.
    ticker.tick().await;

    let verdict = loop {
        tokio::select! {
            result = &mut execute => break result,
            _ = &mut deadline => {
                break Err(format!("executor timed out after {}s", timeout.as_secs()));
            }
            _ = ticker.tick() => {
                if let Err(e) = queue.touch_checkpoint(&job_id) {
                    warn!(job_id = %job_id, error = %e, "checkpoint heartbeat failed");
                }
            }
        }
    };

    let outcome = match verdict {
        Ok(result) => {
            if let Err(e) = queue.complete(&job_id, &result) {
                error!(job_id = %job_id, error = %e, "failed to record job result");
                return;
            }
            info!(job_id = %job_id, model = %model, "job executed");
            None
        }
        Err(message) => Some(message),
    };

    if let Some(message) = &outcome {
        warn!(job_id = %job_id, error = %message, "job execution failed");
        if let Err(e) = queue.fail(&job_id, message) {
            error!(job_id = %job_id, error = %e, "failed to record job failure");
            return;
        }
    }

    let job = match queue.get(&job_id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            error!(job_id = %job_id, "job vanished before delivery");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to reload job for delivery");
            return;
        }
    };

    let event = match outcome {
        None => RouterEvent::Delivered(job),
        Some(error) => RouterEvent::Failed { job, error },
    };
    if events.send(event).await.is_err() {
        warn!(job_id = %job_id, "event bus closed, delivery event dropped");
    }
}
