use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use cortex_core::config::RouterConfig;

use crate::queue::RouterQueue;
use crate::types::RouterEvent;

/// Delay between spotting a stale execution and acting on it, so a worker
/// mid-write gets a chance to flush its checkpoint.
const FLUSH_GRACE: Duration = Duration::from_millis(500);

/// Periodic stale-checkpoint sweep: the recovery rule, applied continuously.
pub struct Watchdog {
    queue: Arc<RouterQueue>,
    events: mpsc::Sender<RouterEvent>,
    cfg: RouterConfig,
}

impl Watchdog {
    pub fn new(queue: Arc<RouterQueue>, events: mpsc::Sender<RouterEvent>, cfg: RouterConfig) -> Self {
        Self { queue, events, cfg }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.cfg.watchdog_interval_secs,
            "watchdog started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.cfg.watchdog_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("watchdog shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep. Peeks first; only acts after the flush grace period so an
    /// actively-writing worker isn't reset mid-commit.
    pub async fn tick(&self) {
        let stale = match self.queue.stale_execution_ids(self.cfg.hang_threshold_secs) {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "watchdog peek failed");
                return;
            }
        };
        if stale.is_empty() {
            return;
        }

        warn!(count = stale.len(), "stale executions detected");
        tokio::time::sleep(FLUSH_GRACE).await;

        match self
            .queue
            .sweep_stale(self.cfg.hang_threshold_secs, self.cfg.max_retries)
        {
            Ok(outcome) => {
                for job in outcome.failed_jobs {
                    let error = job.error.clone().unwrap_or_default();
                    if self
                        .events
                        .send(RouterEvent::Failed { job, error })
                        .await
                        .is_err()
                    {
                        error!("event bus closed during watchdog redelivery");
                    }
                }
            }
            Err(e) => error!(error = %e, "watchdog sweep failed"),
        }
    }
}
