use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use uuid::Uuid;

use cortex_core::config::RouterConfig;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::queue::RouterQueue;
use crate::types::{RouterEvent, RouterJob, Tier};
use crate::worker::{self, Executor};

/// Drives the router pipeline: dequeue → evaluate → tier dispatch →
/// fire-and-forget execution. Results flow to the notifier over the
/// process-local event bus.
pub struct RouterEngine {
    queue: Arc<RouterQueue>,
    evaluator: Evaluator,
    dispatcher: Dispatcher,
    executor: Arc<dyn Executor>,
    events: mpsc::Sender<RouterEvent>,
    cfg: RouterConfig,
    worker_id: String,
}

impl RouterEngine {
    pub fn new(
        queue: Arc<RouterQueue>,
        evaluator: Evaluator,
        dispatcher: Dispatcher,
        executor: Arc<dyn Executor>,
        events: mpsc::Sender<RouterEvent>,
        cfg: RouterConfig,
    ) -> Self {
        Self {
            queue,
            evaluator,
            dispatcher,
            executor,
            events,
            cfg,
            worker_id: format!("router-{}", Uuid::new_v4().simple()),
        }
    }

    /// Startup recovery: requeue abandoned evaluations, apply the stale rule
    /// once, and redeliver permanently failed jobs through the notifier.
    /// Returns `(recovered, failed)` counts.
    pub async fn recover(&self) -> Result<(usize, usize)> {
        let outcome = self
            .queue
            .recover(self.cfg.hang_threshold_secs, self.cfg.max_retries)?;
        for job in &outcome.failed_jobs {
            let event = RouterEvent::Failed {
                job: job.clone(),
                error: job.error.clone().unwrap_or_default(),
            };
            if self.events.send(event).await.is_err() {
                error!(job_id = %job.id, "event bus closed during recovery redelivery");
            }
        }
        if outcome.recovered > 0 || outcome.failed > 0 {
            info!(
                recovered = outcome.recovered,
                failed = outcome.failed,
                "router recovery complete"
            );
        }
        Ok((outcome.recovered, outcome.failed))
    }

    /// Main loop. Polls the queue until `shutdown` broadcasts `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "router engine started");
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.cfg.poll_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "router tick error");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("router engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poll: re-dispatch aged retries first, then take new intake.
    pub async fn tick(&self) -> Result<()> {
        while let Some(job) = self.queue.dequeue_retry(self.cfg.retry_delay_secs)? {
            // Tier survives the reset — skip re-evaluation on retry.
            let tier = job.tier.unwrap_or(Tier::Sonnet);
            self.dispatch(&job, tier)?;
        }

        while let Some(job) = self.queue.dequeue()? {
            let evaluation = self.evaluator.evaluate(&job.task_text()).await;
            self.queue.set_evaluated(&job.id, evaluation.weight)?;
            let tier = self.dispatcher.tier_for(evaluation.weight);
            info!(
                job_id = %job.id,
                weight = evaluation.weight,
                tier = %tier,
                "job evaluated"
            );
            self.dispatch(&job, tier)?;
        }
        Ok(())
    }

    fn dispatch(&self, job: &RouterJob, tier: Tier) -> Result<()> {
        let prompt = self.dispatcher.render_prompt(job, tier);
        let model = self.dispatcher.model_for(tier).to_string();
        self.queue.set_dispatched(&job.id, tier, &self.worker_id)?;

        // Heartbeat at a third of the hang threshold: a healthy worker
        // refreshes its checkpoint several times before the watchdog's
        // stale rule can fire.
        let heartbeat = Duration::from_secs((self.cfg.hang_threshold_secs / 3).max(1));
        tokio::spawn(worker::run_job(
            Arc::clone(&self.queue),
            Arc::clone(&self.executor),
            self.events.clone(),
            job.id.clone(),
            prompt,
            model,
            Duration::from_secs(self.cfg.executor_timeout_secs),
            heartbeat,
        ));
        Ok(())
    }
}
