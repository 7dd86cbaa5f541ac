use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::queue::RouterQueue;
use crate::types::{RouterEvent, RouterJob};

/// Injected delivery contract: where finished jobs go.
///
/// For Cortex-issued jobs the handler must never push result text into a
/// channel directly — it completes the pending op and enqueues an
/// ops-trigger envelope instead. Other issuers get a system-labelled message
/// in their own conversation.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_delivered(&self, job: &RouterJob);
    async fn on_failed(&self, job: &RouterJob, error: &str);
}

/// Consumes `job:delivered` / `job:failed` events: resolves local waiters,
/// invokes the delivery handler, then archives the job out of the live table.
pub struct Notifier {
    queue: Arc<RouterQueue>,
    handler: Arc<dyn DeliveryHandler>,
    waiters: DashMap<String, oneshot::Sender<RouterJob>>,
}

impl Notifier {
    pub fn new(queue: Arc<RouterQueue>, handler: Arc<dyn DeliveryHandler>) -> Self {
        Self {
            queue,
            handler,
            waiters: DashMap::new(),
        }
    }

    /// Block until the job reaches a terminal state and is delivered, or the
    /// timeout elapses. Synchronous-caller convenience; most delivery flows
    /// go through the handler instead.
    pub async fn wait_for_job(&self, id: &str, timeout: Duration) -> Option<RouterJob> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.to_string(), tx);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(job)) => Some(job),
            _ => {
                self.waiters.remove(id);
                None
            }
        }
    }

    /// Drain the event bus until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<RouterEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("notifier started");
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.deliver(event).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("notifier shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Handle one delivery event. Public so startup recovery can redeliver
    /// permanently failed jobs through the same path.
    pub async fn deliver(&self, event: RouterEvent) {
        let (job, error) = match &event {
            RouterEvent::Delivered(job) => (job, None),
            RouterEvent::Failed { job, error } => (job, Some(error.clone())),
        };

        if let Err(e) = self.queue.mark_delivered(&job.id) {
            warn!(job_id = %job.id, error = %e, "could not stamp delivery time");
        }
        let delivered = self
            .queue
            .get(&job.id)
            .ok()
            .flatten()
            .unwrap_or_else(|| job.clone());

        // A registered waiter takes precedence over the handler.
        if let Some((_, waiter)) = self.waiters.remove(&job.id) {
            let _ = waiter.send(delivered.clone());
        } else {
            match &error {
                None => self.handler.on_delivered(&delivered).await,
                Some(message) => self.handler.on_failed(&delivered, message).await,
            }
        }

        if let Err(e) = self.queue.archive(&job.id) {
            error!(job_id = %job.id, error = %e, "failed to archive delivered job");
        }
    }
}
