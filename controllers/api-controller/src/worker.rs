//! Queue workers.
//!
//! Each worker pulls one event at a time, syncs it and decides whether a
//! failure is retried with backoff or dropped after `max_retries`.

use crate::error::ControllerError;
use crate::event::SyncEvent;
use crate::metrics::Metrics;
use crate::queue::EventQueue;
use crate::reconciler::Reconciler;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One worker task
pub struct Worker {
    id: usize,
    queue: Arc<EventQueue>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    max_retries: u32,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<EventQueue>,
        reconciler: Arc<Reconciler>,
        metrics: Arc<Metrics>,
        max_retries: u32,
    ) -> Self {
        Self {
            id,
            queue,
            reconciler,
            metrics,
            max_retries,
        }
    }

    /// Process events until the queue is shut down and drained
    pub async fn run(self) {
        info!("Worker {} started", self.id);
        while self.process_next_work_item().await {}
        info!("Worker {} stopped", self.id);
    }

    /// Sync the next event. Returns `false` once the queue is shut down and
    /// nothing is left.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(event) = self.queue.get().await else {
            return false;
        };
        let key = event.key();
        self.metrics.set_queue_depth(self.queue.len());
        debug!("Worker {} syncing {} for {}", self.id, event.kind(), key);

        let result = self.reconciler.sync(&event).await;
        self.handle_err(event, result);

        self.queue.done(&key);
        self.metrics.set_queue_depth(self.queue.len());
        true
    }

    fn handle_err(&self, event: SyncEvent, result: Result<(), ControllerError>) {
        let key = event.key();
        let kind = event.kind();
        let err = match result {
            Ok(()) => {
                self.metrics.record_sync(kind, "success");
                self.queue.forget(&key);
                return;
            }
            Err(err) => err,
        };
        self.metrics.record_sync(kind, "error");

        if self.queue.is_shutting_down() {
            warn!("Not retrying {} for {} during shutdown: {}", kind, key, err);
            return;
        }
        let requeues = self.queue.num_requeues(&key);
        if requeues < self.max_retries {
            warn!(
                "Error syncing {} for {} (retry {}/{}): {}",
                kind,
                key,
                requeues + 1,
                self.max_retries,
                err
            );
            self.queue.add_rate_limited(event);
            return;
        }

        error!("Dropping {} for {} after {} retries: {}", kind, key, requeues, err);
        self.queue.forget(&key);
        self.metrics.record_dropped();
    }
}
