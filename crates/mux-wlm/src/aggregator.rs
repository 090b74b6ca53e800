//! Batching aggregator
//!
//! Sits between a worker and its pool's job queue and groups pending jobs
//! into one runtime invocation under the model's size/delay policy. The two
//! worker kinds share the contract and differ only in how an idle poll is
//! interpreted: a permanent worker retries, a transient worker reads it as
//! its termination signal.

use crate::queue::JobQueue;
use crate::worker::WorkerKind;
use mux_core::Job;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;

/// Pulls batches of jobs from a queue under size/delay rules
pub struct BatchAggregator {
    queue: Arc<JobQueue>,
    batch_size: usize,
    max_delay: Duration,
    kind: WorkerKind,
    drain: watch::Receiver<bool>,
}

impl BatchAggregator {
    pub(crate) fn new(
        kind: WorkerKind,
        queue: Arc<JobQueue>,
        batch_size: usize,
        max_delay: Duration,
        drain: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            batch_size,
            max_delay,
            kind,
            drain,
        }
    }

    /// Wait for the next batch.
    ///
    /// `Some(batch)` is never empty. `None` is the termination signal: the
    /// drain flag was raised, or a transient worker's first-job wait timed
    /// out.
    pub async fn next_batch(&mut self) -> Option<Vec<Job>> {
        loop {
            if *self.drain.borrow() {
                return None;
            }
            let batch = self.queue.poll_batch(self.batch_size, self.max_delay).await;
            if !batch.is_empty() {
                trace!(batch = batch.len(), kind = %self.kind, "aggregated batch");
                return Some(batch);
            }
            match self.kind {
                // No deadline on the baseline: keep waiting for traffic.
                WorkerKind::Permanent => continue,
                // One idle interval ends a burst worker.
                WorkerKind::Transient => return None,
            }
        }
    }

    /// The queue this aggregator drains
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}
