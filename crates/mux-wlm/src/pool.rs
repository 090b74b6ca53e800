//! Per-model worker pool
//!
//! Bundles one model's job queue, its ordered worker list, and the scale lock
//! that serializes rescaling for that model. Reads hand out immutable
//! snapshots; the list itself is only mutated under the scale lock, so
//! concurrent readers tolerate a momentarily stale view.

use crate::queue::JobQueue;
use crate::worker::Worker;
use mux_core::ModelInfo;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::debug;

/// Queue plus workers for one model
#[derive(Debug)]
pub struct WorkerPool {
    model_name: String,
    queue: Arc<JobQueue>,
    workers: RwLock<Vec<Arc<Worker>>>,
    scale_lock: Mutex<()>,
}

impl WorkerPool {
    pub(crate) fn new(model: &ModelInfo) -> Self {
        Self {
            model_name: model.name.clone(),
            queue: Arc::new(JobQueue::new(model.queue_size)),
            workers: RwLock::new(Vec::new()),
            scale_lock: Mutex::new(()),
        }
    }

    /// Name of the model this pool serves
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// The pool's job queue
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Lock serializing scale-up and reconciliation for this model
    pub(crate) fn scale_lock(&self) -> &Mutex<()> {
        &self.scale_lock
    }

    /// Immutable snapshot of the worker list, in insertion order
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the permanent workers, in insertion order
    pub(crate) fn permanent_workers(&self) -> Vec<Arc<Worker>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.is_permanent())
            .cloned()
            .collect()
    }

    pub(crate) fn add_worker(&self, worker: Arc<Worker>) {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(worker);
    }

    pub(crate) fn remove_workers(&self, ids: &HashSet<u64>) {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|w| !ids.contains(&w.id()));
    }

    /// Remove every worker that has reached a terminal state from the
    /// visible list. Never cancels running workers.
    pub fn cleanup(&self) {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|w| !w.state().is_terminal());
    }

    /// Count of workers not in a terminal state
    pub fn running_workers(&self) -> usize {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| !w.state().is_terminal())
            .count()
    }

    /// Emit the current roster at debug level
    pub fn log_snapshot(&self) {
        let workers = self.workers();
        let roster: Vec<String> = workers
            .iter()
            .map(|w| format!("{}:{}:{}", w.id(), w.kind(), w.state()))
            .collect();
        debug!(
            model = %self.model_name,
            pending = self.queue.len(),
            workers = ?roster,
            "worker pool snapshot"
        );
    }
}
