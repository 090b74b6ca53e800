//! Worker executor and state machine
//!
//! A worker is a long-running task bound to one model, one device, and one
//! aggregator. It repeatedly pulls a batch, invokes the runtime, and routes
//! per-job results back through the completion sinks. The handle half
//! ([`Worker`]) is shared with the pool for introspection and shutdown; the
//! task half ([`run`]) owns the aggregator and the runtime instance.

use crate::aggregator::BatchAggregator;
use mux_core::{Completion, Device, JobError, ModelRuntime, Payload};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Whether a worker counts against the baseline or exists only for bursts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    /// Counted against `min_workers`; never self-terminates on idle
    Permanent,
    /// Spawned above the baseline; self-terminates after one idle interval
    Transient,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Permanent => write!(f, "permanent"),
            WorkerKind::Transient => write!(f, "transient"),
        }
    }
}

/// Worker lifecycle states
///
/// Terminal states (`ScaledDown`, `Stopped`, `Error`) latch: once entered,
/// the state never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, runtime not yet up
    Starting,
    /// Blocked on the aggregator
    Waiting,
    /// Executing a batch
    Running,
    /// Voluntarily terminated after an idle interval or a scale-down signal
    ScaledDown,
    /// Terminated by external shutdown
    Stopped,
    /// Terminated by a fatal runtime failure
    Error,
}

impl WorkerState {
    /// Check if this state never changes again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::ScaledDown | WorkerState::Stopped | WorkerState::Error
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Waiting => write!(f, "waiting"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::ScaledDown => write!(f, "scaled_down"),
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Error => write!(f, "error"),
        }
    }
}

/// Shared handle to a worker task
#[derive(Debug)]
pub struct Worker {
    id: u64,
    model: String,
    device: Device,
    kind: WorkerKind,
    state: Mutex<WorkerState>,
    drain_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn new(
        id: u64,
        model: impl Into<String>,
        device: Device,
        kind: WorkerKind,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (drain_tx, drain_rx) = watch::channel(false);
        let worker = Arc::new(Self {
            id,
            model: model.into(),
            device,
            kind,
            state: Mutex::new(WorkerState::Starting),
            drain_tx,
            handle: Mutex::new(None),
        });
        (worker, drain_rx)
    }

    /// Process-unique worker id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the model this worker serves
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Device this worker is bound to
    pub fn device(&self) -> Device {
        self.device
    }

    /// Worker kind (permanent baseline or transient burst)
    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Check if this worker counts against the baseline
    pub fn is_permanent(&self) -> bool {
        self.kind == WorkerKind::Permanent
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transition to `next` unless a terminal state is already latched.
    /// Returns whether the transition was applied.
    pub(crate) fn set_state(&self, next: WorkerState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() {
            return false;
        }
        debug!(
            worker_id = self.id,
            model = %self.model,
            from = %*state,
            to = %next,
            "worker state transition"
        );
        *state = next;
        true
    }

    /// Request cooperative termination with the given terminal state.
    ///
    /// Idempotent: the first terminal state wins; later calls only re-raise
    /// the drain flag. The worker finishes any in-flight batch before it
    /// observes the flag at its next poll boundary.
    pub fn shutdown(&self, terminal: WorkerState) {
        debug_assert!(terminal.is_terminal());
        self.set_state(terminal);
        let _ = self.drain_tx.send(true);
    }

    pub(crate) fn set_handle(&self, handle: JoinHandle<()>) {
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Wait for the worker task to finish. Returns immediately if the task
    /// was already joined or never started.
    pub async fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Worker task body: drive the state machine until a terminal state latches.
pub(crate) async fn run(
    worker: Arc<Worker>,
    mut aggregator: BatchAggregator,
    mut runtime: Box<dyn ModelRuntime>,
    mut drain_rx: watch::Receiver<bool>,
) {
    debug!(
        worker_id = worker.id(),
        model = %worker.model(),
        device = %worker.device(),
        kind = %worker.kind(),
        "worker starting"
    );

    if let Err(e) = runtime.on_worker_start(worker.device()).await {
        error!(
            worker_id = worker.id(),
            model = %worker.model(),
            error = %e,
            "runtime failed to start"
        );
        worker.set_state(WorkerState::Error);
        return;
    }
    worker.set_state(WorkerState::Waiting);

    loop {
        if worker.state().is_terminal() {
            break;
        }

        let batch = tokio::select! {
            batch = aggregator.next_batch() => batch,
            _ = drain_rx.changed() => None,
        };

        let Some(batch) = batch else {
            // Idle transient or drain signal. Keep a latched terminal state;
            // otherwise this is a voluntary exit.
            worker.set_state(WorkerState::ScaledDown);
            break;
        };

        worker.set_state(WorkerState::Running);
        let batch_size = batch.len();
        let (payloads, completions): (Vec<Payload>, Vec<Completion>) =
            batch.into_iter().map(|job| job.into_parts()).unzip();

        match runtime.predict(payloads).await {
            Ok(results) => {
                if results.len() < batch_size {
                    warn!(
                        worker_id = worker.id(),
                        model = %worker.model(),
                        expected = batch_size,
                        got = results.len(),
                        "runtime returned short result vector"
                    );
                }
                let mut results = results.into_iter();
                for completion in completions {
                    match results.next() {
                        Some(Ok(output)) => completion.succeed(output),
                        Some(Err(e)) => completion.fail(JobError::BatchFailed(e.to_string())),
                        None => completion.fail(JobError::BatchFailed(
                            "missing result for job".to_string(),
                        )),
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                error!(
                    worker_id = worker.id(),
                    model = %worker.model(),
                    batch = batch_size,
                    error = %e,
                    "fatal runtime failure, terminating worker"
                );
                let message = e.to_string();
                for completion in completions {
                    completion.fail(JobError::WorkerFatal(message.clone()));
                }
                worker.set_state(WorkerState::Error);
                break;
            }
            Err(e) => {
                warn!(
                    worker_id = worker.id(),
                    model = %worker.model(),
                    batch = batch_size,
                    error = %e,
                    "batch failed, worker continues"
                );
                let message = e.to_string();
                for completion in completions {
                    completion.fail(JobError::BatchFailed(message.clone()));
                }
            }
        }

        worker.set_state(WorkerState::Waiting);
    }

    runtime.on_worker_stop().await;
    debug!(
        worker_id = worker.id(),
        model = %worker.model(),
        state = %worker.state(),
        "worker exited"
    );
}
