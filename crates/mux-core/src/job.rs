//! Job envelope and completion sink
//!
//! A [`Job`] is a single prediction request travelling through the workload
//! manager. The submitter keeps the [`JobTicket`] half of the completion
//! channel; the worker that eventually processes the job consumes the
//! [`Completion`] half. Ownership of the oneshot sender guarantees the
//! completion is satisfied at most once.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque inference payload forwarded to the model runtime
#[derive(Debug, Clone, Default)]
pub struct Payload {
    /// Raw input or output bytes, interpreted only by the runtime
    pub data: Vec<u8>,

    /// Runtime-specific metadata (content type, shapes, parameters)
    pub metadata: HashMap<String, Value>,
}

impl Payload {
    /// Create a payload from raw bytes
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Size of the raw payload in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the raw payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Failure delivered to a job's submitter
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    /// The worker processing the batch failed fatally
    #[error("worker failed fatally: {0}")]
    WorkerFatal(String),

    /// The batch containing this job failed; the worker keeps serving
    #[error("batch failed: {0}")]
    BatchFailed(String),
}

/// Receiver half awaited by the submitter.
///
/// Resolves to the job's outcome, or to a channel-closed error if the job was
/// dropped without being processed (admission rejection or shutdown).
pub type JobTicket = oneshot::Receiver<std::result::Result<Payload, JobError>>;

/// Single-use completion sink carried inside a [`Job`]
#[derive(Debug)]
pub struct Completion(oneshot::Sender<std::result::Result<Payload, JobError>>);

impl Completion {
    /// Deliver a successful result. A dropped ticket is tolerated.
    pub fn succeed(self, output: Payload) {
        let _ = self.0.send(Ok(output));
    }

    /// Deliver a failure. A dropped ticket is tolerated.
    pub fn fail(self, error: JobError) {
        let _ = self.0.send(Err(error));
    }
}

/// A submitted prediction request
///
/// Immutable envelope: once handed to a job queue, the submitter no longer
/// touches it.
#[derive(Debug)]
pub struct Job {
    /// Unique job identifier
    pub id: Uuid,

    /// Opaque input forwarded to the runtime
    pub payload: Payload,

    /// Monotonic timestamp set at creation
    pub enqueued_at: Instant,

    completion: Completion,
}

impl Job {
    /// Create a job and the ticket its submitter awaits
    pub fn new(payload: Payload) -> (Self, JobTicket) {
        let (tx, rx) = oneshot::channel();
        let job = Self {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: Instant::now(),
            completion: Completion(tx),
        };
        (job, rx)
    }

    /// Time elapsed since the job was created
    pub fn queue_time(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Split the job into its runtime input and its completion sink
    pub fn into_parts(self) -> (Payload, Completion) {
        (self.payload, self.completion)
    }

    /// Fail the job without splitting it first
    pub fn fail(self, error: JobError) {
        self.completion.fail(error);
    }
}
