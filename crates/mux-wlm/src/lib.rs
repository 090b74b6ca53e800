//! # mux-wlm
//!
//! Dispatch and scaling engine for infermux.
//!
//! This crate multiplexes prediction jobs across a dynamically sized pool of
//! workers, one pool per served model. It provides:
//!
//! - A bounded per-model job queue with blocking offer/poll semantics
//! - A batching aggregator grouping queued jobs into single runtime calls
//! - Long-running workers driving the worker state machine
//! - Per-model pools with permanent baseline and transient burst workers
//! - The top-level [`WorkloadManager`] routing submissions and rescaling pools
//! - Round-robin device assignment across a fixed accelerator count
//!
//! ## Example
//!
//! ```rust,no_run
//! use mux_core::{Job, MockRuntimeFactory, ModelInfo, Payload};
//! use mux_wlm::WorkloadManager;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
//! let model = ModelInfo::new("resnet").with_workers(2, 4);
//!
//! manager.model_changed(&model).await.unwrap();
//!
//! let (job, ticket) = Job::new(Payload::new(b"input".to_vec()));
//! if manager.submit(&model, job).await {
//!     let result = ticket.await;
//!     println!("completed: {:?}", result.is_ok());
//! }
//! # }
//! ```

use thiserror::Error;

pub mod aggregator;
pub mod device;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod worker;

// Re-export commonly used types
pub use aggregator::BatchAggregator;
pub use device::DeviceAssigner;
pub use manager::WorkloadManager;
pub use pool::WorkerPool;
pub use queue::JobQueue;
pub use worker::{Worker, WorkerKind, WorkerState};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, WlmError>;

/// Errors that can occur inside the dispatch and scaling engine
///
/// Submission never propagates these to the caller; `submit` converts them
/// into a `false` return plus a log entry. They surface only from the
/// management surface (`model_changed`, `remove_model`).
#[derive(Error, Debug)]
pub enum WlmError {
    #[error("scale-up capacity of {max_workers} workers reached for model {model}")]
    CapacityExceeded { model: String, max_workers: usize },

    #[error("job queue full for model {model}")]
    QueueFull { model: String },

    #[error("no worker pool registered for model {model}")]
    PoolNotFound { model: String },

    #[error("no running workers for model {model}")]
    WorkerUnavailable { model: String },

    #[error("Core error: {0}")]
    Core(#[from] mux_core::Error),
}
