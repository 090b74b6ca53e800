//! Runtime contracts for infermux workers
//!
//! The workload manager never executes a model itself. Each worker owns a
//! [`ModelRuntime`] instance produced by a [`RuntimeFactory`] at spawn time
//! and drives it from a single task, which is why the methods take
//! `&mut self`: the runtime may keep per-worker state (loaded weights, device
//! handles) without internal synchronization.

use crate::{Device, ModelInfo, Payload};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Failure reported by a model runtime
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime is unusable; the owning worker must terminate
    #[error("fatal runtime failure: {0}")]
    Fatal(String),

    /// Only the current batch failed; the worker keeps serving
    #[error("batch failed: {0}")]
    Batch(String),

    /// The runtime could not be brought up on its device
    #[error("runtime startup failed: {0}")]
    Startup(String),
}

impl RuntimeError {
    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a recoverable batch error
    pub fn batch(msg: impl Into<String>) -> Self {
        Self::Batch(msg.into())
    }

    /// Create a startup error
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Check whether the owning worker must terminate
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::Fatal(_))
    }
}

/// Per-batch prediction results, positionally paired with the input batch
pub type BatchResults = Vec<std::result::Result<Payload, RuntimeError>>;

/// Contract between a worker and the inference engine it drives
///
/// The engine guarantees single-task confinement: for one runtime instance,
/// calls never overlap and always come from the same worker task.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Called once when the owning worker comes up, before the first batch.
    /// The runtime binds its device and loads whatever it needs here.
    async fn on_worker_start(&mut self, device: Device) -> std::result::Result<(), RuntimeError>;

    /// Execute one batch. The result vector pairs positionally with the
    /// input; a short vector fails the unmatched tail.
    async fn predict(
        &mut self,
        batch: Vec<Payload>,
    ) -> std::result::Result<BatchResults, RuntimeError>;

    /// Called exactly once when the owning worker exits, on every exit path
    /// after a successful start.
    async fn on_worker_stop(&mut self);
}

/// Factory producing one runtime instance per spawned worker
#[async_trait]
pub trait RuntimeFactory: Send + Sync {
    async fn create_runtime(
        &self,
        model: &ModelInfo,
    ) -> std::result::Result<Box<dyn ModelRuntime>, RuntimeError>;
}

/// Mock implementations for testing and development

/// Mock runtime that echoes every payload back after a fixed latency
pub struct MockRuntime {
    latency: Duration,
    started_on: Option<Device>,
}

impl MockRuntime {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            started_on: None,
        }
    }

    /// The device this runtime was started on, if any
    pub fn started_on(&self) -> Option<Device> {
        self.started_on
    }
}

#[async_trait]
impl ModelRuntime for MockRuntime {
    async fn on_worker_start(&mut self, device: Device) -> std::result::Result<(), RuntimeError> {
        self.started_on = Some(device);
        Ok(())
    }

    async fn predict(
        &mut self,
        batch: Vec<Payload>,
    ) -> std::result::Result<BatchResults, RuntimeError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(batch.into_iter().map(Ok).collect())
    }

    async fn on_worker_stop(&mut self) {}
}

/// Factory producing [`MockRuntime`] instances
pub struct MockRuntimeFactory {
    latency: Duration,
    created: AtomicUsize,
}

impl MockRuntimeFactory {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            created: AtomicUsize::new(0),
        })
    }

    /// Number of runtime instances handed out so far
    pub fn runtimes_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RuntimeFactory for MockRuntimeFactory {
    async fn create_runtime(
        &self,
        _model: &ModelInfo,
    ) -> std::result::Result<Box<dyn ModelRuntime>, RuntimeError> {
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockRuntime::new(self.latency)))
    }
}
