//! Scripted mock runtimes
//!
//! Richer than the echo mock in `mux-core`: per-batch latency, failure
//! injection targeted at a specific worker and batch, and shared counters
//! that tests inspect after the fact. Worker indices count runtime instances
//! in creation order, starting at 1.

use async_trait::async_trait;
use mux_core::{BatchResults, Device, ModelInfo, ModelRuntime, Payload, RuntimeError, RuntimeFactory};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters shared between a factory and every runtime it created
#[derive(Debug, Default)]
pub struct RuntimeCounters {
    batches: AtomicU64,
    jobs: AtomicU64,
    max_batch_size: AtomicU64,
    workers_started: AtomicU64,
    workers_stopped: AtomicU64,
}

impl RuntimeCounters {
    /// Total batches executed across all workers
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Total jobs served across all workers
    pub fn jobs(&self) -> u64 {
        self.jobs.load(Ordering::Relaxed)
    }

    /// Largest batch observed
    pub fn max_batch_size(&self) -> u64 {
        self.max_batch_size.load(Ordering::Relaxed)
    }

    /// Workers that completed `on_worker_start`
    pub fn workers_started(&self) -> u64 {
        self.workers_started.load(Ordering::Relaxed)
    }

    /// Workers that reached `on_worker_stop`
    pub fn workers_stopped(&self) -> u64 {
        self.workers_stopped.load(Ordering::Relaxed)
    }
}

/// Failure injected into one worker's batch sequence
#[derive(Debug, Clone, Copy)]
pub struct FailureScript {
    /// Runtime instance to fail, in creation order starting at 1
    pub worker: usize,
    /// Batch number to fail, starting at 1
    pub batch: usize,
    /// Whether the failure is fatal to the worker
    pub fatal: bool,
}

/// Factory producing [`ScriptedRuntime`] instances
pub struct ScriptedRuntimeFactory {
    latency: Duration,
    failure: Option<FailureScript>,
    fail_start_worker: Option<usize>,
    counters: Arc<RuntimeCounters>,
    created: AtomicUsize,
}

impl ScriptedRuntimeFactory {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            failure: None,
            fail_start_worker: None,
            counters: Arc::new(RuntimeCounters::default()),
            created: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every `predict` call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail a scripted batch of a scripted worker
    pub fn with_failure(mut self, script: FailureScript) -> Self {
        self.failure = Some(script);
        self
    }

    /// Make `on_worker_start` fail for the given worker index
    pub fn with_start_failure(mut self, worker: usize) -> Self {
        self.fail_start_worker = Some(worker);
        self
    }

    /// Shared counters, inspectable while workers run
    pub fn counters(&self) -> Arc<RuntimeCounters> {
        Arc::clone(&self.counters)
    }

    /// Number of runtime instances handed out so far
    pub fn runtimes_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl Default for ScriptedRuntimeFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeFactory for ScriptedRuntimeFactory {
    async fn create_runtime(
        &self,
        _model: &ModelInfo,
    ) -> std::result::Result<Box<dyn ModelRuntime>, RuntimeError> {
        let index = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Box::new(ScriptedRuntime {
            latency: self.latency,
            failure: self.failure.filter(|s| s.worker == index),
            fail_start: self.fail_start_worker == Some(index),
            counters: Arc::clone(&self.counters),
            batches: 0,
        }))
    }
}

/// Runtime that echoes payloads after a scripted delay, with optional
/// failure injection
pub struct ScriptedRuntime {
    latency: Duration,
    failure: Option<FailureScript>,
    fail_start: bool,
    counters: Arc<RuntimeCounters>,
    batches: usize,
}

#[async_trait]
impl ModelRuntime for ScriptedRuntime {
    async fn on_worker_start(&mut self, device: Device) -> std::result::Result<(), RuntimeError> {
        if self.fail_start {
            return Err(RuntimeError::startup(format!(
                "scripted start failure on {}",
                device
            )));
        }
        self.counters.workers_started.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn predict(
        &mut self,
        batch: Vec<Payload>,
    ) -> std::result::Result<BatchResults, RuntimeError> {
        self.batches += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(script) = self.failure {
            if self.batches == script.batch {
                return if script.fatal {
                    Err(RuntimeError::fatal("scripted fatal failure"))
                } else {
                    Err(RuntimeError::batch("scripted batch failure"))
                };
            }
        }

        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .jobs
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.counters
            .max_batch_size
            .fetch_max(batch.len() as u64, Ordering::Relaxed);
        Ok(batch.into_iter().map(Ok).collect())
    }

    async fn on_worker_stop(&mut self) {
        self.counters.workers_stopped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_runtime_counts_work() {
        let factory = ScriptedRuntimeFactory::new();
        let counters = factory.counters();
        let model = ModelInfo::new("m");

        let mut runtime = factory.create_runtime(&model).await.unwrap();
        runtime.on_worker_start(Device::Cpu).await.unwrap();
        runtime
            .predict(vec![Payload::default(), Payload::default()])
            .await
            .unwrap();
        runtime.predict(vec![Payload::default()]).await.unwrap();
        runtime.on_worker_stop().await;

        assert_eq!(counters.batches(), 2);
        assert_eq!(counters.jobs(), 3);
        assert_eq!(counters.max_batch_size(), 2);
        assert_eq!(counters.workers_started(), 1);
        assert_eq!(counters.workers_stopped(), 1);
    }

    #[tokio::test]
    async fn test_failure_targets_scripted_worker_only() {
        let factory = ScriptedRuntimeFactory::new().with_failure(FailureScript {
            worker: 2,
            batch: 1,
            fatal: true,
        });
        let model = ModelInfo::new("m");

        let mut first = factory.create_runtime(&model).await.unwrap();
        let mut second = factory.create_runtime(&model).await.unwrap();

        assert!(first.predict(vec![Payload::default()]).await.is_ok());
        let err = second.predict(vec![Payload::default()]).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_start_failure_injection() {
        let factory = ScriptedRuntimeFactory::new().with_start_failure(1);
        let model = ModelInfo::new("m");

        let mut runtime = factory.create_runtime(&model).await.unwrap();
        assert!(runtime.on_worker_start(Device::Gpu(0)).await.is_err());
        assert_eq!(factory.counters().workers_started(), 0);
    }
}
