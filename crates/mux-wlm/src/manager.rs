//! Top-level workload manager
//!
//! Routes job submissions to per-model pools, scales each pool between its
//! configured bounds, and places workers onto devices. All state lives in the
//! [`WorkloadManager`] instance; there is no global state.
//!
//! Lock ordering is always pool map, then per-model scale lock. No lock is
//! held across a runtime call; the scale lock is held across the bounded
//! admission retry only, so contention on it is limited by `max_batch_delay`.

use crate::aggregator::BatchAggregator;
use crate::device::DeviceAssigner;
use crate::pool::WorkerPool;
use crate::worker::{self, Worker, WorkerKind, WorkerState};
use crate::{Result, WlmError};
use dashmap::DashMap;
use mux_core::{Job, ModelInfo, RuntimeFactory};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Multiplexes prediction jobs across dynamically sized per-model pools
pub struct WorkloadManager {
    pools: DashMap<String, Arc<WorkerPool>>,
    devices: DeviceAssigner,
    factory: Arc<dyn RuntimeFactory>,
    next_worker_id: AtomicU64,
}

impl WorkloadManager {
    /// Create a manager. `gpu_count` is read once; zero means CPU-only
    /// placement. Worker tasks run on the ambient tokio runtime; the
    /// per-pool `max_workers` gate bounds them at the sum of the registered
    /// models' ceilings.
    pub fn new(factory: Arc<dyn RuntimeFactory>, gpu_count: usize) -> Self {
        Self {
            pools: DashMap::new(),
            devices: DeviceAssigner::new(gpu_count),
            factory,
            next_worker_id: AtomicU64::new(0),
        }
    }

    fn pool_for(&self, model: &ModelInfo) -> Arc<WorkerPool> {
        self.pools
            .entry(model.name.clone())
            .or_insert_with(|| Arc::new(WorkerPool::new(model)))
            .clone()
    }

    /// Offer a job to the model's queue, scaling up on demand.
    ///
    /// Returns `true` iff the job was admitted. Failures inside the dispatch
    /// layer never escape as errors; they become a `false` return plus a log
    /// entry.
    pub async fn submit(&self, model: &ModelInfo, job: Job) -> bool {
        let pool = self.pool_for(model);

        // Without at least one worker the queue would grow without bound;
        // the caller must provision the baseline via model_changed first.
        if self.running_worker_count(&model.name) == 0 {
            let err = WlmError::WorkerUnavailable {
                model: model.name.clone(),
            };
            debug!(model = %model.name, error = %err, "rejecting job");
            return false;
        }

        let job = match pool.queue().try_offer(job) {
            Ok(()) => return true,
            Err(job) => job,
        };

        // Queue full: serialize with other submitters rescaling this model,
        // add one burst worker if the ceiling allows, and retry with a
        // bounded wait.
        let _guard = pool.scale_lock().lock().await;
        if let Err(e) = self.scale_up(model, &pool) {
            warn!(model = %model.name, error = %e, "scale-up rejected, dropping submission");
            return false;
        }
        match pool.queue().offer(job, model.max_batch_delay()).await {
            Ok(()) => true,
            Err(_) => {
                let err = WlmError::QueueFull {
                    model: model.name.clone(),
                };
                info!(
                    model = %model.name,
                    error = %err,
                    "queue still full after scale-up; consider raising max_batch_delay_ms"
                );
                false
            }
        }
    }

    /// Add one transient worker iff the pool is under its ceiling.
    /// Callers hold the model's scale lock.
    fn scale_up(&self, model: &ModelInfo, pool: &Arc<WorkerPool>) -> Result<()> {
        pool.cleanup();
        let running = pool.running_workers();
        if running >= model.max_workers {
            return Err(WlmError::CapacityExceeded {
                model: model.name.clone(),
                max_workers: model.max_workers,
            });
        }
        debug!(
            model = %model.name,
            workers = running + 1,
            "scaling up"
        );
        self.spawn_worker(model, pool, WorkerKind::Transient);
        Ok(())
    }

    /// Reconcile the pool with a changed model descriptor.
    ///
    /// Brings the permanent baseline to `min_workers` and trims any excess
    /// above `max_workers`. The pool itself is preserved even at
    /// `min_workers == 0`; only [`remove_model`](Self::remove_model) drops it.
    pub async fn model_changed(&self, model: &ModelInfo) -> Result<()> {
        model.validate()?;
        let pool = self.pool_for(model);
        let _guard = pool.scale_lock().lock().await;

        pool.cleanup();

        let permanent = pool.permanent_workers();
        let current = permanent.len();
        if current < model.min_workers {
            debug!(
                model = %model.name,
                current,
                target = model.min_workers,
                "growing permanent baseline"
            );
            for _ in 0..(model.min_workers - current) {
                self.spawn_worker(model, &pool, WorkerKind::Permanent);
            }
        } else if current > model.min_workers {
            debug!(
                model = %model.name,
                current,
                target = model.min_workers,
                "shrinking permanent baseline"
            );
            let excess = &permanent[model.min_workers..];
            let ids: HashSet<u64> = excess.iter().map(|w| w.id()).collect();
            for w in excess {
                w.shutdown(WorkerState::ScaledDown);
            }
            pool.remove_workers(&ids);
        }

        // A grown baseline can push the pool past a lowered ceiling while
        // burst workers are still alive; trim transients to restore the
        // max_workers bound.
        let over = pool.running_workers().saturating_sub(model.max_workers);
        if over > 0 {
            let transient: Vec<Arc<Worker>> = pool
                .workers()
                .into_iter()
                .filter(|w| !w.is_permanent() && !w.state().is_terminal())
                .take(over)
                .collect();
            let ids: HashSet<u64> = transient.iter().map(|w| w.id()).collect();
            for w in &transient {
                w.shutdown(WorkerState::ScaledDown);
            }
            pool.remove_workers(&ids);
        }

        pool.log_snapshot();
        Ok(())
    }

    /// Drop a model's pool and stop all of its workers.
    pub async fn remove_model(&self, name: &str) -> Result<()> {
        let Some((_, pool)) = self.pools.remove(name) else {
            return Err(WlmError::PoolNotFound {
                model: name.to_string(),
            });
        };
        info!(model = %name, "removing model pool");

        let workers = pool.workers();
        for w in &workers {
            w.shutdown(WorkerState::Stopped);
        }
        for w in &workers {
            w.join().await;
        }
        Ok(())
    }

    /// Best-effort snapshot of the workers serving `name`
    pub fn workers(&self, name: &str) -> Vec<Arc<Worker>> {
        self.pools
            .get(name)
            .map(|pool| pool.workers())
            .unwrap_or_default()
    }

    /// Count workers not in a terminal state. Removes terminal workers from
    /// the visible list as a side effect.
    pub fn running_worker_count(&self, name: &str) -> usize {
        match self.pools.get(name) {
            Some(pool) => {
                pool.cleanup();
                pool.running_workers()
            }
            None => 0,
        }
    }

    /// Stop every worker in every pool and wait for their tasks to finish.
    /// Idempotent: a second call finds no pools and returns immediately.
    pub async fn shutdown(&self) {
        info!("shutting down workload manager");
        let pools: Vec<Arc<WorkerPool>> = self.pools.iter().map(|e| Arc::clone(e.value())).collect();
        self.pools.clear();

        let mut workers = Vec::new();
        for pool in &pools {
            for w in pool.workers() {
                w.shutdown(WorkerState::Stopped);
                workers.push(w);
            }
        }
        for w in &workers {
            w.join().await;
        }
        info!(workers = workers.len(), "workload manager drained");
    }

    /// Allocate an id and device, wire up the aggregator, and launch the
    /// worker task. The runtime instance is created inside the task so no
    /// lock is held across runtime construction.
    fn spawn_worker(&self, model: &ModelInfo, pool: &Arc<WorkerPool>, kind: WorkerKind) {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let device = self.devices.next();

        let (worker, drain_rx) = Worker::new(id, &model.name, device, kind);
        let aggregator = BatchAggregator::new(
            kind,
            Arc::clone(pool.queue()),
            model.batch_size,
            model.max_batch_delay(),
            drain_rx.clone(),
        );
        pool.add_worker(Arc::clone(&worker));

        debug!(
            worker_id = id,
            model = %model.name,
            device = %device,
            kind = %kind,
            "spawning worker"
        );

        let factory = Arc::clone(&self.factory);
        let model = model.clone();
        let task_worker = Arc::clone(&worker);
        let handle = tokio::spawn(async move {
            let runtime = match factory.create_runtime(&model).await {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(
                        worker_id = task_worker.id(),
                        model = %model.name,
                        error = %e,
                        "runtime construction failed"
                    );
                    task_worker.set_state(WorkerState::Error);
                    return;
                }
            };
            worker::run(task_worker, aggregator, runtime, drain_rx).await;
        });
        worker.set_handle(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_core::{Device, MockRuntimeFactory, Payload};
    use std::time::Duration;

    fn submit_job() -> (Job, mux_core::JobTicket) {
        Job::new(Payload::new(b"in".to_vec()))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_baseline_provisioning() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
        let model = ModelInfo::new("a")
            .with_workers(2, 4)
            .with_batching(8, 50)
            .with_queue_size(32);

        manager.model_changed(&model).await.unwrap();

        let workers = manager.workers("a");
        assert_eq!(workers.len(), 2);
        assert!(workers.iter().all(|w| w.is_permanent()));
        assert_eq!(manager.running_worker_count("a"), 2);
        assert!(manager.pools.get("a").unwrap().queue().is_empty());
    }

    #[tokio::test]
    async fn test_model_changed_is_idempotent() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
        let model = ModelInfo::new("a").with_workers(2, 4);

        manager.model_changed(&model).await.unwrap();
        manager.model_changed(&model).await.unwrap();

        assert_eq!(manager.workers("a").len(), 2);
        assert_eq!(manager.running_worker_count("a"), 2);
    }

    #[tokio::test]
    async fn test_model_changed_shrinks_baseline_in_insertion_order() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
        let model = ModelInfo::new("a").with_workers(3, 4);
        manager.model_changed(&model).await.unwrap();
        let original: Vec<u64> = manager.workers("a").iter().map(|w| w.id()).collect();

        let shrunk = ModelInfo::new("a").with_workers(1, 4);
        manager.model_changed(&shrunk).await.unwrap();

        let remaining: Vec<u64> = manager.workers("a").iter().map(|w| w.id()).collect();
        assert_eq!(remaining, vec![original[0]]);
        assert_eq!(manager.running_worker_count("a"), 1);
    }

    #[tokio::test]
    async fn test_pool_preserved_at_zero_min_workers() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
        let model = ModelInfo::new("a").with_workers(2, 4);
        manager.model_changed(&model).await.unwrap();

        let idle = ModelInfo::new("a").with_workers(0, 4);
        manager.model_changed(&idle).await.unwrap();

        assert!(manager.pools.contains_key("a"));
        assert_eq!(manager.running_worker_count("a"), 0);
    }

    #[tokio::test]
    async fn test_submit_without_workers_is_rejected() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
        let model = ModelInfo::new("a").with_workers(0, 0);

        let (job, _ticket) = submit_job();
        assert!(!manager.submit(&model, job).await);
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
        let model = ModelInfo::new("a").with_workers(1, 2).with_batching(4, 20);
        manager.model_changed(&model).await.unwrap();

        let (job, ticket) = submit_job();
        assert!(manager.submit(&model, job).await);

        let result = ticket.await.unwrap();
        assert_eq!(result.unwrap().data, b"in");
    }

    #[tokio::test]
    async fn test_scale_up_capacity_exceeded() {
        // One slow worker at the ceiling, a single-slot queue: the third
        // submission cannot scale and must come back false.
        let factory = MockRuntimeFactory::with_latency(Duration::from_millis(300));
        let manager = WorkloadManager::new(factory, 0);
        let model = ModelInfo::new("a")
            .with_workers(1, 1)
            .with_batching(1, 20)
            .with_queue_size(1);
        manager.model_changed(&model).await.unwrap();

        let (busy, _busy_ticket) = submit_job();
        assert!(manager.submit(&model, busy).await);
        settle().await; // worker picks the job up and blocks in predict

        let (queued, _queued_ticket) = submit_job();
        assert!(manager.submit(&model, queued).await);

        let (rejected, _rejected_ticket) = submit_job();
        assert!(!manager.submit(&model, rejected).await);
        assert_eq!(manager.workers("a").len(), 1);
    }

    #[tokio::test]
    async fn test_burst_spawns_transient_worker() {
        let factory = MockRuntimeFactory::with_latency(Duration::from_millis(100));
        let manager = WorkloadManager::new(factory, 0);
        let model = ModelInfo::new("a")
            .with_workers(1, 3)
            .with_batching(1, 200)
            .with_queue_size(1);
        manager.model_changed(&model).await.unwrap();

        let (first, _t1) = submit_job();
        assert!(manager.submit(&model, first).await);
        settle().await;

        let (second, _t2) = submit_job();
        assert!(manager.submit(&model, second).await);

        // Queue is full and the only worker is busy: this submission forces
        // a transient worker into existence.
        let (third, _t3) = submit_job();
        assert!(manager.submit(&model, third).await);

        let workers = manager.workers("a");
        assert!(workers.iter().any(|w| !w.is_permanent()));
        assert!(manager.running_worker_count("a") <= model.max_workers);
    }

    #[tokio::test]
    async fn test_transient_workers_decay_after_idle() {
        let factory = MockRuntimeFactory::new();
        let manager = WorkloadManager::new(factory, 0);
        let model = ModelInfo::new("a")
            .with_workers(1, 3)
            .with_batching(1, 20)
            .with_queue_size(1);
        manager.model_changed(&model).await.unwrap();

        // Force a transient into existence through the scale-up path.
        {
            let pool = manager.pool_for(&model);
            let _guard = pool.scale_lock().lock().await;
            manager.scale_up(&model, &pool).unwrap();
        }
        assert_eq!(manager.workers("a").len(), 2);

        // One idle interval later the transient has scaled itself down and
        // the next count cleans it from the visible list.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(manager.running_worker_count("a"), 1);
        assert_eq!(manager.workers("a").len(), 1);
        assert!(manager.workers("a")[0].is_permanent());
    }

    #[tokio::test]
    async fn test_device_rotation_across_spawns() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 3);
        let model = ModelInfo::new("a").with_workers(7, 7);
        manager.model_changed(&model).await.unwrap();

        let devices: Vec<Device> = manager.workers("a").iter().map(|w| w.device()).collect();
        let expected: Vec<Device> = [0u32, 1, 2, 0, 1, 2, 0]
            .iter()
            .map(|&i| Device::Gpu(i))
            .collect();
        assert_eq!(devices, expected);
    }

    #[tokio::test]
    async fn test_remove_model_drops_pool_and_stops_workers() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
        let model = ModelInfo::new("a").with_workers(2, 4);
        manager.model_changed(&model).await.unwrap();
        let workers = manager.workers("a");

        manager.remove_model("a").await.unwrap();

        assert!(!manager.pools.contains_key("a"));
        assert!(workers
            .iter()
            .all(|w| w.state() == WorkerState::Stopped));
        assert!(matches!(
            manager.remove_model("a").await,
            Err(WlmError::PoolNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_quiesces_everything() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
        let a = ModelInfo::new("a").with_workers(2, 4);
        let b = ModelInfo::new("b").with_workers(1, 2);
        manager.model_changed(&a).await.unwrap();
        manager.model_changed(&b).await.unwrap();

        let mut all = manager.workers("a");
        all.extend(manager.workers("b"));

        manager.shutdown().await;
        assert!(all.iter().all(|w| w.state().is_terminal()));
        assert_eq!(manager.running_worker_count("a"), 0);
        assert_eq!(manager.running_worker_count("b"), 0);

        // Second call is a no-op.
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_model_changed_rejects_invalid_descriptor() {
        let manager = WorkloadManager::new(MockRuntimeFactory::new(), 0);
        let model = ModelInfo::new("a").with_workers(4, 2);
        assert!(manager.model_changed(&model).await.is_err());
    }
}
