//! Load generation against a workload manager
//!
//! Submits a stream of jobs to one model, awaits every accepted ticket, and
//! aggregates admission and latency statistics for assertions in tests and
//! benchmarks.

use crate::utils::generate_payload;
use mux_core::{Job, JobTicket, ModelInfo};
use mux_wlm::WorkloadManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for one load-generation run
#[derive(Debug, Clone)]
pub struct LoadGeneratorConfig {
    /// Number of jobs to submit
    pub jobs: usize,

    /// Delay between submissions; zero submits as fast as possible
    pub pace: Duration,

    /// Size of each random payload in bytes
    pub payload_bytes: usize,
}

impl Default for LoadGeneratorConfig {
    fn default() -> Self {
        Self {
            jobs: 100,
            pace: Duration::ZERO,
            payload_bytes: 128,
        }
    }
}

/// Outcome statistics of a load-generation run
#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    /// Jobs offered to the manager
    pub submitted: usize,

    /// Jobs the manager admitted
    pub accepted: usize,

    /// Jobs rejected at admission
    pub rejected: usize,

    /// Accepted jobs whose completion delivered a result
    pub completed: usize,

    /// Accepted jobs whose completion delivered an error, or whose job was
    /// dropped without being processed
    pub failed: usize,

    /// Sum of completion latencies, for averaging
    pub total_latency: Duration,

    /// Fastest observed completion
    pub min_latency: Option<Duration>,

    /// Slowest observed completion
    pub max_latency: Option<Duration>,
}

impl LoadStats {
    /// Mean completion latency over all satisfied completions
    pub fn average_latency(&self) -> Option<Duration> {
        let satisfied = (self.completed + self.failed) as u32;
        if satisfied == 0 {
            return None;
        }
        Some(self.total_latency / satisfied)
    }

    fn record_latency(&mut self, latency: Duration) {
        self.total_latency += latency;
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = Some(self.max_latency.map_or(latency, |m| m.max(latency)));
    }
}

/// Submits jobs to one model of a workload manager
pub struct LoadGenerator {
    manager: Arc<WorkloadManager>,
    model: ModelInfo,
    config: LoadGeneratorConfig,
}

impl LoadGenerator {
    pub fn new(manager: Arc<WorkloadManager>, model: ModelInfo) -> Self {
        Self {
            manager,
            model,
            config: LoadGeneratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LoadGeneratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Submit the configured number of jobs, await every accepted ticket,
    /// and return the aggregated statistics.
    pub async fn run(&self) -> LoadStats {
        let mut stats = LoadStats::default();
        let mut pending: Vec<(Instant, JobTicket)> = Vec::with_capacity(self.config.jobs);

        info!(
            model = %self.model.name,
            jobs = self.config.jobs,
            "starting load generation"
        );

        for _ in 0..self.config.jobs {
            let (job, ticket) = Job::new(generate_payload(self.config.payload_bytes));
            let submitted_at = Instant::now();
            stats.submitted += 1;

            if self.manager.submit(&self.model, job).await {
                stats.accepted += 1;
                pending.push((submitted_at, ticket));
            } else {
                stats.rejected += 1;
                debug!(model = %self.model.name, "submission rejected");
            }

            if !self.config.pace.is_zero() {
                tokio::time::sleep(self.config.pace).await;
            }
        }

        for (submitted_at, ticket) in pending {
            match ticket.await {
                Ok(Ok(_)) => stats.completed += 1,
                Ok(Err(_)) | Err(_) => stats.failed += 1,
            }
            stats.record_latency(submitted_at.elapsed());
        }

        info!(
            model = %self.model.name,
            accepted = stats.accepted,
            rejected = stats.rejected,
            completed = stats.completed,
            failed = stats.failed,
            "load generation finished"
        );
        stats
    }
}
