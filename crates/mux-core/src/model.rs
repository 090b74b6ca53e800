//! Model descriptors
//!
//! A [`ModelInfo`] carries the per-model scaling and batching bounds the
//! workload manager operates under. Descriptors are supplied by the embedding
//! host (model loader, configuration file) and are read-only to the engine.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-model scaling and batching bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Unique model name, the routing key for submissions
    pub name: String,

    /// Baseline worker count kept alive regardless of traffic
    pub min_workers: usize,

    /// Hard ceiling on concurrently running workers
    pub max_workers: usize,

    /// Maximum number of jobs aggregated into one runtime invocation
    pub batch_size: usize,

    /// How long a worker waits for additional jobs after the first one,
    /// in milliseconds. Also the idle interval after which a transient
    /// worker self-terminates.
    pub max_batch_delay_ms: u64,

    /// Capacity of the model's pending-job queue
    pub queue_size: usize,
}

impl ModelInfo {
    /// Create a descriptor with conservative defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_workers: 1,
            max_workers: 1,
            batch_size: 1,
            max_batch_delay_ms: 100,
            queue_size: 100,
        }
    }

    /// Builder pattern for the scaling bounds
    pub fn with_workers(mut self, min: usize, max: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self
    }

    pub fn with_batching(mut self, batch_size: usize, max_batch_delay_ms: u64) -> Self {
        self.batch_size = batch_size;
        self.max_batch_delay_ms = max_batch_delay_ms;
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Validate the descriptor invariants
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("Model name must not be empty"));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::config(format!(
                "Model {}: min_workers ({}) exceeds max_workers ({})",
                self.name, self.min_workers, self.max_workers
            )));
        }
        if self.batch_size < 1 {
            return Err(Error::config(format!(
                "Model {}: batch_size must be at least 1",
                self.name
            )));
        }
        if self.queue_size < 1 {
            return Err(Error::config(format!(
                "Model {}: queue_size must be at least 1",
                self.name
            )));
        }
        Ok(())
    }

    /// The batch delay as a [`Duration`]
    pub fn max_batch_delay(&self) -> Duration {
        Duration::from_millis(self.max_batch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_info_builder() {
        let model = ModelInfo::new("resnet")
            .with_workers(2, 4)
            .with_batching(8, 50)
            .with_queue_size(32);

        assert_eq!(model.name, "resnet");
        assert_eq!(model.min_workers, 2);
        assert_eq!(model.max_workers, 4);
        assert_eq!(model.batch_size, 8);
        assert_eq!(model.max_batch_delay(), Duration::from_millis(50));
        assert_eq!(model.queue_size, 32);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_worker_bounds() {
        let model = ModelInfo::new("m").with_workers(3, 1);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_degenerate_sizes() {
        assert!(ModelInfo::new("m").with_batching(0, 50).validate().is_err());
        assert!(ModelInfo::new("m").with_queue_size(0).validate().is_err());
        assert!(ModelInfo::new("").validate().is_err());
    }

    #[test]
    fn test_zero_workers_is_valid() {
        // min = max = 0 is a legal descriptor; submissions are simply rejected.
        let model = ModelInfo::new("idle").with_workers(0, 0);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_serde_round_trip() {
        let model = ModelInfo::new("bert").with_workers(1, 2).with_batching(4, 25);
        let yaml = serde_yaml::to_string(&model).unwrap();
        let parsed: ModelInfo = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, model);
    }
}
