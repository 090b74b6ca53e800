//! Round-robin device assignment
//!
//! Distributes workers across a fixed accelerator count by pure rotation.
//! Worker counts are capped per model, so hotspots are diluted statistically;
//! load-aware placement is out of scope.

use mux_core::Device;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stateful round-robin allocator over `[0, gpu_count)`
#[derive(Debug)]
pub struct DeviceAssigner {
    gpu_count: usize,
    cursor: AtomicUsize,
}

impl DeviceAssigner {
    /// Create an assigner. `gpu_count == 0` disables accelerator placement;
    /// every assignment is then [`Device::Cpu`].
    pub fn new(gpu_count: usize) -> Self {
        Self {
            gpu_count,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of accelerators this assigner rotates over
    pub fn gpu_count(&self) -> usize {
        self.gpu_count
    }

    /// Allocate the next device, rotating with wrap-around
    pub fn next(&self) -> Device {
        if self.gpu_count == 0 {
            return Device::Cpu;
        }
        let k = self.cursor.fetch_add(1, Ordering::Relaxed);
        Device::Gpu((k % self.gpu_count) as u32)
    }
}
