//! Device identity for worker placement
//!
//! Workers execute either on the CPU or on one of a fixed set of accelerators.
//! The accelerator count is read once at startup; device identity never
//! changes for the lifetime of a worker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compute device a worker is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// Host CPU
    Cpu,
    /// Accelerator with the given index
    Gpu(u32),
}

impl Device {
    /// Check if this device is an accelerator
    pub fn is_gpu(&self) -> bool {
        matches!(self, Device::Gpu(_))
    }

    /// Get the accelerator index, if any
    pub fn gpu_index(&self) -> Option<u32> {
        match self {
            Device::Cpu => None,
            Device::Gpu(index) => Some(*index),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(index) => write!(f, "gpu{}", index),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "cpu" {
            return Ok(Device::Cpu);
        }
        if let Some(index) = s.strip_prefix("gpu") {
            return index
                .parse::<u32>()
                .map(Device::Gpu)
                .map_err(|e| format!("Invalid GPU index in '{}': {}", s, e));
        }
        Err(format!("Unknown device: {}", s))
    }
}
