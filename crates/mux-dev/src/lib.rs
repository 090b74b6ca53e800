//! # mux-dev
//!
//! Development and testing utilities for infermux.
//!
//! This crate provides:
//! - Scripted mock runtimes with latency and failure injection
//! - A load generator submitting jobs against a [`mux_wlm::WorkloadManager`]
//! - Test logging setup
//! - End-to-end scenario tests for the dispatch and scaling engine

pub mod load_generator;
pub mod mock_runtime;
pub mod utils;

// Re-export commonly used types
pub use load_generator::{LoadGenerator, LoadGeneratorConfig, LoadStats};
pub use mock_runtime::{FailureScript, RuntimeCounters, ScriptedRuntime, ScriptedRuntimeFactory};
pub use utils::{generate_payload, init_logging, setup_test_logging};

// Error handling
#[derive(Debug, thiserror::Error)]
pub enum DevError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Load generation error: {0}")]
    LoadGeneration(String),

    #[error("Core error: {0}")]
    Core(#[from] mux_core::Error),

    #[error("Engine error: {0}")]
    Wlm(#[from] mux_wlm::WlmError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DevError>;
