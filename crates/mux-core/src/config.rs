//! Configuration management for infermux
//!
//! Provides a unified configuration system that supports YAML files,
//! environment variables, and programmatic construction.

use crate::{ModelInfo, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for the workload manager host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Number of accelerators available for worker placement.
    /// Read once at construction; zero means CPU-only placement.
    pub gpu_count: usize,

    /// Models to provision at startup
    pub models: Vec<ModelInfo>,

    /// Logging configuration
    pub log: LogConfig,
}

impl MuxConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add configuration file if it exists
        if let Ok(config_path) = std::env::var("INFERMUX_CONFIG") {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./infermux.yaml", "/etc/infermux/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        // Add environment variables with INFERMUX_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("INFERMUX")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path));

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for model in &self.models {
            model.validate()?;
        }
        Ok(())
    }

    /// Look up a model descriptor by name
    pub fn model(&self, name: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.name == name)
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            gpu_count: 0,
            models: Vec::new(),
            log: LogConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,

    /// Emit logs as JSON instead of human-readable lines
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
