//! Configuration module for tileworks
//!
//! Settings live in a single TOML file with one table per concern:
//!
//! ```toml
//! [storage]
//! element_width = "long"
//! allocation_kind = "native"
//! slab_size_bytes = 1048576
//!
//! [pipeline]
//! worker_threads = 8
//! buffer_capacity = 100000
//! batch_size = 1000
//!
//! [logging]
//! filter = "info,tileworks=debug"
//! directory = "logs"
//! ```
//!
//! Every field is optional. Missing fields take their defaults, and a
//! missing file can be handled with [`TileworksConfig::load_or_default`].
//!
//! # Example
//!
//! ```ignore
//! use tileworks::config::TileworksConfig;
//!
//! let config = TileworksConfig::load("tileworks.toml")?;
//! let store = LongStore::new(config.storage.options())?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, ResultExt, TileworksError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration filename
pub const CONFIG_FILE: &str = "tileworks.toml";

/// Default buffer capacity in items
pub const DEFAULT_BUFFER_CAPACITY: usize = 100_000;

/// Default items per queue transfer
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Default `EnvFilter` directives
pub const DEFAULT_LOG_FILTER: &str = "info,tileworks=debug";

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileworksConfig {
    pub storage: StorageSettings,
    pub pipeline: PipelineSettings,
    pub logging: LoggingSettings,
}

impl TileworksConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(TileworksError::from)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            TileworksError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {:?}", path))?;

        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load a configuration file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("Using default configuration: {}", e);
                }
                Self::default()
            }
        }
    }

    /// Save the configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(TileworksError::from)
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TileworksError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(TileworksError::from)
            .with_context(|| format!("Failed to write config file {:?}", path))
    }

    /// Check every section, reporting the first invalid value
    pub fn validate(&self) -> Result<()> {
        self.storage.validate().context("[storage]")?;
        self.pipeline.validate().context("[pipeline]")?;
        Ok(())
    }
}
