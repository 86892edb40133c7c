//! Sections of the configuration file
//!
//! Each section maps to one `[table]` in the TOML file and every field has a
//! default, so a partial (or empty) file is always valid input.
//!
//! # Main Types
//!
//! - [`StorageSettings`] - Element width, allocation kind and slab size for stores
//! - [`PipelineSettings`] - Default worker threads and buffer sizing
//! - [`LoggingSettings`] - Log filter and optional log directory

use crate::error::{Result, TileworksError};
use crate::storage::{AllocationKind, StoreOptions, DEFAULT_SLAB_SIZE_BYTES};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{DEFAULT_BATCH_SIZE, DEFAULT_BUFFER_CAPACITY, DEFAULT_LOG_FILTER};

/// Width of the values held by an append store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementWidth {
    /// 32-bit values (`IntStore`)
    #[default]
    Int,
    /// 64-bit values (`LongStore`)
    Long,
}

impl ElementWidth {
    /// Size of one element in bytes
    pub fn bytes(&self) -> usize {
        match self {
            ElementWidth::Int => 4,
            ElementWidth::Long => 8,
        }
    }

    /// Display name for logs
    pub fn name(&self) -> &'static str {
        match self {
            ElementWidth::Int => "int",
            ElementWidth::Long => "long",
        }
    }
}

/// Parameters for append stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub element_width: ElementWidth,
    pub allocation_kind: AllocationKind,
    /// Bytes per slab; must be a power of two and a multiple of 8
    pub slab_size_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            element_width: ElementWidth::default(),
            allocation_kind: AllocationKind::default(),
            slab_size_bytes: DEFAULT_SLAB_SIZE_BYTES,
        }
    }
}

impl StorageSettings {
    /// Store construction options for these settings
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            allocation_kind: self.allocation_kind,
            slab_size_bytes: self.slab_size_bytes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.options().validate()?;
        if self.slab_size_bytes < self.element_width.bytes() {
            return Err(TileworksError::Config(format!(
                "Slab size {} cannot hold a {}-byte element",
                self.slab_size_bytes,
                self.element_width.bytes()
            )));
        }
        Ok(())
    }
}

/// Defaults for pipeline stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Threads per worker stage
    pub worker_threads: usize,
    /// Items a buffer holds before producers block
    pub buffer_capacity: usize,
    /// Items moved between stages per transfer
    pub batch_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(TileworksError::Config(
                "pipeline.worker_threads must be > 0".to_string(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(TileworksError::Config(
                "pipeline.buffer_capacity must be > 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(TileworksError::Config(
                "pipeline.batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Number of threads the machine can run in parallel, or 1 if unknown
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directives used when `RUST_LOG` is not set
    pub filter: String,

    /// Also write daily log files into this directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// File name prefix for log files
    pub file_prefix: String,

    /// Use ANSI colors on stderr
    pub ansi: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
            file_prefix: "tileworks.log".to_string(),
            ansi: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_defaults_are_valid() {
        let settings = StorageSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.options(), StoreOptions::default());
    }

    #[test]
    fn test_storage_rejects_bad_slab_size() {
        let settings = StorageSettings {
            slab_size_bytes: 1000,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(TileworksError::Config(_))));

        let settings = StorageSettings {
            element_width: ElementWidth::Long,
            slab_size_bytes: 4,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_pipeline_rejects_zero_values() {
        assert!(PipelineSettings::default().validate().is_ok());
        for broken in [
            PipelineSettings {
                worker_threads: 0,
                ..Default::default()
            },
            PipelineSettings {
                buffer_capacity: 0,
                ..Default::default()
            },
            PipelineSettings {
                batch_size: 0,
                ..Default::default()
            },
        ] {
            assert!(broken.validate().is_err(), "{:?}", broken);
        }
    }

    #[test]
    fn test_element_width() {
        assert_eq!(ElementWidth::Int.bytes(), 4);
        assert_eq!(ElementWidth::Long.bytes(), 8);
    }
}
