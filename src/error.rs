//! Error handling for tileworks
//!
//! This module defines the crate-level error type used by storage and
//! configuration, and a Result alias for use throughout the crate. Pipeline
//! execution has its own error type in [`crate::pipeline::error`].

use thiserror::Error;

/// Main error type for tileworks storage and configuration operations
#[derive(Error, Debug)]
pub enum TileworksError {
    /// Invalid store, queue or configuration file parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// Read past the current end of an append store
    #[error("Index {index} out of bounds for store of size {size}")]
    OutOfBounds { index: u64, size: u64 },

    /// A slab could not be allocated
    #[error("Failed to allocate slab of {bytes} bytes")]
    Allocation { bytes: usize },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TileworksError>,
    },
}

impl TileworksError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TileworksError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with any context layers removed
    pub fn root(&self) -> &TileworksError {
        match self {
            TileworksError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for tileworks operations
pub type Result<T> = std::result::Result<T, TileworksError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
