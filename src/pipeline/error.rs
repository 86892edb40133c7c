//! Pipeline-specific error types.

use crate::error::TileworksError;
use thiserror::Error;

/// Errors that can occur while building or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid wiring: zero capacity, zero batch size, zero workers, ...
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run was cancelled, either by a failure elsewhere or by the caller.
    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Queue '{0}' is closed")]
    QueueClosed(String),

    /// A stage's unit of work returned an error.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// A stage's unit of work panicked.
    #[error("Stage '{stage}' panicked: {message}")]
    Panic { stage: String, message: String },

    /// The OS refused to start a worker thread.
    #[error("Failed to spawn worker thread for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] TileworksError),
}

impl PipelineError {
    /// Whether this error only reports that the run was cancelled.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Turn whatever a unit of work returned into a pipeline error.
    ///
    /// Cancellation propagated through `?` stays [`PipelineError::Cancelled`]
    /// so it can be told apart from the failure that caused it.
    pub fn from_stage(stage: &str, error: anyhow::Error) -> Self {
        let cancelled = error.chain().any(|cause| {
            cause
                .downcast_ref::<PipelineError>()
                .is_some_and(PipelineError::is_cancellation)
        });
        if cancelled {
            PipelineError::Cancelled
        } else {
            PipelineError::Stage {
                stage: stage.to_string(),
                source: error,
            }
        }
    }

    /// Build a panic error from a payload caught by `catch_unwind`.
    pub fn from_panic(stage: &str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        PipelineError::Panic {
            stage: stage.to_string(),
            message,
        }
    }

    /// Name of the stage that produced this error, if it came from one.
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::Stage { stage, .. }
            | PipelineError::Panic { stage, .. }
            | PipelineError::Spawn { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
