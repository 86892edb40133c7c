//! Logging setup for the `tileworks` binary and long-running hosts.
//!
//! Events always go to stderr. When [`LoggingSettings::directory`] is set they
//! are also written to a daily rolling file through a non-blocking writer.
//! `RUST_LOG` overrides the configured filter.

use crate::config::LoggingSettings;
use crate::error::{Result, TileworksError};
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Whether events are also written to a log file.
    pub fn has_file(&self) -> bool {
        self._file_guard.is_some()
    }
}

/// Filter from `RUST_LOG`, falling back to `default_directives`.
pub fn env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Install the global subscriber.
///
/// Fails if the log directory cannot be created or a global subscriber is
/// already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<LoggingGuard> {
    let (file_layer, file_guard) = match &settings.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, &settings.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(settings.ansi)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter(&settings.filter))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TileworksError::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
