//! Statistics collected while a pipeline runs.
//!
//! A pipeline reports to a [`Stats`] sink as stages finish. The sink decides
//! what to do with the numbers: [`InMemoryStats`] keeps them for callers and
//! tests, [`LoggingStats`] writes them to the log.

pub mod format;
pub mod timer;

pub use timer::Timer;

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Role of a stage within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Generator,
    Buffer,
    Worker,
    Sink,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Generator => "generator",
            StageKind::Buffer => "buffer",
            StageKind::Worker => "worker",
            StageKind::Sink => "sink",
        };
        f.write_str(name)
    }
}

/// Counters for one stage after it finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub kind: StageKind,
    /// Threads the stage ran on (0 for buffers).
    pub concurrency: usize,
    /// Items read from the input queue (or accepted, for buffers).
    pub items_in: u64,
    /// Items written to the output queue (or consumed, for buffers).
    pub items_out: u64,
    pub elapsed: Duration,
    /// Highest number of items resident in a buffer at once.
    pub pending_watermark: Option<u64>,
    /// Declared buffer capacity.
    pub capacity: Option<usize>,
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<9} in={} out={} time={}",
            format::pad_left(&self.name, 16),
            self.kind.to_string(),
            format::numeric(self.items_in as f64),
            format::numeric(self.items_out as f64),
            format::duration(self.elapsed),
        )?;
        match self.kind {
            StageKind::Buffer => {
                if let (Some(watermark), Some(capacity)) = (self.pending_watermark, self.capacity) {
                    write!(
                        f,
                        " peak={}/{} ({})",
                        format::numeric(watermark as f64),
                        format::numeric(capacity as f64),
                        format::percent(watermark as f64 / capacity.max(1) as f64)
                    )?;
                }
            }
            _ => {
                write!(
                    f,
                    " threads={} rate={}",
                    self.concurrency,
                    format::rate(self.items_out.max(self.items_in), self.elapsed)
                )?;
            }
        }
        Ok(())
    }
}

/// Everything a finished pipeline run reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub name: String,
    pub elapsed: Duration,
    pub stages: Vec<StageSummary>,
}

impl PipelineSummary {
    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.name == name)
    }
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pipeline {} finished in {}",
            self.name,
            format::duration(self.elapsed)
        )?;
        for stage in &self.stages {
            writeln!(f, "  {}", stage)?;
        }
        Ok(())
    }
}

/// Statistics sink a pipeline reports into.
#[cfg_attr(test, mockall::automock)]
pub trait Stats: Send + Sync {
    /// Called once when `await` starts the pipeline's stages.
    fn pipeline_started(&self, pipeline: &str);

    /// Called once per stage, in pipeline order, after the whole run ended.
    fn stage_finished(&self, pipeline: &str, stage: &StageSummary);

    /// Called when the pipeline completed successfully.
    fn pipeline_finished(&self, summary: &PipelineSummary);

    /// Called when the pipeline failed; `error` is the primary failure.
    fn pipeline_failed(&self, pipeline: &str, error: &str);
}

/// Keeps every summary in memory.
#[derive(Debug, Default)]
pub struct InMemoryStats {
    stages: Mutex<Vec<(String, StageSummary)>>,
    pipelines: Mutex<Vec<PipelineSummary>>,
    failures: Mutex<Vec<(String, String)>>,
}

impl InMemoryStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Summaries of every successfully finished pipeline, oldest first.
    pub fn pipelines(&self) -> Vec<PipelineSummary> {
        self.pipelines.lock().clone()
    }

    /// Stage summaries reported for `pipeline`, including failed runs.
    pub fn stages(&self, pipeline: &str) -> Vec<StageSummary> {
        self.stages
            .lock()
            .iter()
            .filter(|(p, _)| p == pipeline)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// `(pipeline, error)` pairs for failed runs.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.failures.lock().clone()
    }
}

impl Stats for InMemoryStats {
    fn pipeline_started(&self, _pipeline: &str) {}

    fn stage_finished(&self, pipeline: &str, stage: &StageSummary) {
        self.stages
            .lock()
            .push((pipeline.to_string(), stage.clone()));
    }

    fn pipeline_finished(&self, summary: &PipelineSummary) {
        self.pipelines.lock().push(summary.clone());
    }

    fn pipeline_failed(&self, pipeline: &str, error: &str) {
        self.failures
            .lock()
            .push((pipeline.to_string(), error.to_string()));
    }
}

/// Writes summaries through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStats;

impl LoggingStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Stats for LoggingStats {
    fn pipeline_started(&self, pipeline: &str) {
        tracing::info!("[{}] Starting", pipeline);
    }

    fn stage_finished(&self, pipeline: &str, stage: &StageSummary) {
        tracing::info!("[{}] {}", pipeline, stage);
    }

    fn pipeline_finished(&self, summary: &PipelineSummary) {
        tracing::info!(
            "[{}] Finished in {}",
            summary.name,
            format::duration(summary.elapsed)
        );
    }

    fn pipeline_failed(&self, pipeline: &str, error: &str) {
        tracing::error!("[{}] Failed: {}", pipeline, error);
    }
}
