//! # tileworks: staged pipelines and append-only stores
//!
//! Building blocks for batch map-processing jobs that read a large input,
//! transform it on every core, and collect the results into compact
//! in-memory arrays.
//!
//! ## Architecture
//!
//! - **Storage**: [`storage::AppendStore`] grows in fixed-size slabs and is
//!   indexed by a dense `u64`. One writer appends; any number of
//!   [`storage::StoreReader`]s read the published prefix concurrently.
//! - **Pipeline**: [`pipeline::PipelineBuilder`] chains a generator, bounded
//!   buffers, worker stages and a sink. Each stage runs on its own thread pool;
//!   the first failure cancels every other stage.
//! - **Stats**: every run reports per-stage counts and timings to a
//!   [`stats::Stats`] sink.
//! - **Configuration**: a TOML file with `[storage]`, `[pipeline]` and
//!   `[logging]` sections, see [`config::TileworksConfig`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use tileworks::pipeline::PipelineBuilder;
//! use tileworks::stats::LoggingStats;
//! use tileworks::storage::{LongStore, StoreOptions};
//!
//! let store = Arc::new(Mutex::new(LongStore::new(StoreOptions::default())?));
//! let sink = Arc::clone(&store);
//!
//! let summary = PipelineBuilder::new("ids", LoggingStats::new())
//!     .read_from("read", 0..1_000_000u64)
//!     .add_buffer("raw", 10_000, 1_000)?
//!     .add_worker("square", 4, |input, output| {
//!         while let Some(id) = input.get()? {
//!             output.accept(id * id)?;
//!         }
//!         Ok(())
//!     })?
//!     .add_buffer("squared", 10_000, 1_000)?
//!     .sink_to_consumer("store", 1, move |value| Ok(sink.lock().append(value)?))?
//!     .await_completion()?;
//!
//! println!("{}", summary);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod stats;
pub mod storage;

// Re-export commonly used types
pub use config::TileworksConfig;
pub use error::{Result, TileworksError};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, PipelineResult};
pub use stats::{InMemoryStats, LoggingStats, PipelineSummary, Stats};
pub use storage::{AppendStore, IntStore, LongStore, StoreOptions, StoreReader};
