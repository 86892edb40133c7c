//! Staged concurrent pipelines.
//!
//! A pipeline is a generator followed by alternating buffers and worker
//! stages, ending in a sink. Every stage runs on its own pool of OS threads
//! and stages talk only through bounded [`WorkQueue`]s.
//!
//! # Architecture
//!
//! ```text
//! [generator] ──► (buffer) ──► [worker × n] ──► (buffer) ──► [sink × m]
//! ```
//!
//! # Design
//!
//! - **Backpressure**: a full buffer blocks its producers until consumers
//!   catch up.
//! - **Fail fast**: the first error or panic in any stage cancels the shared
//!   [`CancellationToken`]; every blocked `accept`/`get` wakes up with
//!   [`PipelineError::Cancelled`] and the original error is returned.
//! - **Typed wiring**: the builder chain only allows a buffer's consumer to
//!   read the type its producer writes.

pub mod cancel;
pub mod error;
pub mod executor;
pub mod id;
pub mod queue;
pub mod worker;

pub use cancel::CancellationToken;
pub use error::{PipelineError, PipelineResult};
pub use executor::{BufferStage, Pipeline, PipelineBuilder, SourceStage, WorkerStage};
pub use id::{StageId, WorkerId};
pub use queue::{QueueCounters, QueueReader, QueueWriter, WorkQueue};
pub use worker::{current_worker, worker_index, FailureTracker, WorkerPool};
