//! Identity types for pipeline stages and their worker threads.
//!
//! A `StageId` is the stage's position in its pipeline, so it doubles as an
//! index into the executor's stage list.

use std::fmt;

/// Position of a stage within its pipeline, in declaration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StageId(pub u32);

impl StageId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageId({})", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Compact worker identifier. High 20 bits = stage index, low 12 bits = worker
/// index within the stage's pool. Up to 4096 threads per stage.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u32);

impl WorkerId {
    const WORKER_BITS: u32 = 12;
    const WORKER_MASK: u32 = (1 << Self::WORKER_BITS) - 1;
    pub const MAX_WORKERS: usize = 1 << Self::WORKER_BITS;

    pub fn new(stage: StageId, worker: usize) -> Self {
        debug_assert!(worker < Self::MAX_WORKERS);
        Self((stage.0 << Self::WORKER_BITS) | (worker as u32 & Self::WORKER_MASK))
    }

    #[inline]
    pub fn stage(self) -> StageId {
        StageId(self.0 >> Self::WORKER_BITS)
    }

    #[inline]
    pub fn worker(self) -> usize {
        (self.0 & Self::WORKER_MASK) as usize
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WorkerId(stage={}, worker={})",
            self.stage().0,
            self.worker()
        )
    }
}
