//! Wall-clock timer for stages and whole pipelines.

use std::time::{Duration, Instant};

/// A started timer that can be stopped once. After `stop`, `elapsed` keeps
/// returning the duration measured at the time of the stop.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
    end: Option<Instant>,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            end: None,
        }
    }

    pub fn stop(&mut self) -> &mut Self {
        if self.end.is_none() {
            self.end = Some(Instant::now());
        }
        self
    }

    pub fn is_running(&self) -> bool {
        self.end.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        match self.end {
            Some(end) => end.duration_since(self.start),
            None => self.start.elapsed(),
        }
    }

    pub fn started_at(&self) -> Instant {
        self.start
    }
}
