//! Thread pools that run a stage's unit of work.
//!
//! Every stage gets its own [`WorkerPool`] of named OS threads. Failures from
//! any pool in a pipeline land in one shared [`FailureTracker`]: the first
//! error is kept, the shared token is cancelled, and anything after that is
//! counted as suppressed.

use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, WorkerId};
use parking_lot::Mutex;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// Identity of the calling thread, if it is a pipeline worker.
pub fn current_worker() -> Option<WorkerId> {
    CURRENT_WORKER.with(Cell::get)
}

/// Index of the calling thread within its stage's pool, if it is a worker.
pub fn worker_index() -> Option<usize> {
    current_worker().map(WorkerId::worker)
}

pub(crate) fn check_concurrency(stage: &str, concurrency: usize) -> PipelineResult<()> {
    if concurrency == 0 {
        return Err(PipelineError::Config(format!(
            "Stage '{}' concurrency must be > 0",
            stage
        )));
    }
    if concurrency > WorkerId::MAX_WORKERS {
        return Err(PipelineError::Config(format!(
            "Stage '{}' concurrency {} exceeds {}",
            stage,
            concurrency,
            WorkerId::MAX_WORKERS
        )));
    }
    Ok(())
}

/// Records the first failure of a run and cancels everyone else.
#[derive(Debug)]
pub struct FailureTracker {
    token: CancellationToken,
    first: Mutex<Option<PipelineError>>,
    suppressed: AtomicUsize,
}

impl FailureTracker {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            first: Mutex::new(None),
            suppressed: AtomicUsize::new(0),
        }
    }

    /// Keep `error` if it is the first one, then cancel the run.
    ///
    /// The error is stored before the token is cancelled, so any cancellation
    /// error seen elsewhere arrives after the real cause is already in place.
    pub fn record(&self, error: PipelineError) {
        {
            let mut first = self.first.lock();
            match first.as_ref() {
                None => {
                    if !error.is_cancellation() {
                        tracing::error!("{}", error);
                    }
                    *first = Some(error);
                }
                Some(_) if error.is_cancellation() => {}
                Some(_) => {
                    self.suppressed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Suppressed secondary failure: {}", error);
                }
            }
        }
        self.token.cancel();
    }

    pub fn has_failed(&self) -> bool {
        self.first.lock().is_some()
    }

    /// Secondary failures recorded after the first one.
    pub fn suppressed(&self) -> usize {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Take the primary error. Without a recorded error, an externally
    /// cancelled run still reports [`PipelineError::Cancelled`].
    pub fn take(&self) -> PipelineResult<()> {
        match self.first.lock().take() {
            Some(error) => Err(error),
            None if self.token.is_cancelled() => Err(PipelineError::Cancelled),
            None => Ok(()),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Run `work`, recording its error or panic against `stage`.
/// Returns whether it succeeded.
pub(crate) fn run_guarded<F>(stage: &str, tracker: &FailureTracker, work: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            tracker.record(PipelineError::from_stage(stage, error));
            false
        }
        Err(payload) => {
            tracker.record(PipelineError::from_panic(stage, payload));
            false
        }
    }
}

/// One thread's share of a stage. Owns whatever queue handles the work needs
/// and must report through the tracker before releasing them.
pub(crate) type Task = Box<dyn FnOnce(&FailureTracker) + Send + 'static>;

/// Threads running the same stage.
pub struct WorkerPool {
    stage: String,
    handles: Vec<JoinHandle<Instant>>,
    tracker: Arc<FailureTracker>,
    started: Instant,
}

impl WorkerPool {
    /// Run `work` on `concurrency` threads. `work` receives the worker index.
    pub fn run<F>(name: &str, concurrency: usize, work: F) -> PipelineResult<Self>
    where
        F: Fn(usize) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::run_with_cancellation(name, concurrency, CancellationToken::new(), work)
    }

    /// Like [`WorkerPool::run`], failing fast through `token`.
    pub fn run_with_cancellation<F>(
        name: &str,
        concurrency: usize,
        token: CancellationToken,
        work: F,
    ) -> PipelineResult<Self>
    where
        F: Fn(usize) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        check_concurrency(name, concurrency)?;
        let work = Arc::new(work);
        let stage: Arc<str> = name.into();
        let tasks = (0..concurrency)
            .map(|i| {
                let work = Arc::clone(&work);
                let stage = Arc::clone(&stage);
                Box::new(move |tracker: &FailureTracker| {
                    run_guarded(&stage, tracker, || work(i));
                }) as Task
            })
            .collect();
        let tracker = Arc::new(FailureTracker::new(token));
        Ok(Self::spawn("pool", StageId(0), name, tasks, tracker))
    }

    /// Start one named thread per task. A thread that cannot be spawned is
    /// recorded as a failure; its task is dropped unrun.
    pub(crate) fn spawn(
        prefix: &str,
        id: StageId,
        stage: &str,
        tasks: Vec<Task>,
        tracker: Arc<FailureTracker>,
    ) -> Self {
        let started = Instant::now();
        let mut handles = Vec::with_capacity(tasks.len());
        for (i, task) in tasks.into_iter().enumerate() {
            let thread_tracker = Arc::clone(&tracker);
            let thread_name = format!("{}-{}-{}", prefix, stage, i);
            let spawned = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    CURRENT_WORKER.with(|w| w.set(Some(WorkerId::new(id, i))));
                    tracing::debug!("Worker {} started", thread_name);
                    task(&*thread_tracker);
                    tracing::debug!("Worker {} finished", thread_name);
                    Instant::now()
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    tracker.record(PipelineError::Spawn {
                        stage: stage.to_string(),
                        source,
                    });
                    break;
                }
            }
        }
        Self {
            stage: stage.to_string(),
            handles,
            tracker,
            started,
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn concurrency(&self) -> usize {
        self.handles.len()
    }

    pub fn started_at(&self) -> Instant {
        self.started
    }

    /// Block until every thread exits. Returns when the last one finished,
    /// or `None` when no thread was started.
    pub fn wait(&mut self) -> Option<Instant> {
        let mut last = None;
        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(finished) => last = last.max(Some(finished)),
                Err(payload) => {
                    // panics are caught inside the task; this only fires if
                    // reporting itself panicked
                    self.tracker
                        .record(PipelineError::from_panic(&self.stage, payload));
                    last = last.max(Some(Instant::now()));
                }
            }
        }
        last
    }

    /// Wait for the pool and return its first error, if any.
    pub fn join(mut self) -> PipelineResult<()> {
        self.wait();
        self.tracker.take()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stage", &self.stage)
            .field("threads", &self.handles.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[test]
    fn test_runs_every_worker() {
        let sum = Arc::new(AtomicU64::new(0));
        let counted = Arc::clone(&sum);
        let pool = WorkerPool::run("sum", 4, move |i| {
            counted.fetch_add(i as u64 + 1, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.concurrency(), 4);
        pool.join().unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), 1 + 2 + 3 + 4);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let result = WorkerPool::run("none", 0, |_| Ok(()));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_first_error_wins_and_stops_others() {
        let token = CancellationToken::new();
        let watcher = token.clone();
        let pool = WorkerPool::run_with_cancellation("fail", 3, token, move |i| {
            if i == 0 {
                anyhow::bail!("worker zero failed");
            }
            while !watcher.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(PipelineError::Cancelled.into())
        })
        .unwrap();

        let err = pool.join().unwrap_err();
        assert_eq!(err.stage(), Some("fail"));
        assert!(err.to_string().contains("worker zero failed"));
    }

    #[test]
    fn test_panic_becomes_failure() {
        let pool = WorkerPool::run("boom", 1, |_| panic!("exploded")).unwrap();
        match pool.join() {
            Err(PipelineError::Panic { stage, message }) => {
                assert_eq!(stage, "boom");
                assert_eq!(message, "exploded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_worker_index_and_thread_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        WorkerPool::run("named", 2, move |i| {
            let name = std::thread::current().name().map(str::to_string);
            record.lock().push((i, worker_index(), name));
            Ok(())
        })
        .unwrap()
        .join()
        .unwrap();

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen[0], (0, Some(0), Some("pool-named-0".to_string())));
        assert_eq!(seen[1], (1, Some(1), Some("pool-named-1".to_string())));
        assert_eq!(worker_index(), None);
        assert!(current_worker().is_none());
    }

    #[test]
    fn test_tracker_counts_suppressed() {
        let tracker = FailureTracker::new(CancellationToken::new());
        tracker.record(PipelineError::Config("first".into()));
        tracker.record(PipelineError::Cancelled);
        tracker.record(PipelineError::Config("second".into()));

        assert!(tracker.token().is_cancelled());
        assert_eq!(tracker.suppressed(), 1);
        assert!(matches!(tracker.take(), Err(PipelineError::Config(m)) if m == "first"));
    }

    #[test]
    fn test_external_cancel_reports_cancelled() {
        let tracker = FailureTracker::new(CancellationToken::new());
        assert!(tracker.take().is_ok());
        tracker.token().cancel();
        assert!(tracker.take().unwrap_err().is_cancellation());
    }
}
