//! Pipeline builder and executor.
//!
//! A pipeline is declared as a typed chain that the compiler keeps honest:
//!
//! ```text
//! PipelineBuilder ──from_generator──► SourceStage<T>
//!     SourceStage<T> ──add_buffer──► BufferStage<T>
//!     BufferStage<T> ──add_worker──► WorkerStage<T, O> ──add_buffer──► BufferStage<O>
//!     BufferStage<T> ──sink_to────► Pipeline
//! ```
//!
//! Declaring a stage wires its queue handles immediately, so the finished
//! [`Pipeline`] is just a list of ready-to-spawn tasks plus the counters
//! needed for the summary. [`Pipeline::await_completion`] starts one
//! [`WorkerPool`] per stage, waits for every pool to quiesce, reports to the
//! [`Stats`] sink, and returns the summary or the first failure.

use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::StageId;
use crate::pipeline::queue::{QueueCounters, QueueReader, QueueWriter, WorkQueue};
use crate::pipeline::worker::{check_concurrency, run_guarded, FailureTracker, Task, WorkerPool};
use crate::stats::{PipelineSummary, StageKind, StageSummary, Stats, Timer};
use std::sync::Arc;
use std::time::Duration;

type GeneratorFn<T> = Box<dyn FnOnce(&mut QueueWriter<T>) -> anyhow::Result<()> + Send + 'static>;

/// A declared stage, ready to spawn.
struct StagePlan {
    id: StageId,
    name: String,
    kind: StageKind,
    tasks: Vec<Task>,
    input: Option<Arc<QueueCounters>>,
    output: Option<Arc<QueueCounters>>,
    capacity: Option<usize>,
}

/// State shared by every step of the builder chain.
struct Plan {
    name: String,
    stats: Arc<dyn Stats>,
    tracker: Arc<FailureTracker>,
    stages: Vec<StagePlan>,
}

impl Plan {
    fn next_id(&self) -> StageId {
        StageId(self.stages.len() as u32)
    }

    fn ensure_unique(&self, stage: &str) -> PipelineResult<()> {
        if self.stages.iter().any(|s| s.name == stage) {
            return Err(PipelineError::Config(format!(
                "Pipeline '{}' already has a stage named '{}'",
                self.name, stage
            )));
        }
        Ok(())
    }

    fn new_queue<T: Send>(
        &self,
        name: &str,
        capacity: usize,
        max_batch_size: usize,
    ) -> PipelineResult<WorkQueue<T>> {
        self.ensure_unique(name)?;
        WorkQueue::new(name, capacity, max_batch_size, self.tracker.token().clone())
    }

    fn push(
        &mut self,
        name: &str,
        kind: StageKind,
        tasks: Vec<Task>,
        input: Option<Arc<QueueCounters>>,
        output: Option<Arc<QueueCounters>>,
    ) {
        let id = self.next_id();
        tracing::debug!("[{}] Declared {} stage '{}' ({:?})", self.name, kind, name, id);
        self.stages.push(StagePlan {
            id,
            name: name.to_string(),
            kind,
            tasks,
            input,
            output,
            capacity: None,
        });
    }

    fn push_buffer<T>(&mut self, queue: &WorkQueue<T>) {
        let counters = queue.counters();
        self.push(
            queue.name(),
            StageKind::Buffer,
            Vec::new(),
            Some(Arc::clone(&counters)),
            Some(counters),
        );
        if let Some(stage) = self.stages.last_mut() {
            stage.capacity = Some(queue.capacity());
        }
    }
}

/// Starting point for declaring a pipeline.
pub struct PipelineBuilder {
    name: String,
    stats: Arc<dyn Stats>,
    token: CancellationToken,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>, stats: Arc<dyn Stats>) -> Self {
        Self {
            name: name.into(),
            stats,
            token: CancellationToken::new(),
        }
    }

    /// Share `token` with the pipeline, e.g. to cancel it from outside.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    fn into_plan(self, token: CancellationToken) -> Plan {
        Plan {
            name: self.name,
            stats: self.stats,
            tracker: Arc::new(FailureTracker::new(token)),
            stages: Vec::new(),
        }
    }

    /// Start with a generator that runs once, on a single thread, and emits
    /// items through the writer it is given.
    pub fn from_generator<T, F>(self, name: &str, generate: F) -> SourceStage<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut QueueWriter<T>) -> anyhow::Result<()> + Send + 'static,
    {
        let token = self.token.clone();
        SourceStage {
            plan: self.into_plan(token),
            name: name.to_string(),
            generate: Box::new(generate),
        }
    }

    /// Start with a generator that emits every item of `items`, in order.
    pub fn read_from<T, I>(self, name: &str, items: I) -> SourceStage<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
    {
        self.from_generator(name, move |output| {
            for item in items {
                output.accept(item)?;
            }
            Ok(())
        })
    }

    /// Start from a queue filled elsewhere.
    ///
    /// The queue is closed to new writers and the pipeline adopts its
    /// cancellation token. The queue ends once every writer obtained before
    /// this call has been closed or dropped.
    pub fn read_from_queue<T>(self, mut queue: WorkQueue<T>) -> BufferStage<T>
    where
        T: Send + 'static,
    {
        queue.close();
        let mut plan = self.into_plan(queue.cancellation().clone());
        plan.push_buffer(&queue);
        BufferStage { plan, queue }
    }
}

/// A declared generator still waiting for its output buffer.
pub struct SourceStage<T> {
    plan: Plan,
    name: String,
    generate: GeneratorFn<T>,
}

impl<T: Send + 'static> SourceStage<T> {
    /// Route the generator's items into a new buffer.
    pub fn add_buffer(
        self,
        name: &str,
        capacity: usize,
        max_batch_size: usize,
    ) -> PipelineResult<BufferStage<T>> {
        let SourceStage {
            mut plan,
            name: stage,
            generate,
        } = self;

        let mut queue = plan.new_queue::<T>(name, capacity, max_batch_size)?;
        if name == stage {
            return Err(PipelineError::Config(format!(
                "Pipeline '{}' already has a stage named '{}'",
                plan.name, stage
            )));
        }
        let mut writer = queue.writer()?;
        queue.close();

        let stage_name: Arc<str> = stage.as_str().into();
        let task: Task = Box::new(move |tracker: &FailureTracker| {
            run_guarded(&stage_name, tracker, || {
                generate(&mut writer)?;
                writer.flush()?;
                Ok(())
            });
        });

        plan.push(
            &stage,
            StageKind::Generator,
            vec![task],
            None,
            Some(queue.counters()),
        );
        plan.push_buffer(&queue);
        Ok(BufferStage { plan, queue })
    }
}

/// A buffer whose consumer has not been declared yet.
pub struct BufferStage<T> {
    plan: Plan,
    queue: WorkQueue<T>,
}

impl<T: Send + 'static> BufferStage<T> {
    /// Add a transform that reads this buffer on `concurrency` threads and
    /// writes into the buffer declared next.
    pub fn add_worker<O, F>(
        self,
        name: &str,
        concurrency: usize,
        work: F,
    ) -> PipelineResult<WorkerStage<T, O>>
    where
        O: Send + 'static,
        F: Fn(&mut QueueReader<T>, &mut QueueWriter<O>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        check_concurrency(name, concurrency)?;
        self.plan.ensure_unique(name)?;
        Ok(WorkerStage {
            plan: self.plan,
            input: self.queue,
            name: name.to_string(),
            concurrency,
            work: Arc::new(work),
        })
    }

    /// Finish the pipeline with a sink that reads this buffer on
    /// `concurrency` threads.
    pub fn sink_to<F>(self, name: &str, concurrency: usize, work: F) -> PipelineResult<Pipeline>
    where
        F: Fn(&mut QueueReader<T>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        check_concurrency(name, concurrency)?;
        let BufferStage { mut plan, queue } = self;
        plan.ensure_unique(name)?;

        let work = Arc::new(work);
        let stage_name: Arc<str> = name.into();
        let tasks = (0..concurrency)
            .map(|_| {
                let mut reader = queue.reader();
                let work = Arc::clone(&work);
                let stage_name = Arc::clone(&stage_name);
                Box::new(move |tracker: &FailureTracker| {
                    run_guarded(&stage_name, tracker, || work(&mut reader));
                }) as Task
            })
            .collect();

        let input = queue.counters();
        // the executor must not keep a receiver alive past the consumers
        drop(queue);
        plan.push(name, StageKind::Sink, tasks, Some(input), None);
        Ok(Pipeline { plan })
    }

    /// Finish the pipeline with a sink that handles one item at a time.
    pub fn sink_to_consumer<F>(
        self,
        name: &str,
        concurrency: usize,
        consume: F,
    ) -> PipelineResult<Pipeline>
    where
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.sink_to(name, concurrency, move |input| {
            while let Some(item) = input.get()? {
                consume(item)?;
            }
            Ok(())
        })
    }
}

/// A declared transform still waiting for its output buffer.
pub struct WorkerStage<I, O> {
    plan: Plan,
    input: WorkQueue<I>,
    name: String,
    concurrency: usize,
    #[allow(clippy::type_complexity)]
    work: Arc<
        dyn Fn(&mut QueueReader<I>, &mut QueueWriter<O>) -> anyhow::Result<()> + Send + Sync,
    >,
}

impl<I: Send + 'static, O: Send + 'static> WorkerStage<I, O> {
    /// Route the transform's output into a new buffer.
    pub fn add_buffer(
        self,
        name: &str,
        capacity: usize,
        max_batch_size: usize,
    ) -> PipelineResult<BufferStage<O>> {
        let WorkerStage {
            mut plan,
            input,
            name: stage,
            concurrency,
            work,
        } = self;

        if name == stage {
            return Err(PipelineError::Config(format!(
                "Pipeline '{}' already has a stage named '{}'",
                plan.name, stage
            )));
        }
        let mut output = plan.new_queue::<O>(name, capacity, max_batch_size)?;

        let stage_name: Arc<str> = stage.as_str().into();
        let mut tasks: Vec<Task> = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let mut reader = input.reader();
            let mut writer = output.writer()?;
            let work = Arc::clone(&work);
            let stage_name = Arc::clone(&stage_name);
            tasks.push(Box::new(move |tracker: &FailureTracker| {
                run_guarded(&stage_name, tracker, || {
                    work(&mut reader, &mut writer)?;
                    writer.flush()?;
                    Ok(())
                });
            }));
        }
        output.close();

        let input_counters = input.counters();
        drop(input);
        plan.push(
            &stage,
            StageKind::Worker,
            tasks,
            Some(input_counters),
            Some(output.counters()),
        );
        plan.push_buffer(&output);
        Ok(BufferStage {
            plan,
            queue: output,
        })
    }
}

/// A fully declared pipeline. Nothing runs until [`Pipeline::await_completion`].
pub struct Pipeline {
    plan: Plan,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.plan.name
    }

    /// Stage names in declaration order, buffers included.
    pub fn stage_names(&self) -> Vec<&str> {
        self.plan.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Token shared by every stage. Cancelling it stops the run and makes
    /// `await_completion` return [`PipelineError::Cancelled`].
    pub fn cancellation(&self) -> CancellationToken {
        self.plan.tracker.token().clone()
    }

    /// Run every stage and block until all of them have finished.
    ///
    /// On success returns per-stage statistics. On failure returns the first
    /// error raised by any stage, after every other stage has stopped.
    pub fn await_completion(self) -> PipelineResult<PipelineSummary> {
        let Plan {
            name,
            stats,
            tracker,
            stages,
        } = self.plan;

        stats.pipeline_started(&name);
        tracing::info!("[{}] Starting {} stages", name, stages.len());
        let mut timer = Timer::start();

        let mut running = Vec::with_capacity(stages.len());
        for mut stage in stages {
            let tasks = std::mem::take(&mut stage.tasks);
            let pool = if tasks.is_empty() {
                None
            } else if tracker.has_failed() {
                // an earlier stage could not start; its consumers see the
                // cancellation and these tasks are never needed
                drop(tasks);
                None
            } else {
                Some(WorkerPool::spawn(
                    &name,
                    stage.id,
                    &stage.name,
                    tasks,
                    Arc::clone(&tracker),
                ))
            };
            running.push((stage, pool));
        }

        let mut finished = Vec::with_capacity(running.len());
        for (stage, pool) in running {
            let (concurrency, elapsed) = match pool {
                Some(mut pool) => {
                    let elapsed = pool
                        .wait()
                        .map(|end| end.saturating_duration_since(pool.started_at()))
                        .unwrap_or_default();
                    (pool.concurrency(), elapsed)
                }
                None => (0, Duration::ZERO),
            };
            finished.push((stage, concurrency, elapsed));
        }
        timer.stop();

        let summaries = summarize(&finished);
        for summary in &summaries {
            stats.stage_finished(&name, summary);
        }
        let summary = PipelineSummary {
            name: name.clone(),
            elapsed: timer.elapsed(),
            stages: summaries,
        };

        match tracker.take() {
            Ok(()) => {
                tracing::info!("[{}] Finished {} stages", name, summary.stages.len());
                stats.pipeline_finished(&summary);
                Ok(summary)
            }
            Err(error) => {
                let suppressed = tracker.suppressed();
                if suppressed > 0 {
                    tracing::warn!(
                        "[{}] {} secondary failures were suppressed",
                        name,
                        suppressed
                    );
                }
                stats.pipeline_failed(&name, &error.to_string());
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.plan.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}

fn summarize(finished: &[(StagePlan, usize, Duration)]) -> Vec<StageSummary> {
    let accepted = |c: &Option<Arc<QueueCounters>>| c.as_ref().map_or(0, |c| c.accepted());
    let consumed = |c: &Option<Arc<QueueCounters>>| c.as_ref().map_or(0, |c| c.consumed());

    finished
        .iter()
        .enumerate()
        .map(|(i, (stage, concurrency, elapsed))| {
            let mut summary = StageSummary {
                name: stage.name.clone(),
                kind: stage.kind,
                concurrency: *concurrency,
                items_in: consumed(&stage.input),
                items_out: accepted(&stage.output),
                elapsed: *elapsed,
                pending_watermark: None,
                capacity: None,
            };
            if stage.kind == StageKind::Buffer {
                // a buffer lives as long as the stage draining it
                summary.items_in = accepted(&stage.input);
                summary.items_out = consumed(&stage.output);
                summary.elapsed = finished.get(i + 1).map_or(Duration::ZERO, |next| next.2);
                summary.pending_watermark = stage.input.as_ref().map(|c| c.watermark());
                summary.capacity = stage.capacity;
            }
            summary
        })
        .collect()
}
