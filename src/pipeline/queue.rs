//! Bounded, batching work queue between two pipeline stages.
//!
//! Items travel in batches through a bounded crossbeam channel of
//! `Vec<T>`. Each producer owns a [`QueueWriter`] that fills a private batch
//! and publishes it when full; each consumer owns a [`QueueReader`] that takes
//! one batch at a time and hands out its items.
//!
//! ```text
//! writer 0 ─ [batch] ─┐                        ┌─ reader 0
//!                     ├─► [b][b][b]  (slots) ──┤
//! writer 1 ─ [batch] ─┘                        └─ reader 1
//! ```
//!
//! Every accepted item holds one of `capacity` permits until a reader hands
//! it out, so items in unpublished writer batches count against the capacity
//! too. A producer that runs out of permits publishes its partial batch and
//! blocks. The channel holds `capacity / max_batch_size` batches, batches
//! being capped at `capacity` items.
//!
//! The queue is exhausted once it has been closed, every writer has closed or
//! been dropped, and every published batch has been taken. From then on
//! [`QueueReader::get`] keeps returning `None`.
//!
//! Every blocking call also watches the pipeline's [`CancellationToken`] and
//! returns [`PipelineError::Cancelled`] instead of waiting forever.

use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters for one queue.
#[derive(Debug, Default)]
pub struct QueueCounters {
    accepted: AtomicU64,
    consumed: AtomicU64,
    pending: AtomicU64,
    watermark: AtomicU64,
}

impl QueueCounters {
    fn on_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        self.watermark.fetch_max(pending, Ordering::Relaxed);
    }

    fn on_consume(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    fn on_discard(&self, count: u64) {
        self.pending.fetch_sub(count, Ordering::AcqRel);
    }

    /// Items accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Items handed to consumers so far.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// Items accepted but not yet consumed.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Highest `pending` value seen.
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Relaxed)
    }
}

/// `capacity` tokens shared by every handle of one queue. A token is taken
/// per accepted item and returned when the item is handed out or discarded.
#[derive(Clone)]
struct Permits {
    take: Sender<()>,
    give_back: Receiver<()>,
}

impl Permits {
    fn new(capacity: usize) -> Self {
        let (take, give_back) = bounded(capacity);
        Self { take, give_back }
    }

    fn try_acquire(&self) -> bool {
        // the receiving half lives in this struct, so the channel never disconnects
        !matches!(self.take.try_send(()), Err(TrySendError::Full(())))
    }

    fn release(&self, count: u64) {
        for _ in 0..count {
            if self.give_back.try_recv().is_err() {
                break;
            }
        }
    }
}

/// A bounded queue of `T`, handing out producer and consumer handles.
pub struct WorkQueue<T> {
    name: Arc<str>,
    capacity: usize,
    max_batch_size: usize,
    tx: Option<Sender<Vec<T>>>,
    rx: Receiver<Vec<T>>,
    permits: Permits,
    counters: Arc<QueueCounters>,
    cancel: CancellationToken,
}

impl<T: Send> WorkQueue<T> {
    /// Create a queue holding at most `capacity` items in transit, moved in
    /// batches of up to `max_batch_size`.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        max_batch_size: usize,
        cancel: CancellationToken,
    ) -> PipelineResult<Self> {
        let name: String = name.into();
        if capacity == 0 {
            return Err(PipelineError::Config(format!(
                "Queue '{}' capacity must be > 0",
                name
            )));
        }
        if max_batch_size == 0 {
            return Err(PipelineError::Config(format!(
                "Queue '{}' batch size must be > 0",
                name
            )));
        }

        // a single batch never holds more than the whole queue
        let max_batch_size = max_batch_size.min(capacity);
        let slots = capacity / max_batch_size;
        let (tx, rx) = bounded(slots);

        Ok(Self {
            name: name.into(),
            capacity,
            max_batch_size,
            tx: Some(tx),
            rx,
            permits: Permits::new(capacity),
            counters: Arc::new(QueueCounters::default()),
            cancel,
        })
    }

    /// A new producer handle with its own batch buffer.
    pub fn writer(&self) -> PipelineResult<QueueWriter<T>> {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| PipelineError::QueueClosed(self.name.to_string()))?;
        Ok(QueueWriter {
            name: Arc::clone(&self.name),
            tx: Some(tx),
            batch: Vec::with_capacity(self.max_batch_size),
            max_batch_size: self.max_batch_size,
            permits: self.permits.clone(),
            counters: Arc::clone(&self.counters),
            cancel: self.cancel.clone(),
        })
    }

    /// A new consumer handle.
    pub fn reader(&self) -> QueueReader<T> {
        QueueReader {
            name: Arc::clone(&self.name),
            rx: self.rx.clone(),
            current: Vec::new().into_iter(),
            permits: self.permits.clone(),
            counters: Arc::clone(&self.counters),
            cancel: self.cancel.clone(),
        }
    }

    /// Stop handing out writers. Once every existing writer is closed and the
    /// queue has drained, readers observe end of stream.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            tracing::debug!("Queue '{}' closed to new writers", self.name);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl<T> WorkQueue<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Accepted-but-not-consumed items. For statistics only.
    pub fn get_pending(&self) -> u64 {
        self.counters.pending()
    }

    pub fn counters(&self) -> Arc<QueueCounters> {
        Arc::clone(&self.counters)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("max_batch_size", &self.max_batch_size)
            .field("pending", &self.counters.pending())
            .field("closed", &self.tx.is_none())
            .finish()
    }
}

/// Producer side of a [`WorkQueue`]. One per producing thread.
pub struct QueueWriter<T> {
    name: Arc<str>,
    tx: Option<Sender<Vec<T>>>,
    batch: Vec<T>,
    max_batch_size: usize,
    permits: Permits,
    counters: Arc<QueueCounters>,
    cancel: CancellationToken,
}

impl<T> QueueWriter<T> {
    /// Add `item` to this writer's batch, publishing the batch once full.
    /// Blocks while the queue is at capacity.
    ///
    /// A writer blocked here after every reader has gone waits until the
    /// queue's token is cancelled.
    pub fn accept(&mut self, item: T) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if self.tx.is_none() {
            return Err(PipelineError::QueueClosed(self.name.to_string()));
        }
        self.acquire()?;
        self.counters.on_accept();
        self.batch.push(item);
        if self.batch.len() >= self.max_batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn acquire(&mut self) -> PipelineResult<()> {
        if self.permits.try_acquire() {
            return Ok(());
        }
        // full: our own partial batch may be what the readers are waiting for
        self.flush()?;
        select! {
            send(self.permits.take, ()) -> res => {
                res.map_err(|_| PipelineError::QueueClosed(self.name.to_string()))
            }
            recv(self.cancel.signal()) -> _ => Err(PipelineError::Cancelled),
        }
    }

    /// Publish the partial batch, if any.
    pub fn flush(&mut self) -> PipelineResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return Err(PipelineError::QueueClosed(self.name.to_string())),
        };
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.max_batch_size));
        let count = batch.len() as u64;
        select! {
            send(tx, batch) -> res => {
                if res.is_err() {
                    // every reader is gone; nothing will consume these
                    self.counters.on_discard(count);
                    self.permits.release(count);
                    return Err(PipelineError::QueueClosed(self.name.to_string()));
                }
            }
            recv(self.cancel.signal()) -> _ => {
                self.counters.on_discard(count);
                self.permits.release(count);
                return Err(PipelineError::Cancelled);
            }
        }
        Ok(())
    }

    /// Flush and release this producer. The queue ends once all writers have
    /// closed and the queue itself is closed.
    pub fn close(mut self) -> PipelineResult<()> {
        self.flush()?;
        self.tx = None;
        Ok(())
    }

    /// Items sitting in this writer's unpublished batch.
    pub fn buffered(&self) -> usize {
        self.batch.len()
    }

    pub fn queue_name(&self) -> &str {
        &self.name
    }
}

impl<T> Drop for QueueWriter<T> {
    fn drop(&mut self) {
        if !self.batch.is_empty() {
            tracing::debug!(
                "Queue '{}' writer dropped with {} unpublished items",
                self.name,
                self.batch.len()
            );
            self.counters.on_discard(self.batch.len() as u64);
            self.permits.release(self.batch.len() as u64);
        }
    }
}

/// Consumer side of a [`WorkQueue`]. Clone it to add consumers.
pub struct QueueReader<T> {
    name: Arc<str>,
    rx: Receiver<Vec<T>>,
    current: std::vec::IntoIter<T>,
    permits: Permits,
    counters: Arc<QueueCounters>,
    cancel: CancellationToken,
}

impl<T> QueueReader<T> {
    /// Next item, blocking until one is available. Returns `Ok(None)` once the
    /// queue is closed and drained, and keeps doing so on every later call.
    pub fn get(&mut self) -> PipelineResult<Option<T>> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if let Some(item) = self.current.next() {
                self.counters.on_consume();
                self.permits.release(1);
                return Ok(Some(item));
            }

            select! {
                recv(self.rx) -> msg => match msg {
                    Ok(batch) => self.current = batch.into_iter(),
                    Err(_) => return Ok(None),
                },
                recv(self.cancel.signal()) -> _ => return Err(PipelineError::Cancelled),
            }
        }
    }

    /// Accepted-but-not-consumed items across the whole queue.
    pub fn get_pending(&self) -> u64 {
        self.counters.pending()
    }

    pub fn queue_name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for QueueReader<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            rx: self.rx.clone(),
            current: Vec::new().into_iter(),
            permits: self.permits.clone(),
            counters: Arc::clone(&self.counters),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> Iterator for QueueReader<T> {
    type Item = PipelineResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get().transpose()
    }
}
