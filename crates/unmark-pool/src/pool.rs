//! [`JobPool`]: a fixed set of workers draining one bounded queue.
//!
//! Submissions are serialized by the input lock, which is also held by
//! [`JobPool::flush`] and [`JobPool::close`]; while a flush is running no new
//! job can enter the queue. An in-flight counter is raised before a payload
//! enters the queue and lowered once a worker has run, batched or discarded
//! it. [`JobPool::wait_chan`] therefore observes an empty queue; jobs may
//! still sit in partial batches until a flush or close dispatches them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::action::{Action, BatchAction, WorkerId};
use crate::error::PoolError;

/// Anything that accepts batches of work.
///
/// Producers (scanners, executors that re-queue follow-up work) hold a
/// `JobSink` instead of a concrete pool.
#[async_trait]
pub trait JobSink<T>: Send + Sync {
    /// Submit a batch. Blocks while the downstream queue is full.
    async fn submit(&self, batch: Vec<T>) -> Result<(), PoolError>;
}

/// State shared between the pool handle and its workers.
struct Shared<T> {
    /// Receiving end of the queue, shared by all workers.
    output: Mutex<mpsc::Receiver<Vec<T>>>,
    /// Jobs admitted but not yet processed.
    pending: watch::Sender<usize>,
    killed: AtomicBool,
    batch_size: usize,
}

impl<T> Shared<T> {
    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    fn settle(&self, count: usize) {
        self.pending.send_modify(|n| *n = n.saturating_sub(count));
    }
}

/// A named pool of batching workers.
pub struct JobPool<T> {
    name: Arc<str>,
    workers: usize,
    /// Sending end of the queue; `None` once closed.
    input: Mutex<Option<mpsc::Sender<Vec<T>>>>,
    shared: Arc<Shared<T>>,
    /// One flush channel per started worker.
    flush_signals: std::sync::Mutex<Vec<mpsc::Sender<oneshot::Sender<()>>>>,
    started: AtomicBool,
    closed: AtomicBool,
    tracker: TaskTracker,
}

impl<T: Send + 'static> JobPool<T> {
    /// Create a stopped pool.
    ///
    /// `workers` is clamped to at least one. A `batch_size` of 0 or 1 means
    /// every job is dispatched on its own. `queue_capacity` bounds the number
    /// of queued payloads before submitters block.
    pub fn new(
        name: impl Into<Arc<str>>,
        workers: usize,
        batch_size: usize,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (pending, _) = watch::channel(0);
        Self {
            name: name.into(),
            workers: workers.max(1),
            input: Mutex::new(Some(tx)),
            shared: Arc::new(Shared {
                output: Mutex::new(rx),
                pending,
                killed: AtomicBool::new(false),
                batch_size,
            }),
            flush_signals: std::sync::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tracker: TaskTracker::new(),
        }
    }

    /// Pool name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Maximum batch size handed to the action.
    pub fn batch_size(&self) -> usize {
        self.shared.batch_size
    }

    /// Jobs admitted but not yet processed.
    pub fn pending(&self) -> usize {
        *self.shared.pending.borrow()
    }

    /// Whether [`kill`](Self::kill) has been called.
    pub fn is_killed(&self) -> bool {
        self.shared.is_killed()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Spawn the workers running `action`.
    ///
    /// Starting an already started pool is a no-op. Starting a closed or
    /// killed pool fails. Must be called from within a tokio runtime.
    pub fn start(&self, action: Action<T>) -> Result<(), PoolError> {
        if self.is_killed() {
            return Err(self.killed_error());
        }
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let action = action.into_batch();
        let mut signals = self.flush_signals.lock().expect("flush signal lock poisoned");
        for num in 0..self.workers {
            let (flush_tx, flush_rx) = mpsc::channel(1);
            signals.push(flush_tx);
            let worker = WorkerId {
                pool: self.name.clone(),
                num,
            };
            self.tracker.spawn(run_worker(
                worker,
                self.shared.clone(),
                flush_rx,
                action.clone(),
            ));
        }

        debug!(
            pool = %self.name,
            workers = self.workers,
            batch_size = self.shared.batch_size,
            "job pool started"
        );
        Ok(())
    }

    /// Submit one job.
    pub async fn add_job(&self, item: T) -> Result<(), PoolError> {
        self.add_batch(vec![item]).await
    }

    /// Submit several jobs as one queue payload.
    ///
    /// Blocks while the queue is full. Workers still split the payload into
    /// batches of at most `batch_size`.
    pub async fn add_batch(&self, batch: Vec<T>) -> Result<(), PoolError> {
        let input = self.input.lock().await;
        if self.is_killed() {
            return Err(self.killed_error());
        }
        let Some(tx) = input.as_ref() else {
            return Err(self.closed_error());
        };
        if batch.is_empty() {
            return Ok(());
        }

        // Reserve first so a cancelled submit never leaves the counter raised.
        let permit = tx.reserve().await.map_err(|_| self.closed_error())?;
        let count = batch.len();
        self.shared.pending.send_modify(|n| *n += count);
        permit.send(batch);
        Ok(())
    }

    /// Drain the queue and force every worker to dispatch its partial batch.
    ///
    /// Submissions block for the duration of the flush.
    pub async fn flush(&self) {
        let _input = self.input.lock().await;
        self.wait_chan().await;

        let signals = self
            .flush_signals
            .lock()
            .expect("flush signal lock poisoned")
            .clone();
        let mut acks = Vec::with_capacity(signals.len());
        for signal in signals {
            let (ack_tx, ack_rx) = oneshot::channel();
            if signal.send(ack_tx).await.is_ok() {
                acks.push(ack_rx);
            }
        }
        for ack in acks {
            let _ = ack.await;
        }
        trace!(pool = %self.name, "job pool flushed");
    }

    /// Stop accepting jobs and wait for the workers to finish.
    ///
    /// Workers drain what is queued, dispatch their partial batches and exit.
    /// Idempotent; safe to call on a pool that was never started.
    pub async fn close(&self) {
        let mut input = self.input.lock().await;
        if input.take().is_some() {
            debug!(pool = %self.name, "closing job pool");
            if !self.started.load(Ordering::Acquire) && self.pending() > 0 {
                warn!(
                    pool = %self.name,
                    pending = self.pending(),
                    "closing job pool that was never started, queued jobs are dropped"
                );
            }
        }
        self.closed.store(true, Ordering::Release);
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Stop the pool without processing what is still queued.
    ///
    /// Jobs already handed to the action run to completion; everything else
    /// is discarded as workers reach it. With `force` the input is also
    /// closed so workers exit once the queue is empty.
    pub async fn kill(&self, force: bool) {
        if !self.shared.killed.swap(true, Ordering::AcqRel) {
            warn!(pool = %self.name, force, "job pool killed");
        }
        if force {
            let mut input = self.input.lock().await;
            input.take();
            self.closed.store(true, Ordering::Release);
            self.tracker.close();
        }
    }

    /// Wait until every worker has exited.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    /// Wait until every admitted job has left the queue.
    pub async fn wait_chan(&self) {
        let mut rx = self.shared.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn closed_error(&self) -> PoolError {
        PoolError::Closed {
            pool: self.name.to_string(),
        }
    }

    fn killed_error(&self) -> PoolError {
        PoolError::Killed {
            pool: self.name.to_string(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> JobSink<T> for JobPool<T> {
    async fn submit(&self, batch: Vec<T>) -> Result<(), PoolError> {
        self.add_batch(batch).await
    }
}

impl<T> std::fmt::Debug for JobPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPool")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("batch_size", &self.shared.batch_size)
            .field("pending", &*self.shared.pending.borrow())
            .field("killed", &self.shared.is_killed())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

enum Event<T> {
    Flush(oneshot::Sender<()>),
    Payload(Option<Vec<T>>),
}

async fn next_payload<T>(shared: &Shared<T>) -> Option<Vec<T>> {
    shared.output.lock().await.recv().await
}

async fn run_worker<T: Send + 'static>(
    worker: WorkerId,
    shared: Arc<Shared<T>>,
    mut flush: mpsc::Receiver<oneshot::Sender<()>>,
    action: Arc<dyn BatchAction<T>>,
) {
    trace!(%worker, "worker started");
    let mut batch: Vec<T> = Vec::new();

    loop {
        let event = tokio::select! {
            biased;
            Some(ack) = flush.recv() => Event::Flush(ack),
            payload = next_payload(&shared) => Event::Payload(payload),
        };

        match event {
            Event::Flush(ack) => {
                dispatch_partial(&worker, &shared, action.as_ref(), &mut batch).await;
                let _ = ack.send(());
            }
            Event::Payload(None) => {
                dispatch_partial(&worker, &shared, action.as_ref(), &mut batch).await;
                break;
            }
            Event::Payload(Some(items)) => {
                let count = items.len();
                if shared.is_killed() {
                    trace!(%worker, count, "pool killed, discarding jobs");
                } else if shared.batch_size <= 1 {
                    for item in items {
                        action.run(&worker, vec![item]).await;
                    }
                } else {
                    for item in items {
                        batch.push(item);
                        if batch.len() >= shared.batch_size {
                            action.run(&worker, std::mem::take(&mut batch)).await;
                        }
                    }
                }
                shared.settle(count);
            }
        }
    }

    trace!(%worker, "worker stopped");
}

async fn dispatch_partial<T>(
    worker: &WorkerId,
    shared: &Shared<T>,
    action: &dyn BatchAction<T>,
    batch: &mut Vec<T>,
) {
    if batch.is_empty() {
        return;
    }
    let partial = std::mem::take(batch);
    if shared.is_killed() {
        trace!(%worker, count = partial.len(), "pool killed, discarding partial batch");
        return;
    }
    action.run(worker, partial).await;
}
