//! Work performed by pool workers.
//!
//! A pool runs exactly one [`Action`] for its lifetime: either a per-item
//! action invoked once for every job, or a per-batch action invoked with up to
//! `batch_size` jobs at a time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

/// Identity of one pool worker, passed to every action invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId {
    /// Name of the owning pool.
    pub pool: Arc<str>,
    /// Worker number within the pool, starting at zero.
    pub num: usize,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.pool, self.num)
    }
}

/// Action invoked once per job.
#[async_trait]
pub trait ItemAction<T>: Send + Sync {
    /// Process a single job.
    async fn run(&self, worker: &WorkerId, item: T);
}

/// Action invoked once per batch of jobs.
#[async_trait]
pub trait BatchAction<T>: Send + Sync {
    /// Process a non-empty batch of at most `batch_size` jobs.
    async fn run(&self, worker: &WorkerId, batch: Vec<T>);
}

/// The action a pool is started with.
pub enum Action<T> {
    /// Invoke once per job.
    PerItem(Arc<dyn ItemAction<T>>),
    /// Invoke once per batch.
    PerBatch(Arc<dyn BatchAction<T>>),
}

impl<T: Send + 'static> Action<T> {
    /// Per-item action from an async closure.
    pub fn per_item<F, Fut>(f: F) -> Self
    where
        F: Fn(WorkerId, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Action::PerItem(Arc::new(FnItem(f)))
    }

    /// Per-batch action from an async closure.
    pub fn per_batch<F, Fut>(f: F) -> Self
    where
        F: Fn(WorkerId, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Action::PerBatch(Arc::new(FnBatch(f)))
    }

    /// Normalize to a batch action; per-item actions are applied in order.
    pub(crate) fn into_batch(self) -> Arc<dyn BatchAction<T>> {
        match self {
            Action::PerBatch(action) => action,
            Action::PerItem(action) => Arc::new(EachItem(action)),
        }
    }
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        match self {
            Action::PerItem(action) => Action::PerItem(action.clone()),
            Action::PerBatch(action) => Action::PerBatch(action.clone()),
        }
    }
}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::PerItem(_) => f.write_str("Action::PerItem"),
            Action::PerBatch(_) => f.write_str("Action::PerBatch"),
        }
    }
}

struct FnItem<F>(F);

#[async_trait]
impl<T, F, Fut> ItemAction<T> for FnItem<F>
where
    T: Send + 'static,
    F: Fn(WorkerId, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(&self, worker: &WorkerId, item: T) {
        (self.0)(worker.clone(), item).await
    }
}

struct FnBatch<F>(F);

#[async_trait]
impl<T, F, Fut> BatchAction<T> for FnBatch<F>
where
    T: Send + 'static,
    F: Fn(WorkerId, Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(&self, worker: &WorkerId, batch: Vec<T>) {
        (self.0)(worker.clone(), batch).await
    }
}

struct EachItem<T>(Arc<dyn ItemAction<T>>);

#[async_trait]
impl<T: Send + 'static> BatchAction<T> for EachItem<T> {
    async fn run(&self, worker: &WorkerId, batch: Vec<T>) {
        for item in batch {
            self.0.run(worker, item).await;
        }
    }
}
