//! Batching worker pools for unmark.
//!
//! A [`JobPool`] runs a fixed number of tokio workers that drain one bounded
//! FIFO queue. Items are grouped into batches of at most `batch_size` before
//! they reach the pool's [`Action`]. The pool supports:
//!
//! - [`JobPool::add_job`] / [`JobPool::add_batch`]: submit with backpressure.
//! - [`JobPool::flush`]: drain the queue and force out partial batches.
//! - [`JobPool::close`]: stop accepting work and finish what was admitted.
//! - [`JobPool::kill`]: stop accepting work and discard what was not started.
//!
//! Producers that only need to submit work depend on [`JobSink`].

mod action;
mod error;
mod pool;

pub use action::{Action, BatchAction, ItemAction, WorkerId};
pub use error::PoolError;
pub use pool::{JobPool, JobSink};
