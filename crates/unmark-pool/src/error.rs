//! Error types for job pools.

/// Errors returned when submitting to or starting a [`JobPool`](crate::JobPool).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool's input queue has been closed.
    #[error("pool {pool}: can not add job to queue, input queue is closed")]
    Closed {
        /// Pool name.
        pool: String,
    },

    /// The pool has been killed and accepts no more work.
    #[error("pool {pool}: can not add job to queue, pool has been killed")]
    Killed {
        /// Pool name.
        pool: String,
    },
}
