//! Error types for the pipeline.

use std::path::PathBuf;

/// Errors that can occur while running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A pool refused work.
    #[error("pool error: {0}")]
    Pool(#[from] unmark_pool::PoolError),

    /// A store call failed outside a fixup step.
    #[error("store error: {0}")]
    Store(#[from] unmark_store::StoreError),

    /// A fixup step against the store failed.
    #[error("fixup {step} failed for {key}: {source}")]
    Fixup {
        /// Step that failed: download, backup or upload.
        step: &'static str,
        /// Receipt key.
        key: String,
        /// Underlying store error.
        #[source]
        source: unmark_store::StoreError,
    },

    /// Receipt verification or repair failed.
    #[error("receipt error: {0}")]
    Receipt(#[from] unmark_receipt::ReceiptError),

    /// Writing to the staging directory failed.
    #[error("staging error on {path}: {source}")]
    Staging {
        /// Local file or directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A key cannot be mapped to a path inside the staging directory.
    #[error("key {0} escapes the staging directory")]
    UnsafeKey(String),

    /// Opening or writing the list output failed.
    #[error("list output error: {0}")]
    ListOutput(#[source] std::io::Error),

    /// A blocking repair task panicked or was cancelled.
    #[error("repair task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The pipeline no longer accepts prefixes.
    #[error("shutting down, prefix {0} not submitted")]
    ShuttingDown(String),
}

impl EngineError {
    pub(crate) fn staging(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| EngineError::Staging { path, source }
    }
}
