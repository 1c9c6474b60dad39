//! Error types for receipt repair.

use std::path::PathBuf;

/// Errors that can occur while inspecting or repairing a receipt.
#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    /// Reading, writing or renaming a file failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The receipt has no `content_hash` field and no place to insert one.
    #[error("no insertion point for content_hash in {0}")]
    NoAnchor(PathBuf),
}

impl ReceiptError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ReceiptError::Io { path, source }
    }
}
