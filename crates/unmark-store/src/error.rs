//! Error types for object store operations.

/// Errors that can occur while talking to an object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object (or its latest version) does not exist.
    #[error("object not found: {bucket}/{key}")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// The bucket does not exist.
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    /// A remote call failed as a whole.
    #[error("{op} failed on {bucket}/{target}: {message}")]
    Remote {
        /// Name of the failed operation.
        op: &'static str,
        /// Bucket name.
        bucket: String,
        /// Key or prefix the call was addressing.
        target: String,
        /// Error text reported by the client.
        message: String,
    },

    /// A request could not be built from the given arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
