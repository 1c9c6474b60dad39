//! Remote object store abstraction for unmark.
//!
//! This crate defines the [`ObjectStore`] trait covering the versioned-bucket
//! calls the tool needs, along with its backends:
//!
//! - [`AwsStore`]: S3 via `aws-sdk-s3`.
//! - [`MemoryStore`]: in-memory versioned buckets with paging and fault
//!   injection.
//! - [`RateLimitedStore`]: wraps any store and charges every call to a shared
//!   [`RateLimiter`].

mod aws_store;
mod error;
mod limited_store;
mod memory_store;
mod rate_limit;
mod traits;

pub use aws_store::AwsStore;
pub use error::StoreError;
pub use limited_store::RateLimitedStore;
pub use memory_store::MemoryStore;
pub use rate_limit::{DEFAULT_BURST, DEFAULT_CALLS_PER_SEC, RateLimiter};
pub use traits::{MAX_DELETE_KEYS, ObjectStore};
