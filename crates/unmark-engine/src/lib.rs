//! The unmark pipeline: scanning prefixes and acting on what is found.
//!
//! This crate provides:
//!
//! - [`ScanCoordinator`]: paginates each prefix and routes matches
//!   downstream; it runs as the action of the scan-input pool.
//! - [`executor`]: the actions run on matches: restore (bulk delete of
//!   delete markers), dry-run, list, and receipt fixup.
//! - [`Pipeline`]: builds and starts the pools for a [`Mode`], feeds
//!   prefixes, and drains or kills everything on shutdown.
//! - [`ShutdownCoordinator`]: turns process signals into cancellation.
//! - [`AuditLog`]: sorted, tracked background logging of listed versions.

pub mod audit;
pub mod context;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod scan;
pub mod shutdown;

pub use audit::AuditLog;
pub use context::RunContext;
pub use error::EngineError;
pub use pipeline::{Mode, Pipeline, PipelineOptions, PoolSizes, RunSummary};
pub use scan::{ScanCoordinator, ScanMode};
pub use shutdown::ShutdownCoordinator;

#[cfg(test)]
mod tests;
