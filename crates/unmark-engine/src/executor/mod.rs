//! Actions run on scan matches.
//!
//! Exactly one of these is active per run, each inside its own pool:
//!
//! - [`RestoreExecutor`]: one bulk delete per batch of delete markers.
//! - [`DryRunExecutor`]: logs what restore would delete.
//! - [`ListExecutor`]: writes matched keys to a file or standard output.
//! - [`FixupExecutor`]: downloads, repairs and re-uploads receipts.

mod dry_run;
mod fixup;
mod list;
mod restore;

pub use dry_run::DryRunExecutor;
pub use fixup::{FixupExecutor, backup_suffix};
pub use list::ListExecutor;
pub use restore::RestoreExecutor;
