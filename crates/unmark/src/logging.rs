//! Log destination selection and subscriber setup.
//!
//! Logs always go to a file. Without `--log` a timestamped file is created in
//! the system temp dir and the output is also copied to standard error,
//! unless standard output carries a listing, in which case only the file is
//! written.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Name of the log file created in a directory.
pub fn log_file_name(at: DateTime<Utc>) -> String {
    format!("unmark-{}.log", at.format("%Y%m%d%H%M%S"))
}

/// Resolve the log file path for `requested`.
///
/// A directory gets a timestamped file inside it; `None` selects the system
/// temp dir.
pub fn log_path(requested: Option<&Path>, at: DateTime<Utc>) -> PathBuf {
    match requested {
        Some(path) if path.is_dir() => path.join(log_file_name(at)),
        Some(path) => path.to_path_buf(),
        None => std::env::temp_dir().join(log_file_name(at)),
    }
}

/// Install the global subscriber and return the log file path.
///
/// `RUST_LOG` overrides `level`. `tee_to_stderr` only applies when no file
/// was requested.
pub fn init(level: &str, requested: Option<&Path>, tee_to_stderr: bool) -> anyhow::Result<PathBuf> {
    let path = log_path(requested, Utc::now());
    let file = open_append(&path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);

    if requested.is_none() && tee_to_stderr {
        builder.with_writer(file.and(std::io::stderr)).init();
    } else {
        builder.with_writer(file).init();
    }
    Ok(path)
}

fn open_append(path: &Path) -> anyhow::Result<Arc<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
    Ok(Arc::new(file))
}
