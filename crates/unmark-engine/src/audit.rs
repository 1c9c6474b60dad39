//! Background logging of listed versions.
//!
//! Verbose and audit runs log whole pages of entries. The lines are written
//! from tracked background tasks so listing is not held up by logging;
//! [`AuditLog::wait`] is called before the run ends so nothing is lost.

use tokio_util::task::TaskTracker;
use tracing::info;
use unmark_types::{Status, VersionEntry};

/// Tracked, sorted logger for version entries.
#[derive(Debug, Clone)]
pub struct AuditLog {
    tracker: TaskTracker,
    pid: u32,
}

impl AuditLog {
    /// Create a logger stamping `pid` on every line.
    pub fn new(pid: u32) -> Self {
        Self {
            tracker: TaskTracker::new(),
            pid,
        }
    }

    /// Log `entries` with `status`, sorted by key then time.
    pub fn record(&self, status: Status, mut entries: Vec<VersionEntry>) {
        if entries.is_empty() {
            return;
        }
        entries.sort_by(|a, b| a.audit_order(b));
        let pid = self.pid;
        self.tracker.spawn(async move {
            for entry in entries {
                info!(
                    status = %status,
                    pid,
                    key = %entry.key,
                    versionid = %entry.version_id,
                    lastmodified = %entry.last_modified,
                    deletemarker = entry.is_delete_marker,
                    islatest = entry.is_latest,
                    "version"
                );
            }
        });
    }

    /// Number of logging tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every logging task spawned so far.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
