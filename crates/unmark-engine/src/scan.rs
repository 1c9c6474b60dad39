//! Prefix scanning.
//!
//! [`ScanCoordinator`] is the action of the scan-input pool: every prefix
//! submitted to that pool is paginated here and its matches are routed to the
//! downstream pool for the run's [`ScanMode`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};
use unmark_pool::{ItemAction, JobSink, WorkerId};
use unmark_store::ObjectStore;
use unmark_types::{ListCursor, Status, VersionEntry, is_receipt_key};

use crate::audit::AuditLog;
use crate::context::RunContext;

/// Default number of matches accumulated before a batch is submitted.
pub const DEFAULT_EMIT_THRESHOLD: usize = 24;

/// What a scan looks for and where it sends it.
pub enum ScanMode {
    /// Latest delete markers inside the window, batched to the action pool.
    DeleteMarkers {
        /// Action pool.
        sink: Arc<dyn JobSink<VersionEntry>>,
        /// Matches per submitted batch.
        emit_threshold: usize,
    },
    /// `receipt.json` keys, sent to the fixup pool.
    Receipts {
        /// Fixup pool.
        sink: Arc<dyn JobSink<String>>,
    },
    /// Every version and delete marker is logged; nothing is submitted.
    Audit,
}

impl std::fmt::Debug for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::DeleteMarkers { emit_threshold, .. } => f
                .debug_struct("DeleteMarkers")
                .field("emit_threshold", emit_threshold)
                .finish(),
            ScanMode::Receipts { .. } => f.write_str("Receipts"),
            ScanMode::Audit => f.write_str("Audit"),
        }
    }
}

/// Paginates prefixes and routes matches downstream.
pub struct ScanCoordinator {
    store: Arc<dyn ObjectStore>,
    ctx: Arc<RunContext>,
    mode: ScanMode,
    audit: AuditLog,
}

impl ScanCoordinator {
    /// Create a scanner. Every store call goes through `store`, which is
    /// expected to be rate limited.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ctx: Arc<RunContext>,
        mode: ScanMode,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            ctx,
            mode,
            audit,
        }
    }

    /// Scan one prefix to completion.
    ///
    /// Listing errors are logged and end the scan of this prefix only.
    pub async fn scan_prefix(&self, worker: &WorkerId, prefix: &str) {
        debug!(%worker, prefix, pid = self.ctx.pid, "scanning prefix");
        match &self.mode {
            ScanMode::DeleteMarkers {
                sink,
                emit_threshold,
            } => {
                self.scan_markers(prefix, sink.as_ref(), (*emit_threshold).max(1))
                    .await
            }
            ScanMode::Receipts { sink } => self.scan_receipts(prefix, sink.as_ref()).await,
            ScanMode::Audit => self.scan_audit(prefix).await,
        }
    }

    async fn scan_markers(
        &self,
        prefix: &str,
        sink: &dyn JobSink<VersionEntry>,
        emit_threshold: usize,
    ) {
        let mut batch = Vec::with_capacity(emit_threshold);
        let mut cursor: Option<ListCursor> = None;

        loop {
            let page = match self
                .store
                .list_object_versions(&self.ctx.bucket, prefix, cursor.as_ref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(status = %Status::Error, pid = self.ctx.pid, prefix, error = %e, "version listing failed");
                    break;
                }
            };

            let mut submitted = Vec::new();
            let mut skipped = Vec::new();
            for marker in page.delete_markers() {
                if !self.ctx.window.selects_marker(marker) {
                    if self.ctx.verbose {
                        skipped.push(marker.clone());
                    }
                    continue;
                }
                if self.ctx.verbose {
                    submitted.push(marker.clone());
                }
                batch.push(marker.clone());
                if batch.len() >= emit_threshold
                    && !self.emit(sink, prefix, std::mem::take(&mut batch)).await
                {
                    return;
                }
            }
            self.audit.record(Status::Skip, skipped);
            self.audit.record(Status::Submit, submitted);

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if !batch.is_empty() {
            self.emit(sink, prefix, batch).await;
        }
    }

    /// Submit a batch; `false` when the downstream pool refused it.
    async fn emit(&self, sink: &dyn JobSink<VersionEntry>, prefix: &str, batch: Vec<VersionEntry>) -> bool {
        let count = batch.len();
        match sink.submit(batch).await {
            Ok(()) => {
                debug!(prefix, count, "submitted delete markers");
                true
            }
            Err(e) => {
                warn!(pid = self.ctx.pid, prefix, count, error = %e, "delete markers not submitted, stopping prefix");
                false
            }
        }
    }

    async fn scan_receipts(&self, prefix: &str, sink: &dyn JobSink<String>) {
        let mut token: Option<String> = None;
        loop {
            let page = match self
                .store
                .list_objects(&self.ctx.bucket, prefix, token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(status = %Status::Error, pid = self.ctx.pid, prefix, error = %e, "object listing failed");
                    return;
                }
            };

            let receipts: Vec<String> = page.keys.into_iter().filter(|k| is_receipt_key(k)).collect();
            if !receipts.is_empty() {
                let count = receipts.len();
                if let Err(e) = sink.submit(receipts).await {
                    warn!(pid = self.ctx.pid, prefix, count, error = %e, "receipts not submitted, stopping prefix");
                    return;
                }
            }

            match page.next {
                Some(next) => token = Some(next),
                None => return,
            }
        }
    }

    async fn scan_audit(&self, prefix: &str) {
        let mut cursor: Option<ListCursor> = None;
        loop {
            let page = match self
                .store
                .list_object_versions(&self.ctx.bucket, prefix, cursor.as_ref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(status = %Status::Error, pid = self.ctx.pid, prefix, error = %e, "version listing failed");
                    return;
                }
            };
            self.audit.record(Status::Audit, page.entries);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return,
            }
        }
    }
}

#[async_trait]
impl ItemAction<String> for ScanCoordinator {
    async fn run(&self, worker: &WorkerId, prefix: String) {
        self.scan_prefix(worker, &prefix).await;
    }
}
