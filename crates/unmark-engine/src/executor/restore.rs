//! Removal of delete markers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use unmark_pool::{BatchAction, JobSink, WorkerId};
use unmark_store::{MAX_DELETE_KEYS, ObjectStore};
use unmark_types::{BatchId, ObjectIdentifier, Status, VersionEntry, is_receipt_key};

use crate::context::RunContext;

/// Removes each batch of delete markers with bulk deletes.
///
/// A batch is sent in requests of at most [`MAX_DELETE_KEYS`] versions, each
/// with its own batch id. Every removed and every refused version is logged
/// under the id of the request that covered it. With
/// a fixup sink, removed `receipt.json` markers are re-queued so the restored
/// receipt can be repaired.
pub struct RestoreExecutor {
    store: Arc<dyn ObjectStore>,
    ctx: Arc<RunContext>,
    fixup: Option<Arc<dyn JobSink<String>>>,
}

impl RestoreExecutor {
    /// Create an executor without receipt follow-up.
    pub fn new(store: Arc<dyn ObjectStore>, ctx: Arc<RunContext>) -> Self {
        Self {
            store,
            ctx,
            fixup: None,
        }
    }

    /// Re-queue removed receipt markers to `fixup`.
    pub fn with_fixup(mut self, fixup: Arc<dyn JobSink<String>>) -> Self {
        self.fixup = Some(fixup);
        self
    }

    async fn requeue_receipts(&self, batch_id: BatchId, deleted: &[ObjectIdentifier]) {
        let Some(fixup) = &self.fixup else {
            return;
        };
        let receipts: Vec<String> = deleted
            .iter()
            .filter(|d| is_receipt_key(&d.key))
            .map(|d| d.key.clone())
            .collect();
        if receipts.is_empty() {
            return;
        }
        let count = receipts.len();
        if let Err(e) = fixup.submit(receipts).await {
            warn!(batchid = %batch_id, pid = self.ctx.pid, count, error = %e, "receipts not queued for fixup");
        }
    }

    async fn delete_chunk(&self, worker: &WorkerId, objects: &[ObjectIdentifier]) {
        let batch_id = BatchId::new();
        let pid = self.ctx.pid;

        let outcome = match self.store.delete_objects(&self.ctx.bucket, objects).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    status = %Status::Error,
                    batchid = %batch_id,
                    pid,
                    %worker,
                    count = objects.len(),
                    error = %e,
                    "bulk delete failed"
                );
                return;
            }
        };

        for deleted in &outcome.deleted {
            info!(
                status = %Status::Ok,
                batchid = %batch_id,
                pid,
                key = %deleted.key,
                versionid = %deleted.version_id,
                "delete marker removed"
            );
        }
        for failure in &outcome.errors {
            warn!(
                status = %Status::Fail,
                batchid = %batch_id,
                pid,
                key = %failure.key,
                versionid = %failure.version_id,
                code = failure.code.as_deref().unwrap_or(""),
                error = %failure.message,
                "delete marker not removed"
            );
        }

        self.requeue_receipts(batch_id, &outcome.deleted).await;
    }
}

#[async_trait]
impl BatchAction<VersionEntry> for RestoreExecutor {
    async fn run(&self, worker: &WorkerId, batch: Vec<VersionEntry>) {
        let objects: Vec<ObjectIdentifier> = batch.iter().map(VersionEntry::identifier).collect();
        for chunk in objects.chunks(MAX_DELETE_KEYS) {
            self.delete_chunk(worker, chunk).await;
        }
    }
}
