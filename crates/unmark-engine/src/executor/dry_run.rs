//! Dry-run: log intended removals without touching the store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use unmark_pool::{BatchAction, WorkerId};
use unmark_types::{BatchId, Status, VersionEntry};

use crate::context::RunContext;

/// Logs every delete marker restore would remove.
pub struct DryRunExecutor {
    ctx: Arc<RunContext>,
}

impl DryRunExecutor {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl BatchAction<VersionEntry> for DryRunExecutor {
    async fn run(&self, _worker: &WorkerId, batch: Vec<VersionEntry>) {
        let batch_id = BatchId::new();
        for entry in batch {
            info!(
                status = %Status::Dryrun,
                batchid = %batch_id,
                pid = self.ctx.pid,
                key = %entry.key,
                versionid = %entry.version_id,
                lastmodified = %entry.last_modified,
                "would remove delete marker"
            );
        }
    }
}
