//! Receipt fixup: download, repair, back up, upload.
//!
//! Each key is handled independently. A failure at any step is logged and the
//! executor moves on to the next key; the remote object is only touched when
//! the local repair actually changed the file.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use unmark_pool::{BatchAction, WorkerId};
use unmark_receipt::{Receipt, ReceiptError};
use unmark_store::ObjectStore;
use unmark_types::{Status, is_receipt_key};

use crate::context::RunContext;
use crate::error::EngineError;

/// Suffix appended to a key to name its backup: `YYYYMMDDHHMMSS`.
pub fn backup_suffix(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Repairs receipts in place in the bucket.
pub struct FixupExecutor {
    store: Arc<dyn ObjectStore>,
    ctx: Arc<RunContext>,
    staging_dir: PathBuf,
    backup_suffix: String,
    zero_frozen: bool,
}

impl FixupExecutor {
    /// Create an executor staging downloads under `staging_dir`.
    ///
    /// With `zero_frozen` a set `frozen_in_cluster` flag is cleared; otherwise
    /// only a mismatching content hash is reset.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ctx: Arc<RunContext>,
        staging_dir: impl Into<PathBuf>,
        zero_frozen: bool,
    ) -> Self {
        Self {
            store,
            ctx,
            staging_dir: staging_dir.into(),
            backup_suffix: backup_suffix(Utc::now()),
            zero_frozen,
        }
    }

    /// Use a fixed backup suffix instead of the creation time.
    pub fn with_backup_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.backup_suffix = suffix.into();
        self
    }

    /// Key the original is copied to before it is overwritten.
    pub fn backup_key(&self, key: &str) -> String {
        format!("{key}.{}", self.backup_suffix)
    }

    /// Local path a key is downloaded to.
    ///
    /// Keys whose path would leave the staging directory are refused.
    pub fn staging_path(&self, key: &str) -> Result<PathBuf, EngineError> {
        let relative = Path::new(key.trim_start_matches('/'));
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(EngineError::UnsafeKey(key.to_string()));
        }
        Ok(self.staging_dir.join(relative))
    }

    /// Run every step for one key. Returns whether the key was re-uploaded.
    pub async fn fix_one(&self, key: &str) -> Result<bool, EngineError> {
        let bucket = &self.ctx.bucket;
        let pid = self.ctx.pid;

        if !is_receipt_key(key) {
            info!(status = %Status::Skip, pid, key, "not a receipt, skipping fixup");
            return Ok(false);
        }

        let local = self.staging_path(key)?;
        if let Some(dir) = local.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(EngineError::staging(dir))?;
        }

        let data = self
            .store
            .get_object(bucket, key)
            .await
            .map_err(|source| EngineError::Fixup {
                step: "download",
                key: key.to_string(),
                source,
            })?;
        tokio::fs::write(&local, &data)
            .await
            .map_err(EngineError::staging(&local))?;

        let zero_frozen = self.zero_frozen;
        let path = local.clone();
        let repaired = tokio::task::spawn_blocking(move || repair_receipt(&path, zero_frozen)).await??;
        if !repaired {
            debug!(pid, key, "receipt already valid");
            return Ok(false);
        }

        let backup = self.backup_key(key);
        info!(status = %Status::Info, pid, key, backup = %backup, "creating remote backup");
        self.store
            .copy_object(bucket, key, &backup)
            .await
            .map_err(|source| EngineError::Fixup {
                step: "backup",
                key: key.to_string(),
                source,
            })?;

        let fixed = tokio::fs::read(&local)
            .await
            .map_err(EngineError::staging(&local))?;
        self.store
            .put_object(bucket, key, Bytes::from(fixed))
            .await
            .map_err(|source| EngineError::Fixup {
                step: "upload",
                key: key.to_string(),
                source,
            })?;

        info!(status = %Status::Ok, pid, key, file = %local.display(), "repaired receipt uploaded");
        Ok(true)
    }
}

/// Repair the receipt at `path` in place. Returns whether it changed.
fn repair_receipt(path: &Path, zero_frozen: bool) -> Result<bool, ReceiptError> {
    let receipt = Receipt::open(path)?;
    if zero_frozen && receipt.is_frozen_in_cluster() {
        receipt.zero_frozen_in_cluster(true)?;
        return Ok(true);
    }
    if !receipt.hashes_match() {
        receipt.reset_content_hash(true)?;
        return Ok(true);
    }
    Ok(false)
}

#[async_trait]
impl BatchAction<String> for FixupExecutor {
    async fn run(&self, worker: &WorkerId, batch: Vec<String>) {
        for key in batch {
            if let Err(e) = self.fix_one(&key).await {
                error!(status = %Status::Error, pid = self.ctx.pid, %worker, key = %key, error = %e, "fixup failed");
            }
        }
    }
}
