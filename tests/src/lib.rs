//! Shared test harness for unmark integration tests.
//!
//! Provides [`TestBucket`]: a versioned in-memory bucket with helpers to seed
//! hidden objects and receipts, and to run whole pipelines against it.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use unmark_engine::{Mode, Pipeline, PipelineOptions, PoolSizes, RunContext, RunSummary};
use unmark_receipt::Receipt;
use unmark_store::{MemoryStore, ObjectStore, RateLimitedStore, RateLimiter};
use unmark_types::TimeWindow;

/// Bucket name used by every scenario.
pub const BUCKET: &str = "smartstore";
/// Stack every prefix lives under.
pub const STACK: &str = "stack";
/// Backup suffix pinned for every run.
pub const SUFFIX: &str = "20240101000000";

/// Window start, in seconds since the epoch.
pub const FROM: i64 = 1_000;
/// Window end, in seconds since the epoch.
pub const TO: i64 = 2_000;

/// Timestamp `secs` seconds after the epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Receipt body with a valid hash. `frozen` sets `frozen_in_cluster`.
pub fn receipt(frozen: bool) -> String {
    let flag = if frozen { "1" } else { "0" };
    let rest = format!(r#"{{"cipher_blob":"c2VjcmV0","frozen_in_cluster":"{flag}"}}"#);
    let hash = hex::encode_upper(Sha256::digest(rest.as_bytes()));
    format!(r#"{{"cipher_blob":"c2VjcmV0","content_hash":"{hash}","frozen_in_cluster":"{flag}"}}"#)
}

/// Receipt body whose declared hash does not match.
pub fn corrupt_receipt() -> String {
    r#"{"cipher_blob":"c2VjcmV0","content_hash":"DEADBEEF","frozen_in_cluster":"0"}"#.to_string()
}

/// A versioned bucket plus a staging directory.
pub struct TestBucket {
    pub store: Arc<MemoryStore>,
    pub staging: TempDir,
    limiter: Option<Arc<RateLimiter>>,
    sizes: PoolSizes,
}

impl TestBucket {
    /// Bucket listing `page_size` entries per page.
    pub fn new(page_size: usize) -> Self {
        let store = Arc::new(MemoryStore::new().with_page_size(page_size));
        store.create_bucket(BUCKET);
        Self {
            store,
            staging: TempDir::new().unwrap(),
            limiter: None,
            sizes: PoolSizes {
                scan_workers: 4,
                scan_batch: 2,
                restore_workers: 4,
                restore_batch: 16,
                fixup_workers: 2,
                fixup_batch: 2,
                queue_capacity: 16,
                emit_threshold: 8,
            },
        }
    }

    /// Route every store call through `limiter`.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Override pool sizes.
    pub fn with_sizes(mut self, sizes: PoolSizes) -> Self {
        self.sizes = sizes;
        self
    }

    /// Store data at 500, then a delete marker at `marker_at`. Returns the
    /// marker's version id.
    pub fn hide(&self, key: &str, marker_at: i64) -> String {
        self.store
            .put_object_at(BUCKET, key, Bytes::from(format!("data:{key}")), at(500));
        self.store.put_delete_marker_at(BUCKET, key, at(marker_at))
    }

    /// Store `body` at `key` created at 500.
    pub fn put(&self, key: &str, body: impl Into<Bytes>) {
        self.store.put_object_at(BUCKET, key, body.into(), at(500));
    }

    /// Latest visible body of `key`.
    pub async fn body(&self, key: &str) -> Option<Bytes> {
        self.store.get_object(BUCKET, key).await.ok()
    }

    /// Whether `key` is visible again.
    pub async fn is_visible(&self, key: &str) -> bool {
        self.body(key).await.is_some()
    }

    /// Parse `data` as a receipt.
    pub fn inspect(&self, data: &Bytes) -> Receipt {
        let path = self.staging.path().join("inspect-receipt.json");
        std::fs::write(&path, data).unwrap();
        Receipt::open(&path).unwrap()
    }

    /// Local staging path of `key`.
    pub fn staged(&self, key: &str) -> PathBuf {
        self.staging.path().join(key)
    }

    fn store(&self) -> Arc<dyn ObjectStore> {
        let inner: Arc<dyn ObjectStore> = self.store.clone();
        match &self.limiter {
            Some(limiter) => Arc::new(RateLimitedStore::new(inner, limiter.clone())),
            None => inner,
        }
    }

    /// Build a pipeline for `mode` over the default window.
    pub async fn pipeline(&self, mode: Mode) -> Arc<Pipeline> {
        let ctx = RunContext::new(BUCKET, STACK, TimeWindow::new(at(FROM), at(TO)));
        let options = PipelineOptions {
            mode,
            sizes: self.sizes,
            staging_dir: self.staging.path().to_path_buf(),
            backup_suffix: Some(SUFFIX.to_string()),
        };
        Arc::new(Pipeline::new(self.store(), Arc::new(ctx), options).await.unwrap())
    }

    /// Run `mode` over `prefixes` to completion.
    pub async fn run(&self, mode: Mode, prefixes: &[&str]) -> RunSummary {
        self.run_until(mode, prefixes, CancellationToken::new()).await
    }

    /// Run `mode` over `prefixes` until done or `token` fires.
    pub async fn run_until(
        &self,
        mode: Mode,
        prefixes: &[&str],
        token: CancellationToken,
    ) -> RunSummary {
        let prefixes: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();
        self.pipeline(mode).await.run(prefixes, token).await.unwrap()
    }
}
