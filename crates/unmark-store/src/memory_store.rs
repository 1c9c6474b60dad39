//! In-memory versioned object store.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;
use unmark_types::{
    DeleteFailure, DeleteOutcome, ListCursor, ObjectIdentifier, ObjectPage, VersionEntry,
    VersionPage,
};

use crate::error::StoreError;
use crate::traits::{MAX_DELETE_KEYS, ObjectStore};

/// Default number of entries returned per listing page.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// One stored version. `body == None` is a delete marker.
#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    last_modified: DateTime<Utc>,
    body: Option<Bytes>,
}

/// Versions of every key, oldest first per key.
type Bucket = BTreeMap<String, Vec<StoredVersion>>;

/// In-memory store emulating a versioned bucket.
///
/// Used as the test double for the remote store. Supports a configurable page
/// size so pagination is exercised, and per-key injection of bulk-delete
/// failures. Buckets are created on first write.
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, Bucket>>,
    failing_deletes: RwLock<HashMap<String, String>>,
    page_size: usize,
    region: String,
    next_version: AtomicU64,
    calls: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store in `us-east-1` with the default page size.
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            failing_deletes: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            region: "us-east-1".to_string(),
            next_version: AtomicU64::new(1),
            calls: AtomicU64::new(0),
        }
    }

    /// Set the number of entries per listing page (at least one).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the region reported for every bucket.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Create an empty bucket.
    pub fn create_bucket(&self, bucket: &str) {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        buckets.entry(bucket.to_string()).or_default();
    }

    /// Add a data version created at `at`.
    pub fn put_object_at(&self, bucket: &str, key: &str, data: Bytes, at: DateTime<Utc>) -> String {
        self.insert_version(bucket, key, Some(data), at)
    }

    /// Add a delete marker created now.
    pub fn put_delete_marker(&self, bucket: &str, key: &str) -> String {
        self.insert_version(bucket, key, None, Utc::now())
    }

    /// Add a delete marker created at `at`.
    pub fn put_delete_marker_at(&self, bucket: &str, key: &str, at: DateTime<Utc>) -> String {
        self.insert_version(bucket, key, None, at)
    }

    /// Make every bulk delete of `key` report a per-item failure.
    pub fn fail_deletes_for(&self, key: &str, message: &str) {
        let mut failing = self.failing_deletes.write().expect("lock poisoned");
        failing.insert(key.to_string(), message.to_string());
    }

    /// All versions of `key`, newest first.
    pub fn versions(&self, bucket: &str, key: &str) -> Vec<VersionEntry> {
        let buckets = self.buckets.read().expect("lock poisoned");
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|versions| entries_for(key, versions))
            .unwrap_or_default()
    }

    /// Body of the latest version, `None` if missing or a delete marker.
    pub fn latest_body(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let buckets = self.buckets.read().expect("lock poisoned");
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .and_then(|versions| versions.last())
            .and_then(|v| v.body.clone())
    }

    /// Keys that currently have at least one version.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let buckets = self.buckets.read().expect("lock poisoned");
        buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of trait calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn insert_version(
        &self,
        bucket: &str,
        key: &str,
        body: Option<Bytes>,
        at: DateTime<Utc>,
    ) -> String {
        let version_id = format!("v{:010}", self.next_version.fetch_add(1, Ordering::Relaxed));
        let mut buckets = self.buckets.write().expect("lock poisoned");
        let versions = buckets
            .entry(bucket.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        let pos = versions.partition_point(|v| v.last_modified <= at);
        versions.insert(
            pos,
            StoredVersion {
                version_id: version_id.clone(),
                last_modified: at,
                body,
            },
        );
        version_id
    }

    fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn no_bucket(bucket: &str) -> StoreError {
        StoreError::NoSuchBucket(bucket.to_string())
    }
}

/// Listing entries for one key, newest first.
fn entries_for(key: &str, versions: &[StoredVersion]) -> Vec<VersionEntry> {
    let latest = versions.len().saturating_sub(1);
    versions
        .iter()
        .enumerate()
        .rev()
        .map(|(i, v)| VersionEntry {
            key: key.to_string(),
            version_id: v.version_id.clone(),
            last_modified: v.last_modified,
            is_latest: i == latest,
            is_delete_marker: v.body.is_none(),
        })
        .collect()
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<&ListCursor>,
    ) -> Result<VersionPage, StoreError> {
        self.count_call();
        let buckets = self.buckets.read().expect("lock poisoned");
        let objects = buckets.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;

        let all: Vec<VersionEntry> = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .flat_map(|(key, versions)| entries_for(key, versions))
            .collect();

        let start = match cursor {
            None => 0,
            Some(ListCursor {
                key_marker,
                version_id_marker: Some(version_id),
            }) => all
                .iter()
                .position(|e| &e.key == key_marker && &e.version_id == version_id)
                // The marker version may have been deleted since the last page.
                .map_or_else(|| all.partition_point(|e| &e.key <= key_marker), |i| i + 1),
            Some(ListCursor {
                key_marker,
                version_id_marker: None,
            }) => all.partition_point(|e| &e.key <= key_marker),
        };

        let end = (start + self.page_size).min(all.len());
        let entries = all[start..end].to_vec();
        let next = if end < all.len() {
            entries.last().map(|last| ListCursor {
                key_marker: last.key.clone(),
                version_id_marker: Some(last.version_id.clone()),
            })
        } else {
            None
        };

        debug!(bucket, prefix, count = entries.len(), "listed versions");
        Ok(VersionPage { entries, next })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ObjectPage, StoreError> {
        self.count_call();
        let buckets = self.buckets.read().expect("lock poisoned");
        let objects = buckets.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;

        let visible: Vec<&String> = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, versions)| versions.last().is_some_and(|v| v.body.is_some()))
            .map(|(key, _)| key)
            .filter(|key| token.is_none_or(|t| key.as_str() > t))
            .collect();

        let keys: Vec<String> = visible.iter().take(self.page_size).map(|k| k.to_string()).collect();
        let next = if visible.len() > keys.len() {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ObjectPage { keys, next })
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectIdentifier],
    ) -> Result<DeleteOutcome, StoreError> {
        self.count_call();
        if objects.len() > MAX_DELETE_KEYS {
            return Err(StoreError::InvalidRequest(format!(
                "{} keys in one delete request, limit is {MAX_DELETE_KEYS}",
                objects.len()
            )));
        }
        let failing = self.failing_deletes.read().expect("lock poisoned").clone();
        let mut buckets = self.buckets.write().expect("lock poisoned");
        let stored = buckets.get_mut(bucket).ok_or_else(|| Self::no_bucket(bucket))?;

        let mut outcome = DeleteOutcome::default();
        for id in objects {
            if let Some(message) = failing.get(&id.key) {
                outcome.errors.push(DeleteFailure {
                    key: id.key.clone(),
                    version_id: id.version_id.clone(),
                    code: Some("AccessDenied".to_string()),
                    message: message.clone(),
                });
                continue;
            }

            let removed = match stored.get_mut(&id.key) {
                Some(versions) => {
                    let before = versions.len();
                    versions.retain(|v| v.version_id != id.version_id);
                    let removed = versions.len() < before;
                    if versions.is_empty() {
                        stored.remove(&id.key);
                    }
                    removed
                }
                None => false,
            };

            if removed {
                outcome.deleted.push(id.clone());
            } else {
                outcome.errors.push(DeleteFailure {
                    key: id.key.clone(),
                    version_id: id.version_id.clone(),
                    code: Some("NoSuchVersion".to_string()),
                    message: "The specified version does not exist.".to_string(),
                });
            }
        }
        Ok(outcome)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.count_call();
        let buckets = self.buckets.read().expect("lock poisoned");
        let objects = buckets.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;
        objects
            .get(key)
            .and_then(|versions| versions.last())
            .and_then(|v| v.body.clone())
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.count_call();
        debug!(bucket, key, size = data.len(), "storing object in memory");
        self.insert_version(bucket, key, Some(data), Utc::now());
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, src: &str, dst: &str) -> Result<(), StoreError> {
        self.count_call();
        let data = {
            let buckets = self.buckets.read().expect("lock poisoned");
            let objects = buckets.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;
            objects
                .get(src)
                .and_then(|versions| versions.last())
                .and_then(|v| v.body.clone())
                .ok_or_else(|| StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: src.to_string(),
                })?
        };
        self.insert_version(bucket, dst, Some(data), Utc::now());
        Ok(())
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String, StoreError> {
        self.count_call();
        let buckets = self.buckets.read().expect("lock poisoned");
        if buckets.contains_key(bucket) {
            Ok(self.region.clone())
        } else {
            Err(Self::no_bucket(bucket))
        }
    }
}
