//! An [`ObjectStore`] wrapper that charges every call to a [`RateLimiter`].
//!
//! One limiter is shared by all wrapped stores of a run, so the configured
//! rate bounds the total call rate regardless of how many workers are active.

use std::sync::Arc;

use bytes::Bytes;
use unmark_types::{DeleteOutcome, ListCursor, ObjectIdentifier, ObjectPage, VersionPage};

use crate::error::StoreError;
use crate::rate_limit::RateLimiter;
use crate::traits::ObjectStore;

/// Rate-limited view of another store.
pub struct RateLimitedStore {
    inner: Arc<dyn ObjectStore>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedStore {
    /// Wrap `inner`, waiting on `limiter` before every call.
    pub fn new(inner: Arc<dyn ObjectStore>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

#[async_trait::async_trait]
impl ObjectStore for RateLimitedStore {
    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<&ListCursor>,
    ) -> Result<VersionPage, StoreError> {
        self.limiter.acquire().await;
        self.inner.list_object_versions(bucket, prefix, cursor).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ObjectPage, StoreError> {
        self.limiter.acquire().await;
        self.inner.list_objects(bucket, prefix, token).await
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectIdentifier],
    ) -> Result<DeleteOutcome, StoreError> {
        self.limiter.acquire().await;
        self.inner.delete_objects(bucket, objects).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.limiter.acquire().await;
        self.inner.get_object(bucket, key).await
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.limiter.acquire().await;
        self.inner.put_object(bucket, key, data).await
    }

    async fn copy_object(&self, bucket: &str, src: &str, dst: &str) -> Result<(), StoreError> {
        self.limiter.acquire().await;
        self.inner.copy_object(bucket, src, dst).await
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String, StoreError> {
        self.limiter.acquire().await;
        self.inner.bucket_region(bucket).await
    }
}
