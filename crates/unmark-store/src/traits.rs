//! Core trait for versioned object storage.

use bytes::Bytes;
use unmark_types::{DeleteOutcome, ListCursor, ObjectIdentifier, ObjectPage, VersionPage};

use crate::error::StoreError;

/// Most versions one [`ObjectStore::delete_objects`] request may carry.
pub const MAX_DELETE_KEYS: usize = 1000;

/// The remote calls unmark issues against a versioned bucket.
///
/// All implementations must be `Send + Sync`; one instance is shared by every
/// worker of every pool.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of versions and delete markers under `prefix`.
    ///
    /// `cursor` is `None` for the first page and the previous page's `next`
    /// afterwards.
    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<&ListCursor>,
    ) -> Result<VersionPage, StoreError>;

    /// List one page of currently visible object keys under `prefix`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ObjectPage, StoreError>;

    /// Remove the given exact versions in one bulk request.
    ///
    /// At most [`MAX_DELETE_KEYS`] versions are accepted; a longer request
    /// fails as a whole.
    /// Per-item refusals are reported in [`DeleteOutcome::errors`]; only a
    /// failure of the request as a whole is an `Err`.
    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectIdentifier],
    ) -> Result<DeleteOutcome, StoreError>;

    /// Fetch the latest version of `key`.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    /// Write a new version of `key`.
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StoreError>;

    /// Copy the latest version of `src` to a new version of `dst`.
    async fn copy_object(&self, bucket: &str, src: &str, dst: &str) -> Result<(), StoreError>;

    /// Region the bucket lives in.
    async fn bucket_region(&self, bucket: &str) -> Result<String, StoreError>;
}
