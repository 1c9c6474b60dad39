//! S3 backend for [`ObjectStore`] built on `aws-sdk-s3`.
//!
//! Credentials come from the default provider chain. The client is bound to
//! the bucket's region, which is discovered once at startup unless given.

use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier as S3ObjectIdentifier};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};
use unmark_types::{
    DeleteFailure, DeleteOutcome, ListCursor, ObjectIdentifier, ObjectPage, VersionEntry,
    VersionPage,
};

use crate::error::StoreError;
use crate::traits::ObjectStore;

/// Region used for the bucket-location lookup when none is configured.
const FALLBACK_REGION: &str = "us-east-1";

/// Object store backed by Amazon S3.
#[derive(Clone)]
pub struct AwsStore {
    client: Client,
}

impl AwsStore {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client for `bucket`.
    ///
    /// With `region == None` the bucket's location is looked up first, using
    /// `AWS_DEFAULT_REGION` (or `us-east-1`) for the lookup itself.
    pub async fn connect(bucket: &str, region: Option<String>) -> Result<Self, StoreError> {
        let region = match region {
            Some(region) => region,
            None => {
                let lookup = std::env::var("AWS_DEFAULT_REGION")
                    .ok()
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| FALLBACK_REGION.to_string());
                let probe = Self::for_region(lookup).await;
                probe.bucket_region(bucket).await?
            }
        };
        info!(bucket, %region, "connecting to bucket");
        Ok(Self::for_region(region).await)
    }

    async fn for_region(region: String) -> Self {
        let config = aws_config::from_env()
            .region(Region::new(region))
            .load()
            .await;
        Self::new(Client::new(&config))
    }
}

fn remote<E: std::error::Error>(
    op: &'static str,
    bucket: &str,
    target: &str,
    err: E,
) -> StoreError {
    StoreError::Remote {
        op,
        bucket: bucket.to_string(),
        target: target.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
}

fn to_utc(at: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    at.and_then(|t| Utc.timestamp_opt(t.secs(), t.subsec_nanos()).single())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl ObjectStore for AwsStore {
    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<&ListCursor>,
    ) -> Result<VersionPage, StoreError> {
        let mut request = self
            .client
            .list_object_versions()
            .bucket(bucket)
            .prefix(prefix);
        if let Some(cursor) = cursor {
            request = request.key_marker(&cursor.key_marker);
            if let Some(version_id) = &cursor.version_id_marker {
                request = request.version_id_marker(version_id);
            }
        }
        let out = request
            .send()
            .await
            .map_err(|e| remote("ListObjectVersions", bucket, prefix, e))?;

        let mut entries = Vec::with_capacity(out.versions().len() + out.delete_markers().len());
        for v in out.versions() {
            entries.push(VersionEntry {
                key: v.key().unwrap_or_default().to_string(),
                version_id: v.version_id().unwrap_or_default().to_string(),
                last_modified: to_utc(v.last_modified()),
                is_latest: v.is_latest().unwrap_or(false),
                is_delete_marker: false,
            });
        }
        for m in out.delete_markers() {
            entries.push(VersionEntry {
                key: m.key().unwrap_or_default().to_string(),
                version_id: m.version_id().unwrap_or_default().to_string(),
                last_modified: to_utc(m.last_modified()),
                is_latest: m.is_latest().unwrap_or(false),
                is_delete_marker: true,
            });
        }

        let next = if out.is_truncated().unwrap_or(false) {
            out.next_key_marker().map(|key| ListCursor {
                key_marker: key.to_string(),
                version_id_marker: out.next_version_id_marker().map(str::to_string),
            })
        } else {
            None
        };

        debug!(bucket, prefix, count = entries.len(), truncated = next.is_some(), "listed versions");
        Ok(VersionPage { entries, next })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ObjectPage, StoreError> {
        let out = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(token.map(str::to_string))
            .send()
            .await
            .map_err(|e| remote("ListObjectsV2", bucket, prefix, e))?;

        let keys = out
            .contents()
            .iter()
            .filter_map(|o| o.key().map(str::to_string))
            .collect();
        let next = if out.is_truncated().unwrap_or(false) {
            out.next_continuation_token().map(str::to_string)
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
        if objects.is_empty() {
            return Ok(DeleteOutcome::default());
        }

        let identifiers = objects
            .iter()
            .map(|o| {
                S3ObjectIdentifier::builder()
                    .key(&o.key)
                    .version_id(&o.version_id)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::InvalidRequest(e.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(false)
            .build()
            .map_err(|e| StoreError::InvalidRequest(e.to_string()))?;

        let target = objects.first().map(|o| o.key.as_str()).unwrap_or_default();
        let out = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| remote("DeleteObjects", bucket, target, e))?;

        let deleted = out
            .deleted()
            .iter()
            .map(|d| ObjectIdentifier {
                key: d.key().unwrap_or_default().to_string(),
                version_id: d.version_id().unwrap_or_default().to_string(),
            })
            .collect();
        let errors = out
            .errors()
            .iter()
            .map(|e| DeleteFailure {
                key: e.key().unwrap_or_default().to_string(),
                version_id: e.version_id().unwrap_or_default().to_string(),
                code: e.code().map(str::to_string),
                message: e.message().unwrap_or_default().to_string(),
            })
            .collect();
        Ok(DeleteOutcome { deleted, errors })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    remote("GetObject", bucket, key, e)
                }
            })?;

        let data = out
            .body
            .collect()
            .await
            .map_err(|e| remote("GetObject", bucket, key, e))?
            .into_bytes();
        Ok(data)
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| remote("PutObject", bucket, key, e))?;
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, src: &str, dst: &str) -> Result<(), StoreError> {
        let source = format!("{bucket}/{}", encode_key(src));
        self.client
            .copy_object()
            .bucket(bucket)
            .key(dst)
            .copy_source(source)
            .send()
            .await
            .map_err(|e| remote("CopyObject", bucket, src, e))?;
        Ok(())
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String, StoreError> {
        let out = self
            .client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| remote("GetBucketLocation", bucket, "", e))?;

        // An empty location constraint means us-east-1.
        let region = out
            .location_constraint()
            .map(|c| c.as_str().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| FALLBACK_REGION.to_string());
        Ok(region)
    }
}

/// Percent-encode a key for use in a copy source, keeping `/` separators.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
