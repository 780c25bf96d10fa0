//! S3 object operations
//!
//! Used for asset file removal during deletion and for external payloads.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tracing::{debug, warn};

use crate::errors::{Error, Result};

/// DeleteObjects accepts at most this many keys per request
const DELETE_BATCH_SIZE: usize = 1000;

/// Key S3 refused to delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDeleteError {
    pub key: String,
    pub error: String,
}

/// Bulk object removal
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Delete keys in a bucket, returning per-key failures
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<ObjectDeleteError>>;
}

/// Whole-object reads and writes
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<ObjectDeleteError>> {
        let mut failures = Vec::new();

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| Error::Storage(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| Error::Storage(e.to_string()))?;

            let output = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| Error::Storage(format!("DeleteObjects on {}: {}", bucket, e)))?;

            for err in output.errors() {
                let key = err.key().unwrap_or_default().to_string();
                let error = format!(
                    "{}: {}",
                    err.code().unwrap_or("Unknown"),
                    err.message().unwrap_or_default()
                );
                warn!(bucket = %bucket, key = %key, error = %error, "Failed to delete object");
                failures.push(ObjectDeleteError { key, error });
            }
        }

        debug!(bucket = %bucket, keys = keys.len(), failed = failures.len(), "Objects deleted");
        Ok(failures)
    }
}

#[async_trait]
impl BlobStore for S3Storage {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("PutObject s3://{}/{}: {}", bucket, key, e)))?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false);
                if missing {
                    Error::Payload(format!("s3://{}/{} does not exist", bucket, key))
                } else {
                    Error::Storage(format!("GetObject s3://{}/{}: {}", bucket, key, e))
                }
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| Error::Storage(format!("reading s3://{}/{}: {}", bucket, key, e)))?;
        Ok(bytes.into_bytes().to_vec())
    }
}
