//! External payload indirection for Step Functions state
//!
//! Step Functions rejects state larger than 256KB. Values above the inline
//! threshold are written to S3 and replaced by a reference marker:
//!
//! ```json
//! {"externalPayload": true, "bucket": "...", "key": "...", "sizeBytes": 123, "itemCount": 4}
//! ```
//!
//! Keys are content addressed (`{prefix}/{scope}/{sha256}.json`), so writing
//! the same payload twice yields the same reference.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PayloadConfig;
use crate::errors::{Error, Result};
use crate::storage::BlobStore;

const DEFAULT_SCOPE: &str = "default";

/// Marker substituted for an externalized value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadReference {
    pub external_payload: bool,
    pub bucket: String,
    pub key: String,
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
}

impl PayloadReference {
    /// Parse a reference marker, `None` for ordinary values.
    ///
    /// A value flagged `externalPayload` that lacks the reference fields is
    /// an error rather than an ordinary value.
    pub fn from_value(value: &Value) -> Result<Option<Self>> {
        let flagged = value
            .get("externalPayload")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !flagged {
            return Ok(None);
        }
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| Error::Payload(format!("malformed payload reference: {}", e)))
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Operation requested by a Step Functions task
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PayloadTask {
    Externalize {
        payload: Value,
        #[serde(default)]
        scope: Option<String>,
    },
    Resolve {
        payload: Value,
    },
    ExtractItem {
        payload: Value,
        index: usize,
        #[serde(default)]
        scope: Option<String>,
    },
    WriteItems {
        items: Value,
        #[serde(default)]
        scope: Option<String>,
    },
}

impl PayloadTask {
    pub fn operation(&self) -> &'static str {
        match self {
            PayloadTask::Externalize { .. } => "externalize",
            PayloadTask::Resolve { .. } => "resolve",
            PayloadTask::ExtractItem { .. } => "extract_item",
            PayloadTask::WriteItems { .. } => "write_items",
        }
    }
}

fn clean_scope(scope: Option<&str>) -> String {
    let cleaned: String = scope
        .unwrap_or(DEFAULT_SCOPE)
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_./".contains(c) { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.split('/').any(|segment| segment == "..") {
        DEFAULT_SCOPE.to_string()
    } else {
        cleaned
    }
}

pub struct PayloadStore {
    blobs: Arc<dyn BlobStore>,
    bucket: String,
    prefix: String,
    inline_threshold: usize,
}

impl PayloadStore {
    pub fn new(blobs: Arc<dyn BlobStore>, config: &PayloadConfig) -> Self {
        Self {
            blobs,
            bucket: config.bucket.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
            inline_threshold: config.inline_threshold,
        }
    }

    fn key_for(&self, scope: Option<&str>, bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        if self.prefix.is_empty() {
            format!("{}/{:x}.json", clean_scope(scope), digest)
        } else {
            format!("{}/{}/{:x}.json", self.prefix, clean_scope(scope), digest)
        }
    }

    async fn write(&self, scope: Option<&str>, bytes: Vec<u8>, item_count: Option<usize>) -> Result<PayloadReference> {
        let key = self.key_for(scope, &bytes);
        let size_bytes = bytes.len();
        self.blobs.put(&self.bucket, &key, bytes).await?;
        info!(bucket = %self.bucket, key = %key, size_bytes = size_bytes, "Payload externalized");

        Ok(PayloadReference {
            external_payload: true,
            bucket: self.bucket.clone(),
            key,
            size_bytes,
            item_count,
        })
    }

    /// Keep small values inline, move large ones to S3
    pub async fn externalize(&self, value: Value, scope: Option<&str>) -> Result<Value> {
        if PayloadReference::from_value(&value)?.is_some() {
            return Ok(value);
        }

        let bytes = serde_json::to_vec(&value)?;
        if bytes.len() <= self.inline_threshold {
            debug!(size_bytes = bytes.len(), "Payload kept inline");
            return Ok(value);
        }

        let item_count = value.as_array().map(|items| items.len());
        self.write(scope, bytes, item_count).await?.to_value()
    }

    /// Replace a reference with the payload it points to
    pub async fn resolve(&self, value: Value) -> Result<Value> {
        let Some(reference) = PayloadReference::from_value(&value)? else {
            return Ok(value);
        };

        let bytes = self.blobs.get(&reference.bucket, &reference.key).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::Payload(format!(
                "s3://{}/{} is not valid JSON: {}",
                reference.bucket, reference.key, e
            ))
        })
    }

    /// Element `index` of an (optionally externalized) array
    pub async fn extract_item(&self, value: Value, index: usize, scope: Option<&str>) -> Result<Value> {
        let resolved = self.resolve(value).await?;
        let Value::Array(mut items) = resolved else {
            return Err(Error::Payload("payload is not an array".to_string()));
        };
        if index >= items.len() {
            return Err(Error::Payload(format!(
                "index {} out of range for {} items",
                index,
                items.len()
            )));
        }

        let item = items.swap_remove(index);
        self.externalize(item, scope).await
    }

    /// Write an array to S3 as a Distributed Map item source
    pub async fn write_items(&self, items: Value, scope: Option<&str>) -> Result<PayloadReference> {
        let resolved = self.resolve(items).await?;
        let count = resolved
            .as_array()
            .map(|items| items.len())
            .ok_or_else(|| Error::Payload("items must be an array".to_string()))?;

        let bytes = serde_json::to_vec(&resolved)?;
        self.write(scope, bytes, Some(count)).await
    }

    pub async fn execute(&self, task: PayloadTask) -> Result<Value> {
        match task {
            PayloadTask::Externalize { payload, scope } => self.externalize(payload, scope.as_deref()).await,
            PayloadTask::Resolve { payload } => self.resolve(payload).await,
            PayloadTask::ExtractItem { payload, index, scope } => {
                self.extract_item(payload, index, scope.as_deref()).await
            }
            PayloadTask::WriteItems { items, scope } => self.write_items(items, scope.as_deref()).await?.to_value(),
        }
    }
}
