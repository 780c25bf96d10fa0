//! Embeddings stored in an S3 Vectors index
//!
//! S3 Vectors cannot filter a listing by metadata, so the index is listed
//! with metadata and the asset's vectors are picked client side: either the
//! `inventory_id` metadata matches, or the key is the inventory ID itself or
//! starts with it followed by a `#` or `:` segment separator.

use async_trait::async_trait;
use aws_sdk_s3vectors::Client;
use aws_smithy_types::Document;
use tracing::debug;

use super::{ExternalProvider, ProviderDeletion};
use crate::errors::{Error, Result};
use crate::models::AssetRecord;

pub const NAME: &str = "s3vectors";

/// DeleteVectors accepts at most this many keys per request
const DELETE_BATCH_SIZE: usize = 500;

const METADATA_FIELDS: [&str; 2] = ["inventory_id", "InventoryID"];

pub struct S3VectorsProvider {
    client: Client,
    bucket: String,
    index: String,
}

/// Whether a listed vector belongs to the asset
pub fn vector_matches(key: &str, metadata: Option<&Document>, inventory_id: &str) -> bool {
    if let Some(Document::Object(fields)) = metadata {
        let tagged = METADATA_FIELDS
            .iter()
            .any(|f| matches!(fields.get(*f), Some(Document::String(s)) if s == inventory_id));
        if tagged {
            return true;
        }
    }

    match key.strip_prefix(inventory_id) {
        Some(rest) => rest.is_empty() || rest.starts_with('#') || rest.starts_with(':'),
        None => false,
    }
}

impl S3VectorsProvider {
    pub fn new(client: Client, bucket: String, index: String) -> Self {
        Self { client, bucket, index }
    }

    async fn matching_keys(&self, inventory_id: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_vectors()
                .vector_bucket_name(&self.bucket)
                .index_name(&self.index)
                .return_metadata(true)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| Error::provider(NAME, format!("ListVectors: {}", e)))?;

            for vector in output.vectors() {
                if vector_matches(vector.key(), vector.metadata(), inventory_id) {
                    keys.push(vector.key().to_string());
                }
            }

            next_token = output.next_token().map(|t| t.to_string());
            if next_token.is_none() {
                break;
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl ExternalProvider for S3VectorsProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn applies_to(&self, _asset: &AssetRecord) -> bool {
        true
    }

    async fn delete_asset(&self, asset: &AssetRecord) -> Result<ProviderDeletion> {
        let keys = self.matching_keys(&asset.inventory_id).await?;

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            self.client
                .delete_vectors()
                .vector_bucket_name(&self.bucket)
                .index_name(&self.index)
                .set_keys(Some(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| Error::provider(NAME, format!("DeleteVectors: {}", e)))?;
        }

        debug!(inventory_id = %asset.inventory_id, vectors = keys.len(), "S3 vectors deleted");
        Ok(ProviderDeletion {
            deleted: keys.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn metadata(field: &str, value: &str) -> Document {
        Document::Object(HashMap::from([(field.to_string(), Document::String(value.to_string()))]))
    }

    #[test]
    fn test_matches_by_metadata() {
        let meta = metadata("inventory_id", "asset:img:1");
        assert!(vector_matches("7f3a", Some(&meta), "asset:img:1"));
        assert!(!vector_matches("7f3a", Some(&meta), "asset:img:2"));
    }

    #[test]
    fn test_matches_by_key_prefix() {
        assert!(vector_matches("asset:img:1", None, "asset:img:1"));
        assert!(vector_matches("asset:img:1#clip-0", None, "asset:img:1"));
        assert!(vector_matches("asset:img:1:frame-3", None, "asset:img:1"));
        assert!(!vector_matches("asset:img:10", None, "asset:img:1"));
        assert!(!vector_matches("other", None, "asset:img:1"));
    }

    #[test]
    fn test_non_string_metadata_ignored() {
        let meta = Document::Object(HashMap::from([("inventory_id".to_string(), Document::Bool(true))]));
        assert!(!vector_matches("x", Some(&meta), "asset:img:1"));
    }
}
