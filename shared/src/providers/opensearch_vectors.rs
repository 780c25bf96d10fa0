//! Embeddings stored in an OpenSearch vector index

use async_trait::async_trait;
use std::sync::Arc;

use super::{ExternalProvider, ProviderDeletion};
use crate::errors::{Error, Result};
use crate::models::AssetRecord;
use crate::search::SearchIndex;

pub const NAME: &str = "opensearch";

pub struct OpenSearchVectorProvider {
    index: Arc<dyn SearchIndex>,
}

impl OpenSearchVectorProvider {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ExternalProvider for OpenSearchVectorProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn applies_to(&self, _asset: &AssetRecord) -> bool {
        true
    }

    async fn delete_asset(&self, asset: &AssetRecord) -> Result<ProviderDeletion> {
        let deleted = self
            .index
            .delete_by_inventory_id(&asset.inventory_id)
            .await
            .map_err(|e| Error::provider(NAME, e.to_string()))?;
        Ok(ProviderDeletion { deleted })
    }
}
