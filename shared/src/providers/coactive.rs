//! Coactive multimodal search datasets

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use tracing::info;
use url::Url;

use super::{base_url, endpoint, external_id, send_delete, ExternalProvider, ProviderDeletion};
use crate::errors::{Error, Result};
use crate::models::AssetRecord;

pub const NAME: &str = "coactive";

const EXTERNAL_IDS_KEY: &str = "Coactive";

pub struct CoactiveProvider {
    client: ClientWithMiddleware,
    base_url: Url,
    api_key: String,
}

impl CoactiveProvider {
    pub fn new(client: ClientWithMiddleware, api_url: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            client,
            base_url: base_url(NAME, api_url)?,
            api_key,
        })
    }

    fn ids<'a>(asset: &'a AssetRecord) -> Option<(&'a str, &'a str)> {
        Some((
            external_id(asset, EXTERNAL_IDS_KEY, "DatasetId")?,
            external_id(asset, EXTERNAL_IDS_KEY, "AssetId")?,
        ))
    }

    fn delete_url(&self, dataset_id: &str, asset_id: &str) -> Url {
        endpoint(&self.base_url, &["api", "v1", "datasets", dataset_id, "assets", asset_id])
    }
}

#[async_trait]
impl ExternalProvider for CoactiveProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn applies_to(&self, asset: &AssetRecord) -> bool {
        Self::ids(asset).is_some()
    }

    async fn delete_asset(&self, asset: &AssetRecord) -> Result<ProviderDeletion> {
        let (dataset_id, asset_id) =
            Self::ids(asset).ok_or_else(|| Error::provider(NAME, "asset has no Coactive ids"))?;

        let request = self
            .client
            .delete(self.delete_url(dataset_id, asset_id))
            .bearer_auth(&self.api_key);
        let (status, result) = send_delete(NAME, request).await?;
        info!(inventory_id = %asset.inventory_id, asset_id = %asset_id, status = status, "Coactive asset deleted");
        Ok(result)
    }
}
