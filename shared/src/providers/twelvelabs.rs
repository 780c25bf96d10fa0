//! TwelveLabs video search index

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use tracing::info;
use url::Url;

use super::{base_url, endpoint, external_id, send_delete, ExternalProvider, ProviderDeletion};
use crate::errors::{Error, Result};
use crate::models::AssetRecord;

pub const NAME: &str = "twelvelabs";

/// Key of the provider's entry in `Metadata.ExternalIDs`
const EXTERNAL_IDS_KEY: &str = "TwelveLabs";

pub struct TwelveLabsProvider {
    client: ClientWithMiddleware,
    base_url: Url,
    api_key: String,
}

impl std::fmt::Debug for TwelveLabsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwelveLabsProvider")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl TwelveLabsProvider {
    pub fn new(client: ClientWithMiddleware, api_url: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            client,
            base_url: base_url(NAME, api_url)?,
            api_key,
        })
    }

    /// `(IndexId, VideoId)` of the asset
    fn ids<'a>(asset: &'a AssetRecord) -> Option<(&'a str, &'a str)> {
        Some((
            external_id(asset, EXTERNAL_IDS_KEY, "IndexId")?,
            external_id(asset, EXTERNAL_IDS_KEY, "VideoId")?,
        ))
    }

    fn delete_url(&self, index_id: &str, video_id: &str) -> Url {
        endpoint(&self.base_url, &["indexes", index_id, "videos", video_id])
    }
}

#[async_trait]
impl ExternalProvider for TwelveLabsProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn applies_to(&self, asset: &AssetRecord) -> bool {
        Self::ids(asset).is_some()
    }

    async fn delete_asset(&self, asset: &AssetRecord) -> Result<ProviderDeletion> {
        let (index_id, video_id) =
            Self::ids(asset).ok_or_else(|| Error::provider(NAME, "asset has no TwelveLabs ids"))?;

        let request = self
            .client
            .delete(self.delete_url(index_id, video_id))
            .header("x-api-key", &self.api_key);
        let (status, result) = send_delete(NAME, request).await?;
        info!(inventory_id = %asset.inventory_id, video_id = %video_id, status = status, "TwelveLabs video deleted");
        Ok(result)
    }
}
