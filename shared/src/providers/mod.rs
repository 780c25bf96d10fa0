//! External search and embedding providers
//!
//! Assets may have copies outside the main search index: embeddings in a
//! vector index or S3 Vectors, and third-party video/semantic search
//! services that hold their own copy keyed by `Metadata.ExternalIDs`.
//! Deletion dispatches to every enabled provider that applies to the asset.

pub mod coactive;
pub mod opensearch_vectors;
pub mod s3_vectors;
pub mod twelvelabs;

use async_trait::async_trait;
use aws_config::SdkConfig;
use futures::future::join_all;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::config::{ProvidersConfig, SearchConfig};
use crate::errors::{Error, Result};
use crate::models::{AssetRecord, StageOutcome};
use crate::search::OpenSearchIndex;

pub use coactive::CoactiveProvider;
pub use opensearch_vectors::OpenSearchVectorProvider;
pub use s3_vectors::S3VectorsProvider;
pub use twelvelabs::TwelveLabsProvider;

const HTTP_MAX_RETRIES: u32 = 3;
const HTTP_TIMEOUT_SECS: u64 = 30;
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Result of removing an asset from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDeletion {
    /// Items removed; 0 when the provider no longer had the asset
    pub deleted: u64,
}

#[async_trait]
pub trait ExternalProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the provider may hold data for this asset
    fn applies_to(&self, asset: &AssetRecord) -> bool;

    async fn delete_asset(&self, asset: &AssetRecord) -> Result<ProviderDeletion>;
}

/// Enabled providers, in configuration order
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ExternalProvider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn ExternalProvider>>) -> Self {
        Self { providers }
    }

    /// Build the providers listed in `EXTERNAL_PROVIDERS`
    pub async fn from_config(
        config: &ProvidersConfig,
        search: &SearchConfig,
        sdk_config: &SdkConfig,
    ) -> Result<Self> {
        let mut providers: Vec<Arc<dyn ExternalProvider>> = Vec::new();
        let ssm = aws_sdk_ssm::Client::new(sdk_config);

        for name in &config.enabled {
            let provider: Arc<dyn ExternalProvider> = match name.as_str() {
                opensearch_vectors::NAME => {
                    let index = config
                        .vector_index
                        .as_deref()
                        .ok_or_else(|| Error::Config("VECTOR_INDEX is required for opensearch".into()))?;
                    Arc::new(OpenSearchVectorProvider::new(Arc::new(OpenSearchIndex::new(
                        search, sdk_config, index,
                    )?)))
                }
                s3_vectors::NAME => {
                    let (Some(bucket), Some(index)) = (&config.s3_vector_bucket, &config.s3_vector_index) else {
                        return Err(Error::Config(
                            "S3_VECTOR_BUCKET and S3_VECTOR_INDEX are required for s3vectors".into(),
                        ));
                    };
                    Arc::new(S3VectorsProvider::new(
                        aws_sdk_s3vectors::Client::new(sdk_config),
                        bucket.clone(),
                        index.clone(),
                    ))
                }
                twelvelabs::NAME => {
                    let param = config.twelvelabs_api_key_param.as_deref().ok_or_else(|| {
                        Error::Config("TWELVELABS_API_KEY_PARAM is required for twelvelabs".into())
                    })?;
                    Arc::new(TwelveLabsProvider::new(
                        http_client()?,
                        &config.twelvelabs_api_url,
                        load_api_key(&ssm, param).await?,
                    )?)
                }
                coactive::NAME => {
                    let param = config.coactive_api_key_param.as_deref().ok_or_else(|| {
                        Error::Config("COACTIVE_API_KEY_PARAM is required for coactive".into())
                    })?;
                    Arc::new(CoactiveProvider::new(
                        http_client()?,
                        &config.coactive_api_url,
                        load_api_key(&ssm, param).await?,
                    )?)
                }
                other => return Err(Error::Config(format!("unknown external provider: {}", other))),
            };
            providers.push(provider);
        }

        info!(providers = ?config.enabled, "External providers configured");
        Ok(Self::new(providers))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Remove the asset from every provider concurrently
    pub async fn delete_all(&self, asset: &AssetRecord) -> BTreeMap<String, StageOutcome> {
        let tasks = self.providers.iter().map(|provider| async move {
            let name = provider.name();
            if !provider.applies_to(asset) {
                return (
                    name.to_string(),
                    StageOutcome::Skipped {
                        reason: format!("asset has no {} data", name),
                    },
                );
            }

            let outcome = match provider.delete_asset(asset).await {
                Ok(result) => StageOutcome::Succeeded { deleted: result.deleted },
                Err(e) => {
                    warn!(
                        provider = name,
                        inventory_id = %asset.inventory_id,
                        error = %e,
                        "Provider deletion failed"
                    );
                    StageOutcome::Failed { error: e.to_string() }
                }
            };
            (name.to_string(), outcome)
        });

        join_all(tasks).await.into_iter().collect()
    }
}

/// HTTP client with transient-error retries for provider APIs
pub fn http_client() -> Result<ClientWithMiddleware> {
    http_client_with(ExponentialBackoff::builder().build_with_max_retries(HTTP_MAX_RETRIES))
}

pub(crate) fn http_client_with(retry_policy: ExponentialBackoff) -> Result<ClientWithMiddleware> {
    let base_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

    Ok(ClientBuilder::new(base_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

/// Read a SecureString parameter
pub async fn load_api_key(ssm: &aws_sdk_ssm::Client, name: &str) -> Result<String> {
    ssm.get_parameter()
        .name(name)
        .with_decryption(true)
        .send()
        .await
        .map_err(|e| Error::Config(format!("reading parameter {}: {}", name, e)))?
        .parameter
        .and_then(|p| p.value)
        .ok_or_else(|| Error::Config(format!("parameter {} has no value", name)))
}

/// Parse a provider base URL
pub(crate) fn base_url(provider: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("{} API URL {}: {}", provider, raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(Error::Config(format!("{} API URL {} cannot be a base", provider, raw)));
    }
    Ok(url)
}

/// `base` with `segments` appended, each percent-encoded as one path segment
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Send a provider DELETE call and interpret its status
pub(crate) async fn send_delete(provider: &str, request: RequestBuilder) -> Result<(u16, ProviderDeletion)> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::provider(provider, e.to_string()))?;

    let status = response.status().as_u16();
    let body = if response.status().is_success() {
        String::new()
    } else {
        response.text().await.unwrap_or_default()
    };

    Ok((status, deletion_from_status(provider, status, &body)?))
}

/// Interpret the status of a provider DELETE call; 404 means already gone
pub(crate) fn deletion_from_status(provider: &str, status: u16, body: &str) -> Result<ProviderDeletion> {
    match status {
        200..=299 => Ok(ProviderDeletion { deleted: 1 }),
        404 => Ok(ProviderDeletion { deleted: 0 }),
        _ => Err(Error::provider(provider, format!("HTTP {}: {}", status, body))),
    }
}

/// String field of an `ExternalIDs` entry
pub(crate) fn external_id<'a>(asset: &'a AssetRecord, provider_key: &str, field: &str) -> Option<&'a str> {
    asset
        .external_ids(provider_key)?
        .get(field)?
        .as_str()
        .filter(|s| !s.is_empty())
}
