//! Environment-driven configuration
//!
//! Every Lambda reads its configuration once per cold start. Tuning knobs
//! have defaults; resource names without a sensible default are required.

use std::str::FromStr;
use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::batching::BatchLimits;
use crate::errors::{Error, Result};

/// Read a required environment variable
pub fn env_required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!("{} is not set", name))),
    }
}

/// Read an environment variable with a default
pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Read and parse an environment variable with a default
pub fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", name, value))),
        _ => Ok(default),
    }
}

/// Split a comma separated list, dropping empty items
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// OpenSearch connection settings
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub index: String,
    /// SigV4 service name: `es` for managed domains, `aoss` for serverless
    pub service: String,
    /// Field holding the inventory ID, used by delete-by-query
    pub id_field: String,
    /// Top-level attributes never copied into search documents
    pub excluded_fields: Vec<String>,
}

impl SearchConfig {
    pub const DEFAULT_INDEX: &'static str = "media";

    pub fn from_env() -> Result<Self> {
        let endpoint = env_required("OPENSEARCH_ENDPOINT")?;
        url::Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("OPENSEARCH_ENDPOINT is not a URL: {}", e)))?;

        Ok(Self {
            endpoint,
            index: env_or("OPENSEARCH_INDEX", Self::DEFAULT_INDEX),
            service: env_or("OPENSEARCH_SERVICE", "es"),
            id_field: env_or("OPENSEARCH_ID_FIELD", "InventoryID.keyword"),
            excluded_fields: split_list(&env_or("INDEX_EXCLUDED_FIELDS", "")),
        })
    }
}

/// Bulk indexing, retry and circuit breaker settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub limits: BatchLimits,
    pub retry: RetryPolicy,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            limits: BatchLimits {
                max_actions: env_parse("BULK_MAX_ACTIONS", 500)?,
                max_bytes: env_parse("BULK_MAX_BYTES", 5 * 1024 * 1024)?,
            },
            retry: retry_from_env("BULK_MAX_RETRIES", 3)?,
            failure_threshold: env_parse("CIRCUIT_FAILURE_THRESHOLD", 5)?,
            reset_timeout: Duration::from_secs(env_parse("CIRCUIT_RESET_SECS", 30)?),
        })
    }
}

fn retry_from_env(retries_var: &str, default_retries: u32) -> Result<RetryPolicy> {
    Ok(RetryPolicy::new(
        env_parse(retries_var, default_retries)?,
        Duration::from_millis(env_parse("BACKOFF_INITIAL_MS", 200)?),
        Duration::from_millis(env_parse("BACKOFF_MAX_MS", 5_000)?),
    ))
}

/// Dead-letter queue settings
#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub queue_url: String,
    /// Attempts after which a message is left for the queue's redrive policy
    pub max_attempts: u32,
    /// Messages drained per reprocessor run
    pub batch_max: usize,
    /// Delay policy for re-enqueued messages
    pub retry: RetryPolicy,
}

impl DlqConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            queue_url: env_required("DLQ_URL")?,
            max_attempts: env_parse("DLQ_MAX_ATTEMPTS", 5)?,
            batch_max: env_parse("DLQ_BATCH_MAX", 100)?,
            retry: RetryPolicy::new(
                env_parse("DLQ_MAX_ATTEMPTS", 5)?,
                Duration::from_secs(env_parse("DLQ_INITIAL_DELAY_SECS", 30)?),
                Duration::from_secs(900),
            ),
        })
    }
}

/// External search and embedding providers enabled for deletion
#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    pub enabled: Vec<String>,
    pub vector_index: Option<String>,
    pub s3_vector_bucket: Option<String>,
    pub s3_vector_index: Option<String>,
    pub twelvelabs_api_url: String,
    pub twelvelabs_api_key_param: Option<String>,
    pub coactive_api_url: String,
    pub coactive_api_key_param: Option<String>,
}

impl ProvidersConfig {
    pub fn from_env() -> Result<Self> {
        let optional = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        Ok(Self {
            enabled: split_list(&env_or("EXTERNAL_PROVIDERS", ""))
                .into_iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
            vector_index: optional("VECTOR_INDEX"),
            s3_vector_bucket: optional("S3_VECTOR_BUCKET"),
            s3_vector_index: optional("S3_VECTOR_INDEX"),
            twelvelabs_api_url: env_or("TWELVELABS_API_URL", "https://api.twelvelabs.io/v1.3"),
            twelvelabs_api_key_param: optional("TWELVELABS_API_KEY_PARAM"),
            coactive_api_url: env_or("COACTIVE_API_URL", "https://api.coactive.ai"),
            coactive_api_key_param: optional("COACTIVE_API_KEY_PARAM"),
        })
    }

    pub fn is_enabled(&self, provider: &str) -> bool {
        self.enabled.iter().any(|p| p == provider)
    }
}

/// Pipeline trigger admission settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub state_machine_arn: String,
    pub pipeline_name: String,
    pub max_concurrent: usize,
    pub cache_ttl: Duration,
    pub ramp_up_delay: Duration,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let state_machine_arn = env_required("STATE_MACHINE_ARN")?;
        let default_name = state_machine_arn
            .rsplit(':')
            .next()
            .unwrap_or("pipeline")
            .to_string();

        Ok(Self {
            pipeline_name: env_or("PIPELINE_NAME", &default_name),
            state_machine_arn,
            max_concurrent: env_parse("MAX_CONCURRENT_EXECUTIONS", 50)?,
            cache_ttl: Duration::from_secs(env_parse("EXECUTION_COUNT_CACHE_SECS", 10)?),
            ramp_up_delay: Duration::from_millis(env_parse("RAMP_UP_DELAY_MS", 250)?),
        })
    }
}

/// External payload settings
#[derive(Debug, Clone)]
pub struct PayloadConfig {
    pub bucket: String,
    pub prefix: String,
    /// Largest serialized payload kept inline in state machine state
    pub inline_threshold: usize,
}

impl PayloadConfig {
    /// Leaves headroom below the 256KB Step Functions state limit
    pub const DEFAULT_INLINE_THRESHOLD: usize = 200_000;

    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bucket: env_required("PAYLOAD_BUCKET")?,
            prefix: env_or("PAYLOAD_PREFIX", "payloads"),
            inline_threshold: env_parse("PAYLOAD_INLINE_THRESHOLD", Self::DEFAULT_INLINE_THRESHOLD)?,
        })
    }
}
