//! Error types for MediaLake

use thiserror::Error;

/// Result type alias using MediaLake Error
pub type Result<T> = std::result::Result<T, Error>;

/// MediaLake error types
#[derive(Error, Debug)]
pub enum Error {
    /// Asset not found
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Invalid inventory ID format
    #[error("Invalid inventory ID: {0}")]
    InvalidInventoryId(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// DynamoDB error
    #[error("Database error: {0}")]
    Database(String),

    /// S3 error
    #[error("Storage error: {0}")]
    Storage(String),

    /// OpenSearch error
    #[error("Search error: {0}")]
    Search(String),

    /// SQS error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Step Functions error
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// Third-party search or embedding provider error
    #[error("Provider {provider} error: {message}")]
    Provider { provider: String, message: String },

    /// Referenced payload could not be used
    #[error("Payload error: {0}")]
    Payload(String),

    /// Circuit breaker rejected the request
    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    /// JSON Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// DynamoDB serialization error
    #[error("DynamoDB serialization error: {0}")]
    DynamoSerialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::AssetNotFound(_) => "asset_not_found",
            Error::InvalidInventoryId(_) => "invalid_inventory_id",
            Error::Validation(_) => "validation_error",
            Error::Config(_) => "configuration_error",
            Error::Database(_) => "database_error",
            Error::Storage(_) => "storage_error",
            Error::Search(_) => "search_error",
            Error::Queue(_) => "queue_error",
            Error::Workflow(_) => "workflow_error",
            Error::Provider { .. } => "provider_error",
            Error::Payload(_) => "payload_error",
            Error::CircuitOpen(_) => "circuit_open",
            Error::Serialization(_) => "serialization_error",
            Error::DynamoSerialization(_) => "serialization_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::AssetNotFound(_) => 404,
            Error::InvalidInventoryId(_) => 400,
            Error::Validation(_) => 400,
            Error::Serialization(_) => 400,
            Error::Payload(_) => 400,
            Error::CircuitOpen(_) => 503,
            Error::Config(_)
            | Error::Database(_)
            | Error::Storage(_)
            | Error::Search(_)
            | Error::Queue(_)
            | Error::Workflow(_)
            | Error::Provider { .. }
            | Error::DynamoSerialization(_)
            | Error::Internal(_) => 500,
        }
    }

    pub(crate) fn provider(provider: &str, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}
