//! MediaLake API client for testing

use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// API client for MediaLake
pub struct MediaLakeClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageOutcome {
    pub outcome: String,
    #[serde(default)]
    pub deleted: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeletionReport {
    pub inventory_id: String,
    pub status: String,
    pub storage: StageOutcome,
    pub search_index: StageOutcome,
    pub providers: BTreeMap<String, StageOutcome>,
    pub record: StageOutcome,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    pub code: Option<String>,
}

/// Result type for API responses
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// HTTP error with status code and body
    Http { status: StatusCode, body: String },
    /// Network or serialization error
    Request(String),
}

impl ApiError {
    /// Parsed error envelope of an HTTP error
    pub fn error_response(&self) -> Option<ErrorResponse> {
        match self {
            ApiError::Http { body, .. } => serde_json::from_str(body).ok(),
            ApiError::Request(_) => None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            ApiError::Request(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl MediaLakeClient {
    /// Create a new client with the given base URL
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client from environment variable
    pub fn from_env() -> Self {
        let base_url = std::env::var("MEDIALAKE_API_URL")
            .expect("MEDIALAKE_API_URL environment variable not set");
        Self::new(&base_url)
    }

    /// Delete an asset; both 200 and 207 are returned as Ok with their status
    pub async fn delete_asset(
        &self,
        inventory_id: &str,
    ) -> ApiResult<(StatusCode, ApiResponse<DeletionReport>)> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/assets/{}", inventory_id))
            .await?;
        let status = response.status();
        let body = self.handle_response(response).await?;
        Ok((status, body))
    }

    /// Raw request, for routes the API does not serve
    pub async fn send(&self, method: reqwest::Method, path: &str) -> ApiResult<StatusCode> {
        Ok(self.request(method, path).await?.status())
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> ApiResult<Response> {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| ApiError::Request(e.to_string()))
        } else {
            Err(ApiError::Http { status, body })
        }
    }
}
