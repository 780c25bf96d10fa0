//! MediaLake Asset Deletion Lambda
//!
//! Handles DELETE /assets/{inventory_id}, under any stage or base path
//!
//! Removes the asset's objects, search documents and external provider
//! entries, then the asset record. Responds 200 when everything was
//! removed and 207 when some store failed and the record was kept.

use aws_config::BehaviorVersion;
use lambda_http::{run, service_fn, Body, Error as LambdaError, Request, RequestExt, Response};
use medialake_core::config::{ProvidersConfig, SearchConfig};
use medialake_core::deletion::AssetDeletionService;
use medialake_core::logging::init_logging;
use medialake_core::providers::ProviderRegistry;
use medialake_core::{
    ApiResponse, DeletionStatus, DynamoClient, Error, ErrorResponse, OpenSearchIndex, S3Storage,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Inventory id targeted by a DELETE request.
///
/// The `inventory_id` (or `id`) path parameter wins; without one (direct invocation,
/// custom domain mappings) the segment after `/assets/` is used.
fn deletion_target(method: &str, path: &str, path_parameter: Option<&str>) -> Option<String> {
    if method != "DELETE" {
        return None;
    }
    path_parameter
        .or_else(|| path.split_once("/assets/").map(|(_, id)| id))
        .map(|id| id.trim_matches('/'))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

async fn handler(service: &AssetDeletionService, event: Request) -> Result<Response<Body>, LambdaError> {
    let method = event.method().as_str();
    let path = event.uri().path().to_string();

    info!(method = %method, path = %path, "Processing asset request");

    let parameters = event.path_parameters();
    let parameter = parameters.first("inventory_id").or_else(|| parameters.first("id"));
    let inventory_id = deletion_target(method, &path, parameter);

    match inventory_id {
        Some(inventory_id) => {
            match service.delete_asset(&inventory_id).await {
                Ok(report) if report.status == DeletionStatus::Deleted => json_response(
                    200,
                    &ApiResponse::success(format!("Asset {} deleted", inventory_id), report),
                ),
                Ok(report) => json_response(
                    207,
                    &ApiResponse::partial(
                        format!("Asset {} partially deleted, record kept for retry", inventory_id),
                        report,
                    ),
                ),
                Err(e) => error_response(e),
            }
        }

        _ => json_response(
            404,
            &ErrorResponse::new("Endpoint not found").with_code("not_found"),
        ),
    }
}

fn json_response<T: Serialize>(status: u16, body: &T) -> Result<Response<Body>, LambdaError> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(body)?))?)
}

fn error_response(e: Error) -> Result<Response<Body>, LambdaError> {
    error!(error = %e, "Request failed");
    let body = ErrorResponse::new(e.to_string()).with_code(e.code());
    json_response(e.status_code(), &body)
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    init_logging();

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let search = SearchConfig::from_env()?;
    let providers = ProvidersConfig::from_env()?;

    let assets = Arc::new(DynamoClient::new(aws_sdk_dynamodb::Client::new(&sdk_config)));
    let objects = Arc::new(S3Storage::new(aws_sdk_s3::Client::new(&sdk_config)));
    let index = Arc::new(OpenSearchIndex::new(&search, &sdk_config, &search.index)?);
    let registry = ProviderRegistry::from_config(&providers, &search, &sdk_config).await?;
    info!(providers = ?registry.names(), "External providers configured");

    let service = AssetDeletionService::new(assets, objects, index, registry);

    let service = &service;
    run(service_fn(move |event: Request| async move { handler(service, event).await })).await
}
