//! Integration tests for the MediaLake asset API
//!
//! Run with: MEDIALAKE_API_URL=https://your-api.execute-api.us-east-1.amazonaws.com cargo test
//!
//! These tests require a deployed MediaLake stack.

use medialake_integration_tests::{
    client::MediaLakeClient,
    fixtures::{
        asset_exists, asset_table, remove_asset, sample_asset, seed_asset, test_bucket,
        unique_inventory_id, MISSING_BUCKET,
    },
    skip_if_no_api,
};
use pretty_assertions::assert_eq;
use reqwest::{Method, StatusCode};

fn client() -> MediaLakeClient {
    MediaLakeClient::from_env()
}

#[tokio::test]
async fn test_delete_nonexistent_asset_fails() {
    skip_if_no_api!();

    let result = client().delete_asset(&unique_inventory_id()).await;

    let err = result.expect_err("Deleting an unknown asset must fail");
    if let medialake_integration_tests::client::ApiError::Http { status, .. } = &err {
        assert_eq!(status.as_u16(), 404);
    }
    let body = err.error_response().expect("Error body");
    assert_eq!(body.status, "error");
    assert_eq!(body.code.as_deref(), Some("asset_not_found"));
}

#[tokio::test]
async fn test_delete_rejects_oversized_id() {
    skip_if_no_api!();

    let result = client().delete_asset(&"x".repeat(1100)).await;

    let body = result
        .expect_err("Oversized IDs must be rejected")
        .error_response()
        .expect("Error body");
    assert_eq!(body.code.as_deref(), Some("invalid_inventory_id"));
}

#[tokio::test]
async fn test_unknown_route_not_found() {
    skip_if_no_api!();

    let status = client()
        .send(Method::GET, &format!("/assets/{}", unique_inventory_id()))
        .await
        .expect("Request failed");

    // Either the gateway or the function rejects it
    assert!(matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::METHOD_NOT_ALLOWED
    ));
}

#[tokio::test]
async fn test_delete_seeded_asset() {
    skip_if_no_api!();
    let (Some(table), Some(bucket)) = (asset_table(), test_bucket()) else {
        eprintln!("Skipping test: MEDIALAKE_ASSET_TABLE or MEDIALAKE_TEST_BUCKET not set");
        return;
    };

    let inventory_id = unique_inventory_id();
    let dynamo = seed_asset(&table, sample_asset(&inventory_id, &bucket)).await;

    let (status, response) = client()
        .delete_asset(&inventory_id)
        .await
        .expect("Failed to delete asset");
    let report = response.data.expect("Deletion report");

    assert_eq!(report.inventory_id, inventory_id);
    assert_eq!(report.storage.outcome, "succeeded");
    assert_eq!(report.search_index.outcome, "succeeded");

    if status == StatusCode::OK {
        assert_eq!(response.status, "success");
        assert_eq!(report.status, "deleted");
        assert!(!asset_exists(&dynamo, &table, &inventory_id).await);

        // Deleting again finds nothing
        let again = client().delete_asset(&inventory_id).await;
        assert!(again.is_err());
    } else {
        // Only an external provider can have failed
        assert_eq!(status.as_u16(), 207);
        assert_eq!(report.status, "partial");
        assert!(report.providers.values().any(|p| p.outcome == "failed"));
        remove_asset(&dynamo, &table, &inventory_id).await;
    }
}

#[tokio::test]
async fn test_storage_failure_keeps_record() {
    skip_if_no_api!();
    let Some(table) = asset_table() else {
        eprintln!("Skipping test: MEDIALAKE_ASSET_TABLE not set");
        return;
    };

    let inventory_id = unique_inventory_id();
    let dynamo = seed_asset(&table, sample_asset(&inventory_id, MISSING_BUCKET)).await;

    let (status, response) = client()
        .delete_asset(&inventory_id)
        .await
        .expect("Partial deletions are not errors");
    let report = response.data.expect("Deletion report");

    assert_eq!(status.as_u16(), 207);
    assert_eq!(response.status, "partial");
    assert_eq!(report.status, "partial");
    assert_eq!(report.storage.outcome, "failed");
    assert_eq!(report.record.outcome, "skipped");
    assert!(asset_exists(&dynamo, &table, &inventory_id).await);

    remove_asset(&dynamo, &table, &inventory_id).await;
}
