//! Test fixtures and utilities

use aws_sdk_dynamodb::{types::AttributeValue, Client};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Load `.env` once; missing files are fine
pub fn load_env() {
    let _ = dotenvy::dotenv();
}

/// Generate a unique inventory ID for testing
pub fn unique_inventory_id() -> String {
    format!("asset:img:test-{}", Uuid::new_v4())
}

/// Check if API URL is configured
pub fn api_url_configured() -> bool {
    load_env();
    std::env::var("MEDIALAKE_API_URL").is_ok()
}

/// Asset table name, when seeding is enabled
pub fn asset_table() -> Option<String> {
    load_env();
    std::env::var("MEDIALAKE_ASSET_TABLE").ok()
}

/// Bucket the deployed functions may delete from, when seeding is enabled
pub fn test_bucket() -> Option<String> {
    load_env();
    std::env::var("MEDIALAKE_TEST_BUCKET").ok()
}

/// Bucket name that no account owns, so storage deletion fails
pub const MISSING_BUCKET: &str = "medialake-integration-missing";

/// Minimal image asset stored in `bucket`; the object itself need not exist
pub fn sample_asset(inventory_id: &str, bucket: &str) -> Value {
    json!({
        "InventoryID": inventory_id,
        "DigitalSourceAsset": {
            "Type": "Image",
            "MainRepresentation": {
                "Format": "JPEG",
                "StorageInfo": {
                    "PrimaryLocation": {
                        "StorageType": "s3",
                        "Bucket": bucket,
                        "ObjectKey": {"FullPath": format!("tests/{}.jpg", inventory_id)}
                    }
                }
            }
        },
        "DerivedRepresentations": [],
        "Metadata": {"ExternalIDs": {}}
    })
}

/// Read an asset record straight from the asset table
pub async fn asset_exists(client: &Client, table: &str, inventory_id: &str) -> bool {
    client
        .get_item()
        .table_name(table)
        .key("InventoryID", AttributeValue::S(inventory_id.to_string()))
        .consistent_read(true)
        .send()
        .await
        .expect("Failed to read asset table")
        .item()
        .is_some()
}

/// Remove a seeded asset record
pub async fn remove_asset(client: &Client, table: &str, inventory_id: &str) {
    client
        .delete_item()
        .table_name(table)
        .key("InventoryID", AttributeValue::S(inventory_id.to_string()))
        .send()
        .await
        .expect("Failed to remove asset");
}

/// Write an asset record straight into the asset table
pub async fn seed_asset(table: &str, asset: Value) -> Client {
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = Client::new(&config);
    let item: HashMap<String, AttributeValue> =
        serde_dynamo::to_item(asset).expect("Failed to convert asset");

    client
        .put_item()
        .table_name(table)
        .set_item(Some(item))
        .send()
        .await
        .expect("Failed to seed asset");
    client
}

/// Skip test if API URL is not configured
#[macro_export]
macro_rules! skip_if_no_api {
    () => {
        if !$crate::fixtures::api_url_configured() {
            eprintln!("Skipping test: MEDIALAKE_API_URL not set");
            return;
        }
    };
}
