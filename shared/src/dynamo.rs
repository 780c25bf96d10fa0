//! DynamoDB operations for MediaLake
//!
//! Two tables are used:
//!
//! | Table                 | Key            | Purpose                       |
//! |-----------------------|----------------|-------------------------------|
//! | asset table           | `InventoryID`  | Media asset records           |
//! | executions table      | `execution_id` | Pipeline execution records    |

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use serde_dynamo::{from_item, to_item, Item};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::config::env_or;
use crate::conversions::{image_to_document, INVENTORY_ID_ATTRIBUTE};
use crate::deletion::AssetStore;
use crate::errors::{Error, Result};
use crate::execution::ExecutionStore;
use crate::models::{AssetRecord, ExecutionRecord};
use crate::replay::DocumentSource;

const ASSET_TABLE_ENV: &str = "ASSET_TABLE";
const DEFAULT_ASSET_TABLE: &str = "medialake-assets";
const EXECUTIONS_TABLE_ENV: &str = "EXECUTIONS_TABLE";
const DEFAULT_EXECUTIONS_TABLE: &str = "medialake-pipeline-executions";

/// DynamoDB client for MediaLake operations
pub struct DynamoClient {
    client: Client,
    asset_table: String,
    executions_table: String,
}

impl DynamoClient {
    /// Create a new DynamoDB client, table names from the environment
    pub fn new(client: Client) -> Self {
        Self {
            client,
            asset_table: env_or(ASSET_TABLE_ENV, DEFAULT_ASSET_TABLE),
            executions_table: env_or(EXECUTIONS_TABLE_ENV, DEFAULT_EXECUTIONS_TABLE),
        }
    }

    /// Create with explicit table names (for testing)
    pub fn with_table_names(client: Client, asset_table: String, executions_table: String) -> Self {
        Self {
            client,
            asset_table,
            executions_table,
        }
    }

    // =========================================================================
    // Assets
    // =========================================================================

    async fn get_asset_item(&self, inventory_id: &str) -> Result<Option<HashMap<String, AttributeValue>>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.asset_table)
            .key(INVENTORY_ID_ATTRIBUTE, AttributeValue::S(inventory_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.item)
    }

    /// Get an asset record by inventory ID
    pub async fn get_asset(&self, inventory_id: &str) -> Result<Option<AssetRecord>> {
        match self.get_asset_item(inventory_id).await? {
            Some(item) => from_item(item)
                .map(Some)
                .map_err(|e| Error::DynamoSerialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Get the current asset as a plain JSON document
    pub async fn get_asset_document(&self, inventory_id: &str) -> Result<Option<Value>> {
        Ok(self
            .get_asset_item(inventory_id)
            .await?
            .map(|item| image_to_document(&Item::from(item))))
    }

    /// Delete an asset record
    pub async fn delete_asset(&self, inventory_id: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.asset_table)
            .key(INVENTORY_ID_ATTRIBUTE, AttributeValue::S(inventory_id.to_string()))
            .send()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        debug!(inventory_id = %inventory_id, "Asset record deleted");
        Ok(())
    }

    // =========================================================================
    // Pipeline executions
    // =========================================================================

    /// Write an execution record
    ///
    /// With `only_if_absent` the write is skipped when a record already
    /// exists; returns whether the record was written.
    pub async fn put_execution(&self, record: &ExecutionRecord, only_if_absent: bool) -> Result<bool> {
        let item: HashMap<String, AttributeValue> =
            to_item(record).map_err(|e| Error::DynamoSerialization(e.to_string()))?;

        let mut request = self
            .client
            .put_item()
            .table_name(&self.executions_table)
            .set_item(Some(item));
        if only_if_absent {
            request = request.condition_expression("attribute_not_exists(execution_id)");
        }

        match request.send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let conditional = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if conditional {
                    Ok(false)
                } else {
                    Err(Error::Database(e.to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl AssetStore for DynamoClient {
    async fn get_asset(&self, inventory_id: &str) -> Result<Option<AssetRecord>> {
        DynamoClient::get_asset(self, inventory_id).await
    }

    async fn delete_asset(&self, inventory_id: &str) -> Result<()> {
        DynamoClient::delete_asset(self, inventory_id).await
    }
}

#[async_trait]
impl DocumentSource for DynamoClient {
    async fn current_document(&self, inventory_id: &str) -> Result<Option<Value>> {
        self.get_asset_document(inventory_id).await
    }
}

#[async_trait]
impl ExecutionStore for DynamoClient {
    async fn put_execution(&self, record: &ExecutionRecord, only_if_absent: bool) -> Result<bool> {
        DynamoClient::put_execution(self, record, only_if_absent).await
    }
}
