//! OpenSearch access for the asset index
//!
//! Bulk bodies carry the change's stream version with
//! `version_type=external_gte`, so replaying an older change (for example
//! from the DLQ) can never overwrite a newer document: OpenSearch answers
//! with a 409 which is reported as [`ItemOutcome::Superseded`].

use async_trait::async_trait;
use aws_config::SdkConfig;
use opensearch::http::request::JsonBody;
use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use opensearch::params::Conflicts;
use opensearch::{BulkParts, DeleteByQueryParts, OpenSearch};
use serde_json::{json, Value};
use tracing::{debug, error, info};
use url::Url;

use crate::config::SearchConfig;
use crate::errors::{Error, Result};
use crate::models::{IndexAction, IndexOp};

/// Result of one action in a bulk request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    /// A newer version is already indexed
    Superseded,
    Failed {
        status: u16,
        reason: String,
        retryable: bool,
    },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded | ItemOutcome::Superseded)
    }

    pub(crate) fn missing() -> Self {
        ItemOutcome::Failed {
            status: 0,
            reason: "no result returned for action".to_string(),
            retryable: true,
        }
    }
}

/// Search index used by the synchronizer and the deletion service
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Apply actions in one bulk request; one outcome per action, in order
    async fn bulk(&self, actions: &[IndexAction]) -> Result<Vec<ItemOutcome>>;

    /// Delete every document of an asset, returning the number deleted
    async fn delete_by_inventory_id(&self, inventory_id: &str) -> Result<u64>;
}

/// Build the NDJSON lines of a bulk request
pub fn bulk_body(index: &str, actions: &[IndexAction]) -> Result<Vec<Value>> {
    let mut lines = Vec::with_capacity(actions.len() * 2);

    for action in actions {
        let header = json!({
            "_index": index,
            "_id": action.inventory_id,
            "version": action.version,
            "version_type": "external_gte",
        });

        match action.op {
            IndexOp::Upsert => {
                let document = action.document.clone().ok_or_else(|| {
                    Error::Internal(format!("upsert without document for {}", action.inventory_id))
                })?;
                lines.push(json!({ "index": header }));
                lines.push(document);
            }
            IndexOp::Delete => {
                lines.push(json!({ "delete": header }));
            }
        }
    }

    Ok(lines)
}

/// Classify one item of a bulk response
fn classify_item(op: IndexOp, item: &Value) -> ItemOutcome {
    let key = match op {
        IndexOp::Upsert => "index",
        IndexOp::Delete => "delete",
    };
    let Some(result) = item.get(key) else {
        return ItemOutcome::missing();
    };

    let status = result.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
    match status {
        200..=299 => ItemOutcome::Succeeded,
        404 if op == IndexOp::Delete => ItemOutcome::Succeeded,
        409 => ItemOutcome::Superseded,
        _ => {
            let reason = result
                .get("error")
                .map(|e| {
                    e.get("reason")
                        .and_then(Value::as_str)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| e.to_string())
                })
                .unwrap_or_else(|| format!("status {}", status));
            ItemOutcome::Failed {
                status,
                reason,
                retryable: status == 429 || status >= 500 || status == 0,
            }
        }
    }
}

/// Map a bulk response to per-action outcomes
///
/// Items the cluster did not report on are retryable failures.
pub fn parse_bulk_response(response: &Value, actions: &[IndexAction]) -> Vec<ItemOutcome> {
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .map(|v| v.as_slice())
        .unwrap_or(&[]);

    actions
        .iter()
        .enumerate()
        .map(|(i, action)| match items.get(i) {
            Some(item) => classify_item(action.op, item),
            None => ItemOutcome::missing(),
        })
        .collect()
}

/// Top-level `errors` flag of a bulk response
pub fn bulk_has_errors(response: &Value) -> bool {
    response.get("errors").and_then(|v| v.as_bool()).unwrap_or(false)
}

/// OpenSearch client signed with SigV4 credentials from the Lambda role
pub struct OpenSearchIndex {
    client: OpenSearch,
    index: String,
    id_field: String,
}

impl OpenSearchIndex {
    /// Connect to the configured domain, targeting `index`
    pub fn new(config: &SearchConfig, sdk_config: &SdkConfig, index: &str) -> Result<Self> {
        info!(endpoint = %config.endpoint, index = %index, "Initializing OpenSearch client");

        let url = Url::parse(&config.endpoint).map_err(|e| Error::Config(e.to_string()))?;
        let conn_pool = SingleNodeConnectionPool::new(url);

        let transport = TransportBuilder::new(conn_pool)
            .auth(
                sdk_config
                    .clone()
                    .try_into()
                    .map_err(|e| Error::Config(format!("AWS credentials for OpenSearch: {:?}", e)))?,
            )
            .service_name(&config.service)
            .build()
            .map_err(|e| {
                error!(error = %e, "Failed to build OpenSearch transport");
                Error::Search(e.to_string())
            })?;

        Ok(Self {
            client: OpenSearch::new(transport),
            index: index.to_string(),
            id_field: config.id_field.clone(),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }
}

#[async_trait]
impl SearchIndex for OpenSearchIndex {
    async fn bulk(&self, actions: &[IndexAction]) -> Result<Vec<ItemOutcome>> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }

        let body: Vec<JsonBody<Value>> = bulk_body(&self.index, actions)?
            .into_iter()
            .map(JsonBody::new)
            .collect();

        let response = self
            .client
            .bulk(BulkParts::Index(&self.index))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Search(format!("bulk request failed: {}", e)))?;

        let status = response.status_code().as_u16();
        if status >= 400 {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!("bulk request returned {}: {}", status, text)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::Search(format!("invalid bulk response: {}", e)))?;

        let errors = bulk_has_errors(&json);
        debug!(actions = actions.len(), errors = errors, "Bulk request completed");

        Ok(parse_bulk_response(&json, actions))
    }

    async fn delete_by_inventory_id(&self, inventory_id: &str) -> Result<u64> {
        let mut term = serde_json::Map::new();
        term.insert(self.id_field.clone(), Value::String(inventory_id.to_string()));

        let response = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&[self.index.as_str()]))
            .conflicts(Conflicts::Proceed)
            .refresh(true)
            .body(json!({ "query": { "term": term } }))
            .send()
            .await
            .map_err(|e| Error::Search(format!("delete_by_query failed: {}", e)))?;

        let status = response.status_code().as_u16();
        if status == 404 {
            // Index does not exist: nothing to delete
            return Ok(0);
        }
        if status >= 400 {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!("delete_by_query returned {}: {}", status, text)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::Search(format!("invalid delete_by_query response: {}", e)))?;

        Ok(json.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }
}
