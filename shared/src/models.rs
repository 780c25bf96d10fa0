//! Domain models for MediaLake
//!
//! These types represent the core entities in the system:
//! - Asset records: media assets keyed by inventory ID
//! - Index actions: pending changes to the search index
//! - DLQ entries: index actions that failed and wait for replay
//! - Execution records: pipeline (state machine) runs
//! - Deletion reports: per-store outcome of an asset deletion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Asset record as stored in the asset table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetRecord {
    #[serde(rename = "InventoryID")]
    pub inventory_id: String,
    #[serde(rename = "DigitalSourceAsset")]
    pub digital_source_asset: DigitalSourceAsset,
    #[serde(rename = "DerivedRepresentations", default)]
    pub derived_representations: Vec<Representation>,
    #[serde(rename = "Metadata", default)]
    pub metadata: AssetMetadata,
}

impl AssetRecord {
    /// Every stored object of the asset, main representation first
    pub fn storage_locations(&self) -> impl Iterator<Item = &StorageLocation> {
        std::iter::once(&self.digital_source_asset.main_representation)
            .chain(self.derived_representations.iter())
            .map(|r| &r.storage_info.primary_location)
    }

    /// Provider-specific identifiers stored under `Metadata.ExternalIDs`
    pub fn external_ids(&self, provider: &str) -> Option<&serde_json::Value> {
        self.metadata.external_ids.get(provider)
    }

    /// Asset type ("Image", "Video", "Audio")
    pub fn asset_type(&self) -> &str {
        &self.digital_source_asset.asset_type
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DigitalSourceAsset {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "Type")]
    pub asset_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,
    pub main_representation: Representation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Representation {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub representation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub storage_info: StorageInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StorageInfo {
    pub primary_location: StorageLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StorageLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    pub bucket: String,
    pub object_key: ObjectKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectKey {
    pub full_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssetMetadata {
    #[serde(rename = "EmbeddedMetadata", default, skip_serializing_if = "Option::is_none")]
    pub embedded_metadata: Option<serde_json::Value>,
    /// Foreign keys into third-party search providers, by provider name
    #[serde(rename = "ExternalIDs", default)]
    pub external_ids: BTreeMap<String, serde_json::Value>,
}

/// Validate an inventory ID before using it as a key or URL segment
pub fn validate_inventory_id(inventory_id: &str) -> crate::Result<()> {
    if inventory_id.trim().is_empty() {
        return Err(crate::Error::InvalidInventoryId("empty".to_string()));
    }
    if inventory_id.contains('/') || inventory_id.len() > 1024 {
        return Err(crate::Error::InvalidInventoryId(inventory_id.to_string()));
    }
    Ok(())
}

/// Kind of change to apply to the search index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOp {
    Upsert,
    Delete,
}

/// One pending change to the search index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAction {
    pub op: IndexOp,
    pub inventory_id: String,
    /// Stream order of the source change (seconds, then sequence digits),
    /// used as external version
    pub version: i64,
    /// Full document for upserts; `None` means re-read from the asset table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<serde_json::Value>,
}

impl IndexAction {
    pub fn upsert(inventory_id: impl Into<String>, version: i64, document: serde_json::Value) -> Self {
        Self {
            op: IndexOp::Upsert,
            inventory_id: inventory_id.into(),
            version,
            document: Some(document),
        }
    }

    pub fn delete(inventory_id: impl Into<String>, version: i64) -> Self {
        Self {
            op: IndexOp::Delete,
            inventory_id: inventory_id.into(),
            version,
            document: None,
        }
    }
}

/// Failed index action as carried through the dead-letter queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    pub action: IndexAction,
    /// Number of delivery attempts already made
    pub attempts: u32,
    pub last_error: String,
    pub first_failed_at: DateTime<Utc>,
}

impl DlqEntry {
    pub fn new(action: IndexAction, error: impl Into<String>) -> Self {
        Self {
            action,
            attempts: 1,
            last_error: error.into(),
            first_failed_at: Utc::now(),
        }
    }

    /// Entry for the next replay attempt
    pub fn retried(mut self, error: impl Into<String>) -> Self {
        self.attempts += 1;
        self.last_error = error.into();
        self
    }
}

/// Step Functions execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
    PendingRedrive,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running | ExecutionStatus::PendingRedrive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::TimedOut => "TIMED_OUT",
            ExecutionStatus::Aborted => "ABORTED",
            ExecutionStatus::PendingRedrive => "PENDING_REDRIVE",
        }
    }
}

/// Pipeline execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub execution_arn: String,
    pub pipeline_name: String,
    pub state_machine_arn: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl ExecutionRecord {
    /// Duration derived from start and end time
    pub fn derive_duration(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Option<f64> {
        end.map(|end| (end - start).num_milliseconds().max(0) as f64 / 1000.0)
    }
}

/// Request to start a pipeline, as delivered on the trigger queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTriggerRequest {
    /// Pipeline name, defaults to the configured pipeline
    #[serde(default)]
    pub pipeline_name: Option<String>,
    /// State machine input
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Outcome of one stage of an asset deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded {
        #[serde(default)]
        deleted: u64,
    },
    Failed {
        error: String,
    },
    Skipped {
        reason: String,
    },
}

impl StageOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }
}

/// Overall status of an asset deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    /// Every store was cleaned and the asset record removed
    Deleted,
    /// At least one store failed; the asset record was kept for retry
    Partial,
}

/// Per-store report of an asset deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub inventory_id: String,
    pub status: DeletionStatus,
    pub storage: StageOutcome,
    pub search_index: StageOutcome,
    /// Outcome per external provider
    pub providers: BTreeMap<String, StageOutcome>,
    pub record: StageOutcome,
}

/// API response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn partial(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "partial".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_asset() -> serde_json::Value {
        json!({
            "InventoryID": "asset:vid:1234",
            "DigitalSourceAsset": {
                "ID": "dsa-1",
                "Type": "Video",
                "MainRepresentation": {
                    "ID": "rep-1",
                    "Format": "MP4",
                    "Purpose": "master",
                    "StorageInfo": {
                        "PrimaryLocation": {
                            "StorageType": "s3",
                            "Bucket": "media-ingest",
                            "ObjectKey": {"FullPath": "uploads/clip.mp4", "Name": "clip.mp4"}
                        }
                    }
                }
            },
            "DerivedRepresentations": [{
                "Purpose": "proxy",
                "StorageInfo": {
                    "PrimaryLocation": {
                        "Bucket": "media-derived",
                        "ObjectKey": {"FullPath": "proxies/clip.mp4"}
                    }
                }
            }],
            "Metadata": {
                "EmbeddedMetadata": {"general": {"Duration": 12.5}},
                "ExternalIDs": {"TwelveLabs": {"IndexId": "idx", "VideoId": "vid"}}
            }
        })
    }

    #[test]
    fn test_asset_record_deserialization() {
        let asset: AssetRecord = serde_json::from_value(sample_asset()).unwrap();
        assert_eq!(asset.inventory_id, "asset:vid:1234");
        assert_eq!(asset.asset_type(), "Video");
        assert_eq!(asset.derived_representations.len(), 1);
        assert!(asset.external_ids("TwelveLabs").is_some());
        assert!(asset.external_ids("Coactive").is_none());
    }

    #[test]
    fn test_storage_locations_main_first() {
        let asset: AssetRecord = serde_json::from_value(sample_asset()).unwrap();
        let keys: Vec<&str> = asset
            .storage_locations()
            .map(|l| l.object_key.full_path.as_str())
            .collect();
        assert_eq!(keys, vec!["uploads/clip.mp4", "proxies/clip.mp4"]);
    }

    #[test]
    fn test_asset_without_metadata_defaults() {
        let mut value = sample_asset();
        value.as_object_mut().unwrap().remove("Metadata");
        value.as_object_mut().unwrap().remove("DerivedRepresentations");
        let asset: AssetRecord = serde_json::from_value(value).unwrap();
        assert!(asset.metadata.external_ids.is_empty());
        assert_eq!(asset.storage_locations().count(), 1);
    }

    #[test]
    fn test_validate_inventory_id() {
        assert!(validate_inventory_id("asset:img:1").is_ok());
        assert!(validate_inventory_id("").is_err());
        assert!(validate_inventory_id("   ").is_err());
        assert!(validate_inventory_id("a/b").is_err());
    }

    #[test]
    fn test_index_action_serialization_omits_missing_document() {
        let action = IndexAction::delete("asset:img:1", 42);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json, json!({"op": "delete", "inventory_id": "asset:img:1", "version": 42}));
    }

    #[test]
    fn test_dlq_entry_retried_increments_attempts() {
        let entry = DlqEntry::new(IndexAction::delete("a", 1), "timeout");
        let first = entry.first_failed_at;
        let retried = entry.retried("503");
        assert_eq!(retried.attempts, 2);
        assert_eq!(retried.last_error, "503");
        assert_eq!(retried.first_failed_at, first);
    }

    #[test]
    fn test_execution_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::TimedOut).unwrap(),
            r#""TIMED_OUT""#
        );
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_derive_duration() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339("2024-01-01T00:01:30.500Z").unwrap().with_timezone(&Utc);
        assert_eq!(ExecutionRecord::derive_duration(start, Some(end)), Some(90.5));
        assert_eq!(ExecutionRecord::derive_duration(start, None), None);
    }

    #[test]
    fn test_stage_outcome_serialization() {
        let outcome = StageOutcome::Failed { error: "boom".into() };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"outcome": "failed", "error": "boom"})
        );
    }

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new("Asset not found");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains("Asset not found"));
        assert!(!json.contains("code"));
    }
}
