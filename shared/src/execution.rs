//! Pipeline execution records from Step Functions status-change events

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::models::{ExecutionRecord, ExecutionStatus};

/// Storage for execution records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Write a record; with `only_if_absent` an existing record is kept.
    /// Returns whether the record was written.
    async fn put_execution(&self, record: &ExecutionRecord, only_if_absent: bool) -> Result<bool>;
}

/// `detail` of an EventBridge "Step Functions Execution Status Change" event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusDetail {
    pub execution_arn: String,
    pub state_machine_arn: String,
    pub name: String,
    pub status: ExecutionStatus,
    /// Epoch milliseconds
    pub start_date: i64,
    #[serde(default)]
    pub stop_date: Option<i64>,
}

fn from_millis(ms: i64, field: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Validation(format!("{} out of range: {}", field, ms)))
}

/// State machine name, the last segment of its ARN
pub fn pipeline_name(state_machine_arn: &str) -> &str {
    state_machine_arn.rsplit(':').next().unwrap_or(state_machine_arn)
}

impl ExecutionStatusDetail {
    pub fn to_record(&self) -> Result<ExecutionRecord> {
        let start_time = from_millis(self.start_date, "startDate")?;
        let end_time = self
            .stop_date
            .map(|ms| from_millis(ms, "stopDate"))
            .transpose()?;

        Ok(ExecutionRecord {
            execution_id: self.name.clone(),
            execution_arn: self.execution_arn.clone(),
            pipeline_name: pipeline_name(&self.state_machine_arn).to_string(),
            state_machine_arn: self.state_machine_arn.clone(),
            status: self.status,
            start_time,
            end_time,
            duration_seconds: ExecutionRecord::derive_duration(start_time, end_time),
        })
    }
}

pub struct ExecutionTracker {
    store: Arc<dyn ExecutionStore>,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Record a status change
    ///
    /// A RUNNING event arriving after the terminal one must not reset the
    /// record, so non-terminal statuses only create missing records.
    pub async fn record(&self, detail: &ExecutionStatusDetail) -> Result<ExecutionRecord> {
        let record = detail.to_record()?;
        let written = self
            .store
            .put_execution(&record, !record.status.is_terminal())
            .await?;

        if written {
            info!(
                execution_arn = %record.execution_arn,
                status = record.status.as_str(),
                duration_seconds = ?record.duration_seconds,
                "Execution recorded"
            );
        } else {
            debug!(execution_arn = %record.execution_arn, "Execution already recorded, keeping existing status");
        }
        Ok(record)
    }
}
