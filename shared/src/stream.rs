//! Asset table stream processing
//!
//! Converts a batch of DynamoDB stream records into index actions, applies
//! them and routes whatever still fails to the dead-letter queue. A record
//! that cannot be converted is skipped; only a failed DLQ send fails the
//! batch, so Lambda retries it instead of losing changes.

use aws_lambda_events::event::dynamodb::EventRecord;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::conversions::record_to_action;
use crate::dlq::DeadLetterQueue;
use crate::errors::{Error, Result};
use crate::models::DlqEntry;
use crate::sync::IndexSynchronizer;

/// Counts for one stream batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub records: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub superseded: usize,
    pub dead_lettered: usize,
}

pub struct StreamProcessor {
    sync: Arc<IndexSynchronizer>,
    dlq: Arc<dyn DeadLetterQueue>,
    excluded_fields: Vec<String>,
}

impl StreamProcessor {
    pub fn new(sync: Arc<IndexSynchronizer>, dlq: Arc<dyn DeadLetterQueue>, excluded_fields: Vec<String>) -> Self {
        Self {
            sync,
            dlq,
            excluded_fields,
        }
    }

    pub async fn process(&self, records: &[EventRecord]) -> Result<BatchSummary> {
        let mut summary = BatchSummary {
            records: records.len(),
            ..Default::default()
        };

        let mut actions = Vec::with_capacity(records.len());
        for record in records {
            match record_to_action(record, &self.excluded_fields) {
                Ok(Some(action)) => actions.push(action),
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    warn!(
                        event_id = ?record.event_id,
                        event_name = %record.event_name,
                        error = %e,
                        "Skipping unconvertible stream record"
                    );
                    summary.skipped += 1;
                }
            }
        }

        let report = self.sync.apply(actions).await;
        summary.succeeded = report.succeeded.len();
        summary.superseded = report.superseded.len();

        if !report.failed.is_empty() {
            let entries: Vec<DlqEntry> = report
                .failed
                .into_iter()
                .map(|f| DlqEntry::new(f.action, f.error))
                .collect();

            let failures = self.dlq.send(&entries).await?;
            if !failures.is_empty() {
                for failure in &failures {
                    error!(inventory_id = %failure.inventory_id, error = %failure.error, "Failed to dead-letter action");
                }
                return Err(Error::Queue(format!(
                    "{} of {} failed actions could not be dead-lettered",
                    failures.len(),
                    entries.len()
                )));
            }
            summary.dead_lettered = entries.len();
        }

        info!(
            records = summary.records,
            succeeded = summary.succeeded,
            superseded = summary.superseded,
            skipped = summary.skipped,
            dead_lettered = summary.dead_lettered,
            "Stream batch processed"
        );
        Ok(summary)
    }
}
