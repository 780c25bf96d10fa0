//! Dead-letter queue replay
//!
//! Drains the DLQ in small receives, re-applies the entries through the
//! index synchronizer and decides per message whether to delete it, re-enqueue
//! it with a longer delay, or leave it for the queue's redrive policy.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::dlq::{decode_entry, DeadLetterQueue, QueueMessage};
use crate::errors::Result;
use crate::models::{DlqEntry, IndexAction, IndexOp};
use crate::sync::IndexSynchronizer;

/// Source of current asset documents, for entries sent without one
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Current document for an asset, `None` when the asset no longer exists
    async fn current_document(&self, inventory_id: &str) -> Result<Option<Value>>;
}

/// Counts returned by one reprocessor run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub received: usize,
    pub succeeded: usize,
    /// Older entries made redundant by a newer entry for the same asset
    pub superseded: usize,
    pub requeued: usize,
    /// Left in the queue for redrive to the terminal queue
    pub abandoned: usize,
    /// Undecodable messages that were deleted
    pub discarded: usize,
}

pub struct DlqReplayer {
    queue: Arc<dyn DeadLetterQueue>,
    source: Arc<dyn DocumentSource>,
    sync: Arc<IndexSynchronizer>,
    max_attempts: u32,
}

struct Pending {
    message: QueueMessage,
    entry: DlqEntry,
}

/// Result of replaying one message
enum Replayed {
    Applied,
    Superseded,
    Failed(String),
}

impl DlqReplayer {
    pub fn new(
        queue: Arc<dyn DeadLetterQueue>,
        source: Arc<dyn DocumentSource>,
        sync: Arc<IndexSynchronizer>,
        max_attempts: u32,
    ) -> Self {
        Self {
            queue,
            source,
            sync,
            max_attempts,
        }
    }

    /// Process up to `max_messages`, stopping early when the queue is empty
    /// or `has_time` reports the invocation is about to run out of time
    pub async fn drain<F>(&self, max_messages: usize, has_time: F) -> Result<ReplayReport>
    where
        F: Fn() -> bool,
    {
        let mut report = ReplayReport::default();

        while report.received < max_messages {
            if !has_time() {
                warn!(received = report.received, "Stopping DLQ drain, invocation time nearly exhausted");
                break;
            }

            let messages = self.queue.receive(max_messages - report.received).await?;
            if messages.is_empty() {
                break;
            }
            report.received += messages.len();
            self.process(messages, &mut report).await?;
        }

        info!(
            received = report.received,
            succeeded = report.succeeded,
            superseded = report.superseded,
            requeued = report.requeued,
            abandoned = report.abandoned,
            discarded = report.discarded,
            "DLQ drain completed"
        );
        Ok(report)
    }

    async fn process(&self, messages: Vec<QueueMessage>, report: &mut ReplayReport) -> Result<()> {
        let mut to_delete = Vec::new();
        let mut pending = Vec::with_capacity(messages.len());

        for message in messages {
            match decode_entry(&message.body) {
                Ok(entry) => pending.push(Pending { message, entry }),
                Err(e) => {
                    error!(message_id = %message.message_id, error = %e, "Discarding undecodable DLQ message");
                    report.discarded += 1;
                    to_delete.push(message.receipt_handle);
                }
            }
        }

        let mut outcomes = self.replay(&pending).await;

        let mut requeue = Vec::new();
        let mut requeue_handles = Vec::new();
        for p in pending {
            let error = match outcomes.remove(&p.message.message_id) {
                Some(Replayed::Failed(error)) => error,
                Some(Replayed::Superseded) => {
                    debug!(
                        message_id = %p.message.message_id,
                        inventory_id = %p.entry.action.inventory_id,
                        "DLQ entry superseded by a newer entry"
                    );
                    report.superseded += 1;
                    to_delete.push(p.message.receipt_handle);
                    continue;
                }
                Some(Replayed::Applied) | None => {
                    report.succeeded += 1;
                    to_delete.push(p.message.receipt_handle);
                    continue;
                }
            };

            if p.entry.attempts + 1 >= self.max_attempts {
                error!(
                    message_id = %p.message.message_id,
                    inventory_id = %p.entry.action.inventory_id,
                    attempts = p.entry.attempts + 1,
                    error = %error,
                    "Index action exhausted DLQ attempts, leaving for redrive"
                );
                report.abandoned += 1;
                continue;
            }

            requeue_handles.push(p.message.receipt_handle);
            requeue.push(p.entry.retried(error));
        }

        if !requeue.is_empty() {
            let send_failures = self.queue.send(&requeue).await?;
            let refused: HashSet<usize> = send_failures.iter().map(|f| f.position).collect();
            for (position, (entry, handle)) in requeue.iter().zip(requeue_handles).enumerate() {
                if refused.contains(&position) {
                    // The original stays and is redelivered after its visibility timeout
                    warn!(inventory_id = %entry.action.inventory_id, "Failed to re-enqueue DLQ entry");
                    report.abandoned += 1;
                } else {
                    report.requeued += 1;
                    to_delete.push(handle);
                }
            }
        }

        if !to_delete.is_empty() {
            let undeleted = self.queue.delete(&to_delete).await?;
            if !undeleted.is_empty() {
                warn!(count = undeleted.len(), "Some DLQ messages could not be deleted");
            }
        }

        Ok(())
    }

    /// Apply the entries, one outcome per message id.
    ///
    /// Only the newest entry per asset reaches the index; older entries for
    /// the same asset are superseded by it.
    async fn replay(&self, pending: &[Pending]) -> HashMap<String, Replayed> {
        let mut outcomes = HashMap::with_capacity(pending.len());

        // Entries whose document could not be re-read fail without reaching the index
        let mut prepared = Vec::with_capacity(pending.len());
        for p in pending {
            match self.prepare(&p.entry.action).await {
                Ok(action) => prepared.push((p.message.message_id.as_str(), action)),
                Err(e) => {
                    outcomes.insert(p.message.message_id.clone(), Replayed::Failed(e.to_string()));
                }
            }
        }

        let mut newest: HashMap<&str, usize> = HashMap::new();
        for (i, (_, action)) in prepared.iter().enumerate() {
            let current = newest.entry(action.inventory_id.as_str()).or_insert(i);
            if prepared[*current].1.version <= action.version {
                *current = i;
            }
        }
        let winners: HashSet<usize> = newest.into_values().collect();

        let mut owners: HashMap<String, &str> = HashMap::with_capacity(winners.len());
        let mut actions = Vec::with_capacity(winners.len());
        for (i, (message_id, action)) in prepared.into_iter().enumerate() {
            if winners.contains(&i) {
                owners.insert(action.inventory_id.clone(), message_id);
                actions.push(action);
            } else {
                outcomes.insert(message_id.to_string(), Replayed::Superseded);
            }
        }

        let sync_report = self.sync.apply(actions).await;
        for failed in sync_report.failed {
            if let Some(message_id) = owners.get(failed.action.inventory_id.as_str()) {
                outcomes.insert(message_id.to_string(), Replayed::Failed(failed.error));
            }
        }
        for message_id in owners.into_values() {
            outcomes.entry(message_id.to_string()).or_insert(Replayed::Applied);
        }

        outcomes
    }

    /// Restore the document of an upsert that was sent without one
    async fn prepare(&self, action: &IndexAction) -> Result<IndexAction> {
        if action.op == IndexOp::Delete || action.document.is_some() {
            return Ok(action.clone());
        }

        match self.source.current_document(&action.inventory_id).await? {
            Some(document) => Ok(IndexAction::upsert(&action.inventory_id, action.version, document)),
            None => {
                info!(inventory_id = %action.inventory_id, "Asset no longer exists, replaying as delete");
                Ok(IndexAction::delete(&action.inventory_id, action.version))
            }
        }
    }
}
