//! SQS dead-letter queue for index actions that could not be applied
//!
//! Message bodies are JSON [`DlqEntry`] values. SQS rejects bodies above
//! 256KB, so entries whose encoded form exceeds [`MAX_MESSAGE_BYTES`] are
//! sent without their document; the reprocessor re-reads the current item
//! from the asset table instead.

use async_trait::async_trait;
use aws_sdk_sqs::types::{DeleteMessageBatchRequestEntry, SendMessageBatchRequestEntry};
use aws_sdk_sqs::Client;
use tracing::{debug, warn};

use crate::backoff::RetryPolicy;
use crate::errors::{Error, Result};
use crate::models::DlqEntry;

/// Largest message body we send
pub const MAX_MESSAGE_BYTES: usize = 240 * 1024;

/// SQS batch API limit
const SQS_BATCH_SIZE: usize = 10;

/// SQS maximum message delay
const MAX_DELAY_SECS: u64 = 900;

/// Message received from the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
}

/// Entry the queue refused
#[derive(Debug, Clone, PartialEq)]
pub struct SendFailure {
    /// Position of the entry in the sent slice
    pub position: usize,
    pub inventory_id: String,
    pub error: String,
}

#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Enqueue entries, returning those that could not be sent
    async fn send(&self, entries: &[DlqEntry]) -> Result<Vec<SendFailure>>;

    /// Receive up to `max` messages
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>>;

    /// Delete messages by receipt handle, returning handles that failed
    async fn delete(&self, receipt_handles: &[String]) -> Result<Vec<String>>;
}

/// Serialize an entry, dropping its document when the body would be too large
pub fn encode_entry(entry: &DlqEntry) -> Result<String> {
    let body = serde_json::to_string(entry)?;
    if body.len() <= MAX_MESSAGE_BYTES || entry.action.document.is_none() {
        return Ok(body);
    }

    warn!(
        inventory_id = %entry.action.inventory_id,
        bytes = body.len(),
        "DLQ entry too large, sending without document"
    );
    let mut slim = entry.clone();
    slim.action.document = None;
    Ok(serde_json::to_string(&slim)?)
}

pub fn decode_entry(body: &str) -> Result<DlqEntry> {
    serde_json::from_str(body).map_err(|e| Error::Validation(format!("invalid DLQ message: {}", e)))
}

/// Delivery delay for an entry given how often it has already failed
pub fn delay_seconds(entry: &DlqEntry, retry: &RetryPolicy) -> i32 {
    let attempt = entry.attempts.saturating_sub(1);
    retry.delay(attempt).as_secs().min(MAX_DELAY_SECS) as i32
}

pub struct SqsDeadLetterQueue {
    client: Client,
    queue_url: String,
    retry: RetryPolicy,
}

impl SqsDeadLetterQueue {
    pub fn new(client: Client, queue_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            retry,
        }
    }
}

#[async_trait]
impl DeadLetterQueue for SqsDeadLetterQueue {
    async fn send(&self, entries: &[DlqEntry]) -> Result<Vec<SendFailure>> {
        let mut failures = Vec::new();

        for (chunk_index, chunk) in entries.chunks(SQS_BATCH_SIZE).enumerate() {
            let mut batch = Vec::with_capacity(chunk.len());
            for (i, entry) in chunk.iter().enumerate() {
                batch.push(
                    SendMessageBatchRequestEntry::builder()
                        .id(i.to_string())
                        .message_body(encode_entry(entry)?)
                        .delay_seconds(delay_seconds(entry, &self.retry))
                        .build()
                        .map_err(|e| Error::Queue(e.to_string()))?,
                );
            }

            let output = self
                .client
                .send_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(batch))
                .send()
                .await
                .map_err(|e| Error::Queue(e.to_string()))?;

            for failed in output.failed() {
                let Some(i) = failed.id().parse::<usize>().ok().filter(|i| *i < chunk.len()) else {
                    continue;
                };
                let entry = &chunk[i];
                failures.push(SendFailure {
                    position: chunk_index * SQS_BATCH_SIZE + i,
                    inventory_id: entry.action.inventory_id.clone(),
                    error: format!("{}: {}", failed.code(), failed.message().unwrap_or_default()),
                });
            }
        }

        debug!(sent = entries.len() - failures.len(), failed = failures.len(), "DLQ send completed");
        Ok(failures)
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max.clamp(1, SQS_BATCH_SIZE) as i32)
            .wait_time_seconds(1)
            .send()
            .await
            .map_err(|e| Error::Queue(e.to_string()))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(QueueMessage {
                    message_id: m.message_id()?.to_string(),
                    receipt_handle: m.receipt_handle()?.to_string(),
                    body: m.body().unwrap_or_default().to_string(),
                })
            })
            .collect())
    }

    async fn delete(&self, receipt_handles: &[String]) -> Result<Vec<String>> {
        let mut failed_handles = Vec::new();

        for chunk in receipt_handles.chunks(SQS_BATCH_SIZE) {
            let mut batch = Vec::with_capacity(chunk.len());
            for (i, handle) in chunk.iter().enumerate() {
                batch.push(
                    DeleteMessageBatchRequestEntry::builder()
                        .id(i.to_string())
                        .receipt_handle(handle)
                        .build()
                        .map_err(|e| Error::Queue(e.to_string()))?,
                );
            }

            let output = self
                .client
                .delete_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(batch))
                .send()
                .await
                .map_err(|e| Error::Queue(e.to_string()))?;

            for failed in output.failed() {
                if let Some(handle) = failed.id().parse::<usize>().ok().and_then(|i| chunk.get(i)) {
                    warn!(code = %failed.code(), "Failed to delete DLQ message");
                    failed_handles.push(handle.clone());
                }
            }
        }

        Ok(failed_handles)
    }
}
