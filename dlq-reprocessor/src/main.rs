//! MediaLake DLQ Reprocessor Lambda
//!
//! Runs on a schedule and drains the indexing dead-letter queue, replaying
//! each failed action against OpenSearch with the asset's current state.
//!
//! Optional input: `{"max_messages": 50}`

use aws_config::BehaviorVersion;
use chrono::Utc;
use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use medialake_core::config::{DlqConfig, SearchConfig, SyncConfig};
use medialake_core::dlq::SqsDeadLetterQueue;
use medialake_core::logging::init_logging;
use medialake_core::replay::{DlqReplayer, ReplayReport};
use medialake_core::{DynamoClient, IndexSynchronizer, OpenSearchIndex};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Time left in the invocation below which no new receive is started
const SAFETY_MARGIN_MS: i64 = 30_000;

#[derive(Debug, Default, Deserialize)]
struct ReplayRequest {
    #[serde(default)]
    max_messages: Option<usize>,
}

struct State {
    replayer: DlqReplayer,
    batch_max: usize,
}

async fn handler(state: &State, event: LambdaEvent<Value>) -> Result<ReplayReport, LambdaError> {
    // Scheduled events carry an EventBridge envelope, not a ReplayRequest
    let request: ReplayRequest = serde_json::from_value(event.payload).unwrap_or_default();
    let max_messages = request.max_messages.unwrap_or(state.batch_max);
    let deadline_ms = event.context.deadline as i64;

    info!(
        request_id = %event.context.request_id,
        max_messages = max_messages,
        "Draining dead-letter queue"
    );

    let report = state
        .replayer
        .drain(max_messages, || Utc::now().timestamp_millis() + SAFETY_MARGIN_MS < deadline_ms)
        .await?;

    Ok(report)
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    init_logging();

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let search = SearchConfig::from_env()?;
    let sync_config = SyncConfig::from_env()?;
    let dlq_config = DlqConfig::from_env()?;

    let index = Arc::new(OpenSearchIndex::new(&search, &sdk_config, &search.index)?);
    let sync = Arc::new(IndexSynchronizer::from_config(index, &sync_config));
    let queue = Arc::new(SqsDeadLetterQueue::new(
        aws_sdk_sqs::Client::new(&sdk_config),
        dlq_config.queue_url,
        dlq_config.retry,
    ));
    let source = Arc::new(DynamoClient::new(aws_sdk_dynamodb::Client::new(&sdk_config)));

    let state = State {
        replayer: DlqReplayer::new(queue, source, sync, dlq_config.max_attempts),
        batch_max: dlq_config.batch_max,
    };

    let state = &state;
    run(service_fn(move |event: LambdaEvent<Value>| async move {
        handler(state, event).await
    }))
    .await
}
