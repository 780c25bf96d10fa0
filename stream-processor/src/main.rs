//! MediaLake Stream Processor Lambda
//!
//! Triggered by the asset table's DynamoDB stream. Keeps the OpenSearch
//! asset index in step with the table; changes that cannot be indexed are
//! sent to the indexing dead-letter queue.

use aws_config::BehaviorVersion;
use aws_lambda_events::event::dynamodb::Event;
use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use medialake_core::config::{DlqConfig, SearchConfig, SyncConfig};
use medialake_core::dlq::SqsDeadLetterQueue;
use medialake_core::logging::init_logging;
use medialake_core::stream::StreamProcessor;
use medialake_core::{IndexSynchronizer, OpenSearchIndex};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

async fn handler(processor: &StreamProcessor, event: LambdaEvent<Event>) -> Result<Value, LambdaError> {
    let records = event.payload.records;
    info!(
        request_id = %event.context.request_id,
        count = records.len(),
        "Processing DynamoDB stream records"
    );

    match processor.process(&records).await {
        Ok(summary) => Ok(json!(summary)),
        Err(e) => {
            // Failing the invocation makes Lambda redeliver the batch
            error!(error = %e, "Stream batch failed");
            Err(e.into())
        }
    }
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
    let dlq = Arc::new(SqsDeadLetterQueue::new(
        aws_sdk_sqs::Client::new(&sdk_config),
        dlq_config.queue_url,
        dlq_config.retry,
    ));
    let processor = StreamProcessor::new(sync, dlq, search.excluded_fields.clone());

    let processor = &processor;
    run(service_fn(move |event: LambdaEvent<Event>| async move {
        handler(processor, event).await
    }))
    .await
}
