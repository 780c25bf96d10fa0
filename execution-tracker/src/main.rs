//! MediaLake Execution Tracker Lambda
//!
//! Triggered by EventBridge "Step Functions Execution Status Change" events.
//! Writes one record per pipeline execution with its latest status.

use aws_config::BehaviorVersion;
use aws_lambda_events::event::cloudwatch_events::CloudWatchEvent;
use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use medialake_core::execution::{ExecutionStatusDetail, ExecutionTracker};
use medialake_core::logging::init_logging;
use medialake_core::{DynamoClient, ExecutionRecord};
use std::sync::Arc;
use tracing::info;

async fn handler(
    tracker: &ExecutionTracker,
    event: LambdaEvent<CloudWatchEvent<ExecutionStatusDetail>>,
) -> Result<ExecutionRecord, LambdaError> {
    let detail = event
        .payload
        .detail
        .ok_or("Status change event without detail")?;

    info!(
        request_id = %event.context.request_id,
        execution_arn = %detail.execution_arn,
        status = detail.status.as_str(),
        "Processing execution status change"
    );

    Ok(tracker.record(&detail).await?)
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    init_logging();

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let store = Arc::new(DynamoClient::new(aws_sdk_dynamodb::Client::new(&sdk_config)));
    let tracker = ExecutionTracker::new(store);

    let tracker = &tracker;
    run(service_fn(
        move |event: LambdaEvent<CloudWatchEvent<ExecutionStatusDetail>>| async move {
            handler(tracker, event).await
        },
    ))
    .await
}
