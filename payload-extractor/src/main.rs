//! MediaLake Payload Extractor Lambda
//!
//! Step Functions task that moves large values in and out of S3:
//! - `externalize` - replace a large value by an S3 reference
//! - `resolve` - load the value behind a reference
//! - `extract_item` - pick one element of a (referenced) array
//! - `write_items` - write an array for a Distributed Map item reader

use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use medialake_core::config::PayloadConfig;
use medialake_core::logging::init_logging;
use medialake_core::payload::{PayloadStore, PayloadTask};
use medialake_core::S3Storage;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

async fn handler(store: &PayloadStore, event: LambdaEvent<PayloadTask>) -> Result<Value, LambdaError> {
    info!(
        request_id = %event.context.request_id,
        operation = event.payload.operation(),
        "Processing payload task"
    );

    store.execute(event.payload).await.map_err(|e| {
        error!(error = %e, code = e.code(), "Payload task failed");
        e.into()
    })
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    init_logging();

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let config = PayloadConfig::from_env()?;
    let store = PayloadStore::new(Arc::new(S3Storage::new(aws_sdk_s3::Client::new(&sdk_config))), &config);

    let store = &store;
    run(service_fn(move |event: LambdaEvent<PayloadTask>| async move {
        handler(store, event).await
    }))
    .await
}
