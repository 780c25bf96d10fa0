//! MediaLake Pipeline Trigger Lambda
//!
//! Consumes the pipeline trigger queue and starts Step Functions executions
//! while the pipeline is below its concurrency ceiling. Deferred messages
//! are reported as batch item failures so SQS redelivers them later.

use aws_config::BehaviorVersion;
use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent};
use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use medialake_core::config::PipelineConfig;
use medialake_core::logging::init_logging;
use medialake_core::pipeline::{AdmissionController, SfnBackend, TriggerMessage};
use std::sync::Arc;
use tracing::{info, warn};

struct State {
    controller: AdmissionController,
    pipeline_name: String,
}

async fn handler(state: &State, event: LambdaEvent<SqsEvent>) -> Result<SqsBatchResponse, LambdaError> {
    let mut messages = Vec::with_capacity(event.payload.records.len());
    for record in event.payload.records {
        let Some(message_id) = record.message_id else {
            warn!("Dropping trigger message without a message ID");
            continue;
        };
        messages.push(TriggerMessage {
            message_id,
            body: record.body.unwrap_or_default(),
        });
    }

    info!(
        request_id = %event.context.request_id,
        count = messages.len(),
        "Processing pipeline trigger messages"
    );

    let retry = state.controller.admit_batch(&state.pipeline_name, &messages).await;

    Ok(SqsBatchResponse {
        batch_item_failures: retry
            .into_iter()
            .map(|item_identifier| BatchItemFailure { item_identifier })
            .collect(),
    })
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    init_logging();

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let config = PipelineConfig::from_env()?;

    let backend = Arc::new(SfnBackend::new(
        aws_sdk_sfn::Client::new(&sdk_config),
        config.state_machine_arn.clone(),
    ));
    let state = State {
        controller: AdmissionController::new(backend, &config),
        pipeline_name: config.pipeline_name.clone(),
    };

    let state = &state;
    run(service_fn(move |event: LambdaEvent<SqsEvent>| async move {
        handler(state, event).await
    }))
    .await
}
