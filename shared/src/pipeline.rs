//! Pipeline trigger admission control
//!
//! Pipelines are Step Functions state machines. Before starting an execution
//! the controller checks how many executions are already running against a
//! ceiling. The running count is cached for a short TTL so a burst of
//! trigger messages does not page through `ListExecutions` for every start,
//! and consecutive starts from one container are spaced by a ramp-up delay.

use async_trait::async_trait;
use aws_sdk_sfn::types::ExecutionStatus as SfnExecutionStatus;
use aws_sdk_sfn::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::errors::{Error, Result};
use crate::models::PipelineTriggerRequest;

/// Step Functions limit on execution name length
pub const MAX_EXECUTION_NAME_LEN: usize = 80;

/// Largest page ListExecutions returns
const LIST_PAGE_SIZE: usize = 1000;

/// Result of a start call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartResult {
    Started { execution_arn: String },
    /// An execution with this name exists (redelivered message)
    AlreadyExists,
}

/// Decision of the admission controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Started { execution_name: String, execution_arn: String },
    AlreadyStarted { execution_name: String },
    Throttled { running: usize },
}

/// Trigger message as read off the queue
#[derive(Debug, Clone)]
pub struct TriggerMessage {
    pub message_id: String,
    pub body: String,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Running executions, counted up to `limit`
    async fn count_running(&self, limit: usize) -> Result<usize>;

    async fn start(&self, name: &str, input: &str) -> Result<StartResult>;
}

/// Execution name derived from the trigger message
///
/// SQS redelivers a message with the same ID, so the derived name makes a
/// second start of the same message fail with `ExecutionAlreadyExists`.
/// Only the pipeline prefix is shortened to fit the length limit; the
/// message ID is what keeps names of different messages apart.
pub fn execution_name(pipeline: &str, message_id: &str) -> String {
    let id = sanitize_name(message_id);
    if id.len() >= MAX_EXECUTION_NAME_LEN {
        return id[id.len() - MAX_EXECUTION_NAME_LEN..].to_string();
    }

    let prefix: String = sanitize_name(pipeline)
        .chars()
        .take(MAX_EXECUTION_NAME_LEN - 1 - id.len())
        .collect();
    format!("{}-{}", prefix, id)
}

fn sanitize_name(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub struct SfnBackend {
    client: Client,
    state_machine_arn: String,
}

impl SfnBackend {
    pub fn new(client: Client, state_machine_arn: impl Into<String>) -> Self {
        Self {
            client,
            state_machine_arn: state_machine_arn.into(),
        }
    }
}

#[async_trait]
impl ExecutionBackend for SfnBackend {
    async fn count_running(&self, limit: usize) -> Result<usize> {
        let mut count = 0;
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_executions()
                .state_machine_arn(&self.state_machine_arn)
                .status_filter(SfnExecutionStatus::Running)
                .max_results(limit.clamp(1, LIST_PAGE_SIZE) as i32)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| Error::Workflow(format!("ListExecutions: {}", e)))?;

            count += output.executions().len();
            next_token = output.next_token().map(|t| t.to_string());
            if count >= limit || next_token.is_none() {
                break;
            }
        }

        Ok(count)
    }

    async fn start(&self, name: &str, input: &str) -> Result<StartResult> {
        let result = self
            .client
            .start_execution()
            .state_machine_arn(&self.state_machine_arn)
            .name(name)
            .input(input)
            .send()
            .await;

        match result {
            Ok(output) => Ok(StartResult::Started {
                execution_arn: output.execution_arn().to_string(),
            }),
            Err(e) => {
                let exists = e
                    .as_service_error()
                    .map(|se| se.is_execution_already_exists())
                    .unwrap_or(false);
                if exists {
                    Ok(StartResult::AlreadyExists)
                } else {
                    Err(Error::Workflow(format!("StartExecution: {}", e)))
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct AdmissionState {
    running: usize,
    refreshed_at: Option<Instant>,
    last_start: Option<Instant>,
}

pub struct AdmissionController {
    backend: Arc<dyn ExecutionBackend>,
    max_concurrent: usize,
    cache_ttl: Duration,
    ramp_up_delay: Duration,
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(backend: Arc<dyn ExecutionBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            max_concurrent: config.max_concurrent,
            cache_ttl: config.cache_ttl,
            ramp_up_delay: config.ramp_up_delay,
            state: Mutex::new(AdmissionState::default()),
        }
    }

    /// Start an execution unless the pipeline is at its ceiling
    pub async fn try_start(&self, execution_name: &str, input: &Value) -> Result<Admission> {
        let mut state = self.state.lock().await;

        let stale = state
            .refreshed_at
            .map(|at| at.elapsed() >= self.cache_ttl)
            .unwrap_or(true);
        if stale {
            state.running = self.backend.count_running(self.max_concurrent).await?;
            state.refreshed_at = Some(Instant::now());
            debug!(running = state.running, "Refreshed running execution count");
        }

        if state.running >= self.max_concurrent {
            warn!(
                running = state.running,
                max_concurrent = self.max_concurrent,
                "Pipeline at capacity, throttling"
            );
            return Ok(Admission::Throttled { running: state.running });
        }

        if let Some(last) = state.last_start {
            let elapsed = last.elapsed();
            if elapsed < self.ramp_up_delay {
                tokio::time::sleep(self.ramp_up_delay - elapsed).await;
            }
        }

        let input = serde_json::to_string(input)?;
        let result = self.backend.start(execution_name, &input).await?;
        state.last_start = Some(Instant::now());

        match result {
            StartResult::Started { execution_arn } => {
                state.running += 1;
                info!(execution_arn = %execution_arn, running = state.running, "Execution started");
                Ok(Admission::Started {
                    execution_name: execution_name.to_string(),
                    execution_arn,
                })
            }
            StartResult::AlreadyExists => {
                info!(execution_name = %execution_name, "Execution already started");
                Ok(Admission::AlreadyStarted {
                    execution_name: execution_name.to_string(),
                })
            }
        }
    }

    /// Admit a batch of trigger messages in order
    ///
    /// Returns the IDs of messages to leave on the queue. Once the pipeline
    /// is throttled every remaining message is returned without further
    /// start attempts. Malformed messages are dropped.
    pub async fn admit_batch(&self, default_pipeline: &str, messages: &[TriggerMessage]) -> Vec<String> {
        let mut retry = Vec::new();

        for (position, message) in messages.iter().enumerate() {
            let request: PipelineTriggerRequest = match serde_json::from_str(&message.body) {
                Ok(request) => request,
                Err(e) => {
                    warn!(message_id = %message.message_id, error = %e, "Dropping malformed trigger message");
                    continue;
                }
            };

            let pipeline = request.pipeline_name.as_deref().unwrap_or(default_pipeline);
            let name = execution_name(pipeline, &message.message_id);

            match self.try_start(&name, &request.input).await {
                Ok(Admission::Started { .. }) | Ok(Admission::AlreadyStarted { .. }) => {}
                Ok(Admission::Throttled { running }) => {
                    let remaining = &messages[position..];
                    info!(running = running, deferred = remaining.len(), "Deferring trigger messages");
                    retry.extend(remaining.iter().map(|m| m.message_id.clone()));
                    break;
                }
                Err(e) => {
                    warn!(message_id = %message.message_id, error = %e, "Failed to start execution");
                    retry.push(message.message_id.clone());
                }
            }
        }

        retry
    }
}
