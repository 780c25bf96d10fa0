//! Index synchronizer: applies index actions through bulk requests
//!
//! Actions are coalesced per inventory ID, planned into bounded batches and
//! sent through the circuit breaker. Retryable item failures are retried with
//! backoff; everything still failing is returned to the caller, which routes
//! it to the dead-letter queue.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backoff::RetryPolicy;
use crate::batching::{coalesce, plan_batches, BatchLimits};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::SyncConfig;
use crate::models::IndexAction;
use crate::search::{ItemOutcome, SearchIndex};

/// Action that could not be applied
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAction {
    pub action: IndexAction,
    pub error: String,
}

/// Outcome of applying a set of actions
#[derive(Debug, Default)]
pub struct SyncReport {
    pub succeeded: Vec<IndexAction>,
    /// Actions skipped because a newer version is already indexed
    pub superseded: Vec<IndexAction>,
    pub failed: Vec<FailedAction>,
}

impl SyncReport {
    /// Error per failed inventory ID
    pub fn failures_by_id(&self) -> HashMap<&str, &str> {
        self.failed
            .iter()
            .map(|f| (f.action.inventory_id.as_str(), f.error.as_str()))
            .collect()
    }

    fn fail_all(&mut self, actions: Vec<IndexAction>, error: &str) {
        self.failed.extend(actions.into_iter().map(|action| FailedAction {
            action,
            error: error.to_string(),
        }));
    }
}

pub struct IndexSynchronizer {
    index: Arc<dyn SearchIndex>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    limits: BatchLimits,
}

impl IndexSynchronizer {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        limits: BatchLimits,
    ) -> Self {
        Self {
            index,
            breaker,
            retry,
            limits,
        }
    }

    /// Synchronizer with its own circuit breaker
    pub fn from_config(index: Arc<dyn SearchIndex>, config: &SyncConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            "opensearch",
            config.failure_threshold,
            config.reset_timeout,
        ));
        Self::new(index, breaker, config.retry, config.limits)
    }

    /// Apply actions, returning what succeeded and what must be retried later
    pub async fn apply(&self, actions: Vec<IndexAction>) -> SyncReport {
        let mut report = SyncReport::default();
        let actions = coalesce(actions);

        for batch in plan_batches(actions, &self.limits) {
            self.apply_batch(batch, &mut report).await;
        }

        report
    }

    async fn apply_batch(&self, batch: Vec<IndexAction>, report: &mut SyncReport) {
        let mut pending = batch;
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.allow_request() {
                warn!(actions = pending.len(), "Circuit open, skipping bulk request");
                report.fail_all(pending, "circuit open");
                return;
            }

            let result = self.index.bulk(&pending).await;
            let last_error = match result {
                Err(e) => {
                    self.breaker.record_failure();
                    warn!(attempt = attempt, error = %e, "Bulk request failed");
                    if attempt >= self.retry.max_retries {
                        report.fail_all(pending, &e.to_string());
                        return;
                    }
                    e.to_string()
                }
                Ok(outcomes) => {
                    self.breaker.record_success();
                    let mut retry_next = Vec::new();
                    let mut last_reason = String::new();

                    let mut outcomes = outcomes.into_iter();
                    for action in pending {
                        let outcome = outcomes.next().unwrap_or_else(ItemOutcome::missing);
                        match outcome {
                            ItemOutcome::Succeeded => report.succeeded.push(action),
                            ItemOutcome::Superseded => {
                                debug!(inventory_id = %action.inventory_id, "Newer version already indexed");
                                report.superseded.push(action);
                            }
                            ItemOutcome::Failed {
                                status,
                                reason,
                                retryable: true,
                            } if attempt < self.retry.max_retries => {
                                last_reason = format!("{}: {}", status, reason);
                                retry_next.push(action);
                            }
                            ItemOutcome::Failed { status, reason, .. } => {
                                warn!(
                                    inventory_id = %action.inventory_id,
                                    status = status,
                                    reason = %reason,
                                    "Index action failed"
                                );
                                report.failed.push(FailedAction {
                                    action,
                                    error: format!("{}: {}", status, reason),
                                });
                            }
                        }
                    }

                    if retry_next.is_empty() {
                        return;
                    }
                    pending = retry_next;
                    last_reason
                }
            };

            let delay = self.retry.delay(attempt);
            debug!(
                attempt = attempt,
                actions = pending.len(),
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Retrying bulk actions"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::{Error, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted search index: each bulk call pops the next response
    #[derive(Default)]
    pub(crate) struct ScriptedIndex {
        pub responses: Mutex<Vec<Result<Vec<ItemOutcome>>>>,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedIndex {
        pub fn with(responses: Vec<Result<Vec<ItemOutcome>>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SearchIndex for ScriptedIndex {
        async fn bulk(&self, actions: &[IndexAction]) -> Result<Vec<ItemOutcome>> {
            self.calls
                .lock()
                .unwrap()
                .push(actions.iter().map(|a| a.inventory_id.clone()).collect());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(vec![ItemOutcome::Succeeded; actions.len()]))
        }

        async fn delete_by_inventory_id(&self, _inventory_id: &str) -> Result<u64> {
            Ok(1)
        }
    }

    fn synchronizer(index: Arc<ScriptedIndex>, breaker: Arc<CircuitBreaker>) -> IndexSynchronizer {
        IndexSynchronizer::new(index, breaker, RetryPolicy::immediate(2), BatchLimits::default())
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new("test", 3, Duration::from_secs(60)))
    }

    fn busy() -> ItemOutcome {
        ItemOutcome::Failed {
            status: 429,
            reason: "too many requests".into(),
            retryable: true,
        }
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let index = Arc::new(ScriptedIndex::default());
        let sync = synchronizer(index.clone(), breaker());

        let report = sync
            .apply(vec![
                IndexAction::upsert("a", 1, json!({})),
                IndexAction::delete("b", 1),
            ])
            .await;

        assert_eq!(report.succeeded.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(index.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_only_retryable_items() {
        let index = Arc::new(ScriptedIndex::with(vec![
            Ok(vec![ItemOutcome::Succeeded, busy()]),
            Ok(vec![ItemOutcome::Succeeded]),
        ]));
        let sync = synchronizer(index.clone(), breaker());

        let report = sync
            .apply(vec![
                IndexAction::upsert("a", 1, json!({})),
                IndexAction::upsert("b", 1, json!({})),
            ])
            .await;

        assert_eq!(report.succeeded.len(), 2);
        let calls = index.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec!["a".to_string(), "b".to_string()], vec!["b".to_string()]]);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let index = Arc::new(ScriptedIndex::with(vec![Ok(vec![ItemOutcome::Failed {
            status: 400,
            reason: "mapper_parsing_exception".into(),
            retryable: false,
        }])]));
        let sync = synchronizer(index.clone(), breaker());

        let report = sync.apply(vec![IndexAction::upsert("a", 1, json!({}))]).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].error, "400: mapper_parsing_exception");
        assert_eq!(index.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_reports_failure() {
        let index = Arc::new(ScriptedIndex::with(vec![
            Ok(vec![busy()]),
            Ok(vec![busy()]),
            Ok(vec![busy()]),
        ]));
        let sync = synchronizer(index.clone(), breaker());

        let report = sync.apply(vec![IndexAction::delete("a", 1)]).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failures_by_id().get("a"), Some(&"429: too many requests"));
        assert_eq!(index.call_count(), 3);
    }

    #[tokio::test]
    async fn test_request_errors_open_circuit() {
        let index = Arc::new(ScriptedIndex::with(vec![
            Err(Error::Search("connection refused".into())),
            Err(Error::Search("connection refused".into())),
            Err(Error::Search("connection refused".into())),
        ]));
        let cb = breaker();
        let sync = synchronizer(index.clone(), cb.clone());

        let report = sync.apply(vec![IndexAction::delete("a", 1)]).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(cb.state(), crate::circuit_breaker::CircuitState::Open);

        // While open, no request reaches the cluster
        let report = sync.apply(vec![IndexAction::delete("b", 1)]).await;
        assert_eq!(report.failed[0].error, "circuit open");
        assert_eq!(index.call_count(), 3);
    }

    #[tokio::test]
    async fn test_superseded_reported_separately() {
        let index = Arc::new(ScriptedIndex::with(vec![Ok(vec![ItemOutcome::Superseded])]));
        let sync = synchronizer(index, breaker());

        let report = sync.apply(vec![IndexAction::upsert("a", 1, json!({}))]).await;
        assert!(report.succeeded.is_empty());
        assert_eq!(report.superseded.len(), 1);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_coalesced_before_sending() {
        let index = Arc::new(ScriptedIndex::default());
        let sync = synchronizer(index.clone(), breaker());

        sync.apply(vec![
            IndexAction::upsert("a", 1, json!({})),
            IndexAction::upsert("a", 2, json!({})),
        ])
        .await;

        assert_eq!(index.calls.lock().unwrap()[0], vec!["a".to_string()]);
    }
}
