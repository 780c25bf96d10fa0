//! Circuit breaker for calls to the search cluster
//!
//! - **Closed**: requests flow through
//! - **Open**: after `failure_threshold` consecutive failures, requests fail fast
//! - **Half-Open**: after `reset_timeout`, a single probe request is let through
//!
//! State lives in atomics so one breaker can be shared by every invocation a
//! warm Lambda container serves.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u32> for CircuitState {
    fn from(value: u32) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

pub struct CircuitBreaker {
    name: &'static str,
    state: AtomicU32,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name,
            state: AtomicU32::new(CircuitState::Closed as u32),
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Whether the caller may send a request now
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let opened = self.opened_at_ms.load(Ordering::Acquire);
                let elapsed = Self::now_ms().saturating_sub(opened);
                if elapsed < self.reset_timeout.as_millis() as u64 {
                    return false;
                }
                // Only the caller that wins the transition becomes the probe.
                self.state
                    .compare_exchange(
                        CircuitState::Open as u32,
                        CircuitState::HalfOpen as u32,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        let previous = self.state.swap(CircuitState::Closed as u32, Ordering::AcqRel);
        if previous != CircuitState::Closed as u32 {
            info!(circuit = self.name, "Circuit closed");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let state = self.state();

        if state == CircuitState::HalfOpen || failures >= self.failure_threshold {
            self.opened_at_ms.store(Self::now_ms(), Ordering::Release);
            let previous = self.state.swap(CircuitState::Open as u32, Ordering::AcqRel);
            if previous != CircuitState::Open as u32 {
                warn!(
                    circuit = self.name,
                    consecutive_failures = failures,
                    "Circuit opened"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_secs(30));
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let cb = CircuitBreaker::new("test", 1, Duration::ZERO);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_probe_success_closes() {
        let cb = CircuitBreaker::new("test", 1, Duration::ZERO);
        cb.record_failure();
        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let cb = CircuitBreaker::new("test", 5, Duration::from_secs(60));
        for _ in 0..5 {
            cb.record_failure();
        }
        // Force the half-open state as if the timeout had elapsed
        cb.state.store(CircuitState::HalfOpen as u32, Ordering::Release);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }
}
