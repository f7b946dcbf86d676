//! Circuit breaker guarding calls to the runs service.
//!
//! # State machine
//!
//! ```text
//! Closed   --[failure_threshold consecutive failures]--> Open
//! Open     --[call after reset_timeout]---------------> HalfOpen
//! HalfOpen --[half_open_success_threshold successes]--> Closed
//! HalfOpen --[any failure]---------------------------> Open
//! ```
//!
//! Successes while Closed decay the failure counter by one instead of
//! clearing it, so an upstream that fails most calls still trips.
//!
//! All state sits behind one mutex that is never held across an await, so a
//! single breaker can be shared between concurrent submissions and polls.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::retry::Classify;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HALF_OPEN_SUCCESS_THRESHOLD: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit (default: 5).
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed (default: 30s).
    pub reset_timeout: Duration,
    /// Trial successes needed to close again (default: 1).
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            half_open_success_threshold: DEFAULT_HALF_OPEN_SUCCESS_THRESHOLD,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    pub fn with_half_open_success_threshold(mut self, threshold: u32) -> Self {
        self.half_open_success_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Rejection produced locally while the circuit is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpen;

impl From<CircuitOpen> for crate::error::RunsApiError {
    fn from(_: CircuitOpen) -> Self {
        Self::CircuitOpen
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_successes: u32,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            half_open_successes: 0,
        }
    }

    fn reset_elapsed(&self, reset_timeout: Duration, now: Instant) -> bool {
        match self.last_failure {
            Some(at) => now.saturating_duration_since(at) >= reset_timeout,
            None => true,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            half_open_success_threshold: config.half_open_success_threshold.max(1),
            ..config
        };
        Self {
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Observed state. An open circuit whose reset timeout has elapsed reads
    /// as half-open; nothing is mutated.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock_inner();
        match inner.state {
            CircuitState::Open if inner.reset_elapsed(self.config.reset_timeout, Instant::now()) => {
                CircuitState::HalfOpen
            }
            state => state,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }

    /// Forces the circuit closed with cleared counters.
    pub fn reset(&self) {
        *self.lock_inner() = BreakerInner::new();
        info!("circuit breaker reset");
    }

    /// Runs `operation` unless the circuit is open.
    ///
    /// Upstream faults count as failures; cancellations leave the state
    /// untouched; every other outcome counts as a success because the
    /// upstream answered.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + From<CircuitOpen>,
    {
        self.try_acquire().map_err(E::from)?;

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(error) if error.is_cancellation() => {}
            Err(error) if error.is_upstream_fault() => self.record_failure(),
            Err(_) => self.record_success(),
        }
        result
    }

    fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.lock_inner();
        if inner.state != CircuitState::Open {
            return Ok(());
        }
        if inner.reset_elapsed(self.config.reset_timeout, Instant::now()) {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            info!("circuit breaker half-open; allowing trial call");
            return Ok(());
        }
        debug!("circuit breaker open; rejecting call");
        Err(CircuitOpen)
    }

    fn record_success(&self) {
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    *inner = BreakerInner::new();
                    info!("circuit breaker closed after successful trial");
                }
            }
            // A call admitted before the circuit opened; it does not close it.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock_inner();
        inner.last_failure = Some(now);
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        failures = inner.consecutive_failures,
                        reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
                warn!("circuit breaker trial call failed; reopening");
            }
            CircuitState::Open => {}
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
