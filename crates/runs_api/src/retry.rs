use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempts per call, counting the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Base delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Ceiling for the un-jittered delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER_FRACTION: f64 = 0.2;

/// Failure classification consumed by [`RetryExecutor`] and the circuit breaker.
pub trait Classify {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;

    /// Minimum wait requested by the upstream, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Whether the failure says something about upstream health.
    fn is_upstream_fault(&self) -> bool {
        self.is_retryable()
    }

    fn is_cancellation(&self) -> bool {
        false
    }
}

/// Exponential backoff with additive jitter.
///
/// The un-jittered delay starts at `initial_delay` and grows by `multiplier`
/// until it reaches `max_delay`. Each wait lies in
/// `[delay, delay * (1 + jitter_fraction))`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_INITIAL_DELAY,
            DEFAULT_MAX_DELAY,
            DEFAULT_MULTIPLIER,
            DEFAULT_JITTER_FRACTION,
        )
    }
}

impl RetryPolicy {
    /// Builds a policy, clamping out-of-range values into their valid ranges.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_fraction: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            multiplier: normalize_multiplier(multiplier),
            jitter_fraction: normalize_jitter(jitter_fraction),
        }
    }

    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = normalize_multiplier(multiplier);
        self
    }

    pub fn with_jitter_fraction(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = normalize_jitter(jitter_fraction);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    /// Un-jittered delay before the first retry.
    pub fn first_delay(&self) -> Duration {
        self.initial_delay.min(self.max_delay)
    }

    /// Un-jittered delay following `current`, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.multiplier;
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Un-jittered delay before retry number `retry` (0-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let mut delay = self.first_delay();
        for _ in 0..retry {
            let next = self.next_delay(delay);
            if next == delay {
                break;
            }
            delay = next;
        }
        delay
    }

    /// Applies jitter; `unit` is a sample from `[0, 1)`.
    pub fn jittered(&self, delay: Duration, unit: f64) -> Duration {
        let unit = if unit.is_finite() {
            unit.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let extra = Duration::try_from_secs_f64(delay.as_secs_f64() * self.jitter_fraction * unit)
            .unwrap_or(Duration::MAX);
        delay.saturating_add(extra)
    }
}

fn normalize_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    }
}

fn normalize_jitter(jitter_fraction: f64) -> f64 {
    if jitter_fraction.is_finite() && jitter_fraction > 0.0 {
        jitter_fraction.min(0.99)
    } else {
        0.0
    }
}

/// Terminal outcome of a failed [`RetryExecutor::execute`] call.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("permanent error: {0}")]
    Permanent(E),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("retry aborted by cancellation")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// Returns the underlying operation error, if one was observed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Permanent(error) | Self::Exhausted { last: error, .. } => Some(error),
            Self::Cancelled => None,
        }
    }
}

/// Runs a fallible async operation under a [`RetryPolicy`].
///
/// Holds no mutable state, so one executor can serve concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invokes `operation` until it succeeds, fails permanently, runs out of
    /// attempts, or `cancel` fires. Cancellation interrupts both in-flight
    /// attempts and backoff sleeps.
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let max_attempts = self.policy.max_attempts();
        let mut delay = self.policy.first_delay();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = operation() => outcome,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if error.is_cancellation() {
                return Err(RetryError::Cancelled);
            }
            if !error.is_retryable() {
                debug!(attempt, error = %error, "permanent failure; not retrying");
                return Err(RetryError::Permanent(error));
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %error, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let mut wait = self.policy.jittered(delay, rand::rng().random::<f64>());
            if let Some(hint) = error.retry_after() {
                wait = wait.max(hint);
            }
            debug!(
                attempt,
                max_attempts,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "transient failure; retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            delay = self.policy.next_delay(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
        #[error("throttled")]
        Throttled(Duration),
    }

    impl Classify for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, Self::Fatal)
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                Self::Throttled(hint) => Some(*hint),
                _ => None,
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(10),
            2.0,
            0.1,
        )
    }

    #[test]
    fn policy_normalizes_out_of_range_values() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, 0.5, 1.5);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.multiplier(), 1.0);
        assert!(policy.jitter_fraction() < 1.0);

        let negative = RetryPolicy::default().with_jitter_fraction(-0.3);
        assert_eq!(negative.jitter_fraction(), 0.0);
    }

    #[test]
    fn delays_grow_monotonically_up_to_cap() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_secs(1),
            Duration::from_secs(30),
            2.0,
            0.2,
        );
        let delays: Vec<_> = (0..7).map(|retry| policy.delay_for_retry(retry)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(30),
                Duration::from_secs(30),
            ]
        );
    }

    #[test]
    fn initial_delay_above_cap_is_capped() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_secs(60))
            .with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.first_delay(), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default().with_jitter_fraction(0.2);
        let delay = Duration::from_millis(1000);
        assert_eq!(policy.jittered(delay, 0.0), delay);
        let upper = policy.jittered(delay, 0.999_999);
        assert!(upper >= delay);
        assert!(upper < Duration::from_millis(1200));
        assert_eq!(policy.jittered(delay, f64::NAN), delay);
    }

    #[test]
    fn jitter_saturates_near_duration_max() {
        let policy = RetryPolicy::default()
            .with_max_delay(Duration::MAX)
            .with_jitter_fraction(0.5);
        assert_eq!(policy.jittered(Duration::MAX, 0.9), Duration::MAX);

        let near_max = Duration::MAX - Duration::from_secs(1);
        assert_eq!(policy.jittered(near_max, 0.5), Duration::MAX);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures_with_exact_invocations() {
        for failures in 0..3u32 {
            let calls = Arc::new(AtomicU32::new(0));
            let executor = RetryExecutor::new(fast_policy(3));
            let cancel = CancellationToken::new();

            let result = executor
                .execute(
                    || {
                        let calls = Arc::clone(&calls);
                        async move {
                            let seen = calls.fetch_add(1, Ordering::SeqCst);
                            if seen < failures {
                                Err(TestError::Transient)
                            } else {
                                Ok(seen)
                            }
                        }
                    },
                    &cancel,
                )
                .await;

            assert_eq!(result.ok(), Some(failures));
            assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
        }
    }

    #[tokio::test]
    async fn always_failing_operation_stops_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(4));
        let cancel = CancellationToken::new();

        let result: Result<(), _> = executor
            .execute(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(TestError::Transient)
                    }
                },
                &cancel,
            )
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted {
                attempts: 4,
                last: TestError::Transient
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_error_returns_after_one_invocation() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(5));
        let cancel = CancellationToken::new();

        let result: Result<(), _> = executor
            .execute(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(TestError::Fatal)
                    }
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Permanent(TestError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(
            5,
            Duration::from_secs(60),
            Duration::from_secs(60),
            2.0,
            0.0,
        );
        let executor = RetryExecutor::new(policy);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                cancel.cancel();
            })
        };

        let started = tokio::time::Instant::now();
        let result: Result<(), _> = executor
            .execute(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(TestError::Transient)
                    }
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(60));
        canceller.await.expect("canceller task");
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = executor
            .execute(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), TestError>(())
                    }
                },
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_extends_wait() {
        let executor = RetryExecutor::new(fast_policy(2));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let started = tokio::time::Instant::now();
        let result = executor
            .execute(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(TestError::Throttled(Duration::from_secs(3)))
                        } else {
                            Ok("done")
                        }
                    }
                },
                &cancel,
            )
            .await;

        assert_eq!(result.ok(), Some("done"));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
