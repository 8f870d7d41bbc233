use crate::circuit_breaker::{CircuitBreaker, RetryPolicy};
use crate::clock::{Clock, SystemClock};
use crate::error::ResilienceError;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Circuit breaker wrapped around a retry policy
///
/// The breaker decides whether a retry sequence runs at all. The whole
/// sequence reports a single outcome to the breaker, so a dependency that
/// fails every attempt costs one breaker failure per `execute` call rather
/// than one per attempt.
pub struct PolicyExecutor<C: Clock = SystemClock> {
    breaker: Arc<CircuitBreaker<C>>,
    retry: RetryPolicy,
}

impl<C: Clock> PolicyExecutor<C> {
    pub fn new(breaker: Arc<CircuitBreaker<C>>, retry: RetryPolicy) -> Self {
        Self { breaker, retry }
    }

    /// Execute an operation under both policies, retrying every error
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_with_predicate(op, |_| true).await
    }

    /// Execute an operation under both policies, retrying only errors accepted by `should_retry`
    pub async fn execute_with_predicate<F, Fut, T, E, P>(
        &self,
        op: F,
        should_retry: P,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let Some(permit) = self.breaker.try_acquire() else {
            debug!(breaker = %self.breaker.name(), "Skipping call, circuit is open");
            return Err(self.breaker.open_error());
        };

        let result = self.retry.execute_with_predicate(op, should_retry).await;

        match &result {
            Ok(_) => permit.record_success(),
            Err(e) => permit.record_failure(e),
        }
        result
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker<C>> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl<C: Clock> Clone for PolicyExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            breaker: self.breaker.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<C: Clock> fmt::Debug for PolicyExecutor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyExecutor")
            .field("breaker", &self.breaker.name())
            .field("state", &self.breaker.state())
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{BreakerHooks, CircuitBreakerConfig, CircuitState, RetryConfig};
    use crate::clock::MockClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn executor(clock: &MockClock) -> PolicyExecutor<MockClock> {
        let breaker = CircuitBreaker::with_clock(
            "upstream",
            CircuitBreakerConfig {
                failure_threshold: 3,
                break_duration_ms: 5000,
            },
            clock.clone(),
        );
        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: None,
        });
        PolicyExecutor::new(Arc::new(breaker), retry)
    }

    async fn always_fail(
        executor: &PolicyExecutor<MockClock>,
        calls: &AtomicU32,
    ) -> ResilienceError<String> {
        executor
            .execute(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("unavailable".to_string())
            })
            .await
            .unwrap_err()
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_count_as_one_breaker_failure() {
        let clock = MockClock::new();
        let executor = executor(&clock);
        let calls = AtomicU32::new(0);

        let err = always_fail(&executor, &calls).await;

        assert!(err.is_retries_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.breaker().consecutive_failures(), 1);
        assert_eq!(executor.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_threshold_top_level_calls() {
        let clock = MockClock::new();
        let executor = executor(&clock);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(always_fail(&executor, &calls).await.is_retries_exhausted());
        }
        assert_eq!(executor.breaker().state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 9);

        // Open breaker skips the retry sequence entirely
        let start = tokio::time::Instant::now();
        assert!(always_fail(&executor, &calls).await.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 9);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry_keeps_breaker_closed() {
        let clock = MockClock::new();
        let executor = executor(&clock);
        let calls = AtomicU32::new(0);

        always_fail(&executor, &calls).await;
        assert_eq!(executor.breaker().consecutive_failures(), 1);

        let calls_ref = &calls;
        let value = executor
            .execute(|| async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                    Err("transient".to_string())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(executor.breaker().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_runs_full_retry_sequence() {
        let clock = MockClock::new();
        let executor = executor(&clock);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            always_fail(&executor, &calls).await;
        }
        clock.advance(Duration::from_secs(5));

        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let result = executor
            .execute(|| async move {
                if attempts_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("warming up".to_string())
                } else {
                    Ok("recovered")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(executor.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_still_counts_against_breaker() {
        let clock = MockClock::new();
        let executor = executor(&clock);
        let calls = AtomicU32::new(0);

        let calls_ref = &calls;
        let err = executor
            .execute_with_predicate(
                || async move {
                    calls_ref.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("bad request")
                },
                |_| false,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Operation("bad request")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.breaker().consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_break_sees_exhausted_error() {
        let clock = MockClock::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let breaker = CircuitBreaker::with_clock(
            "upstream",
            CircuitBreakerConfig {
                failure_threshold: 1,
                break_duration_ms: 5000,
            },
            clock.clone(),
        )
        .with_hooks(BreakerHooks::new().on_break(move |_, error, _| {
            seen_clone.lock().unwrap().push(error.to_string());
        }));
        let executor = PolicyExecutor::new(
            Arc::new(breaker),
            RetryPolicy::new(RetryConfig {
                max_attempts: 2,
                ..Default::default()
            }),
        );

        let _ = executor
            .execute(|| async { Err::<(), _>("refused") })
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["retries exhausted after 2 attempts: refused".to_string()]
        );
    }
}
