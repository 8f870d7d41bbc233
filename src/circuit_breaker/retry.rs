use super::types::RetryConfig;
use crate::error::ResilienceError;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;
type RetryHook = Arc<dyn Fn(&dyn Display, Duration) + Send + Sync>;

/// Retry policy with exponential backoff
///
/// `max_attempts` counts every invocation, the first one included. The
/// wait before retry `n` (starting at 0) is `base_delay * 2^n`, capped at
/// `max_delay` when one is configured, unless a custom backoff function is
/// installed.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    backoff_fn: Option<BackoffFn>,
    on_retry: Option<RetryHook>,
}

/// Wait schedule of a single `execute` call
pub struct Delays {
    schedule: Schedule,
    attempt: u32,
    remaining: u32,
}

enum Schedule {
    Exponential(ExponentialBackoff),
    Custom(BackoffFn),
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let wait = match &mut self.schedule {
            Schedule::Exponential(backoff) => backoff.next_backoff()?,
            Schedule::Custom(f) => f(self.attempt),
        };
        self.attempt += 1;
        Some(wait)
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            backoff_fn: None,
            on_retry: None,
        }
    }

    /// Replace the exponential schedule with `f(attempt)`, attempt starting at 0
    pub fn with_backoff<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.backoff_fn = Some(Arc::new(f));
        self
    }

    /// Observe every failure that is about to be retried, with the wait ahead of it
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Display, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Waits between attempts, one fewer than `max_attempts`
    pub fn delays(&self) -> Delays {
        let schedule = match &self.backoff_fn {
            Some(f) => Schedule::Custom(f.clone()),
            None => Schedule::Exponential(self.create_backoff()),
        };

        Delays {
            schedule,
            attempt: 0,
            remaining: self.max_attempts() - 1,
        }
    }

    /// Execute an operation, retrying every error
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_with_predicate(f, |_| true).await
    }

    /// Execute with retries, but only if error matches predicate
    ///
    /// An error rejected by `should_retry` is returned at once as
    /// `ResilienceError::Operation`.
    pub async fn execute_with_predicate<F, Fut, T, E, P>(
        &self,
        mut f: F,
        should_retry: P,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts();
        let mut delays = self.delays();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "Executing operation");

            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !should_retry(&e) {
                        debug!(attempt, error = %e, "Error not retryable");
                        return Err(ResilienceError::Operation(e));
                    }

                    if attempt >= max_attempts {
                        warn!(
                            attempt,
                            max_attempts,
                            error = %e,
                            "Operation failed after max attempts"
                        );
                        return Err(ResilienceError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e,
                        });
                    }

                    let Some(wait) = delays.next() else {
                        warn!(attempt, error = %e, "Backoff exhausted");
                        return Err(ResilienceError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e,
                        });
                    };

                    debug!(
                        attempt,
                        wait_ms = wait.as_millis(),
                        error = %e,
                        "Operation failed, retrying after backoff"
                    );
                    if let Some(hook) = &self.on_retry {
                        hook(&e, wait);
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.base_delay())
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(self.config.max_delay().unwrap_or(Duration::MAX))
            .with_max_elapsed_time(None) // We handle max attempts manually
            .build()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("custom_backoff", &self.backoff_fn.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}
