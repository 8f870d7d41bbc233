use super::types::{BreakerHooks, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::clock::{Clock, SystemClock};
use crate::error::ResilienceError;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker for a single dependency
#[derive(Debug)]
pub struct CircuitBreaker<C: Clock = SystemClock> {
    /// Configuration
    config: CircuitBreakerConfig,
    /// Current state
    state: Mutex<State>,
    /// Dependency identifier
    name: String,
    /// Transition callbacks
    hooks: BreakerHooks,
    /// Time source for the cooldown
    clock: C,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Number of consecutive failures in closed state
    consecutive_failures: u32,
    /// Whether the half-open trial call is in flight
    trial_in_flight: bool,
    /// Time when the circuit was opened
    opened_at: Option<Instant>,
    /// Bumped on every transition; permits from an older generation are stale
    generation: u64,
    /// Metrics
    metrics: CircuitBreakerMetrics,
}

/// Transition that happened under the lock and still needs its hook fired
enum Transition {
    Opened,
    Closed,
}

/// Permission to run one call through the breaker
///
/// Resolve it with [`record_success`](BreakerPermit::record_success) or
/// [`record_failure`](BreakerPermit::record_failure). Dropping an unresolved
/// trial permit frees the half-open slot without counting an outcome.
#[must_use = "a permit must be resolved with record_success or record_failure"]
pub struct BreakerPermit<'a, C: Clock = SystemClock> {
    breaker: &'a CircuitBreaker<C>,
    generation: u64,
    trial: bool,
    resolved: bool,
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker backed by the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with an explicit clock
    ///
    /// A `failure_threshold` of 0 is raised to 1.
    pub fn with_clock(
        name: impl Into<String>,
        mut config: CircuitBreakerConfig,
        clock: C,
    ) -> Self {
        let name = name.into();
        if config.failure_threshold == 0 {
            warn!(breaker = %name, "failure_threshold of 0 raised to 1");
            config.failure_threshold = 1;
        }
        info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            break_duration_ms = config.break_duration_ms,
            "Creating circuit breaker"
        );

        Self {
            config,
            state: Mutex::new(State {
                circuit_state: CircuitState::Closed,
                consecutive_failures: 0,
                trial_in_flight: false,
                opened_at: None,
                generation: 0,
                metrics: CircuitBreakerMetrics::default(),
            }),
            name,
            hooks: BreakerHooks::default(),
            clock,
        }
    }

    /// Attach transition callbacks
    pub fn with_hooks(mut self, hooks: BreakerHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run an operation through the breaker
    ///
    /// Returns `CircuitOpen` without invoking `op` while the circuit is open
    /// or a half-open trial is already in flight.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(self.open_error());
        };

        match op().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(e) => {
                permit.record_failure(&e);
                Err(ResilienceError::Operation(e))
            }
        }
    }

    /// Check if a call can proceed, returning a permit when it can
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_, C>> {
        let now = self.clock.now();
        let mut half_opened = false;

        let acquired = {
            let mut state = self.lock();
            let current = state.circuit_state;
            let opened_at = state.opened_at;

            match current {
                CircuitState::Closed => {
                    state.metrics.total_requests += 1;
                    Some((state.generation, false))
                }
                CircuitState::Open => match opened_at {
                    Some(opened_at)
                        if now.saturating_duration_since(opened_at)
                            >= self.config.break_duration() =>
                    {
                        self.transition_to_half_open(&mut state);
                        state.trial_in_flight = true;
                        state.metrics.total_requests += 1;
                        half_opened = true;
                        Some((state.generation, true))
                    }
                    Some(opened_at) => {
                        state.metrics.rejected_requests += 1;
                        debug!(
                            breaker = %self.name,
                            time_remaining = ?self
                                .config
                                .break_duration()
                                .saturating_sub(now.saturating_duration_since(opened_at)),
                            "Circuit breaker open, rejecting call"
                        );
                        None
                    }
                    None => {
                        state.metrics.rejected_requests += 1;
                        warn!(breaker = %self.name, "Circuit open but no opened_at timestamp");
                        None
                    }
                },
                CircuitState::HalfOpen => {
                    if state.trial_in_flight {
                        state.metrics.rejected_requests += 1;
                        debug!(breaker = %self.name, "Trial call in flight, rejecting");
                        None
                    } else {
                        state.trial_in_flight = true;
                        state.metrics.total_requests += 1;
                        debug!(breaker = %self.name, "Allowing half-open trial call");
                        Some((state.generation, true))
                    }
                }
            }
        };

        if half_opened {
            self.hooks.fire_half_open(&self.name);
        }

        acquired.map(|(generation, trial)| BreakerPermit {
            breaker: self,
            generation,
            trial,
            resolved: false,
        })
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.lock().circuit_state
    }

    /// Get the consecutive failure count of the closed state
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Time the circuit last opened, while it is open
    pub fn opened_at(&self) -> Option<Instant> {
        self.lock().opened_at
    }

    /// Get metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.lock().metrics.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub(crate) fn open_error<E>(&self) -> ResilienceError<E> {
        ResilienceError::CircuitOpen {
            name: self.name.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, generation: u64, trial: bool, outcome: Result<(), &dyn Display>) {
        let now = self.clock.now();

        let transition = {
            let mut state = self.lock();
            match outcome {
                Ok(()) => state.metrics.successful_requests += 1,
                Err(_) => state.metrics.failed_requests += 1,
            }

            if state.generation != generation {
                debug!(
                    breaker = %self.name,
                    state = %state.circuit_state,
                    "Ignoring outcome of a call started before the last transition"
                );
                None
            } else {
                match (state.circuit_state, outcome) {
                    (CircuitState::Closed, Ok(())) => {
                        state.consecutive_failures = 0;
                        None
                    }
                    (CircuitState::Closed, Err(e)) => {
                        state.consecutive_failures += 1;

                        debug!(
                            breaker = %self.name,
                            consecutive_failures = state.consecutive_failures,
                            threshold = self.config.failure_threshold,
                            error = %e,
                            "Call failed in closed state"
                        );

                        if state.consecutive_failures >= self.config.failure_threshold {
                            self.transition_to_open(&mut state, now);
                            Some(Transition::Opened)
                        } else {
                            None
                        }
                    }
                    (CircuitState::HalfOpen, Ok(())) if trial => {
                        self.transition_to_closed(&mut state);
                        Some(Transition::Closed)
                    }
                    (CircuitState::HalfOpen, Err(e)) if trial => {
                        warn!(
                            breaker = %self.name,
                            error = %e,
                            "Half-open trial call failed, reopening circuit"
                        );
                        self.transition_to_open(&mut state, now);
                        Some(Transition::Opened)
                    }
                    (circuit_state, _) => {
                        warn!(
                            breaker = %self.name,
                            state = %circuit_state,
                            "Unexpected outcome for current state"
                        );
                        None
                    }
                }
            }
        };

        match (transition, outcome) {
            (Some(Transition::Opened), Err(e)) => {
                self.hooks
                    .fire_break(&self.name, e, self.config.break_duration())
            }
            (Some(Transition::Closed), _) => self.hooks.fire_reset(&self.name),
            _ => {}
        }
    }

    fn abandon(&self, generation: u64, trial: bool) {
        let mut state = self.lock();
        if trial && state.generation == generation && state.circuit_state == CircuitState::HalfOpen
        {
            debug!(breaker = %self.name, "Trial call abandoned, releasing half-open slot");
            state.trial_in_flight = false;
        }
    }

    /// Transition to open state
    fn transition_to_open(&self, state: &mut State, now: Instant) {
        info!(
            breaker = %self.name,
            from = %state.circuit_state,
            consecutive_failures = state.consecutive_failures,
            break_duration = ?self.config.break_duration(),
            "Circuit breaker opening"
        );

        state.circuit_state = CircuitState::Open;
        state.opened_at = Some(now);
        state.trial_in_flight = false;
        state.generation += 1;
        state.metrics.circuit_opened_count += 1;
    }

    /// Transition to half-open state
    fn transition_to_half_open(&self, state: &mut State) {
        info!(
            breaker = %self.name,
            break_duration = ?self.config.break_duration(),
            "Circuit breaker transitioning to half-open"
        );

        state.circuit_state = CircuitState::HalfOpen;
        state.opened_at = None;
        state.trial_in_flight = false;
        state.generation += 1;
        state.metrics.circuit_half_opened_count += 1;
    }

    /// Transition to closed state
    fn transition_to_closed(&self, state: &mut State) {
        info!(breaker = %self.name, "Circuit breaker closing");

        state.circuit_state = CircuitState::Closed;
        state.opened_at = None;
        state.consecutive_failures = 0;
        state.trial_in_flight = false;
        state.generation += 1;
        state.metrics.circuit_closed_count += 1;
    }
}

impl<C: Clock> BreakerPermit<'_, C> {
    /// Whether this permit is the half-open trial call
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record a successful call
    pub fn record_success(mut self) {
        self.resolved = true;
        self.breaker.complete(self.generation, self.trial, Ok(()));
    }

    /// Record a failed call
    pub fn record_failure(mut self, error: &dyn Display) {
        self.resolved = true;
        self.breaker.complete(self.generation, self.trial, Err(error));
    }
}

impl<C: Clock> Drop for BreakerPermit<'_, C> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.abandon(self.generation, self.trial);
        }
    }
}
