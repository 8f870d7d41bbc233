use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed,
    /// Circuit is open, calls are rejected
    Open,
    /// Circuit is half-open, a single trial call is allowed
    HalfOpen,
}

impl CircuitState {
    /// Gauge value used when exporting the state (0 = closed, 1 = open, 2 = half-open)
    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call is allowed
    #[serde(default = "default_break_duration_ms")]
    pub break_duration_ms: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_break_duration_ms() -> u64 {
    5000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            break_duration_ms: default_break_duration_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn break_duration(&self) -> Duration {
        Duration::from_millis(self.break_duration_ms)
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, the first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait before the first retry; each later wait doubles
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Optional upper bound for any single wait; waits keep doubling when unset
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

/// Largest `max_attempts` accepted by configuration validation
pub const MAX_RETRY_ATTEMPTS: u32 = 16;

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that were allowed through
    pub total_requests: u64,
    /// Calls that succeeded
    pub successful_requests: u64,
    /// Calls that failed
    pub failed_requests: u64,
    /// Calls rejected without running (circuit open)
    pub rejected_requests: u64,
    /// Number of times circuit opened
    pub circuit_opened_count: u64,
    /// Number of times circuit closed after a trial
    pub circuit_closed_count: u64,
    /// Number of times circuit half-opened
    pub circuit_half_opened_count: u64,
}

type BreakHook = Arc<dyn Fn(&str, &dyn fmt::Display, Duration) + Send + Sync>;
type StateHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Lifecycle callbacks fired on breaker transitions
///
/// Every hook receives the breaker name first. Hooks run after the state
/// lock is released, so they may call back into the breaker.
#[derive(Clone, Default)]
pub struct BreakerHooks {
    on_break: Option<BreakHook>,
    on_reset: Option<StateHook>,
    on_half_open: Option<StateHook>,
}

impl BreakerHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the failure that tripped the breaker and the break duration
    pub fn on_break<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &dyn fmt::Display, Duration) + Send + Sync + 'static,
    {
        self.on_break = Some(Arc::new(f));
        self
    }

    /// Called when a trial call succeeds and the circuit closes
    pub fn on_reset<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_reset = Some(Arc::new(f));
        self
    }

    /// Called when the cooldown has elapsed and a trial call is let through
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_half_open = Some(Arc::new(f));
        self
    }

    pub(crate) fn fire_break(&self, name: &str, error: &dyn fmt::Display, duration: Duration) {
        if let Some(hook) = &self.on_break {
            hook(name, error, duration);
        }
    }

    pub(crate) fn fire_reset(&self, name: &str) {
        if let Some(hook) = &self.on_reset {
            hook(name);
        }
    }

    pub(crate) fn fire_half_open(&self, name: &str) {
        if let Some(hook) = &self.on_half_open {
            hook(name);
        }
    }
}

impl fmt::Debug for BreakerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerHooks")
            .field("on_break", &self.on_break.is_some())
            .field("on_reset", &self.on_reset.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
