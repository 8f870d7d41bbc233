use crate::circuit_breaker::{BreakerHooks, CircuitState};
use crate::error::{AppError, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder
    ///
    /// Fails if a recorder is already installed in this process.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            AppError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "resilience_calls_total",
            "Total number of calls to dependencies by outcome"
        );
        describe_histogram!(
            "resilience_call_duration_seconds",
            "Call latencies in seconds, retries and backoff included"
        );
        describe_counter!(
            "resilience_retries_total",
            "Total number of retried attempts"
        );
        describe_gauge!(
            "resilience_circuit_breaker_state",
            "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "resilience_circuit_breaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Record a finished call
///
/// `outcome` is one of `success`, `circuit_open`, `retries_exhausted`, `failure`.
pub fn record_call(dependency: &str, outcome: &str, duration: f64) {
    let labels = [
        ("dependency", dependency.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("resilience_calls_total", &labels).increment(1);
    histogram!("resilience_call_duration_seconds", &labels).record(duration);
}

/// Record a retried attempt
pub fn record_retry(dependency: &str) {
    let labels = [("dependency", dependency.to_string())];
    counter!("resilience_retries_total", &labels).increment(1);
}

/// Record circuit breaker state
pub fn record_circuit_breaker_state(dependency: &str, state: CircuitState) {
    let labels = [("dependency", dependency.to_string())];
    gauge!("resilience_circuit_breaker_state", &labels).set(state.as_gauge() as f64);
}

/// Record circuit breaker transition
pub fn record_circuit_breaker_transition(dependency: &str, to_state: CircuitState) {
    let labels = [
        ("dependency", dependency.to_string()),
        ("to", to_state.to_string()),
    ];
    counter!("resilience_circuit_breaker_transitions_total", &labels).increment(1);
    record_circuit_breaker_state(dependency, to_state);
}

/// Breaker hooks that log each transition and feed the transition metrics
pub fn breaker_hooks() -> BreakerHooks {
    BreakerHooks::new()
        .on_break(|dependency, error, break_duration: Duration| {
            error!(
                dependency = %dependency,
                error = %error,
                break_secs = break_duration.as_secs_f64(),
                "Circuit breaker opened"
            );
            record_circuit_breaker_transition(dependency, CircuitState::Open);
        })
        .on_reset(|dependency| {
            info!(dependency = %dependency, "Circuit breaker reset (closed)");
            record_circuit_breaker_transition(dependency, CircuitState::Closed);
        })
        .on_half_open(|dependency| {
            warn!(dependency = %dependency, "Circuit breaker moved to half-open");
            record_circuit_breaker_transition(dependency, CircuitState::HalfOpen);
        })
}

/// Timer for measuring call duration
pub struct CallTimer {
    start: Instant,
    dependency: String,
}

impl CallTimer {
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            dependency: dependency.into(),
        }
    }

    /// Record the elapsed time with the given outcome
    pub fn record(self, outcome: &str) {
        record_call(&self.dependency, outcome, self.elapsed());
    }

    /// Get the elapsed time in seconds
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_creation() {
        let timer = CallTimer::new("payments");
        assert_eq!(timer.dependency, "payments");
        assert!(timer.elapsed() >= 0.0);
    }

    #[test]
    fn test_record_functions_dont_panic() {
        // These functions should not panic even if recorder isn't installed
        record_call("payments", "success", 0.123);
        record_retry("payments");
        record_circuit_breaker_state("payments", CircuitState::Open);
        record_circuit_breaker_transition("payments", CircuitState::HalfOpen);
        CallTimer::new("payments").record("failure");
    }

    #[test]
    fn test_breaker_hooks_dont_panic() {
        let hooks = breaker_hooks();
        hooks.fire_break("payments", &"boom", Duration::from_secs(5));
        hooks.fire_half_open("payments");
        hooks.fire_reset("payments");
    }
}
