pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod server;
pub mod upstream;

pub use circuit_breaker::{
    BreakerHooks, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerService, CircuitState,
    RetryConfig, RetryPolicy,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::ResilienceError;
pub use executor::PolicyExecutor;

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilience=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
