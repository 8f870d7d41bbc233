pub mod breaker;
pub mod retry;
pub mod service;
pub mod types;

pub use breaker::{BreakerPermit, CircuitBreaker};
pub use retry::{Delays, RetryPolicy};
pub use service::CircuitBreakerService;
pub use types::{
    BreakerHooks, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, RetryConfig,
    MAX_RETRY_ATTEMPTS,
};
