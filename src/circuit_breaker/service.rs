use super::breaker::CircuitBreaker;
use super::types::{BreakerHooks, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::clock::{Clock, SystemClock};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Circuit breaker service managing one breaker per dependency
#[derive(Debug, Clone)]
pub struct CircuitBreakerService<C: Clock + Clone = SystemClock> {
    /// Circuit breakers per dependency
    breakers: Arc<DashMap<String, Arc<CircuitBreaker<C>>>>,
    /// Default configuration
    config: CircuitBreakerConfig,
    /// Hooks shared by every breaker
    hooks: BreakerHooks,
    clock: C,
}

impl CircuitBreakerService<SystemClock> {
    /// Create a new circuit breaker service
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> CircuitBreakerService<C> {
    /// Create a service whose breakers read time from `clock`
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            config,
            hooks: BreakerHooks::default(),
            clock,
        }
    }

    /// Hooks attached to breakers created from now on
    pub fn with_hooks(mut self, hooks: BreakerHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Get or create the circuit breaker for a dependency
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker<C>> {
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                debug!(dependency = dependency, "Creating new circuit breaker");
                Arc::new(
                    CircuitBreaker::with_clock(dependency, self.config.clone(), self.clock.clone())
                        .with_hooks(self.hooks.clone()),
                )
            })
            .clone()
    }

    /// Get the state of the circuit breaker for a dependency
    pub fn state(&self, dependency: &str) -> CircuitState {
        if let Some(breaker) = self.breakers.get(dependency) {
            breaker.state()
        } else {
            CircuitState::Closed
        }
    }

    /// Get metrics for a dependency
    pub fn metrics(&self, dependency: &str) -> Option<CircuitBreakerMetrics> {
        self.breakers.get(dependency).map(|breaker| breaker.metrics())
    }

    /// Get all dependency names with circuit breakers, sorted
    pub fn dependencies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Get metrics and state for all dependencies, sorted by name
    pub fn all_metrics(&self) -> Vec<(String, CircuitBreakerMetrics, CircuitState)> {
        let mut results: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| {
                let breaker = entry.value();
                (entry.key().clone(), breaker.metrics(), breaker.state())
            })
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    async fn fail(service: &CircuitBreakerService<impl Clock + Clone>, dependency: &str) {
        let _ = service
            .breaker(dependency)
            .execute(|| async { Err::<(), _>("down") })
            .await;
    }

    #[tokio::test]
    async fn test_service_manages_multiple_dependencies() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let service = CircuitBreakerService::new(config);

        service
            .breaker("dependency1")
            .execute(|| async { Ok::<_, String>(()) })
            .await
            .unwrap();

        fail(&service, "dependency2").await;
        fail(&service, "dependency2").await;

        assert_eq!(service.state("dependency1"), CircuitState::Closed);
        assert_eq!(service.state("dependency2"), CircuitState::Open);
        assert_eq!(
            service.dependencies(),
            vec!["dependency1".to_string(), "dependency2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_service_returns_same_breaker() {
        let service = CircuitBreakerService::new(CircuitBreakerConfig::default());
        let a = service.breaker("payments");
        let b = service.breaker("payments");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_service_all_metrics() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let service = CircuitBreakerService::new(config);

        service
            .breaker("dependency1")
            .execute(|| async { Ok::<_, String>(()) })
            .await
            .unwrap();
        fail(&service, "dependency2").await;

        let all_metrics = service.all_metrics();
        assert_eq!(all_metrics.len(), 2);
        assert_eq!(all_metrics[0].0, "dependency1");
        assert_eq!(all_metrics[0].1.successful_requests, 1);
        assert_eq!(all_metrics[1].0, "dependency2");
        assert_eq!(all_metrics[1].1.failed_requests, 1);
        assert_eq!(all_metrics[1].2, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_service_nonexistent_dependency() {
        let service = CircuitBreakerService::new(CircuitBreakerConfig::default());

        assert_eq!(service.state("nonexistent"), CircuitState::Closed);
        assert!(service.metrics("nonexistent").is_none());
        assert!(service.dependencies().is_empty());
    }

    #[tokio::test]
    async fn test_service_shares_clock_and_hooks() {
        let clock = MockClock::new();
        let half_opens = Arc::new(AtomicU32::new(0));
        let half_opens_clone = half_opens.clone();
        let service = CircuitBreakerService::with_clock(
            CircuitBreakerConfig {
                failure_threshold: 1,
                break_duration_ms: 1000,
            },
            clock.clone(),
        )
        .with_hooks(BreakerHooks::new().on_half_open(move |name| {
            assert_eq!(name, "search");
            half_opens_clone.fetch_add(1, Ordering::SeqCst);
        }));

        fail(&service, "search").await;
        assert_eq!(service.state("search"), CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        service
            .breaker("search")
            .execute(|| async { Ok::<_, String>(()) })
            .await
            .unwrap();

        assert_eq!(half_opens.load(Ordering::SeqCst), 1);
        assert_eq!(service.state("search"), CircuitState::Closed);
    }
}
