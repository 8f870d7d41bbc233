use crate::circuit_breaker::{CircuitBreakerService, RetryPolicy};
use crate::config::AppConfig;
use crate::error::{AppError, ResilienceError, Result};
use crate::executor::PolicyExecutor;
use crate::metrics::{self, CallTimer, MetricsService};
use crate::upstream::{UpstreamClient, UpstreamError, UpstreamResponse};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub breakers: CircuitBreakerService,
    pub retry: RetryPolicy,
    pub client: UpstreamClient,
    pub metrics: Option<MetricsService>,
}

impl AppState {
    /// Build breakers, retry policy and HTTP client from configuration
    pub fn new(config: AppConfig, metrics: Option<MetricsService>) -> Result<Self> {
        let client = UpstreamClient::new(Duration::from_secs(config.server.timeout_secs))?;
        let breakers = CircuitBreakerService::new(config.circuit_breaker.clone())
            .with_hooks(metrics::breaker_hooks());
        let retry = RetryPolicy::new(config.retry.clone());

        Ok(Self {
            config: Arc::new(config),
            breakers,
            retry,
            client,
            metrics,
        })
    }

    fn url_for(&self, dependency: &str) -> Result<&str> {
        self.config
            .dependency(dependency)
            .map(|d| d.url.as_str())
            .ok_or_else(|| AppError::UnknownDependency(dependency.to_string()))
    }

    /// Retry policy that logs and counts every retried attempt against `dependency`
    fn retry_for(&self, dependency: &str) -> RetryPolicy {
        let dependency = dependency.to_string();
        self.retry.clone().on_retry(move |error, wait| {
            error!(
                dependency = %dependency,
                error = %error,
                wait_ms = wait.as_millis(),
                "Upstream attempt failed, retrying"
            );
            metrics::record_retry(&dependency);
        })
    }
}

/// Build the HTTP application
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/call/:dependency", get(call_handler))
        .route("/retry/:dependency", get(retry_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Call a dependency through its circuit breaker with retries inside
async fn call_handler(
    State(state): State<AppState>,
    Path(dependency): Path<String>,
) -> Result<impl IntoResponse> {
    let url = state.url_for(&dependency)?;
    let executor = PolicyExecutor::new(
        state.breakers.breaker(&dependency),
        state.retry_for(&dependency),
    );
    let timer = CallTimer::new(dependency.as_str());

    let result = executor
        .execute_with_predicate(|| state.client.get(url), UpstreamError::is_retryable)
        .await;

    finish(&dependency, timer, result)
}

/// Call a dependency with retries only
async fn retry_handler(
    State(state): State<AppState>,
    Path(dependency): Path<String>,
) -> Result<impl IntoResponse> {
    let url = state.url_for(&dependency)?;
    let timer = CallTimer::new(dependency.as_str());

    let result = state
        .retry_for(&dependency)
        .execute_with_predicate(|| state.client.get(url), UpstreamError::is_retryable)
        .await;

    finish(&dependency, timer, result)
}

fn finish(
    dependency: &str,
    timer: CallTimer,
    result: std::result::Result<UpstreamResponse, ResilienceError<UpstreamError>>,
) -> Result<impl IntoResponse> {
    let outcome = match &result {
        Ok(_) => "success",
        Err(ResilienceError::CircuitOpen { .. }) => "circuit_open",
        Err(ResilienceError::RetriesExhausted { .. }) => "retries_exhausted",
        Err(ResilienceError::Operation(_)) => "failure",
    };
    timer.record(outcome);

    match result {
        Ok(response) => {
            info!(dependency = %dependency, status = response.status, "Service call succeeded");
            Ok((
                StatusCode::OK,
                Json(json!({
                    "message": "Service call succeeded.",
                    "dependency": dependency,
                    "upstream_status": response.status,
                })),
            ))
        }
        Err(e) => {
            warn!(dependency = %dependency, error = %e, outcome, "Service call did not succeed");
            Err(e.into())
        }
    }
}

/// Report every configured dependency with its breaker state and metrics
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let dependencies: Vec<_> = state
        .config
        .dependencies
        .iter()
        .map(|d| {
            json!({
                "name": d.name,
                "url": d.url,
                "description": d.description,
                "state": state.breakers.state(&d.name).to_string(),
                "metrics": state.breakers.metrics(&d.name).unwrap_or_default(),
            })
        })
        .collect();

    Json(json!({ "dependencies": dependencies }))
}

/// Metrics endpoint handler
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(service) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            service.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Bind and serve until the process is stopped
pub async fn serve(config: AppConfig, metrics: Option<MetricsService>) -> Result<()> {
    config.validate()?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(
        dependencies = config.dependencies.len(),
        failure_threshold = config.circuit_breaker.failure_threshold,
        max_attempts = config.retry.max_attempts,
        "Starting resilience service"
    );

    let state = AppState::new(config, metrics)?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server listening on {}", addr);

    axum::serve(listener, app(state))
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
