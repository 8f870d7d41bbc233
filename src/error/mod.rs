use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt::Display;
use thiserror::Error;

/// Outcome of running an operation through a resilience policy
///
/// The three variants keep "never attempted", "attempted until the retry
/// budget ran out" and "attempted and failed" apart so callers can report
/// them differently.
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    /// The breaker short-circuited the call; the operation was not invoked
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// Every allowed attempt failed; carries the last failure
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: E },

    /// The operation failed and was not retried
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> ResilienceError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, ResilienceError::RetriesExhausted { .. })
    }

    /// The underlying operation error, if the operation ran at all
    pub fn into_inner(self) -> Option<E> {
        match self {
            ResilienceError::CircuitOpen { .. } => None,
            ResilienceError::RetriesExhausted { last_error, .. } => Some(last_error),
            ResilienceError::Operation(e) => Some(e),
        }
    }

    /// Borrow the underlying operation error
    pub fn inner(&self) -> Option<&E> {
        match self {
            ResilienceError::CircuitOpen { .. } => None,
            ResilienceError::RetriesExhausted { last_error, .. } => Some(last_error),
            ResilienceError::Operation(e) => Some(e),
        }
    }
}

/// Result type for service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Service error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown dependency: {0}")]
    UnknownDependency(String),

    #[error("Service call skipped: Circuit is OPEN for {0}")]
    CircuitOpen(String),

    #[error("Service call failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("Service call failed: {0}")]
    Upstream(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UnknownDependency(_) => StatusCode::NOT_FOUND,
            AppError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RetriesExhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E: Display> From<ResilienceError<E>> for AppError {
    fn from(err: ResilienceError<E>) -> Self {
        match err {
            ResilienceError::CircuitOpen { name } => AppError::CircuitOpen(name),
            ResilienceError::RetriesExhausted {
                attempts,
                last_error,
            } => AppError::RetriesExhausted {
                attempts,
                message: last_error.to_string(),
            },
            ResilienceError::Operation(e) => AppError::Upstream(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
