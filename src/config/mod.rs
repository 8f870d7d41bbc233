use crate::circuit_breaker::{CircuitBreakerConfig, RetryConfig, MAX_RETRY_ATTEMPTS};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Circuit breaker settings shared by every dependency
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry settings shared by every dependency
    #[serde(default)]
    pub retry: RetryConfig,
    /// Protected remote dependencies
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout of a single upstream attempt in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// A remote dependency guarded by its own circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Name used in routes, logs and metrics
    pub name: String,
    /// URL called on every request
    pub url: String,
    /// Description
    #[serde(default)]
    pub description: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AppError::Config(
                "Circuit breaker failure_threshold must be > 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "Retry max_attempts must be > 0".to_string(),
            ));
        }

        if self.retry.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(AppError::Config(format!(
                "Retry max_attempts must be <= {}",
                MAX_RETRY_ATTEMPTS
            )));
        }

        if let Some(max_delay_ms) = self.retry.max_delay_ms {
            if max_delay_ms < self.retry.base_delay_ms {
                return Err(AppError::Config(
                    "Retry max_delay_ms must be >= base_delay_ms".to_string(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for dependency in &self.dependencies {
            if dependency.name.is_empty() {
                return Err(AppError::Config(
                    "Dependency name cannot be empty".to_string(),
                ));
            }

            if !seen.insert(dependency.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate dependency name: {}",
                    dependency.name
                )));
            }

            if !dependency.url.starts_with("http://") && !dependency.url.starts_with("https://") {
                return Err(AppError::Config(format!(
                    "Dependency URL must start with http:// or https:// for dependency: {}",
                    dependency.name
                )));
            }
        }

        Ok(())
    }

    /// Look up a dependency by name
    pub fn dependency(&self, name: &str) -> Option<&DependencyConfig> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}
