use resilience::{config::AppConfig, init_tracing, metrics::MetricsService, server};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    // Initialize tracing
    init_tracing();

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/resilience.yaml".to_string());

    // Load configuration
    let config = match AppConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: resilience [config_file]");
            process::exit(1);
        }
    };

    let metrics = match MetricsService::new() {
        Ok(service) => Some(service),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics disabled");
            None
        }
    };

    if let Err(e) = server::serve(config, metrics).await {
        eprintln!("Service error: {}", e);
        process::exit(1);
    }
}
