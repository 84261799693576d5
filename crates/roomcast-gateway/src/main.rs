//! Roomcast Gateway entry point
//!
//! Run with:
//! ```bash
//! cargo run -p roomcast-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use roomcast_common::{init_tracing, AppConfig, TracingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load .env before reading APP_ENV for the log format
    let _ = dotenvy::dotenv();

    let tracing_config = std::env::var("APP_ENV")
        .ok()
        .and_then(|env| env.parse().ok())
        .map_or_else(TracingConfig::default, TracingConfig::for_environment);

    let initialized = tracing_config
        .with_env_format()
        .and_then(|config| init_tracing(&config));
    if let Err(e) = initialized {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %e, "Gateway failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Roomcast Gateway...");

    let config = AppConfig::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        env = ?config.app.env,
        port = config.gateway.port,
        namespaces = ?config.engine.namespaces,
        redis = config.redis.is_some(),
        "Configuration loaded"
    );

    roomcast_gateway::run(config).await?;

    Ok(())
}
