use anyhow::Result;
use lora_serve::{
    config,
    engine::SamplingParams,
    server::{self, AppState},
    startup,
};
use std::sync::Arc;
use tracing::info;

/// Validates that a log level string is valid
fn validate_log_level(level: &str) -> Result<()> {
    level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .map_err(|_| {
            anyhow::anyhow!(
                "Invalid log level: '{}'. Valid levels: error, warn, info, debug, trace",
                level
            )
        })?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (before logging setup)
    let config = match config::load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Environment variable overrides config
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.server.logs.level.clone());

    if let Err(e) = validate_log_level(&log_level) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .json()
        .init();

    info!("Starting lora-serve with log level: {}", log_level);
    info!(
        "Base model: {}, adapter: {}",
        config.model.base, config.model.adapter
    );

    let engine = startup::start_engine(&config).await?;
    info!("Engine ready");

    let state = AppState {
        engine: Arc::new(engine),
        sampling: SamplingParams::from(config.sampling.clone()),
    };

    server::run(&config.server, state).await?;

    Ok(())
}
