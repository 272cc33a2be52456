//! Warden - Grant resolution engine
//!
//! Loads configuration, rebuilds the permission registry from the role
//! store, then answers JSON requests line by line on stdin.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod bootstrap;
mod config;
mod console;

use config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;

    init_tracing(&settings.log.filter);

    info!("Starting Warden v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded successfully");

    let service = bootstrap::initialize(&settings).await?;

    info!("Reading requests from stdin");
    console::run(&service).await?;

    info!("Shutting down");
    Ok(())
}

fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // stdout carries responses
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}
