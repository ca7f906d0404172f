//! Alert Engine — headless server.
//!
//! Runs the fan-in, ring buffer, complex alert cache, evaluators, sweepers,
//! lease coordinator, and trigger sink with no GUI and no HTTP server.
//! Metrics are pushed as structured JSON logs to stdout, same shape as
//! `rustrade`'s `src/bin/server.rs`.

use alert_engine::application::engine::Engine;
use alert_engine::config::Config;
use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!(scope = "alertEngine", "alert-engine {} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(scope = "alertEngine", database_url = %config.database_url, "configuration loaded");

    let engine = Engine::build(config).await?;
    let handle = engine.start().await?;
    info!(scope = "alertEngine", "engine running, press Ctrl+C to shut down");

    tokio::signal::ctrl_c().await?;
    info!(scope = "alertEngine", "shutdown signal received");
    handle.shutdown().await;

    Ok(())
}
