//! # Key Pool Main Entry Point

use std::sync::Arc;

use anyhow::{Context, Result};
use keypool::{
    config::ConfigLoader,
    db,
    migration::{Migrator, MigratorTrait},
    server::{run_server, shutdown_signal},
    sweeper::RateLimitSweeper,
    telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    if config.run_migrations {
        Migrator::up(&db, None)
            .await
            .context("applying database migrations")?;
        info!("Database migrations applied");
    }

    let config = Arc::new(config);
    let db = Arc::new(db);
    let shutdown = CancellationToken::new();

    let sweeper = RateLimitSweeper::new(config.sweeper.clone(), Arc::clone(&db));
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.child_token()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let served = run_server(config, db, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(err) = sweeper_handle.await {
        tracing::error!(error = %err, "Rate limit sweeper task panicked");
    }

    served
}
