//! Traction Server
//!
//! Runs the sync, leaderboard, rotation and milestone loops until
//! interrupted.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use traction::{Aggregator, Config, Scheduler, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Traction Server");

    let config = Config::load()?;

    // Credentials at rest are unreadable without the master key
    let master_key = config.master_key().ok_or_else(|| {
        error!("TRACTION_MASTER_KEY environment variable is required");
        anyhow::anyhow!("TRACTION_MASTER_KEY not set")
    })?;

    let db_path = config.database_path();
    let store = Arc::new(Store::open(&db_path)?);
    info!("Database ready at {}", db_path);

    let aggregator = Arc::new(Aggregator::new(store.clone(), &config, master_key));
    let scheduler = Arc::new(Scheduler::new(store, aggregator, config));
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    scheduler.stop();

    Ok(())
}
