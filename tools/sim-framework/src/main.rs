//! skiff-sim
//!
//! Runs the sample framework on a real scheduler driver against an automated
//! in-process master. Useful for watching registration, offer handling,
//! status acknowledgment and failover end to end.
//!
//! ## Logging
//!
//! - `SKIFF_LOG_LEVEL` sets the default filter (`info`); `RUST_LOG` overrides it
//! - `SKIFF_LOG_FORMAT=json` switches to JSON output

use anyhow::Result;
use clap::Parser;
use skiff_driver::{Driver, DriverConfig, SchedulerDriver};
use skiff_testing::SimMaster;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod framework;
mod master;

use config::SimConfig;
use framework::SampleFramework;

fn init_tracing(format: &str) {
    let default_level = std::env::var("SKIFF_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let sim_config = SimConfig::parse();
    init_tracing(&sim_config.log_format);
    sim_config.validate()?;

    info!("Starting skiff simulator");

    // Load configuration
    let driver_config = DriverConfig::from_env()?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sim = SimMaster::new();
    let master_handle = tokio::spawn(master::run_master(
        sim.clone(),
        sim_config.clone(),
        shutdown_rx,
    ));

    let driver = Driver::new(
        SampleFramework::new(&sim_config),
        sim.transport(),
        driver_config,
    );

    info!(
        framework = %driver.config().framework.name,
        failover = driver.config().framework.id.is_some(),
        tasks = sim_config.tasks,
        agents = sim_config.agents,
        "Configuration loaded"
    );

    let outcome = tokio::select! {
        result = driver.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(driver.stop().await)
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(e) = master_handle.await {
        warn!(error = %e, "Simulated master task failed");
    }

    let state = outcome?;
    info!(
        state = %state,
        failovers = driver.epoch().await,
        "Simulator finished"
    );
    Ok(())
}
