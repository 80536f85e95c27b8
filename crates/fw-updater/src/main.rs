// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! fw-updater - periodic firmware update agent

use clap::Parser;
use fw_updater::config::{CONFIG_PATH, load_config};
use fw_updater::{FirmwareUpdater, UpdateOutcome};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(version, about = "Checks for and installs firmware updates")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Run a single check cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fw_updater=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Starting fw-updater {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config.validate()?;
    info!(
        "Loaded config: release_url={}, strategy={:?}, current_version={}",
        config.release_url, config.strategy, config.current_version
    );

    let mut updater = FirmwareUpdater::from_config(&config)?;

    if args.once {
        let outcome = updater.handle().await;
        info!("Update cycle finished: {outcome:?}");
        return Ok(());
    }

    let mut check_interval =
        tokio::time::interval(Duration::from_secs(config.check_interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = check_interval.tick() => {
                match updater.handle().await {
                    UpdateOutcome::UpdateAppliedPendingRestart => {
                        warn!("Update installed but restart did not happen, exiting");
                        break;
                    }
                    outcome => info!("Update cycle finished: {outcome:?}"),
                }
            }
        }
    }

    Ok(())
}
