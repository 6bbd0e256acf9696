// SPDX-License-Identifier: GPL-3.0-only

//! Storage Volume Monitor - tracks mounted volumes and publishes changes
//!
//! Reconciles UDisks2 devices and the kernel mount table on an interval,
//! watches every mount path for deletion, and exposes the result on D-Bus.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use storage_monitor::{SystemVolumeSource, VolumeMonitor};
use storage_udisks::DiskManager;
use tracing_subscriber::{EnvFilter, fmt};
use zbus::connection::Builder as ConnectionBuilder;

mod config;
mod error;
mod hotplug;
mod volumes;

use config::{BusKind, ServiceConfig};
use volumes::VolumesHandler;

const DEFAULT_FILTER: &str =
    "storage_monitor=info,storage_sys=info,storage_volume_monitor=info,warn";
const VERBOSE_FILTER: &str = "storage_monitor=debug,storage_sys=debug,storage_udisks=debug,\
                              storage_volume_monitor=debug,warn";

#[derive(Debug, Parser)]
#[command(name = "storage-volume-monitor")]
#[command(about = "Track mounted volumes and publish mount, unmount and rename events")]
struct Args {
    /// TOML configuration file; a missing file means defaults
    #[arg(long, env = "STORAGE_VOLUME_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short)]
    verbose: bool,

    /// Run a single pass, print the volumes as JSON and exit
    #[arg(long)]
    once: bool,

    /// Override the configured refresh interval
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let fallback = if args.verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        "Starting Storage Volume Monitor v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if let Some(interval_ms) = args.interval_ms {
        config.monitor.interval_ms = interval_ms;
    }

    let disk_manager = match DiskManager::new().await {
        Ok(manager) => Some(manager),
        Err(e) => {
            tracing::warn!("UDisks2 not available: {e}. Reading the mount table only.");
            None
        }
    };

    let source = Arc::new(SystemVolumeSource::new(disk_manager.clone()));
    let monitor = VolumeMonitor::new(config.monitor.clone(), source)?;

    if args.once {
        monitor.refresh().await?;
        println!("{}", serde_json::to_string_pretty(&monitor.current_state())?);
        monitor.dispose();
        return Ok(());
    }

    let connection_builder = match config.bus {
        BusKind::Session => Some(ConnectionBuilder::session()?),
        BusKind::System => Some(ConnectionBuilder::system()?),
        BusKind::None => None,
    };

    // Kept alive for the lifetime of the service
    let _connection = match connection_builder {
        Some(builder) => {
            let connection = builder
                .name(volumes::BUS_NAME)?
                .serve_at(volumes::OBJECT_PATH, VolumesHandler::new(monitor.clone()))?
                .build()
                .await?;
            volumes::forward_volume_events(&connection, &monitor).await?;

            tracing::info!("Service registered on D-Bus {:?} bus", config.bus);
            tracing::info!("  - {} at {}", volumes::BUS_NAME, volumes::OBJECT_PATH);
            Some(connection)
        }
        None => {
            tracing::info!("D-Bus publishing disabled");
            None
        }
    };

    match (&disk_manager, config.hotplug) {
        (Some(manager), true) => {
            hotplug::refresh_on_hotplug(manager, monitor.clone()).await?;
            tracing::info!("Hotplug-triggered refreshes enabled");
        }
        (None, true) => tracing::warn!("Hotplug-triggered refreshes need UDisks2, disabled"),
        (_, false) => tracing::info!("Hotplug-triggered refreshes disabled by configuration"),
    }

    monitor.start();

    tracing::info!("Monitor ready, waiting for changes...");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    monitor.dispose();
    tracing::info!("Storage Volume Monitor shutting down");
    Ok(())
}
