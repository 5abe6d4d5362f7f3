//! nut-ups-poller - UPS status poller
//!
//! Polls a Network UPS Tools server for one UPS, exposes its readings as
//! device capabilities and keeps the capability set in line with what the
//! UPS actually reports.

mod capability;
mod config;
mod device;
mod error;
mod host;
mod models;
mod nut;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::device::{discover_devices, UpsDevice};
use crate::host::{DeviceStore, JsonFileStore, LocalDevice, MemoryStore};
use crate::nut::{TcpConnector, UpsConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nut_ups_poller=info".into()),
        )
        .init();

    tracing::info!("Starting nut-ups-poller...");

    // Load configuration
    let config = config::Config::load()?;
    let mut settings = config.device_settings();
    let mut identity = config.identity();
    tracing::info!(
        "Configuration loaded (server: {}:{})",
        settings.ip,
        settings.port
    );

    let connector: Arc<dyn UpsConnector> = Arc::new(TcpConnector);

    // Fill in whatever the configuration leaves open from the server
    if settings.ups_name.is_empty() || identity.id.is_empty() || identity.name.is_empty() {
        let found = discover_devices(connector.as_ref(), &settings).await?;
        let chosen = found
            .into_iter()
            .find(|d| settings.ups_name.is_empty() || d.ups_name == settings.ups_name)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No UPS {} found on {}:{}",
                    settings.ups_name,
                    settings.ip,
                    settings.port
                )
            })?;

        tracing::info!("Using UPS {} ({})", chosen.ups_name, chosen.name);
        settings.ups_name = chosen.ups_name;
        if identity.id.is_empty() {
            identity.id = chosen.id;
        }
        if identity.name.is_empty() {
            identity.name = chosen.name;
        }
    }

    // Without a state path the capability history only lives for this run
    let store: Arc<dyn DeviceStore> = if config.device.state_path.is_empty() {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(JsonFileStore::open(&config.device.state_path).await?)
    };
    let device = Arc::new(LocalDevice::restore(identity.clone(), store.clone()).await?);

    let ups = UpsDevice::new(identity, settings, connector, device, store);
    ups.on_init().await;

    // SIGHUP re-reads the configuration into the running device
    #[cfg(unix)]
    let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

    loop {
        #[cfg(unix)]
        let reload = hangup.recv();
        #[cfg(not(unix))]
        let reload = std::future::pending::<Option<()>>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            _ = reload => reload_settings(&ups).await,
        }
    }

    tracing::info!("Shutting down...");
    ups.on_deleted().await;

    Ok(())
}

/// Apply the current configuration file and environment to a running device.
/// Invalid configuration keeps the settings in use.
async fn reload_settings(ups: &UpsDevice) {
    let config = match config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("[Reload] Keeping current settings: {}", e);
            return;
        }
    };

    let mut settings = config.device_settings();
    if settings.ups_name.is_empty() {
        // Keep the UPS picked by discovery at startup
        settings.ups_name = ups.settings().await.ups_name;
    }

    match ups.on_settings(settings).await {
        Ok(()) => tracing::info!("[Reload] Settings applied"),
        Err(e) => tracing::warn!("[Reload] Settings rejected: {}", e),
    }
}
