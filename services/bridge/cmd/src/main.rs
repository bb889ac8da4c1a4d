//! Plejd bridge binary.
//!
//! Loads the cached site snapshot, opens the BLE adapter, keeps an
//! authenticated link into the mesh and logs device state changes until
//! interrupted.

use anyhow::Context;
use clap::Parser;
use plejd_device::{DeviceEvent, DeviceState, MeshDevice, SiteSnapshot};
use plejd_session::{BleTransport, MeshSession, SessionEvent};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::{BridgeConfig, ConfigSource};
use logging::BridgeLogFormatter;

const SERVICE_NAME: &str = "plejd-bridge";

/// Bridge between a Plejd BLE mesh and the host
#[derive(Parser, Debug)]
#[command(name = "plejd-bridge", version, about = "Bridge to a Plejd BLE lighting mesh")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "settings.yaml")]
    config: PathBuf,

    /// Site snapshot JSON, overrides the config file
    #[arg(long)]
    site_cache: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// BLE scan duration (e.g. "10s")
    #[arg(long)]
    scan_time: Option<humantime::Duration>,

    /// BLE adapter name, overrides the config file
    #[arg(long)]
    adapter: Option<String>,
}

fn init_logging(level: &str, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let mut env_filter = EnvFilter::new("warn");
    for target in ["plejd_bridge", "plejd_session", "plejd_wire", "plejd_device"] {
        env_filter = env_filter.add_directive(format!("{}={}", target, level).parse()?);
    }

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .event_format(BridgeLogFormatter::plain(SERVICE_NAME))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .event_format(BridgeLogFormatter::new(SERVICE_NAME))
                .init();
        }
    }
    Ok(())
}

#[cfg(feature = "native")]
async fn open_transport(config: &BridgeConfig) -> anyhow::Result<Arc<dyn BleTransport>> {
    let transport = plejd_session::backend::native::NativeTransport::new(
        config.ble.adapter.as_deref(),
    )
    .await
    .context("open BLE adapter")?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "native"))]
async fn open_transport(_config: &BridgeConfig) -> anyhow::Result<Arc<dyn BleTransport>> {
    anyhow::bail!("built without BLE support, enable the `native` feature")
}

fn log_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::Connected { address } => {
            component_info!("session", "Connected to mesh through {}", address)
        }
        SessionEvent::ConnectFailed { reason } => {
            component_warn!("session", "Connect attempt failed: {}", reason)
        }
        SessionEvent::PingFailed => debug!("Heartbeat ping failed"),
        SessionEvent::HeartbeatTimeout { failures } => {
            component_warn!("heartbeat", "Link lost after {} failed heartbeats", failures)
        }
        SessionEvent::Disconnected => component_info!("session", "Disconnected from mesh"),
        SessionEvent::TimeUpdated { device, drift_secs } => component_info!(
            "time-sync",
            "Mesh clock corrected through device {} (drift {}s)",
            device,
            drift_secs
        ),
    }
}

fn log_device_event(names: &[(u8, String)], event: &DeviceEvent) {
    let name = names
        .iter()
        .find(|(address, _)| *address == event.address)
        .map(|(_, name)| name.as_str())
        .unwrap_or("unknown");
    match event.state {
        DeviceState::Light { on, brightness } => {
            info!("{} (#{}) on={} brightness={}", name, event.address, on, brightness)
        }
        DeviceState::Switch { on } => info!("{} (#{}) on={}", name, event.address, on),
        DeviceState::Trigger { input } => {
            info!("{} (#{}) button {} pressed", name, event.address, input)
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (mut config, source) = BridgeConfig::load_from_file(&args.config);
    if let Some(path) = args.site_cache {
        config.site_cache = path;
    }
    if let Some(adapter) = args.adapter {
        config.ble.adapter = Some(adapter);
    }
    if let Some(scan_time) = args.scan_time {
        config.ble.scan_time = scan_time.as_secs_f64();
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    init_logging(&config.log_level, args.log_file.as_ref())?;

    info!("Starting Plejd bridge v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        ConfigSource::File(path) => info!("Loaded configuration from {}", path.display()),
        ConfigSource::Missing(path) => {
            warn!("Config file {} not found, using defaults", path.display())
        }
        ConfigSource::Invalid { path, error } => warn!(
            "Failed to load config file {}: {}, using defaults",
            path.display(),
            error
        ),
    }
    config.log_summary();

    let site = SiteSnapshot::load(&config.site_cache)
        .with_context(|| format!("load site snapshot {}", config.site_cache.display()))?;
    let key = site.shared_key().context("parse site crypto key")?;
    info!(
        "Site {} has {} devices ({} actionable)",
        site.name,
        site.devices.len(),
        site.actionable_devices().count()
    );

    let transport = open_transport(&config).await?;
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let session = MeshSession::with_events(transport, key, config.session_config(), event_tx);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("install SIGTERM handler")?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .context("install SIGINT handler")?;

    let connected = tokio::select! {
        connected = session.connect_with_backoff(true, config.max_backoff()) => connected,
        _ = sigterm.recv() => false,
        _ = sigint.recv() => false,
    };
    if !connected {
        info!("Shutting down before the mesh link came up");
        session.disconnect().await.ok();
        return Ok(());
    }

    let devices = MeshDevice::from_site(&site, &session);
    let names: Vec<(u8, String)> = devices
        .iter()
        .map(|d| (d.address(), d.info().name.clone()))
        .collect();
    let (device_tx, mut device_rx) = mpsc::unbounded_channel::<DeviceEvent>();
    for device in &devices {
        let tx = device_tx.clone();
        if let Err(e) = device
            .subscribe(move |event| {
                let _ = tx.send(event);
            })
            .await
        {
            error!("Failed to subscribe to {}: {}", device.info().name, e);
        }
    }

    if config.time.enabled {
        session.start_time_sync(site.mesh_addresses(), config.time_sync_config());
    }

    info!("Bridge running with {} devices. Waiting for events...", devices.len());

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => log_session_event(&event),
            Some(event) = device_rx.recv() => log_device_event(&names, &event),
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
        }
    }

    if let Err(e) = session.disconnect().await {
        warn!("Error while disconnecting: {}", e);
    }
    while let Ok(event) = event_rx.try_recv() {
        log_session_event(&event);
    }
    info!("Plejd bridge stopped");
    Ok(())
}
