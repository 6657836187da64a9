//! usb-sentinel
//!
//! Watches for USB storage devices and raises an alert when one whose serial
//! number is not in the trust store is attached.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{create_monitor_bridge, setup_logging};
use monitor::audit::AuditLogger;
use monitor::config::{MonitorConfig, validate_log_level};
use monitor::control::{RevokeOutcome, revoke_serial};
use monitor::notifier::{AuditNotifier, LogNotifier, NotifierChain};
use monitor::{
    ControlHandle, MonitorEngine, MonitorWorkerThread, ProviderKind, TrustStore, select_provider,
    service, spawn_monitor_worker, tui,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-sentinel")]
#[command(
    author,
    version,
    about = "USB Sentinel - Alert on untrusted USB storage devices"
)]
#[command(long_about = "
Polls the attached USB devices, compares their serial numbers against a
trust store, and alerts when an unknown device is plugged in.

EXAMPLES:
    # Interactive terminal UI
    usb-sentinel

    # Headless (systemd) mode
    usb-sentinel --service

    # Show attached devices with their trust status
    usb-sentinel --list-devices

    # Trust everything currently plugged in
    usb-sentinel --trust-all

    # Revoke trust for one device
    usb-sentinel --revoke 4C530001234567891234

CONFIGURATION:
    Configuration files are looked up in this order:
    1. Path specified with --config
    2. ~/.config/usb-sentinel/monitor.toml
    3. /etc/usb-sentinel/monitor.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Run headless (no TUI)
    #[arg(long)]
    service: bool,

    /// List attached devices with trust status and exit
    #[arg(long)]
    list_devices: bool,

    /// List trusted devices and exit
    #[arg(long)]
    list_trusted: bool,

    /// Trust every attached device and exit
    #[arg(long)]
    trust_all: bool,

    /// Revoke trust for a serial number and exit
    #[arg(long, value_name = "SERIAL")]
    revoke: Option<String>,

    /// Device provider (auto, system-profiler, removable-volumes, libusb)
    #[arg(long, value_name = "KIND")]
    provider: Option<ProviderKind>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn is_one_shot(&self) -> bool {
        self.list_devices || self.list_trusted || self.trust_all || self.revoke.is_some()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = MonitorConfig::default();
        let path = MonitorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match args.config {
        Some(ref path) => {
            MonitorConfig::load(Some(path.clone())).context("Failed to load configuration")?
        }
        None => MonitorConfig::load_or_default(),
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.monitor.log_level);
    validate_log_level(log_level)?;

    let service_mode = args.service || config.monitor.service_mode;
    let tui_mode = !args.is_one_shot() && !service_mode;

    // The TUI owns the terminal, so its logs go to a file
    let log_file = tui_mode.then(|| config.monitor.log_file_path());
    setup_logging(log_level, config.monitor.log_format, log_file.as_deref())
        .context("Failed to setup logging")?;

    info!("usb-sentinel v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let store = Arc::new(open_store(&config.store.path));
    let audit = AuditLogger::new(config.audit.clone()).map(Arc::new);

    let result = if args.list_trusted {
        list_trusted_mode(&store)
    } else if let Some(ref serial) = args.revoke {
        revoke_mode(store, serial, audit.as_deref()).await
    } else {
        let kind = args.provider.unwrap_or(config.monitor.provider);
        let provider = select_provider(kind).context("Failed to initialise device provider")?;
        let engine = MonitorEngine::new(provider, store.clone());

        if args.list_devices {
            list_devices_mode(engine).await
        } else if args.trust_all {
            trust_all_mode(engine, audit.as_deref()).await
        } else {
            run_monitor(&config, engine, store, audit.clone(), service_mode).await
        }
    };

    if let Some(audit) = &audit {
        audit.shutdown().await;
    }

    result
}

/// Open the trust store, falling back to a fail-closed store if the file is
/// unreadable
fn open_store(path: &Path) -> TrustStore {
    match TrustStore::open(path) {
        Ok(store) => {
            info!(
                "Trust store {} loaded ({} trusted devices)",
                path.display(),
                store.len()
            );
            store
        }
        Err(e) => {
            error!("{}", e);
            warn!("Every device will be reported as untrusted until the trust store is repaired");
            TrustStore::degraded(path)
        }
    }
}

/// Run the poll loop with either the TUI or the service loop in front
async fn run_monitor(
    config: &MonitorConfig,
    engine: MonitorEngine,
    store: Arc<TrustStore>,
    audit: Option<Arc<AuditLogger>>,
    service_mode: bool,
) -> Result<()> {
    let provider_name = engine.provider_name();
    let engine = match config.ejector()? {
        Some(ejector) => {
            info!("Auto-eject enabled for untrusted devices");
            engine.with_ejector(ejector)
        }
        None => engine,
    };

    let mut notifiers = NotifierChain::new().with(LogNotifier);
    if let Some(audit) = &audit {
        notifiers = notifiers.with(AuditNotifier::new(audit.clone()));
        audit.log_monitor_started(env!("CARGO_PKG_VERSION"), provider_name);
    }

    let (bridge, worker) = create_monitor_bridge();
    let worker_thread = MonitorWorkerThread::new(engine, worker, config.monitor.poll_interval)
        .with_notifier(Box::new(notifiers));
    let worker_handle =
        spawn_monitor_worker(worker_thread).context("Failed to spawn monitor worker thread")?;

    let control = ControlHandle::new(bridge, store).with_audit(audit.clone());

    let result = if service_mode {
        info!("Running in service mode (headless)");
        service::run(&control).await
    } else {
        info!("Running in TUI mode (interactive)");
        tui::run(control.clone(), provider_name).await
    };

    info!("Stopping monitor worker...");
    if let Err(e) = control.shutdown().await {
        // Already gone if the worker exited on its own
        warn!("Could not send shutdown to monitor worker: {}", e);
    }
    drop(control);

    match tokio::task::spawn_blocking(move || worker_handle.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Monitor worker thread panicked: {:?}", e),
        Err(e) => error!("Failed to join monitor worker thread: {}", e),
    }

    if let Some(audit) = &audit {
        audit.log_monitor_stopped();
    }

    result
}

/// List attached devices and exit
async fn list_devices_mode(engine: MonitorEngine) -> Result<()> {
    let devices = tokio::task::spawn_blocking(move || engine.list_current())
        .await?
        .context("Failed to list devices")?;

    if devices.is_empty() {
        println!("No USB devices with a serial number found.");
        return Ok(());
    }

    println!("Found {} device(s):\n", devices.len());
    for classified in devices {
        let status = if classified.trusted {
            "trusted"
        } else {
            "UNTRUSTED"
        };
        println!("  [{}] {}", status, classified.device);
    }
    Ok(())
}

/// Trust every attached device and exit
async fn trust_all_mode(engine: MonitorEngine, audit: Option<&AuditLogger>) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || engine.trust_all_current())
        .await?
        .context("Failed to read attached devices")?;

    for entry in &report.added {
        println!("Trusted: {} ({})", entry.serial, entry.name);
        if let Some(audit) = audit {
            audit.log_device_trusted(entry);
        }
    }
    for serial in &report.already_trusted {
        println!("Already trusted: {}", serial);
    }
    for (serial, reason) in &report.failed {
        eprintln!("Failed: {}: {}", serial, reason);
        if let Some(audit) = audit {
            audit.log_trust_failure(serial, reason);
        }
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err(anyhow!("{} device(s) could not be trusted", report.failed.len()))
    }
}

/// Revoke one serial and exit
async fn revoke_mode(
    store: Arc<TrustStore>,
    serial: &str,
    audit: Option<&AuditLogger>,
) -> Result<()> {
    let target = serial.to_string();
    let outcome = tokio::task::spawn_blocking(move || revoke_serial(&store, &target))
        .await?
        .with_context(|| format!("Failed to revoke {}", serial))?;

    match &outcome {
        RevokeOutcome::Removed(entry) => {
            println!("Revoked trust for {} ({})", entry.serial, entry.name);
            if let Some(audit) = audit {
                audit.log_device_revoked(&entry.serial, Some(entry));
            }
        }
        RevokeOutcome::NotTrusted => {
            println!("{} is not in the trust store", serial.trim());
            if let Some(audit) = audit {
                audit.log_device_revoked(serial.trim(), None);
            }
        }
    }
    Ok(())
}

/// List trusted devices and exit
fn list_trusted_mode(store: &TrustStore) -> Result<()> {
    let entries = store.entries().context("Failed to read trust store")?;

    if entries.is_empty() {
        println!("No trusted devices.");
        return Ok(());
    }

    println!("{} trusted device(s):\n", entries.len());
    for entry in entries {
        println!(
            "  {} [{}:{}] serial {}",
            entry.name, entry.vendor_id, entry.product_id, entry.serial
        );
    }
    Ok(())
}
