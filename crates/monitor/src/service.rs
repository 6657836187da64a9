//! Headless service mode
//!
//! Drains monitor events (logging and auditing already happen on the worker
//! through its notifiers) until Ctrl+C, and reports lifecycle to systemd via
//! the sd-notify protocol when `NOTIFY_SOCKET` is set.
//!
//! Only the initial `READY=1` is allowed to fail the service. Once running,
//! a failed status update is logged and monitoring continues.

use crate::control::ControlHandle;
use anyhow::{Context, Result};
use std::env;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use tokio::signal;
use tracing::{debug, error, info, warn};

/// Run until Ctrl+C or until the monitor worker goes away
pub async fn run(control: &ControlHandle) -> Result<()> {
    run_until(control, signal::ctrl_c(), SystemdNotify::from_env()).await
}

/// Service loop, stopping when `shutdown` resolves
pub async fn run_until(
    control: &ControlHandle,
    shutdown: impl Future<Output = io::Result<()>>,
    systemd: SystemdNotify,
) -> Result<()> {
    if systemd.is_enabled() {
        info!("Running under systemd");
    }

    systemd.ready()?;
    systemd.status_or_warn("Monitoring, no untrusted devices seen");
    info!("Press Ctrl+C to shutdown");

    let mut alerts: u64 = 0;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                break;
            }

            event = control.recv_event() => {
                let event = event.context("Monitor worker stopped")?;
                debug!("Monitor event: {:?}", event);
                if event.is_alert() {
                    alerts += 1;
                    systemd.status_or_warn(&format!(
                        "Monitoring, {} untrusted connection(s) seen",
                        alerts
                    ));
                }
            }
        }
    }

    if let Err(e) = systemd.stopping() {
        warn!("{:#}", e);
    }
    Ok(())
}

/// sd-notify target
#[derive(Debug, Clone, Default)]
pub struct SystemdNotify {
    socket: Option<PathBuf>,
}

impl SystemdNotify {
    /// Use `NOTIFY_SOCKET`, or do nothing when it is unset
    pub fn from_env() -> Self {
        Self {
            socket: env::var_os("NOTIFY_SOCKET").map(PathBuf::from),
        }
    }

    pub fn for_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            socket: Some(path.into()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.socket.is_some()
    }

    pub fn ready(&self) -> Result<()> {
        self.send("READY=1")
    }

    pub fn stopping(&self) -> Result<()> {
        self.send("STOPPING=1")
    }

    /// Status line shown by `systemctl status`
    pub fn status(&self, status: &str) -> Result<()> {
        self.send(&format!("STATUS={}", status))
    }

    fn status_or_warn(&self, status: &str) {
        if let Err(e) = self.status(status) {
            warn!("{:#}", e);
        }
    }

    /// Send a raw sd-notify message
    #[cfg(unix)]
    fn send(&self, message: &str) -> Result<()> {
        use std::os::unix::net::UnixDatagram;

        let Some(socket_path) = &self.socket else {
            debug!("NOTIFY_SOCKET not set, skipping systemd notification");
            return Ok(());
        };

        let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
        socket
            .send_to(message.as_bytes(), socket_path)
            .with_context(|| format!("Failed to send {} to systemd", message))?;
        debug!("Notified systemd: {}", message);
        Ok(())
    }

    #[cfg(not(unix))]
    fn send(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}
