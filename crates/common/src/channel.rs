//! Async channel bridge between the Tokio runtime and the monitor thread

use crate::device::{ClassifiedDevice, DeviceRecord, TrustAllReport};
use crate::error::ProviderError;
use async_channel::{Receiver, Sender, TrySendError, bounded};
use tokio::sync::oneshot;
use tracing::debug;

/// Commands from the operator side to the monitor thread
#[derive(Debug)]
pub enum MonitorCommand {
    /// Re-fetch a snapshot and classify every device in it
    ListCurrent {
        /// Channel to send response back
        response: oneshot::Sender<Result<Vec<ClassifiedDevice>, ProviderError>>,
    },

    /// Add every attached, not yet trusted device to the trust store
    TrustAllCurrent {
        /// Channel to send response back
        response: oneshot::Sender<Result<TrustAllReport, ProviderError>>,
    },

    /// Stop the poll loop after the current tick
    Shutdown,
}

/// Events emitted by the monitor thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A serial went from absent to present
    DeviceConnected {
        /// Record as reported by the provider
        device: DeviceRecord,
        /// Trust status at the moment of the event
        trusted: bool,
    },

    /// A previously connected serial is no longer reported
    DeviceDisconnected {
        /// Serial of the vanished device
        serial: String,
    },

    /// The provider started failing (sent once per failure streak)
    ProviderFailed {
        /// Description of the first failure
        reason: String,
    },

    /// The provider produced a snapshot again after failing
    ProviderRecovered,
}

impl MonitorEvent {
    /// Whether the event needs an operator-facing alert
    pub fn is_alert(&self) -> bool {
        matches!(self, Self::DeviceConnected { trusted: false, .. })
    }
}

/// Handle for the Tokio runtime (async)
#[derive(Clone)]
pub struct MonitorBridge {
    cmd_tx: Sender<MonitorCommand>,
    event_rx: Receiver<MonitorEvent>,
}

impl MonitorBridge {
    /// Send a command to the monitor thread
    pub async fn send_command(&self, cmd: MonitorCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the monitor thread
    pub async fn recv_event(&self) -> crate::Result<MonitorEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event if one is queued
    pub fn try_recv_event(&self) -> Option<MonitorEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Handle for the monitor thread (blocking)
pub struct MonitorWorker {
    cmd_rx: Receiver<MonitorCommand>,
    event_tx: Sender<MonitorEvent>,
}

impl MonitorWorker {
    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<MonitorCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Whether every bridge handle has been dropped
    pub fn is_orphaned(&self) -> bool {
        self.cmd_rx.is_closed()
    }

    /// Send an event to the Tokio runtime
    ///
    /// Blocks while the queue is full so alerts are never dropped.
    pub fn send_event(&self, event: MonitorEvent) -> crate::Result<()> {
        match self.event_tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                debug!(
                    "Event queue full ({} queued), waiting for the runtime to drain it",
                    self.event_tx.len()
                );
                self.event_tx
                    .send_blocking(event)
                    .map_err(|e| crate::Error::Channel(e.to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(crate::Error::Channel("event receiver closed".to_string()))
            }
        }
    }
}

/// Create the channel bridge between Tokio and the monitor thread
///
/// Returns (MonitorBridge for Tokio, MonitorWorker for the monitor thread)
pub fn create_monitor_bridge() -> (MonitorBridge, MonitorWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        MonitorBridge { cmd_tx, event_rx },
        MonitorWorker { cmd_rx, event_tx },
    )
}
