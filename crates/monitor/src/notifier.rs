//! Event sinks
//!
//! The worker hands every monitor event to a [`Notifier`] before putting it
//! on the bridge. The terminal UI consumes events from the bridge itself;
//! notifiers cover the surfaces that must see events even when nobody is
//! reading the bridge (logs, audit file).

use crate::audit::AuditLogger;
use common::MonitorEvent;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub trait Notifier: Send {
    fn notify(&mut self, event: &MonitorEvent);
}

/// Writes events to the tracing log; untrusted connections at `warn`
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, event: &MonitorEvent) {
        match event {
            MonitorEvent::DeviceConnected {
                device,
                trusted: true,
            } => info!("Trusted device connected: {}", device),
            MonitorEvent::DeviceConnected {
                device,
                trusted: false,
            } => warn!("UNTRUSTED device connected: {}", device),
            MonitorEvent::DeviceDisconnected { serial } => {
                debug!("Device disconnected: {}", serial)
            }
            MonitorEvent::ProviderFailed { reason } => {
                warn!("Device provider failing, treating as no devices: {}", reason)
            }
            MonitorEvent::ProviderRecovered => info!("Device provider recovered"),
        }
    }
}

/// Appends events to the audit log
pub struct AuditNotifier {
    logger: Arc<AuditLogger>,
}

impl AuditNotifier {
    pub fn new(logger: Arc<AuditLogger>) -> Self {
        Self { logger }
    }
}

impl Notifier for AuditNotifier {
    fn notify(&mut self, event: &MonitorEvent) {
        self.logger.log_event(event);
    }
}

/// Fans an event out to several notifiers, in order
#[derive(Default)]
pub struct NotifierChain {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Notifier for NotifierChain {
    fn notify(&mut self, event: &MonitorEvent) {
        for notifier in &mut self.notifiers {
            notifier.notify(event);
        }
    }
}
