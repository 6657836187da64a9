//! Audit logging
//!
//! Structured JSON-lines record of what the monitor saw and what the operator
//! changed: device connections, trust grants and revocations, provider
//! outages, and monitor start/stop. Entries are written by a background task
//! so callers never block on file I/O, which also makes it safe to log from
//! the monitor worker thread.

use crate::config::AuditConfig;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use common::{DeviceRecord, MonitorEvent, TrustEntry};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Minimum level for audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Everything, including disconnects
    All,
    /// Everything except disconnects (default)
    #[default]
    Standard,
    /// Untrusted connections and trust store changes only
    Security,
    /// Disable audit logging
    Off,
}

impl AuditLevel {
    /// Check if an entry should be logged at this level
    fn should_log(&self, entry: &AuditEntry) -> bool {
        match self {
            AuditLevel::Off => false,
            AuditLevel::Security => match entry.event_type {
                AuditEventType::DeviceConnected => matches!(entry.result, AuditResult::Denied),
                AuditEventType::DeviceTrusted | AuditEventType::DeviceRevoked => true,
                _ => false,
            },
            AuditLevel::Standard => !matches!(entry.event_type, AuditEventType::DeviceDisconnected),
            AuditLevel::All => true,
        }
    }
}

/// Types of audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    MonitorStarted,
    MonitorStopped,
    DeviceConnected,
    DeviceDisconnected,
    /// Serial added to the trust store
    DeviceTrusted,
    /// Serial removed from the trust store
    DeviceRevoked,
    ProviderFailed,
    ProviderRecovered,
}

/// Outcome recorded with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    /// Device was not trusted
    Denied,
}

/// Event-specific details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditDetails {
    Device {
        name: String,
        vendor_id: String,
        product_id: String,
    },
    Provider {
        reason: String,
    },
    Message {
        message: String,
    },
    Lifecycle {
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    },
}

impl AuditDetails {
    fn device(name: &str, vendor_id: &str, product_id: &str) -> Self {
        Self::Device {
            name: name.to_string(),
            vendor_id: vendor_id.to_string(),
            product_id: product_id.to_string(),
        }
    }
}

/// A structured audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// RFC 3339 timestamp (UTC)
    pub timestamp: String,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<AuditDetails>,
}

impl AuditEntry {
    /// Create a new audit entry with the current timestamp
    pub fn new(event_type: AuditEventType, result: AuditResult) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type,
            serial: None,
            result,
            details: None,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_details(mut self, details: AuditDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Entry for a monitor event
    pub fn from_event(event: &MonitorEvent) -> Self {
        match event {
            MonitorEvent::DeviceConnected { device, trusted } => {
                let result = if *trusted {
                    AuditResult::Success
                } else {
                    AuditResult::Denied
                };
                Self::new(AuditEventType::DeviceConnected, result)
                    .with_serial(&device.serial)
                    .with_details(device_details(device))
            }
            MonitorEvent::DeviceDisconnected { serial } => {
                Self::new(AuditEventType::DeviceDisconnected, AuditResult::Success)
                    .with_serial(serial)
            }
            MonitorEvent::ProviderFailed { reason } => {
                Self::new(AuditEventType::ProviderFailed, AuditResult::Failure)
                    .with_details(AuditDetails::Provider {
                        reason: reason.clone(),
                    })
            }
            MonitorEvent::ProviderRecovered => {
                Self::new(AuditEventType::ProviderRecovered, AuditResult::Success)
            }
        }
    }
}

fn device_details(device: &DeviceRecord) -> AuditDetails {
    AuditDetails::device(&device.name, &device.vendor_id, &device.product_id)
}

/// Message sent to the audit writer task
enum AuditMessage {
    Log(AuditEntry),
    /// Flush and stop; the sender is notified once the file is closed
    Shutdown(Option<oneshot::Sender<()>>),
}

/// Async audit logger that writes to a file in the background
pub struct AuditLogger {
    sender: mpsc::UnboundedSender<AuditMessage>,
    level: AuditLevel,
}

impl AuditLogger {
    /// Create a new audit logger
    ///
    /// Returns None if audit logging is disabled. Must be called from within
    /// a Tokio runtime.
    pub fn new(config: AuditConfig) -> Option<Self> {
        if !config.enabled || config.level == AuditLevel::Off {
            return None;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let level = config.level;
        let writer = AuditWriter::new(config);

        tokio::spawn(async move {
            writer.run(receiver).await;
        });

        Some(Self { sender, level })
    }

    /// Log an audit entry
    pub fn log(&self, entry: AuditEntry) {
        if !self.level.should_log(&entry) {
            return;
        }

        if self.sender.send(AuditMessage::Log(entry)).is_err() {
            warn!("Audit writer has stopped, dropping entry");
        }
    }

    /// Stop the writer after everything queued so far is written
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(AuditMessage::Shutdown(Some(tx))).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn log_event(&self, event: &MonitorEvent) {
        self.log(AuditEntry::from_event(event));
    }

    pub fn log_monitor_started(&self, version: &str, provider: &str) {
        self.log(
            AuditEntry::new(AuditEventType::MonitorStarted, AuditResult::Success).with_details(
                AuditDetails::Lifecycle {
                    version: Some(version.to_string()),
                    provider: Some(provider.to_string()),
                },
            ),
        );
    }

    pub fn log_monitor_stopped(&self) {
        self.log(AuditEntry::new(
            AuditEventType::MonitorStopped,
            AuditResult::Success,
        ));
    }

    pub fn log_device_trusted(&self, entry: &TrustEntry) {
        self.log(
            AuditEntry::new(AuditEventType::DeviceTrusted, AuditResult::Success)
                .with_serial(&entry.serial)
                .with_details(AuditDetails::device(
                    &entry.name,
                    &entry.vendor_id,
                    &entry.product_id,
                )),
        );
    }

    /// Record a revoke attempt; `removed` is `None` when nothing was trusted
    pub fn log_device_revoked(&self, serial: &str, removed: Option<&TrustEntry>) {
        let entry = match removed {
            Some(removed) => AuditEntry::new(AuditEventType::DeviceRevoked, AuditResult::Success)
                .with_serial(serial)
                .with_details(AuditDetails::device(
                    &removed.name,
                    &removed.vendor_id,
                    &removed.product_id,
                )),
            None => AuditEntry::new(AuditEventType::DeviceRevoked, AuditResult::Failure)
                .with_serial(serial)
                .with_details(AuditDetails::Message {
                    message: "not trusted".to_string(),
                }),
        };
        self.log(entry);
    }

    pub fn log_trust_failure(&self, serial: &str, reason: &str) {
        self.log(
            AuditEntry::new(AuditEventType::DeviceTrusted, AuditResult::Failure)
                .with_serial(serial)
                .with_details(AuditDetails::Message {
                    message: reason.to_string(),
                }),
        );
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        let _ = self.sender.send(AuditMessage::Shutdown(None));
    }
}

/// Background writer for audit log entries
struct AuditWriter {
    config: AuditConfig,
    file: Option<BufWriter<File>>,
    current_file_size: u64,
}

impl AuditWriter {
    fn new(config: AuditConfig) -> Self {
        Self {
            config,
            file: None,
            current_file_size: 0,
        }
    }

    /// Open or reopen the audit log file
    fn open_file(&mut self) -> Result<()> {
        let path = &self.config.path;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create audit log directory: {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit log: {:?}", path))?;

        self.current_file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.file = Some(BufWriter::new(file));

        debug!("Opened audit log: {:?}", path);
        Ok(())
    }

    fn write_entry(&mut self, entry: &AuditEntry) -> Result<()> {
        if self.file.is_none() {
            self.open_file()?;
        }

        let mut line = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        line.push('\n');

        if let Some(ref mut writer) = self.file {
            writer
                .write_all(line.as_bytes())
                .context("Failed to write audit entry")?;
            writer.flush().context("Failed to flush audit log")?;
            self.current_file_size += line.len() as u64;
        }

        if self.should_rotate() {
            self.rotate()?;
        }

        Ok(())
    }

    fn should_rotate(&self) -> bool {
        self.config
            .max_size_mb
            .is_some_and(|mb| self.current_file_size >= u64::from(mb) * 1024 * 1024)
    }

    /// Shift `audit.log.N` up by one, dropping the oldest, and start a new file
    fn rotate(&mut self) -> Result<()> {
        self.file = None;

        let path = self.config.path.clone();
        let max_files = self.config.max_files.max(1);

        let oldest = rotated_path(&path, max_files);
        if oldest.exists() {
            std::fs::remove_file(&oldest).ok();
        }
        for i in (1..max_files).rev() {
            let old_path = rotated_path(&path, i);
            if old_path.exists() {
                std::fs::rename(&old_path, rotated_path(&path, i + 1)).ok();
            }
        }
        if path.exists() {
            std::fs::rename(&path, rotated_path(&path, 1)).ok();
        }

        debug!("Rotated audit log: {:?}", path);
        self.open_file()
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<AuditMessage>) {
        let mut ack = None;

        while let Some(message) = receiver.recv().await {
            match message {
                AuditMessage::Log(entry) => {
                    if let Err(e) = self.write_entry(&entry) {
                        error!("Failed to write audit log entry: {:#}", e);
                    }
                }
                AuditMessage::Shutdown(done) => {
                    debug!("Audit logger shutting down");
                    ack = done;
                    break;
                }
            }
        }

        if let Some(ref mut writer) = self.file {
            let _ = writer.flush();
        }
        self.file = None;

        if let Some(done) = ack {
            let _ = done.send(());
        }
    }
}

/// Path of the `index`th rotated file (`audit.log.1`, ...)
fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let file_name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("audit.log");

    base.with_file_name(format!("{}.{}", file_name, index))
}
