//! Common utilities for usb-sentinel
//!
//! This crate provides the pieces shared between the monitor library and its
//! binary: the device data model, error taxonomy, logging setup, and the
//! async channel bridge to the monitor thread.

pub mod channel;
pub mod device;
pub mod error;
pub mod logging;

pub use channel::{
    MonitorBridge, MonitorCommand, MonitorEvent, MonitorWorker, create_monitor_bridge,
};
pub use device::{ClassifiedDevice, DeviceRecord, TrustAllReport, TrustEntry, UNKNOWN};
pub use error::{Error, ProviderError, Result, StoreError};
pub use logging::{LogFormat, setup_logging};
