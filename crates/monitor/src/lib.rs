//! usb-sentinel monitor
//!
//! Polls a device provider, diffs successive snapshots by serial number and
//! classifies every newly attached device against a persisted trust store.
//! The binary wires these pieces to a terminal UI, a headless service mode
//! and one-shot CLI actions.

pub mod audit;
pub mod config;
pub mod control;
pub mod eject;
pub mod engine;
pub mod notifier;
pub mod provider;
pub mod service;
pub mod store;
pub mod tui;
pub mod worker;

pub use control::{ControlHandle, RevokeOutcome};
pub use engine::{ConnectedView, MonitorEngine};
pub use provider::{DeviceProvider, ProviderKind, select_provider};
pub use store::TrustStore;
pub use worker::{MonitorWorkerThread, spawn_monitor_worker};
