//! Common error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Trust store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure to produce a device snapshot
///
/// The monitor loop recovers from every variant by treating the tick as an
/// empty snapshot. Errors are `Clone` so they can cross the worker channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("failed to run `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("`{command}` exited with {status}")]
    CommandFailed { command: String, status: String },

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("USB enumeration failed: {0}")]
    Usb(String),

    #[error("{0}")]
    Other(String),
}

/// Trust store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device {serial} is already trusted")]
    AlreadyExists { serial: String },

    #[error("device {serial} is not in the trust store")]
    NotFound { serial: String },

    #[error("device has no serial number and cannot be trusted")]
    InvalidSerial,

    #[error("trust store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("trust store {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("trust store {path} could not be loaded, refusing to modify it")]
    Degraded { path: PathBuf },

    #[error("trust store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this is an informational outcome rather than a failure
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. } | Self::NotFound { .. })
    }
}
