//! Logging setup and configuration

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output
    Pretty,
    /// Single-line human readable output (default)
    #[default]
    Compact,
    /// One JSON object per line
    Json,
}

/// Build the level filter, letting `RUST_LOG` override the configured level
fn build_filter(default_level: &str) -> crate::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))
}

fn open_log_file(path: &Path) -> crate::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Setup tracing subscriber for the application
///
/// Logs go to stdout unless `log_file` is given. The terminal UI passes a
/// file so log lines do not land on top of the rendered screen.
pub fn setup_logging(
    default_level: &str,
    format: LogFormat,
    log_file: Option<&Path>,
) -> crate::Result<()> {
    let filter = build_filter(default_level)?;

    match log_file {
        Some(path) => {
            let file = Mutex::new(open_log_file(path)?);
            let layer = fmt::layer().with_writer(file).with_ansi(false);
            match format {
                LogFormat::Pretty => tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.pretty())
                    .init(),
                LogFormat::Compact => tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.compact())
                    .init(),
                LogFormat::Json => tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.json())
                    .init(),
            }
        }
        None => match format {
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init(),
            LogFormat::Compact => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init(),
        },
    }

    Ok(())
}
