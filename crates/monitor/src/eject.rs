//! Optional eject hook for untrusted devices
//!
//! Runs an operator-configured command when an untrusted device connects,
//! e.g. `["diskutil", "unmount", "/Volumes/{name}"]` on macOS or a site
//! script taking `{serial}` on Linux. This is best effort only and not a
//! security boundary: the device is already attached when the hook fires.

use common::DeviceRecord;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum EjectError {
    #[error("eject command is empty")]
    EmptyCommand,

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}")]
    Failed { program: String, status: String },
}

/// Command template with `{serial}`, `{name}`, `{vendor_id}` and
/// `{product_id}` placeholders
#[derive(Debug, Clone)]
pub struct Ejector {
    command: Vec<String>,
}

impl Ejector {
    pub fn new(command: Vec<String>) -> Result<Self, EjectError> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(EjectError::EmptyCommand);
        }
        Ok(Self { command })
    }

    /// Expand the template for `device`
    pub fn render(&self, device: &DeviceRecord) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{serial}", &device.serial)
                    .replace("{name}", &device.name)
                    .replace("{vendor_id}", &device.vendor_id)
                    .replace("{product_id}", &device.product_id)
            })
            .collect()
    }

    /// Run the command for `device`, blocking until it exits
    pub fn eject(&self, device: &DeviceRecord) -> Result<(), EjectError> {
        let argv = self.render(device);
        let (program, args) = argv.split_first().ok_or(EjectError::EmptyCommand)?;

        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|source| EjectError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(EjectError::Failed {
                program: program.clone(),
                status: status.to_string(),
            });
        }

        info!("Ejected untrusted device {}", device.serial);
        Ok(())
    }

    /// Eject, logging instead of returning failures
    pub fn eject_best_effort(&self, device: &DeviceRecord) {
        if let Err(e) = self.eject(device) {
            warn!("Auto-eject of {} failed: {}", device.serial, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceRecord {
        DeviceRecord::new("BACKUP", "0781", "5567", "SN123")
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(Ejector::new(vec![]), Err(EjectError::EmptyCommand)));
        assert!(matches!(
            Ejector::new(vec!["  ".to_string()]),
            Err(EjectError::EmptyCommand)
        ));
    }

    #[test]
    fn test_render_placeholders() {
        let ejector = Ejector::new(vec![
            "diskutil".to_string(),
            "unmount".to_string(),
            "/Volumes/{name}".to_string(),
            "{vendor_id}:{product_id}/{serial}".to_string(),
        ])
        .unwrap();

        assert_eq!(
            ejector.render(&device()),
            vec!["diskutil", "unmount", "/Volumes/BACKUP", "0781:5567/SN123"]
        );
    }

    #[test]
    fn test_missing_program_reports_spawn_error() {
        let ejector = Ejector::new(vec!["definitely-not-a-real-binary-xyz".to_string()]).unwrap();
        assert!(matches!(
            ejector.eject(&device()),
            Err(EjectError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_is_checked() {
        let ok = Ejector::new(vec!["true".to_string()]).unwrap();
        assert!(ok.eject(&device()).is_ok());

        let failing = Ejector::new(vec!["false".to_string()]).unwrap();
        assert!(matches!(
            failing.eject(&device()),
            Err(EjectError::Failed { .. })
        ));
    }
}
