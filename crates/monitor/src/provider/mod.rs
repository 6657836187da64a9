//! Device providers
//!
//! A provider produces the current snapshot of attached devices. The monitor
//! engine is polymorphic over [`DeviceProvider`]; which implementation runs
//! is decided once at startup from [`ProviderKind`].
//!
//! Providers run on the monitor thread and may block for the duration of a
//! subprocess or system call. No timeout is imposed on a snapshot: a provider
//! that hangs stalls the poll loop.

pub mod libusb;
pub mod profiler;
pub mod scripted;
pub mod volumes;

pub use libusb::LibusbProvider;
pub use profiler::SystemProfilerProvider;
pub use scripted::ScriptedProvider;
pub use volumes::RemovableVolumeProvider;

use common::{DeviceRecord, ProviderError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use std::str::FromStr;
use tracing::debug;

/// Source of device snapshots
pub trait DeviceProvider: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Current devices, in provider order
    ///
    /// "No devices" is `Ok(vec![])`. Records without a serial are already
    /// removed.
    fn snapshot(&self) -> Result<Vec<DeviceRecord>, ProviderError>;
}

impl<P: DeviceProvider + ?Sized> DeviceProvider for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn snapshot(&self) -> Result<Vec<DeviceRecord>, ProviderError> {
        (**self).snapshot()
    }
}

/// Which provider to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Pick by host operating system
    #[default]
    Auto,
    /// `system_profiler SPUSBDataType` (macOS)
    SystemProfiler,
    /// Removable volumes (sysfs on Linux, `wmic` on Windows)
    RemovableVolumes,
    /// libusb enumeration with string descriptors
    Libusb,
}

impl ProviderKind {
    /// Resolve `Auto` for the given OS name (as in `std::env::consts::OS`)
    pub fn resolve_for(self, os: &str) -> ProviderKind {
        match self {
            ProviderKind::Auto => match os {
                "macos" => ProviderKind::SystemProfiler,
                "windows" => ProviderKind::RemovableVolumes,
                _ => ProviderKind::Libusb,
            },
            other => other,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderKind::Auto => "auto",
            ProviderKind::SystemProfiler => "system-profiler",
            ProviderKind::RemovableVolumes => "removable-volumes",
            ProviderKind::Libusb => "libusb",
        };
        f.write_str(s)
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ProviderKind::Auto),
            "system-profiler" | "system_profiler" | "profiler" => Ok(ProviderKind::SystemProfiler),
            "removable-volumes" | "removable_volumes" | "volumes" => {
                Ok(ProviderKind::RemovableVolumes)
            }
            "libusb" | "usb" => Ok(ProviderKind::Libusb),
            other => Err(format!(
                "unknown provider '{}', expected one of: auto, system-profiler, removable-volumes, libusb",
                other
            )),
        }
    }
}

/// Build the provider for this host
pub fn select_provider(kind: ProviderKind) -> Result<Box<dyn DeviceProvider>, ProviderError> {
    let resolved = kind.resolve_for(std::env::consts::OS);
    debug!("Provider {} resolved to {}", kind, resolved);

    Ok(match resolved {
        ProviderKind::SystemProfiler => Box::new(SystemProfilerProvider::new()),
        ProviderKind::RemovableVolumes => Box::new(RemovableVolumeProvider::new()),
        ProviderKind::Libusb | ProviderKind::Auto => Box::new(LibusbProvider::new()?),
    })
}

/// Drop records without identity, keeping provider order
pub fn retain_identified(records: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    records
        .into_iter()
        .filter(|record| {
            let keep = record.is_identified();
            if !keep {
                debug!("Dropping device '{}' without serial", record.name);
            }
            keep
        })
        .collect()
}

/// Run an external command and return its stdout
pub(crate) fn run_command(program: &str, args: &[&str]) -> Result<String, ProviderError> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| ProviderError::Spawn {
            command: command_line.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ProviderError::CommandFailed {
            command: command_line,
            status: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_resolution() {
        assert_eq!(
            ProviderKind::Auto.resolve_for("macos"),
            ProviderKind::SystemProfiler
        );
        assert_eq!(
            ProviderKind::Auto.resolve_for("windows"),
            ProviderKind::RemovableVolumes
        );
        assert_eq!(ProviderKind::Auto.resolve_for("linux"), ProviderKind::Libusb);
        assert_eq!(
            ProviderKind::RemovableVolumes.resolve_for("macos"),
            ProviderKind::RemovableVolumes
        );
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("volumes".parse::<ProviderKind>(), Ok(ProviderKind::RemovableVolumes));
        assert_eq!(
            "System-Profiler".parse::<ProviderKind>(),
            Ok(ProviderKind::SystemProfiler)
        );
        assert!("floppy".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_kind_display_roundtrips() {
        for kind in [
            ProviderKind::Auto,
            ProviderKind::SystemProfiler,
            ProviderKind::RemovableVolumes,
            ProviderKind::Libusb,
        ] {
            assert_eq!(kind.to_string().parse::<ProviderKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_retain_identified() {
        let records = vec![
            DeviceRecord::new("a", "1", "2", "SN1"),
            DeviceRecord::new("b", "1", "2", ""),
            DeviceRecord::new("c", "1", "2", "SN3"),
        ];
        let kept = retain_identified(records);
        let serials: Vec<_> = kept.iter().map(|r| r.serial.as_str()).collect();
        assert_eq!(serials, vec!["SN1", "SN3"]);
    }

    #[test]
    fn test_run_command_missing_binary() {
        let err = run_command("definitely-not-a-real-binary-xyz", &[]).unwrap_err();
        assert!(matches!(err, ProviderError::Spawn { .. }));
    }
}
