//! Removable volume heuristic
//!
//! Instead of asking the USB stack, look at what the OS reports as removable
//! storage. On Windows that is `wmic logicaldisk` with `DriveType=2`; on
//! Linux it is `/sys/block/*` entries flagged `removable`, whose device path
//! is walked upward to the USB device directory holding `idVendor`,
//! `idProduct` and `serial`.

use super::{DeviceProvider, retain_identified, run_command};
use common::{DeviceRecord, ProviderError, UNKNOWN};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_SYSFS_ROOT: &str = "/sys";

const WMIC_ARGS: &[&str] = &[
    "logicaldisk",
    "where",
    "DriveType=2",
    "get",
    "DeviceID,VolumeName,VolumeSerialNumber",
    "/format:csv",
];

pub struct RemovableVolumeProvider {
    sysfs_root: PathBuf,
}

impl RemovableVolumeProvider {
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
        }
    }

    /// Scan a different sysfs mount (used by tests)
    pub fn with_sysfs_root(root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: root.into(),
        }
    }
}

impl Default for RemovableVolumeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for RemovableVolumeProvider {
    fn name(&self) -> &'static str {
        "removable-volumes"
    }

    fn snapshot(&self) -> Result<Vec<DeviceRecord>, ProviderError> {
        if cfg!(target_os = "windows") {
            let output = run_command("wmic", WMIC_ARGS)?;
            Ok(parse_wmic_csv(&output))
        } else {
            scan_sysfs(&self.sysfs_root)
        }
    }
}

/// Parse `wmic ... /format:csv` output
///
/// The column order is taken from the header row; rows with a different
/// number of columns are skipped.
pub fn parse_wmic_csv(output: &str) -> Vec<DeviceRecord> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());

    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let position = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));

    let (Some(device_col), Some(serial_col)) =
        (position("DeviceID"), position("VolumeSerialNumber"))
    else {
        debug!("Unexpected wmic header: {}", header);
        return Vec::new();
    };
    let label_col = position("VolumeName");

    let records = lines
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != columns.len() {
                return None;
            }
            let drive = fields[device_col];
            let label = label_col.map(|i| fields[i]).unwrap_or_default();
            let name = if label.is_empty() {
                format!("Drive {}", drive)
            } else {
                label.to_string()
            };
            Some(DeviceRecord::new(name, UNKNOWN, UNKNOWN, fields[serial_col]))
        })
        .collect();

    retain_identified(records)
}

/// Enumerate removable block devices under `<root>/block`
pub fn scan_sysfs(root: &Path) -> Result<Vec<DeviceRecord>, ProviderError> {
    let block_dir = root.join("block");
    let read_dir = fs::read_dir(&block_dir).map_err(|e| ProviderError::Read {
        path: block_dir.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut names: Vec<String> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let mut records = Vec::new();
    for name in names {
        let dev_dir = block_dir.join(&name);
        if read_attr(&dev_dir.join("removable")).as_deref() != Some("1") {
            continue;
        }
        let has_media = read_attr(&dev_dir.join("size"))
            .and_then(|s| s.parse::<u64>().ok())
            .is_some_and(|size| size > 0);
        if !has_media {
            debug!("Skipping {}: no media", name);
            continue;
        }

        let Some(usb_dir) = find_usb_ancestor(&dev_dir.join("device"), root) else {
            debug!("Skipping {}: not backed by a USB device", name);
            continue;
        };

        let read = |attr: &str| read_attr(&usb_dir.join(attr));
        records.push(DeviceRecord::new(
            read("product").unwrap_or_else(|| format!("Drive {}", name)),
            read("idVendor").unwrap_or_else(|| UNKNOWN.to_string()),
            read("idProduct").unwrap_or_else(|| UNKNOWN.to_string()),
            read("serial").unwrap_or_default(),
        ));
    }

    Ok(retain_identified(records))
}

/// Walk up from a block device's `device` link to the directory with `idVendor`
fn find_usb_ancestor(device_link: &Path, root: &Path) -> Option<PathBuf> {
    let root = fs::canonicalize(root).ok()?;
    let mut dir = fs::canonicalize(device_link).ok()?;

    while dir.starts_with(&root) {
        if dir.join("idVendor").is_file() {
            return Some(dir);
        }
        if !dir.pop() {
            break;
        }
    }
    None
}

/// Read a sysfs attribute, trimmed; `None` if missing or empty
fn read_attr(path: &Path) -> Option<String> {
    let value = fs::read_to_string(path).ok()?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wmic_csv() {
        let output = "\r\n\
Node,DeviceID,VolumeName,VolumeSerialNumber\r\n\
DESKTOP-1,E:,BACKUP,A1B2C3D4\r\n\
DESKTOP-1,F:,,0011AABB\r\n\
DESKTOP-1,G:,,\r\n\
broken,row\r\n";

        let records = parse_wmic_csv(output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "BACKUP");
        assert_eq!(records[0].serial, "A1B2C3D4");
        assert_eq!(records[0].vendor_id, UNKNOWN);
        assert_eq!(records[1].name, "Drive F:");
        assert_eq!(records[1].serial, "0011AABB");
    }

    #[test]
    fn test_parse_wmic_empty_and_unexpected() {
        assert!(parse_wmic_csv("").is_empty());
        assert!(parse_wmic_csv("No Instance(s) Available.").is_empty());
        assert!(parse_wmic_csv("Node,Foo\nX,Y\n").is_empty());
    }

    #[test]
    fn test_scan_missing_block_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_sysfs(dir.path()).unwrap_err();
        assert!(matches!(err, ProviderError::Read { .. }));
    }

    #[cfg(unix)]
    mod sysfs {
        use super::*;
        use std::os::unix::fs::symlink;

        /// Lay out a USB stick the way the kernel does: the block entry's
        /// `device` link points deep below the USB device directory.
        fn add_usb_disk(
            root: &Path,
            block: &str,
            removable: &str,
            size: &str,
            serial: Option<&str>,
        ) {
            let usb_dev = root.join("devices/pci0000:00/usb1").join(format!("1-{}", block));
            let scsi = usb_dev.join("1-1:1.0/host0/target0:0:0/0:0:0:0");
            fs::create_dir_all(&scsi).unwrap();
            fs::write(usb_dev.join("idVendor"), "0781\n").unwrap();
            fs::write(usb_dev.join("idProduct"), "5567\n").unwrap();
            fs::write(usb_dev.join("product"), "Cruzer Blade\n").unwrap();
            if let Some(serial) = serial {
                fs::write(usb_dev.join("serial"), format!("{}\n", serial)).unwrap();
            }

            let block_dir = root.join("block").join(block);
            fs::create_dir_all(&block_dir).unwrap();
            fs::write(block_dir.join("removable"), format!("{}\n", removable)).unwrap();
            fs::write(block_dir.join("size"), format!("{}\n", size)).unwrap();
            symlink(&scsi, block_dir.join("device")).unwrap();
        }

        #[test]
        fn test_scan_finds_removable_usb_disk() {
            let dir = tempfile::tempdir().unwrap();
            add_usb_disk(dir.path(), "sdb", "1", "30031872", Some("4C530001"));

            let records = scan_sysfs(dir.path()).unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].name, "Cruzer Blade");
            assert_eq!(records[0].vendor_id, "0781");
            assert_eq!(records[0].product_id, "5567");
            assert_eq!(records[0].serial, "4C530001");
        }

        #[test]
        fn test_scan_skips_fixed_empty_and_serialless() {
            let dir = tempfile::tempdir().unwrap();
            add_usb_disk(dir.path(), "sda", "0", "1000", Some("FIXED"));
            add_usb_disk(dir.path(), "sdb", "1", "0", Some("NOMEDIA"));
            add_usb_disk(dir.path(), "sdc", "1", "1000", None);
            add_usb_disk(dir.path(), "sdd", "1", "1000", Some("GOOD"));

            let records = scan_sysfs(dir.path()).unwrap();
            let serials: Vec<_> = records.iter().map(|r| r.serial.as_str()).collect();
            assert_eq!(serials, vec!["GOOD"]);
        }

        #[test]
        fn test_non_usb_block_device_is_skipped() {
            let dir = tempfile::tempdir().unwrap();
            let platform = dir.path().join("devices/platform/mmc0");
            fs::create_dir_all(&platform).unwrap();
            let block_dir = dir.path().join("block/mmcblk0");
            fs::create_dir_all(&block_dir).unwrap();
            fs::write(block_dir.join("removable"), "1").unwrap();
            fs::write(block_dir.join("size"), "1000").unwrap();
            symlink(&platform, block_dir.join("device")).unwrap();

            assert!(scan_sysfs(dir.path()).unwrap().is_empty());
        }
    }
}
