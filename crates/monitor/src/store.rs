//! Persistent trusted device storage
//!
//! The allow-list of trusted devices, keyed by serial number. Entries live in
//! a `RwLock<HashMap>` and are persisted to a JSON file on every mutation.
//! A mutation holds the write lock while it persists, so readers observe
//! either the old or the new state, never a half-applied one.

use common::{StoreError, TrustEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

const STORE_FORMAT_VERSION: u32 = 1;

/// On-disk representation
#[derive(Debug, Serialize, Deserialize)]
struct TrustStoreData {
    /// Version of the store format (for future migrations)
    version: u32,
    /// Trusted devices
    devices: Vec<TrustEntry>,
}

/// Thread-safe, file-backed store of trusted devices
#[derive(Debug)]
pub struct TrustStore {
    /// Path to the JSON file
    path: PathBuf,
    /// Entries keyed by serial
    entries: RwLock<HashMap<String, TrustEntry>>,
    /// Set when the file exists but could not be loaded
    degraded: bool,
}

impl TrustStore {
    /// Open the store at `path`, loading existing entries
    ///
    /// A missing file yields an empty store; the file is created on the
    /// first successful `add`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = load_entries(&path)?;

        info!(
            "Loaded {} trusted device(s) from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            degraded: false,
        })
    }

    /// A store that could not be loaded
    ///
    /// Every lookup answers "untrusted" and every mutation fails with
    /// `StoreError::Degraded`, leaving the unreadable file untouched.
    pub fn degraded(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: RwLock::new(HashMap::new()),
            degraded: true,
        }
    }

    /// Path to the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether `serial` is trusted
    ///
    /// Fails closed: an unreadable store reports every device as untrusted.
    pub fn is_trusted(&self, serial: &str) -> bool {
        let serial = serial.trim();
        if serial.is_empty() || self.degraded {
            return false;
        }
        match self.entries.read() {
            Ok(entries) => entries.contains_key(serial),
            Err(_) => {
                warn!("Trust store lock poisoned, treating {} as untrusted", serial);
                false
            }
        }
    }

    /// Look up a single entry
    pub fn get(&self, serial: &str) -> Option<TrustEntry> {
        self.read().ok()?.get(serial.trim()).cloned()
    }

    /// All entries, sorted by serial
    pub fn entries(&self) -> Result<Vec<TrustEntry>, StoreError> {
        let mut entries: Vec<TrustEntry> = self.read()?.values().cloned().collect();
        entries.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Trust a device
    ///
    /// Fails with `AlreadyExists` (store unchanged) if the serial is present.
    /// On success the entry is on disk before this returns.
    pub fn add(&self, entry: TrustEntry) -> Result<(), StoreError> {
        let entry = TrustEntry {
            serial: entry.serial.trim().to_string(),
            ..entry
        };
        if entry.serial.is_empty() {
            return Err(StoreError::InvalidSerial);
        }
        self.ensure_writable()?;

        let mut entries = self.write()?;
        if entries.contains_key(&entry.serial) {
            return Err(StoreError::AlreadyExists {
                serial: entry.serial,
            });
        }

        let mut next = entries.clone();
        next.insert(entry.serial.clone(), entry.clone());
        persist(&self.path, &next)?;
        *entries = next;

        info!(
            "Trusted device {} ({} {}:{})",
            entry.serial, entry.name, entry.vendor_id, entry.product_id
        );
        Ok(())
    }

    /// Revoke trust for `serial`, returning the removed entry
    pub fn remove(&self, serial: &str) -> Result<TrustEntry, StoreError> {
        let serial = serial.trim();
        self.ensure_writable()?;

        let mut entries = self.write()?;
        if !entries.contains_key(serial) {
            return Err(StoreError::NotFound {
                serial: serial.to_string(),
            });
        }

        let mut next = entries.clone();
        let removed = next.remove(serial).ok_or_else(|| StoreError::NotFound {
            serial: serial.to_string(),
        })?;
        persist(&self.path, &next)?;
        *entries = next;

        info!("Revoked trust for device {} ({})", removed.serial, removed.name);
        Ok(removed)
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.degraded {
            return Err(StoreError::Degraded {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, TrustEntry>>, StoreError> {
        self.entries
            .read()
            .map_err(|_| StoreError::Unavailable("trust store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, TrustEntry>>, StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::Unavailable("trust store lock poisoned".to_string()))
    }
}

/// Read and validate the store file
fn load_entries(path: &Path) -> Result<HashMap<String, TrustEntry>, StoreError> {
    if !path.exists() {
        debug!("Trust store not found at {}, starting empty", path.display());
        return Ok(HashMap::new());
    }

    let contents = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let data: TrustStoreData =
        serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if data.version > STORE_FORMAT_VERSION {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unsupported format version {}", data.version),
        });
    }

    let mut entries = HashMap::with_capacity(data.devices.len());
    for mut entry in data.devices {
        entry.serial = entry.serial.trim().to_string();
        if entry.serial.is_empty() {
            warn!("Skipping stored entry '{}' without serial", entry.name);
            continue;
        }
        if entries.contains_key(&entry.serial) {
            warn!("Skipping duplicate stored entry for serial {}", entry.serial);
            continue;
        }
        entries.insert(entry.serial.clone(), entry);
    }
    Ok(entries)
}

/// Write the full entry set atomically: temp file, fsync, rename
fn persist(path: &Path, entries: &HashMap<String, TrustEntry>) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut devices: Vec<TrustEntry> = entries.values().cloned().collect();
    devices.sort_by(|a, b| a.serial.cmp(&b.serial));
    let data = TrustStoreData {
        version: STORE_FORMAT_VERSION,
        devices,
    };
    let contents = serde_json::to_string_pretty(&data).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("failed to serialize: {}", e),
    })?;

    let temp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&temp_path).map_err(io_err)?;
        file.write_all(contents.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    if let Err(source) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_err(source));
    }

    debug!("Saved {} trusted device(s) to {}", entries.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(serial: &str) -> TrustEntry {
        TrustEntry {
            name: format!("Drive {}", serial),
            vendor_id: "0781".to_string(),
            product_id: "5567".to_string(),
            serial: serial.to_string(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path().join("trusted.json")).unwrap();
        assert!(store.is_empty());
        assert!(!store.is_trusted("SN1"));
    }

    #[test]
    fn test_add_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path().join("trusted.json")).unwrap();

        store.add(entry("SN1")).unwrap();
        assert!(store.is_trusted("SN1"));
        assert!(store.is_trusted(" SN1 "));
        assert!(!store.is_trusted("SN2"));
        assert_eq!(store.get("SN1").unwrap().name, "Drive SN1");
    }

    #[test]
    fn test_add_rejects_blank_serial() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path().join("trusted.json")).unwrap();

        assert!(matches!(store.add(entry("  ")), Err(StoreError::InvalidSerial)));
        assert!(store.is_empty());
        assert!(!dir.path().join("trusted.json").exists());
    }

    #[test]
    fn test_duplicate_add_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path().join("trusted.json")).unwrap();

        store.add(entry("SN1")).unwrap();
        let mut renamed = entry("SN1");
        renamed.name = "Other".to_string();

        assert!(matches!(
            store.add(renamed),
            Err(StoreError::AlreadyExists { .. })
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("SN1").unwrap().name, "Drive SN1");
    }

    #[test]
    fn test_remove_unknown_serial() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path().join("trusted.json")).unwrap();

        assert!(matches!(
            store.remove("nope"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_temp_file_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trusted.json");
        let store = TrustStore::open(&path).unwrap();

        store.add(entry("SN1")).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_skips_blank_and_duplicate_serials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trusted.json");
        fs::write(
            &path,
            r#"{
                "version": 1,
                "devices": [
                    {"name": "A", "vendor_id": "1", "product_id": "2", "serial": "SN1"},
                    {"name": "B", "vendor_id": "1", "product_id": "2", "serial": ""},
                    {"name": "C", "vendor_id": "1", "product_id": "2", "serial": "SN1"}
                ]
            }"#,
        )
        .unwrap();

        let store = TrustStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("SN1").unwrap().name, "A");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trusted.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            TrustStore::open(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_future_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trusted.json");
        fs::write(&path, r#"{"version": 99, "devices": []}"#).unwrap();

        assert!(matches!(
            TrustStore::open(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_degraded_store_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trusted.json");
        fs::write(&path, "garbage").unwrap();

        let store = TrustStore::degraded(&path);
        assert!(store.is_degraded());
        assert!(!store.is_trusted("SN1"));
        assert!(matches!(
            store.add(entry("SN1")),
            Err(StoreError::Degraded { .. })
        ));
        assert!(matches!(
            store.remove("SN1"),
            Err(StoreError::Degraded { .. })
        ));

        // The unreadable file is left as it was
        assert_eq!(fs::read_to_string(&path).unwrap(), "garbage");
    }
}
