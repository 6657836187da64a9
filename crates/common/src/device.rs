//! Device records, trust entries and classification results

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used by providers for fields the platform does not report
pub const UNKNOWN: &str = "Unknown";

/// One device as reported by a provider snapshot
///
/// `serial` is the identity key. A record with an empty (or whitespace-only)
/// serial carries no identity and must be dropped before classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    pub vendor_id: String,
    pub product_id: String,
    pub serial: String,
}

impl DeviceRecord {
    /// Create a record, trimming surrounding whitespace from every field
    pub fn new(
        name: impl Into<String>,
        vendor_id: impl Into<String>,
        product_id: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            name: trimmed(name.into()),
            vendor_id: trimmed(vendor_id.into()),
            product_id: trimmed(product_id.into()),
            serial: trimmed(serial.into()),
        }
    }

    /// Whether the record has a usable identity
    pub fn is_identified(&self) -> bool {
        !self.serial.trim().is_empty()
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}:{}] serial {}",
            self.name, self.vendor_id, self.product_id, self.serial
        )
    }
}

fn trimmed(s: String) -> String {
    let t = s.trim();
    if t.len() == s.len() { s } else { t.to_string() }
}

/// A persisted allow-list entry, keyed by serial
///
/// Entries are never edited in place: revoke and re-add to change metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEntry {
    pub name: String,
    pub vendor_id: String,
    pub product_id: String,
    pub serial: String,
}

impl From<&DeviceRecord> for TrustEntry {
    fn from(device: &DeviceRecord) -> Self {
        Self {
            name: device.name.clone(),
            vendor_id: device.vendor_id.clone(),
            product_id: device.product_id.clone(),
            serial: device.serial.clone(),
        }
    }
}

impl From<DeviceRecord> for TrustEntry {
    fn from(device: DeviceRecord) -> Self {
        Self {
            name: device.name,
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            serial: device.serial,
        }
    }
}

/// A device paired with its trust status at the time of the query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedDevice {
    pub device: DeviceRecord,
    pub trusted: bool,
}

/// Outcome of trusting every currently attached device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustAllReport {
    /// Entries newly written to the store
    pub added: Vec<TrustEntry>,
    /// Serials that were trusted already (including lost insert races)
    pub already_trusted: Vec<String>,
    /// Serials whose insert failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl TrustAllReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_fields() {
        let record = DeviceRecord::new(" Drive E ", "0781 ", "5567", "  SN123\n");
        assert_eq!(record.name, "Drive E");
        assert_eq!(record.vendor_id, "0781");
        assert_eq!(record.serial, "SN123");
        assert!(record.is_identified());
    }

    #[test]
    fn test_blank_serial_is_not_identified() {
        assert!(!DeviceRecord::new("x", "1", "2", "").is_identified());
        assert!(!DeviceRecord::new("x", "1", "2", "   ").is_identified());

        // Constructed without `new`, whitespace still does not count
        let raw = DeviceRecord {
            name: "x".into(),
            vendor_id: "1".into(),
            product_id: "2".into(),
            serial: " \t".into(),
        };
        assert!(!raw.is_identified());
    }

    #[test]
    fn test_trust_entry_from_record() {
        let record = DeviceRecord::new("Drive E", "0781", "5567", "SN123");
        let entry = TrustEntry::from(&record);
        assert_eq!(entry.serial, "SN123");
        assert_eq!(entry.name, "Drive E");
    }

    #[test]
    fn test_display() {
        let record = DeviceRecord::new("Cruzer", "0781", "5567", "SN1");
        assert_eq!(record.to_string(), "Cruzer [0781:5567] serial SN1");
    }
}
