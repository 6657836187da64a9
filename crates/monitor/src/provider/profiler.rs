//! macOS provider backed by `system_profiler SPUSBDataType`
//!
//! The tool prints an indented tree. A line ending in `:` with no value opens
//! a block (bus, hub or device); `Key: Value` lines fill the current block:
//!
//! ```text
//!         Cruzer Blade:
//!
//!           Product ID: 0x5567
//!           Vendor ID: 0x0781  (SanDisk Corporation)
//!           Serial Number: 4C530001230811117385
//! ```
//!
//! Blocks without a serial number (buses, most hubs) are dropped.

use super::{DeviceProvider, retain_identified, run_command};
use common::{DeviceRecord, ProviderError, UNKNOWN};

const PROGRAM: &str = "system_profiler";
const DATA_TYPE: &str = "SPUSBDataType";

pub struct SystemProfilerProvider {
    program: String,
}

impl SystemProfilerProvider {
    pub fn new() -> Self {
        Self {
            program: PROGRAM.to_string(),
        }
    }

    /// Use a different executable (for wrappers or testing)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SystemProfilerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for SystemProfilerProvider {
    fn name(&self) -> &'static str {
        "system-profiler"
    }

    fn snapshot(&self) -> Result<Vec<DeviceRecord>, ProviderError> {
        let output = run_command(&self.program, &[DATA_TYPE])?;
        Ok(parse_system_profiler(&output))
    }
}

/// Fields collected for the block being parsed
#[derive(Default)]
struct Block {
    header: Option<String>,
    vendor_id: Option<String>,
    vendor_name: Option<String>,
    product_id: Option<String>,
    serial: Option<String>,
}

impl Block {
    fn opened(header: &str) -> Self {
        Self {
            header: Some(header.to_string()),
            ..Self::default()
        }
    }

    fn into_record(self) -> Option<DeviceRecord> {
        let serial = self.serial.filter(|s| !s.is_empty())?;
        let name = self
            .header
            .filter(|h| !h.is_empty())
            .or(self.vendor_name)
            .unwrap_or_else(|| UNKNOWN.to_string());

        Some(DeviceRecord::new(
            name,
            self.vendor_id.unwrap_or_else(|| UNKNOWN.to_string()),
            self.product_id.unwrap_or_else(|| UNKNOWN.to_string()),
            serial,
        ))
    }
}

/// Parse `system_profiler SPUSBDataType` output
///
/// Never fails: lines that do not fit the `Key: Value` shape are skipped.
pub fn parse_system_profiler(output: &str) -> Vec<DeviceRecord> {
    let mut records = Vec::new();
    let mut current = Block::default();

    for line in output.lines().map(str::trim) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if value.is_empty() {
            if key.is_empty() {
                continue;
            }
            let finished = std::mem::replace(&mut current, Block::opened(key));
            records.extend(finished.into_record());
            continue;
        }

        match key {
            "Product ID" => current.product_id = parse_hex_id(value),
            "Vendor ID" => {
                current.vendor_id = parse_hex_id(value);
                current.vendor_name = parse_parenthesised(value);
            }
            "Serial Number" => current.serial = Some(value.to_string()),
            _ => {}
        }
    }
    records.extend(current.into_record());

    retain_identified(records)
}

/// `0x0781  (SanDisk Corporation)` -> `0781`
fn parse_hex_id(value: &str) -> Option<String> {
    let token = value.split_whitespace().next()?;
    let id = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    if id.is_empty() || id.starts_with('(') {
        None
    } else {
        Some(id.to_string())
    }
}

/// `0x0781  (SanDisk Corporation)` -> `SanDisk Corporation`
fn parse_parenthesised(value: &str) -> Option<String> {
    let start = value.find('(')?;
    let end = value.rfind(')')?;
    if end <= start + 1 {
        return None;
    }
    Some(value[start + 1..end].trim().to_string()).filter(|s| !s.is_empty())
}
