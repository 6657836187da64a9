//! libusb-backed provider
//!
//! Enumerates devices through `rusb` and reads the product and serial string
//! descriptors. Devices that cannot be opened (usually a permissions issue)
//! or that report no serial are skipped: without a serial there is no
//! identity to classify.

use super::{DeviceProvider, retain_identified};
use common::{DeviceRecord, ProviderError};
use rusb::{Context, Device, DeviceDescriptor, UsbContext};
use std::time::Duration;
use tracing::{debug, trace};

/// USB class code for hubs
const CLASS_HUB: u8 = 0x09;

/// Timeout for string descriptor reads
const STRING_TIMEOUT: Duration = Duration::from_millis(200);

pub struct LibusbProvider {
    context: Context,
}

impl LibusbProvider {
    pub fn new() -> Result<Self, ProviderError> {
        let context = Context::new().map_err(|e| ProviderError::Usb(e.to_string()))?;
        Ok(Self { context })
    }

    fn read_record(&self, device: &Device<Context>) -> Option<DeviceRecord> {
        let descriptor = device.device_descriptor().ok()?;
        if descriptor.class_code() == CLASS_HUB {
            return None;
        }

        let ids = (descriptor.vendor_id(), descriptor.product_id());
        let (product, serial) = match read_strings(device, &descriptor) {
            Ok(strings) => strings,
            Err(e) => {
                debug!(
                    "Cannot read strings of {:04x}:{:04x} on bus {:03} addr {:03}: {}",
                    ids.0,
                    ids.1,
                    device.bus_number(),
                    device.address(),
                    e
                );
                return None;
            }
        };

        let Some(serial) = serial else {
            trace!("Device {:04x}:{:04x} has no serial", ids.0, ids.1);
            return None;
        };

        Some(DeviceRecord::new(
            product.unwrap_or_else(|| format!("USB device {:04x}:{:04x}", ids.0, ids.1)),
            format!("{:04x}", ids.0),
            format!("{:04x}", ids.1),
            serial,
        ))
    }
}

impl DeviceProvider for LibusbProvider {
    fn name(&self) -> &'static str {
        "libusb"
    }

    fn snapshot(&self) -> Result<Vec<DeviceRecord>, ProviderError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| ProviderError::Usb(e.to_string()))?;

        let records = devices
            .iter()
            .filter_map(|device| self.read_record(&device))
            .collect();

        Ok(retain_identified(records))
    }
}

/// Read (product, serial) string descriptors using the first language
fn read_strings(
    device: &Device<Context>,
    descriptor: &DeviceDescriptor,
) -> Result<(Option<String>, Option<String>), rusb::Error> {
    if descriptor.serial_number_string_index().is_none() {
        return Ok((None, None));
    }

    let handle = device.open()?;
    let language = handle
        .read_languages(STRING_TIMEOUT)?
        .into_iter()
        .next()
        .ok_or(rusb::Error::NotFound)?;

    let product = handle
        .read_product_string(language, descriptor, STRING_TIMEOUT)
        .ok();
    let serial = handle
        .read_serial_number_string(language, descriptor, STRING_TIMEOUT)
        .ok();

    Ok((product, serial))
}
