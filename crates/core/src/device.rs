//! Device enumeration and serial selection.
//!
//! Descriptors are ephemeral snapshots: every call re-queries the HID layer
//! because topology can change between polls.

use crate::error::{Error, Result};
use crate::{pids, TL_VID};
use serde::Serialize;
use tracing::{debug, info};

/// Which side of the product family a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSource {
    /// TL-LCD display panel on a wired HID channel.
    Wired,
    /// Base-station transceiver for battery-powered fan/LED modules.
    Wireless,
}

impl DeviceSource {
    /// Classify by USB product ID; unknown PIDs are not TL devices.
    pub fn from_pid(pid: u16) -> Option<Self> {
        match pid {
            pids::TL_DONGLE => Some(Self::Wireless),
            pids::TL_LCD => Some(Self::Wired),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wired => write!(f, "wired"),
            Self::Wireless => write!(f, "wireless"),
        }
    }
}

/// Information about one discovered TL device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescriptor {
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(rename = "serial")]
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub source: DeviceSource,
    /// Disambiguates multiple attached units when serials are absent.
    pub location_id: u32,
}

/// Discover all attached TL devices.
///
/// Filters the HID enumeration to the TL vendor/product signatures. Devices
/// missing a serial or descriptor strings are still reported; only a VID/PID
/// mismatch excludes a device.
pub fn enumerate_devices() -> Result<Vec<DeviceDescriptor>> {
    debug!("starting HID device enumeration");
    let api = hidapi::HidApi::new().map_err(|e| Error::Hid(e.to_string()))?;

    let mut devices = Vec::new();
    for (idx, dev) in api.device_list().enumerate() {
        if dev.vendor_id() != TL_VID {
            continue;
        }
        let Some(source) = DeviceSource::from_pid(dev.product_id()) else {
            continue;
        };

        info!(
            source = %source,
            vid = format_args!("0x{:04X}", dev.vendor_id()),
            pid = format_args!("0x{:04X}", dev.product_id()),
            path = %dev.path().to_string_lossy(),
            "found TL device"
        );
        devices.push(DeviceDescriptor {
            path: dev.path().to_string_lossy().into_owned(),
            vendor_id: dev.vendor_id(),
            product_id: dev.product_id(),
            serial_number: dev
                .serial_number()
                .map(str::to_string)
                .filter(|s| !s.is_empty()),
            manufacturer: dev.manufacturer_string().map(str::to_string),
            product: dev.product_string().map(str::to_string),
            source,
            location_id: idx as u32,
        });
    }

    debug!(count = devices.len(), "device enumeration complete");
    Ok(devices)
}

/// Strip the optional `serial:` prefix and surrounding whitespace.
fn normalize_serial(serial: &str) -> Result<String> {
    let trimmed = serial.trim();
    let trimmed = trimmed.strip_prefix("serial:").unwrap_or(trimmed).trim();
    if trimmed.is_empty() {
        return Err(Error::Usage("empty serial value".into()));
    }
    Ok(trimmed.to_string())
}

/// Resolve the serial list for a command against an already-taken snapshot.
///
/// With explicit serials, returns them normalized. With none, auto-selects a
/// single `source`-matching device that has a serial; zero matches is a
/// "no device" error and more than one refuses to guess, listing the
/// candidates instead.
pub fn select_serials(
    devices: &[DeviceDescriptor],
    explicit: &[String],
    source: DeviceSource,
) -> Result<Vec<String>> {
    if !explicit.is_empty() {
        return explicit.iter().map(|s| normalize_serial(s)).collect();
    }

    let candidates: Vec<&str> = devices
        .iter()
        .filter(|d| d.source == source)
        .filter_map(|d| d.serial_number.as_deref())
        .collect();

    match candidates.as_slice() {
        [] => Err(Error::NoDevice(format!("no {source} TL device found"))),
        [one] => Ok(vec![one.to_string()]),
        many => Err(Error::Ambiguous {
            candidates: many.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

/// [`select_serials`] over a fresh enumeration, for wireless targets.
pub fn resolve_serials(explicit: &[String]) -> Result<Vec<String>> {
    // Normalization happens before any transport is touched.
    if !explicit.is_empty() {
        return explicit.iter().map(|s| normalize_serial(s)).collect();
    }
    let devices = enumerate_devices()?;
    select_serials(&devices, explicit, DeviceSource::Wireless)
}
