//! HID transport abstraction for device communication.
//!
//! Provides a trait-based transport layer so that real HID devices and
//! mock devices share the same interface. The protocol layer above only
//! ever sees report-aligned byte buffers; multi-report payloads (chunked
//! JPEG transfer, multi-frame LED sequences) are a protocol concern.

use crate::error::{Error, Result};
use tracing::trace;

/// Default read timeout for a single report.
pub const READ_TIMEOUT_MS: i32 = 1000;

/// Abstraction over raw HID report read/write.
///
/// Reads and writes are report-aligned; one call moves at most one report.
pub trait HidTransport: Send {
    /// Write a raw HID report. Returns the number of bytes written.
    fn write_report(&self, data: &[u8]) -> Result<usize>;

    /// Read one raw HID report, waiting up to `timeout_ms`.
    fn read_report(&self, timeout_ms: i32) -> Result<Vec<u8>>;
}

/// Transport over a real hidapi device handle.
///
/// Dropping this closes the underlying handle, releasing the claimed USB
/// interface on every exit path.
pub struct HidDeviceTransport {
    device: hidapi::HidDevice,
}

impl HidDeviceTransport {
    /// Open a device by VID/PID, optionally narrowed to a serial number.
    pub fn open(vid: u16, pid: u16, serial: Option<&str>) -> Result<Self> {
        let api = hidapi::HidApi::new().map_err(|e| Error::Hid(format!("hidapi init: {e}")))?;
        let device = match serial {
            Some(sn) => api.open_serial(vid, pid, sn),
            None => api.open(vid, pid),
        }
        .map_err(|e| {
            let msg = format!("open HID device (VID=0x{vid:04X} PID=0x{pid:04X}): {e}");
            // OS-level exclusivity conflicts must be distinguishable so the
            // retry layer can classify them.
            if msg.to_lowercase().contains("busy") {
                Error::Busy(msg)
            } else {
                Error::Hid(msg)
            }
        })?;
        Ok(Self { device })
    }
}

impl HidTransport for HidDeviceTransport {
    fn write_report(&self, data: &[u8]) -> Result<usize> {
        trace!(len = data.len(), report_hex = format_args!("{:02X?}", data), "HID TX");
        self.device.write(data).map_err(|e| {
            let msg = format!("write: {e}");
            if msg.to_lowercase().contains("busy") {
                Error::Busy(msg)
            } else {
                Error::Hid(msg)
            }
        })
    }

    fn read_report(&self, timeout_ms: i32) -> Result<Vec<u8>> {
        let mut buf = [0u8; crate::frame::REPORT_LEN];
        let n = self
            .device
            .read_timeout(&mut buf, timeout_ms)
            .map_err(|e| Error::Hid(format!("read_timeout: {e}")))?;
        if n == 0 {
            return Err(Error::Hid(format!(
                "hid_read timed out after {timeout_ms}ms"
            )));
        }
        trace!(len = n, report_hex = format_args!("{:02X?}", &buf[..n]), "HID RX");
        Ok(buf[..n].to_vec())
    }
}
