//! uwsctl-core: TL wireless/LCD protocol, device enumeration, and command encoding.
//!
//! This crate provides the cross-platform core logic for talking to the
//! TL wireless base station (battery-powered fan/LED modules behind a
//! 2.4 GHz transceiver) and the wired TL-LCD panel, both exposed as USB HID
//! devices.

pub mod device;
pub mod effects;
pub mod error;
pub mod frame;
pub mod lcd;
pub mod pwm_sync;
pub mod retry;
pub mod transport;
pub mod wireless;

/// TL controller USB Vendor ID.
pub const TL_VID: u16 = 0x1CBE;

/// Known TL product IDs.
pub mod pids {
    /// Wireless base-station transceiver (dongle).
    pub const TL_DONGLE: u16 = 0x0006;
    /// Wired TL-LCD display panel.
    pub const TL_LCD: u16 = 0x0007;
}
