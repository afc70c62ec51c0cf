//! TL wire protocol: command frame encoding and telemetry decoding.
//!
//! The base station speaks fixed-size 64-byte HID reports. Outbound command
//! frames share one header layout; telemetry arrives as a count-prefixed
//! sequence of fixed-offset 42-byte device records. Fields are positional,
//! not self-describing, so any firmware layout change requires a matching
//! update to the offset tables below.
//!
//! Command frame layout (64 bytes):
//!   - byte 0:      report ID (0xE0)
//!   - byte 1:      opcode
//!   - bytes 2..8:  target MAC (all zeros = broadcast)
//!   - bytes 8..10: command sequence counter (little-endian)
//!   - bytes 10..:  opcode-specific payload, zero padded

use crate::error::{Error, Result};
use serde::Serialize;

/// Fixed HID report length for both device families.
pub const REPORT_LEN: usize = 64;

/// Report ID prepended to every wireless command frame.
pub const COMMAND_REPORT_ID: u8 = 0xE0;

/// Maximum opcode-specific payload per frame.
pub const PAYLOAD_MAX: usize = REPORT_LEN - 10;

/// Fixed length of one wireless telemetry record.
pub const RECORD_LEN: usize = 42;

/// Telemetry snapshot header: opcode echo, device count, base-station MAC.
pub const SNAPSHOT_HEADER_LEN: usize = 8;

/// Fan/PWM slots per device record. Unused slots read zero.
pub const FAN_SLOTS: usize = 4;

/// Wireless command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Request a telemetry snapshot from the base station.
    StatusRequest = 0x01,
    /// Static color(s) across LED segments.
    LedStatic = 0x10,
    /// Built-in cyclic rainbow pattern.
    LedRainbow = 0x11,
    /// One frame of a custom frame sequence.
    LedFrame = 0x12,
    /// Named catalog effect.
    LedEffect = 0x13,
    /// PWM duty target for all fans of a module.
    PwmSet = 0x20,
}

/// An outbound wireless command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub opcode: Opcode,
    /// Target module MAC; `None` broadcasts.
    pub target: Option<[u8; 6]>,
    /// Per-channel sequence counter echoed by the device.
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl CommandFrame {
    pub fn new(opcode: Opcode, target: Option<[u8; 6]>, sequence: u16, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            target,
            sequence,
            payload,
        }
    }

    /// Encode into exactly one zero-padded 64-byte report.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > PAYLOAD_MAX {
            return Err(Error::Usage(format!(
                "command payload too large: {} bytes (max {PAYLOAD_MAX})",
                self.payload.len()
            )));
        }
        let mut buf = vec![0u8; REPORT_LEN];
        buf[0] = COMMAND_REPORT_ID;
        buf[1] = self.opcode as u8;
        if let Some(mac) = self.target {
            buf[2..8].copy_from_slice(&mac);
        }
        buf[8..10].copy_from_slice(&self.sequence.to_le_bytes());
        buf[10..10 + self.payload.len()].copy_from_slice(&self.payload);
        Ok(buf)
    }
}

/// Parse a colon-separated MAC string into raw bytes.
///
/// Accepts upper or lower case hex; the canonical form everywhere else in
/// this crate is lower-case colon-hex.
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return Err(Error::Usage(format!("invalid MAC address '{mac}'")));
    }
    let mut out = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        out[i] = u8::from_str_radix(part, 16)
            .map_err(|_| Error::Usage(format!("invalid MAC address '{mac}'")))?;
    }
    Ok(out)
}

/// Format raw MAC bytes as canonical lower-case colon-hex.
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// A decoded telemetry record for one fan module.
///
/// Record layout (fixed offsets, 42 bytes):
///   - 0..6:   module MAC
///   - 6..12:  master (base station) MAC the module is paired to
///   - 12:     radio channel
///   - 13:     receiver type code
///   - 14:     device type code (module generation/capabilities)
///   - 15:     fan count (1..=4)
///   - 16..20: PWM duty per fan slot (0-255)
///   - 20..28: measured RPM per fan slot (little-endian u16)
///   - 28..30: command sequence counter echoed by the device (little-endian)
///   - 30..42: reserved (preserved via `raw`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WirelessDeviceInfo {
    pub mac: String,
    pub master_mac: String,
    pub channel: u8,
    pub rx_type: u8,
    pub device_type: u8,
    pub fan_count: u8,
    #[serde(rename = "fan_pwm")]
    pub pwm_values: [u8; FAN_SLOTS],
    pub fan_rpm: [u16; FAN_SLOTS],
    pub command_sequence: u16,
    /// The raw record this was parsed from, kept for diagnostics/replay.
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl WirelessDeviceInfo {
    /// A module is addressable for commands only while paired to the active
    /// base station.
    pub fn is_bound(&self, base_station_mac: &str) -> bool {
        self.mac != "00:00:00:00:00:00" && self.master_mac == base_station_mac
    }
}

/// The outcome of one telemetry poll.
///
/// Device order reflects the order records appear in the response and is not
/// guaranteed stable across polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WirelessSnapshot {
    /// The base station's own MAC, echoed in the response header.
    pub base_mac: String,
    pub devices: Vec<WirelessDeviceInfo>,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl WirelessSnapshot {
    /// Devices currently paired to this base station, i.e. addressable for
    /// commands.
    pub fn bound_devices(&self) -> impl Iterator<Item = &WirelessDeviceInfo> {
        self.devices.iter().filter(|d| d.is_bound(&self.base_mac))
    }
}

/// Decode one fixed-offset telemetry record.
pub fn decode_record(raw: &[u8]) -> Result<WirelessDeviceInfo> {
    if raw.len() != RECORD_LEN {
        return Err(Error::Decode(format!(
            "telemetry record is {} bytes, expected {RECORD_LEN}",
            raw.len()
        )));
    }

    let mut mac = [0u8; 6];
    mac.copy_from_slice(&raw[0..6]);
    let mut master = [0u8; 6];
    master.copy_from_slice(&raw[6..12]);

    let fan_count = raw[15];
    if fan_count == 0 || fan_count as usize > FAN_SLOTS {
        return Err(Error::Decode(format!(
            "fan count {fan_count} out of range 1..={FAN_SLOTS}"
        )));
    }

    let mut pwm_values = [0u8; FAN_SLOTS];
    pwm_values.copy_from_slice(&raw[16..20]);

    let mut fan_rpm = [0u16; FAN_SLOTS];
    for (i, slot) in fan_rpm.iter_mut().enumerate() {
        let off = 20 + i * 2;
        *slot = u16::from_le_bytes([raw[off], raw[off + 1]]);
    }

    Ok(WirelessDeviceInfo {
        mac: format_mac(&mac),
        master_mac: format_mac(&master),
        channel: raw[12],
        rx_type: raw[13],
        device_type: raw[14],
        fan_count,
        pwm_values,
        fan_rpm,
        command_sequence: u16::from_le_bytes([raw[28], raw[29]]),
        raw: raw.to_vec(),
    })
}

/// Re-encode a telemetry record. Inverse of [`decode_record`] for the defined
/// fields; reserved bytes are taken from `raw` when present. Used to build
/// test fixtures and replay captures.
pub fn encode_record(info: &WirelessDeviceInfo) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; RECORD_LEN];
    buf[0..6].copy_from_slice(&parse_mac(&info.mac)?);
    buf[6..12].copy_from_slice(&parse_mac(&info.master_mac)?);
    buf[12] = info.channel;
    buf[13] = info.rx_type;
    buf[14] = info.device_type;
    buf[15] = info.fan_count;
    buf[16..20].copy_from_slice(&info.pwm_values);
    for (i, rpm) in info.fan_rpm.iter().enumerate() {
        let off = 20 + i * 2;
        buf[off..off + 2].copy_from_slice(&rpm.to_le_bytes());
    }
    buf[28..30].copy_from_slice(&info.command_sequence.to_le_bytes());
    if info.raw.len() == RECORD_LEN {
        buf[30..RECORD_LEN].copy_from_slice(&info.raw[30..RECORD_LEN]);
    }
    Ok(buf)
}

/// Decode a full snapshot response:
/// `[opcode echo, device count, base MAC (6), records...]`.
pub fn decode_snapshot(raw: &[u8]) -> Result<WirelessSnapshot> {
    if raw.len() < SNAPSHOT_HEADER_LEN {
        return Err(Error::Decode(format!(
            "snapshot response is {} bytes, expected at least {SNAPSHOT_HEADER_LEN}",
            raw.len()
        )));
    }
    if raw[0] != Opcode::StatusRequest as u8 {
        return Err(Error::Decode(format!(
            "unexpected snapshot opcode echo 0x{:02X}",
            raw[0]
        )));
    }

    let mut base = [0u8; 6];
    base.copy_from_slice(&raw[2..8]);

    let count = raw[1] as usize;
    let needed = SNAPSHOT_HEADER_LEN + count * RECORD_LEN;
    if raw.len() < needed {
        return Err(Error::Decode(format!(
            "snapshot truncated: {} bytes for {count} device(s), expected {needed}",
            raw.len()
        )));
    }

    let mut devices = Vec::with_capacity(count);
    for i in 0..count {
        let start = SNAPSHOT_HEADER_LEN + i * RECORD_LEN;
        devices.push(decode_record(&raw[start..start + RECORD_LEN])?);
    }

    Ok(WirelessSnapshot {
        base_mac: format_mac(&base),
        devices,
        raw: raw.to_vec(),
    })
}
