//! Wireless base-station channel: telemetry polling and LED/PWM commands.
//!
//! Opening the transceiver claims the dongle's HID interface; dropping it
//! releases the interface on every exit path. The only state carried across
//! calls within one open channel is the command sequence counter.

use crate::device;
use crate::effects::{LedFrame, Rgb, Scope, TlEffect};
use crate::error::{Error, Result};
use crate::frame::{
    decode_snapshot, CommandFrame, Opcode, WirelessSnapshot, PAYLOAD_MAX, RECORD_LEN,
    SNAPSHOT_HEADER_LEN,
};
use crate::transport::{HidDeviceTransport, HidTransport, READ_TIMEOUT_MS};
use crate::{pids, TL_VID};
use tracing::{debug, info};

/// Sentinel for the tie-break field when an effect applies to both rings.
pub const TB_OMITTED: u8 = 0xFF;

/// Most LED segments a single frame can address.
pub const MAX_SEGMENTS: usize = (PAYLOAD_MAX - 5) / 3;

/// A scoped channel to the wireless base station.
pub struct WirelessTransceiver<T: HidTransport> {
    transport: T,
    sequence: u16,
}

impl WirelessTransceiver<HidDeviceTransport> {
    /// Open the base station by serial, auto-detecting when `None` exactly as
    /// [`device::resolve_serials`] does for an empty list.
    pub fn open(serial: Option<&str>) -> Result<Self> {
        let serial = match serial {
            Some(s) => device::resolve_serials(&[s.to_string()])?.remove(0),
            None => device::resolve_serials(&[])?.remove(0),
        };
        info!(serial = %serial, "opening wireless transceiver");
        let transport = HidDeviceTransport::open(TL_VID, pids::TL_DONGLE, Some(&serial))?;
        Ok(Self::with_transport(transport))
    }
}

impl<T: HidTransport> WirelessTransceiver<T> {
    /// Build a transceiver over an already-open transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            sequence: 0,
        }
    }

    /// Current per-channel command sequence counter.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    #[cfg(test)]
    pub(crate) fn transport_ref(&self) -> &T {
        &self.transport
    }

    fn send(&mut self, opcode: Opcode, target: Option<[u8; 6]>, payload: Vec<u8>) -> Result<()> {
        self.sequence = self.sequence.wrapping_add(1);
        let frame = CommandFrame::new(opcode, target, self.sequence, payload);
        self.transport.write_report(&frame.encode()?)?;
        Ok(())
    }

    /// Poll the base station for a telemetry snapshot.
    ///
    /// Sends a status-request frame and assembles the count-prefixed response
    /// across as many reports as the declared device count needs. A short or
    /// malformed response is a decode error; the channel stays open so the
    /// caller may retry the poll.
    pub fn list_devices(&mut self) -> Result<WirelessSnapshot> {
        self.send(Opcode::StatusRequest, None, Vec::new())?;

        let mut raw = self.transport.read_report(READ_TIMEOUT_MS)?;
        if raw.len() < SNAPSHOT_HEADER_LEN {
            return Err(Error::Decode(format!(
                "snapshot response is {} bytes, expected at least {SNAPSHOT_HEADER_LEN}",
                raw.len()
            )));
        }
        let needed = SNAPSHOT_HEADER_LEN + raw[1] as usize * RECORD_LEN;
        while raw.len() < needed {
            let more = self.transport.read_report(READ_TIMEOUT_MS)?;
            if more.is_empty() {
                break;
            }
            raw.extend_from_slice(&more);
        }
        raw.truncate(needed.max(SNAPSHOT_HEADER_LEN));

        let snapshot = decode_snapshot(&raw)?;
        debug!(devices = snapshot.devices.len(), "telemetry snapshot decoded");
        Ok(snapshot)
    }

    /// Apply a static color. Exactly one of `color` (uniform) or `color_list`
    /// (ordered, one per segment) must be given.
    ///
    /// Unknown or unbound MACs are accepted; the base station silently drops
    /// frames it cannot deliver.
    pub fn set_led_static(
        &mut self,
        mac: &str,
        color: Option<Rgb>,
        color_list: Option<&[Rgb]>,
    ) -> Result<()> {
        let colors: Vec<Rgb> = match (color, color_list) {
            (Some(c), None) => vec![c],
            (None, Some(list)) if !list.is_empty() => list.to_vec(),
            (None, Some(_)) => return Err(Error::Usage("empty color list".into())),
            (Some(_), Some(_)) => {
                return Err(Error::Usage(
                    "give either a color or a color list, not both".into(),
                ))
            }
            (None, None) => {
                return Err(Error::Usage(
                    "a color or a color list is required for static mode".into(),
                ))
            }
        };
        if colors.len() > MAX_SEGMENTS {
            return Err(Error::Usage(format!(
                "{} colors exceed the {MAX_SEGMENTS}-segment limit",
                colors.len()
            )));
        }

        let target = crate::frame::parse_mac(mac)?;
        let mut payload = vec![colors.len() as u8];
        for (r, g, b) in colors {
            payload.extend_from_slice(&[r, g, b]);
        }
        self.send(Opcode::LedStatic, Some(target), payload)
    }

    /// Start the built-in cyclic rainbow with `frames` steps spaced
    /// `interval_ms` apart.
    pub fn set_led_rainbow(&mut self, mac: &str, frames: u8, interval_ms: u16) -> Result<()> {
        if frames == 0 {
            return Err(Error::Usage("rainbow needs at least one frame".into()));
        }
        let target = crate::frame::parse_mac(mac)?;
        let mut payload = vec![frames];
        payload.extend_from_slice(&interval_ms.to_le_bytes());
        self.send(Opcode::LedRainbow, Some(target), payload)
    }

    /// Upload an explicit frame sequence, one command frame per playback
    /// frame, each tagged with its position so the device plays them back in
    /// order at `interval_ms` spacing.
    pub fn set_led_frames(
        &mut self,
        mac: &str,
        frames: &[LedFrame],
        interval_ms: u16,
    ) -> Result<()> {
        if frames.is_empty() {
            return Err(Error::Usage("frame sequence is empty".into()));
        }
        if frames.len() > u8::MAX as usize {
            return Err(Error::Usage(format!(
                "{} frames exceed the {}-frame limit",
                frames.len(),
                u8::MAX
            )));
        }
        for (i, frame) in frames.iter().enumerate() {
            if frame.is_empty() || frame.len() > MAX_SEGMENTS {
                return Err(Error::Usage(format!(
                    "frame {i} has {} segments, expected 1..={MAX_SEGMENTS}",
                    frame.len()
                )));
            }
        }

        let target = crate::frame::parse_mac(mac)?;
        let total = frames.len() as u8;
        for (i, frame) in frames.iter().enumerate() {
            let mut payload = vec![i as u8, total];
            payload.extend_from_slice(&interval_ms.to_le_bytes());
            payload.push(frame.len() as u8);
            for &(r, g, b) in frame {
                payload.extend_from_slice(&[r, g, b]);
            }
            self.send(Opcode::LedFrame, Some(target), payload)?;
        }
        Ok(())
    }

    /// Apply a named catalog effect. The tie-break field follows the scope
    /// mapping; `Scope::Both` sends the omitted sentinel so the device applies
    /// the effect uniformly.
    pub fn set_led_effect(
        &mut self,
        mac: &str,
        effect: TlEffect,
        scope: Scope,
        brightness: u8,
        direction: u8,
        interval_ms: u16,
    ) -> Result<()> {
        if direction > 1 {
            return Err(Error::Usage(format!(
                "direction must be 0 or 1, got {direction}"
            )));
        }
        let target = crate::frame::parse_mac(mac)?;
        let tb = scope.tb().unwrap_or(TB_OMITTED);
        let mut payload = vec![effect.code(), tb, brightness, direction];
        payload.extend_from_slice(&interval_ms.to_le_bytes());
        self.send(Opcode::LedEffect, Some(target), payload)
    }

    /// Set the PWM duty target for every fan on a module.
    pub fn set_pwm(&mut self, mac: &str, duty: u8) -> Result<()> {
        let target = crate::frame::parse_mac(mac)?;
        self.send(Opcode::PwmSet, Some(target), vec![duty])
    }
}
