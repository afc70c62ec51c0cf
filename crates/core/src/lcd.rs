//! Wired TL-LCD channel: encrypted handshake, firmware query, and chunked
//! JPEG transfer.
//!
//! LCD frame layout (64 bytes):
//!   - byte 0:  report ID (0xCC)
//!   - byte 1:  command byte
//!   - bytes 2..: command-specific payload, zero padded
//!
//! The handshake payload is transformed with DES in CBC mode under a fixed
//! key/IV baked into the protocol. A mis-keyed request is ignored by the
//! panel, so the handshake must round-trip this transform before any further
//! command is accepted.

use crate::device::{self, DeviceSource};
use crate::error::{Error, Result};
use crate::frame::REPORT_LEN;
use crate::retry::{retry_busy, Sleeper, ThreadSleeper};
use crate::transport::{HidDeviceTransport, HidTransport, READ_TIMEOUT_MS};
use crate::{pids, TL_VID};
use cbc::cipher::block_padding::{NoPadding, ZeroPadding};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::Serialize;
use tracing::{debug, info};

type DesCbcEnc = cbc::Encryptor<des::Des>;
type DesCbcDec = cbc::Decryptor<des::Des>;

/// Report ID prepended to every LCD frame.
pub const LCD_REPORT_ID: u8 = 0xCC;

/// LCD command bytes.
pub const CMD_HANDSHAKE: u8 = 0xA1;
pub const CMD_FIRMWARE: u8 = 0xA2;
pub const CMD_JPG_CHUNK: u8 = 0xA3;

/// Completion status byte in the final-chunk acknowledgment.
pub const ACK_OK: u8 = 0x01;

/// JPEG chunk header: report ID, command, index, total, length.
pub const CHUNK_HEADER_LEN: usize = 8;

/// JPEG data bytes per chunk frame.
pub const CHUNK_DATA_LEN: usize = REPORT_LEN - CHUNK_HEADER_LEN;

/// Handshake block size (legacy 64-bit block cipher).
pub const HANDSHAKE_BLOCK_LEN: usize = 8;

// Protocol constants, not secrets: the panel firmware ships the same pair.
// Placeholder values pinned by fixtures; re-verify against captured traffic.
const HANDSHAKE_KEY: [u8; 8] = *b"LianLiTL";
const HANDSHAKE_IV: [u8; 8] = [0u8; 8];

/// Fixed handshake challenge plaintext.
const HANDSHAKE_CHALLENGE: [u8; HANDSHAKE_BLOCK_LEN] = [0x01, 0, 0, 0, 0, 0, 0, 0];

/// Negotiated mode returned by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeInfo {
    pub mode: u8,
}

/// Firmware version metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareInfo {
    pub version: String,
}

/// Encrypt a handshake payload, zero padding to the cipher block size.
pub(crate) fn encrypt_handshake(plaintext: &[u8]) -> Result<Vec<u8>> {
    let enc = DesCbcEnc::new_from_slices(&HANDSHAKE_KEY, &HANDSHAKE_IV)
        .map_err(|e| Error::Decode(format!("handshake cipher init: {e}")))?;
    Ok(enc.encrypt_padded_vec_mut::<ZeroPadding>(plaintext))
}

/// Decrypt a handshake payload. Full blocks are kept; trailing zeros are
/// protocol padding, not data.
pub(crate) fn decrypt_handshake(ciphertext: &[u8]) -> Result<Vec<u8>> {
    let dec = DesCbcDec::new_from_slices(&HANDSHAKE_KEY, &HANDSHAKE_IV)
        .map_err(|e| Error::Decode(format!("handshake cipher init: {e}")))?;
    dec.decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| Error::Decode("handshake payload is not block aligned".into()))
}

/// A scoped channel to the wired LCD panel.
///
/// Stateless between invocations; dropping the channel releases the claimed
/// interface. Every command is routed through the busy-retry policy.
pub struct LcdChannel<T: HidTransport> {
    transport: T,
    sleeper: Box<dyn Sleeper>,
}

impl LcdChannel<HidDeviceTransport> {
    /// Open the panel by serial, auto-detecting a single wired device when
    /// `None`. Explicit serials go through the same normalization as the
    /// wireless channel.
    pub fn open(serial: Option<&str>) -> Result<Self> {
        let serial = match serial {
            Some(s) => {
                device::select_serials(&[], &[s.to_string()], DeviceSource::Wired)?.remove(0)
            }
            None => {
                let devices = device::enumerate_devices()?;
                device::select_serials(&devices, &[], DeviceSource::Wired)?.remove(0)
            }
        };
        info!(serial = %serial, "opening LCD channel");
        let sleeper = ThreadSleeper;
        let transport = retry_busy(&sleeper, || {
            HidDeviceTransport::open(TL_VID, pids::TL_LCD, Some(&serial))
        })?;
        Ok(Self::with_transport(transport))
    }
}

impl<T: HidTransport> LcdChannel<T> {
    /// Build a channel over an already-open transport with real sleeps.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Build a channel with an injected sleeper (mocked time in tests).
    pub fn with_sleeper(transport: T, sleeper: Box<dyn Sleeper>) -> Self {
        Self { transport, sleeper }
    }

    /// Perform the encrypted authentication/mode-negotiation exchange.
    pub fn handshake(&self) -> Result<HandshakeInfo> {
        retry_busy(self.sleeper.as_ref(), || {
            Self::handshake_once(&self.transport)
        })
    }

    fn handshake_once(transport: &T) -> Result<HandshakeInfo> {
        let ciphertext = encrypt_handshake(&HANDSHAKE_CHALLENGE)?;
        let mut frame = vec![0u8; REPORT_LEN];
        frame[0] = LCD_REPORT_ID;
        frame[1] = CMD_HANDSHAKE;
        frame[2..2 + ciphertext.len()].copy_from_slice(&ciphertext);
        transport.write_report(&frame)?;

        let response = transport.read_report(READ_TIMEOUT_MS)?;
        if response.len() < 2 + HANDSHAKE_BLOCK_LEN || response[1] != CMD_HANDSHAKE {
            return Err(Error::Decode(format!(
                "unexpected handshake response ({} bytes)",
                response.len()
            )));
        }
        let plaintext = decrypt_handshake(&response[2..2 + HANDSHAKE_BLOCK_LEN])?;
        if plaintext[0] != HANDSHAKE_CHALLENGE[0] {
            return Err(Error::Decode(format!(
                "handshake echo mismatch: 0x{:02X}",
                plaintext[0]
            )));
        }
        let info = HandshakeInfo { mode: plaintext[1] };
        debug!(mode = info.mode, "handshake complete");
        Ok(info)
    }

    /// Query firmware version metadata. Idempotent and independent of
    /// handshake state.
    pub fn firmware_version(&self) -> Result<FirmwareInfo> {
        retry_busy(self.sleeper.as_ref(), || {
            Self::firmware_version_once(&self.transport)
        })
    }

    fn firmware_version_once(transport: &T) -> Result<FirmwareInfo> {
        let mut frame = vec![0u8; REPORT_LEN];
        frame[0] = LCD_REPORT_ID;
        frame[1] = CMD_FIRMWARE;
        transport.write_report(&frame)?;

        let response = transport.read_report(READ_TIMEOUT_MS)?;
        if response.len() < 4 || response[1] != CMD_FIRMWARE {
            return Err(Error::Decode(format!(
                "unexpected firmware response ({} bytes)",
                response.len()
            )));
        }
        Ok(FirmwareInfo {
            version: format!("{}.{}", response[2], response[3]),
        })
    }

    /// Transfer a complete JPEG payload to the panel.
    ///
    /// The payload is split into a deterministic sequence of fixed-size
    /// chunks, each carrying an index/total/length header, sent strictly in
    /// order over this channel. The call succeeds only once the final
    /// chunk's acknowledgment is observed. Busy failures restart the whole
    /// transfer per the retry policy.
    pub fn send_jpg(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::Usage("empty JPEG payload".into()));
        }
        let total = data.len().div_ceil(CHUNK_DATA_LEN);
        if total > u16::MAX as usize {
            return Err(Error::Usage(format!(
                "JPEG payload of {} bytes exceeds the chunk-count limit",
                data.len()
            )));
        }
        retry_busy(self.sleeper.as_ref(), || {
            Self::transfer_jpg(&self.transport, data, total as u16)
        })
    }

    fn transfer_jpg(transport: &T, data: &[u8], total: u16) -> Result<()> {
        for (index, chunk) in data.chunks(CHUNK_DATA_LEN).enumerate() {
            let mut frame = vec![0u8; REPORT_LEN];
            frame[0] = LCD_REPORT_ID;
            frame[1] = CMD_JPG_CHUNK;
            frame[2..4].copy_from_slice(&(index as u16).to_le_bytes());
            frame[4..6].copy_from_slice(&total.to_le_bytes());
            frame[6..8].copy_from_slice(&(chunk.len() as u16).to_le_bytes());
            frame[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + chunk.len()].copy_from_slice(chunk);
            transport.write_report(&frame)?;
        }

        let ack = transport.read_report(READ_TIMEOUT_MS)?;
        if ack.len() < 3 || ack[1] != CMD_JPG_CHUNK {
            return Err(Error::Decode(format!(
                "unexpected transfer acknowledgment ({} bytes)",
                ack.len()
            )));
        }
        if ack[2] != ACK_OK {
            return Err(Error::Decode(format!(
                "panel rejected transfer, status 0x{:02X}",
                ack[2]
            )));
        }
        debug!(total, bytes = data.len(), "JPEG transfer acknowledged");
        Ok(())
    }
}

/// Response fixtures shared between this module's tests and the crate-level
/// integration tests.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// A well-formed encrypted handshake response for `mode`.
    pub(crate) fn handshake_response(mode: u8) -> Vec<u8> {
        let mut plaintext = [0u8; HANDSHAKE_BLOCK_LEN];
        plaintext[0] = 0x01;
        plaintext[1] = mode;
        let ciphertext = encrypt_handshake(&plaintext).unwrap();
        let mut report = vec![0u8; REPORT_LEN];
        report[0] = LCD_REPORT_ID;
        report[1] = CMD_HANDSHAKE;
        report[2..2 + ciphertext.len()].copy_from_slice(&ciphertext);
        report
    }

    /// A firmware-version response report.
    pub(crate) fn firmware_response(major: u8, minor: u8) -> Vec<u8> {
        let mut report = vec![0u8; REPORT_LEN];
        report[0] = LCD_REPORT_ID;
        report[1] = CMD_FIRMWARE;
        report[2] = major;
        report[3] = minor;
        report
    }
}
