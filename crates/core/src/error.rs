//! Error types for uwsctl-core.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied input was invalid (bad serial, missing color spec).
    /// Raised before any transport is opened; never retried.
    #[error("usage error: {0}")]
    Usage(String),

    /// No matching device found during enumeration.
    #[error("no device detected: {0}")]
    NoDevice(String),

    /// Multiple candidate devices and no disambiguating serial.
    #[error("multiple devices detected, pass --serial to choose one: {}", candidates.join(", "))]
    Ambiguous { candidates: Vec<String> },

    /// HID device communication failure.
    #[error("HID error: {0}")]
    Hid(String),

    /// Malformed or truncated device response.
    #[error("decode error: {0}")]
    Decode(String),

    /// USB interface transiently held by another process.
    /// The only retryable error class.
    #[error("device busy: {0}")]
    Busy(String),
}

impl Error {
    /// Whether this error is the transient busy condition.
    ///
    /// hidapi surfaces the OS-level claim conflict as an opaque message, so
    /// `Hid` errors are matched on the well-known substring as well.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Busy(_) => true,
            Error::Hid(msg) => msg.to_lowercase().contains("busy"),
            _ => false,
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
