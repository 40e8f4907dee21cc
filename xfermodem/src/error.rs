//! Error types for xfermodem.

use std::io;
use thiserror::Error;

/// Result type for xfermodem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for xfermodem operations.
///
/// Variants map onto the error taxonomy of the transfer engine: transient
/// protocol errors are handled internally via retry counters and never
/// surface here, while fatal protocol errors, host-initiated cancellation,
/// and peer-initiated cancellation each route through a distinct variant.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations). Reserved for the host-facing
    /// `port` module; the protocol machines themselves never perform I/O.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// CRC-16 verification failed over a block or subpacket payload.
    #[error("CRC16 mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Crc16Mismatch {
        /// Expected CRC value.
        expected: u16,
        /// Actual CRC value.
        actual: u16,
    },

    /// CRC-32 verification failed over a ZMODEM subpacket payload.
    #[error("CRC32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Crc32Mismatch {
        /// Expected CRC value.
        expected: u32,
        /// Actual CRC value.
        actual: u32,
    },

    /// 8-bit checksum verification failed.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Expected checksum value.
        expected: u8,
        /// Actual checksum value.
        actual: u8,
    },

    /// Retry counter exceeded `MAX_RETRIES` for a block, frame, or handshake.
    #[error("too many retries: {0}")]
    RetriesExceeded(String),

    /// A control byte was received that is not valid in the current state.
    #[error("unexpected byte {0:#04x} in state {1}")]
    UnexpectedByte(u8, &'static str),

    /// A filename exceeded the 255-byte limit.
    #[error("filename too long: {0} bytes (max 255)")]
    FilenameTooLong(usize),

    /// A ZMODEM frame was malformed (bad hex digits, truncated header, etc).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The session was cancelled, either by the host or by the peer.
    #[error("transfer cancelled")]
    Cancelled,
}
