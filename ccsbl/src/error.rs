//! Error types for ccsbl.

use std::{fmt, io};
use thiserror::Error;

/// Result type for ccsbl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ccsbl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid argument supplied by the caller (alignment, range, length).
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// A data-bearing operation was attempted without an established session.
    #[error("Not connected to a bootloader")]
    NotConnected,

    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Transport failure that is not an `io::Error` (short write, closed port).
    #[error("Port error: {0}")]
    Port(String),

    /// Autobaud did not get an acknowledgement.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Bytes were not received within the allotted budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed or unexpected response from the bootloader.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Data packet checksum mismatch.
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum {
        /// Checksum byte announced in the packet header.
        expected: u8,
        /// Checksum computed over the received payload.
        actual: u8,
    },

    /// The bootloader accepted a command but reported a failure status.
    #[error("{context}: device reported {}", describe_status(.status))]
    DeviceStatus {
        /// Raw status byte from GET_STATUS.
        status: u8,
        /// Operation that produced the status.
        context: String,
    },

    /// Device-computed CRC32 differs from the locally computed one.
    #[error("CRC32 mismatch: expected {expected:#010x}, device reported {actual:#010x}")]
    Integrity {
        /// Locally computed CRC32.
        expected: u32,
        /// CRC32 returned by the device.
        actual: u32,
    },

    /// Operation has no command on the connected chip family.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

fn describe_status(status: &u8) -> String {
    format!("{} ({status:#04x})", crate::protocol::status_name(*status))
}

/// Coarse classification of [`Error`], one entry per failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid caller input.
    Argument,
    /// No established session.
    NotConnected,
    /// Transport failure.
    Port,
    /// Response not received in time.
    Timeout,
    /// Malformed or rejected exchange.
    Protocol,
    /// Data packet checksum mismatch.
    Checksum,
    /// Non-success device status.
    DeviceStatus,
    /// CRC32 verification failure.
    Integrity,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument(_) | Self::Unsupported(_) => ErrorKind::Argument,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::Io(e) if e.kind() == io::ErrorKind::TimedOut => ErrorKind::Timeout,
            Self::Io(_) | Self::Port(_) | Self::HandshakeFailed(_) => ErrorKind::Port,
            #[cfg(feature = "native")]
            Self::Serial(_) => ErrorKind::Port,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Checksum { .. } => ErrorKind::Checksum,
            Self::DeviceStatus { .. } => ErrorKind::DeviceStatus,
            Self::Integrity { .. } => ErrorKind::Integrity,
        }
    }

    /// Whether this error means the transport can no longer be trusted.
    pub fn is_port_error(&self) -> bool {
        self.kind() == ErrorKind::Port
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Argument => "argument error",
            Self::NotConnected => "not connected",
            Self::Port => "port error",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol error",
            Self::Checksum => "checksum error",
            Self::DeviceStatus => "device status error",
            Self::Integrity => "integrity error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::Argument("x".into()).kind(), ErrorKind::Argument);
        assert_eq!(Error::Unsupported("x".into()).kind(), ErrorKind::Argument);
        assert_eq!(Error::HandshakeFailed("x".into()).kind(), ErrorKind::Port);
        assert_eq!(
            Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).kind(),
            ErrorKind::Port
        );
        assert_eq!(
            Error::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")).kind(),
            ErrorKind::Timeout
        );
        assert!(Error::Port("short write".into()).is_port_error());
        assert!(!Error::Timeout("ack".into()).is_port_error());
    }

    #[test]
    fn test_device_status_message_names_status() {
        let err = Error::DeviceStatus {
            status: 0x44,
            context: "Sector erase at 0x00001000".into(),
        };
        assert_eq!(
            err.to_string(),
            "Sector erase at 0x00001000: device reported FLASH_FAIL (0x44)"
        );
    }

    #[test]
    fn test_checksum_message() {
        let err = Error::Checksum {
            expected: 0x12,
            actual: 0x34,
        };
        assert_eq!(err.to_string(), "Checksum mismatch: expected 0x12, got 0x34");
    }
}
