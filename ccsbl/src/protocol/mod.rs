//! Serial bootloader wire protocol.
//!
//! ```text
//! host -> device   [len][chk][cmd][payload...]      len = payload + 3
//! device -> host   [0x00][0xCC] ACK | [0x00][0x33] NAK
//! device -> host   [len][chk][payload...]           len = payload + 2
//! host -> device   ACK or NAK for every data packet
//! ```
//!
//! `chk` is the 8-bit additive sum of the command byte and payload (command
//! packets) or of the payload alone (data packets). Multi-byte fields are
//! big-endian.

pub mod command;
pub mod crc;
pub mod link;
pub mod packet;

pub use command::{Command, CommandFrame};
pub use crc::crc32;
pub use link::{Link, LinkConfig};
pub use packet::{ACK, NAK};

/// Last command completed successfully.
pub const STATUS_SUCCESS: u8 = 0x40;
/// Command id not recognized by the bootloader.
pub const STATUS_UNKNOWN_CMD: u8 = 0x41;
/// Command recognized but malformed (size or parameters).
pub const STATUS_INVALID_CMD: u8 = 0x42;
/// Address outside the permitted range.
pub const STATUS_INVALID_ADR: u8 = 0x43;
/// Flash erase or program operation failed.
pub const STATUS_FLASH_FAIL: u8 = 0x44;

/// Human readable name of a GET_STATUS byte.
pub fn status_name(status: u8) -> &'static str {
    match status {
        STATUS_SUCCESS => "SUCCESS",
        STATUS_UNKNOWN_CMD => "UNKNOWN_CMD",
        STATUS_INVALID_CMD => "INVALID_CMD",
        STATUS_INVALID_ADR => "INVALID_ADR",
        STATUS_FLASH_FAIL => "FLASH_FAIL",
        _ => "UNKNOWN_STATUS",
    }
}
