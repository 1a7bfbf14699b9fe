//! Bootloader commands and their payloads.
//!
//! A [`CommandFrame`] pairs a logical [`Command`] with its payload. The wire
//! id is resolved separately because early CC26xx silicon numbers some
//! commands differently (see [`crate::target::ChipFamily::command_id`]).

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;

use crate::error::Result;
use crate::protocol::packet;

/// Logical bootloader command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Check that the bootloader is alive.
    Ping,
    /// Announce a flash program operation (address, size).
    Download,
    /// Fetch the status of the previous command.
    GetStatus,
    /// Program data announced by [`Command::Download`].
    SendData,
    /// Reset the device.
    Reset,
    /// Erase one flash page (CC26xx) or an address range (CC2538).
    SectorErase,
    /// Compute CRC32 over a memory range.
    Crc32,
    /// Read the 32-bit chip id.
    GetChipId,
    /// Switch the system clock to the external crystal (CC2538 only).
    SetXosc,
    /// Read memory.
    MemoryRead,
    /// Write memory.
    MemoryWrite,
    /// Erase all unprotected flash (CC26xx only).
    BankErase,
    /// Program one CCFG field (CC26xx only).
    SetCcfg,
}

impl Command {
    /// Every command, in id order.
    pub const ALL: [Self; 13] = [
        Self::Ping,
        Self::Download,
        Self::GetStatus,
        Self::SendData,
        Self::Reset,
        Self::SectorErase,
        Self::Crc32,
        Self::GetChipId,
        Self::SetXosc,
        Self::MemoryRead,
        Self::MemoryWrite,
        Self::BankErase,
        Self::SetCcfg,
    ];

    /// Command id used by current silicon.
    pub const fn standard_id(self) -> u8 {
        match self {
            Self::Ping => 0x20,
            Self::Download => 0x21,
            Self::GetStatus => 0x23,
            Self::SendData => 0x24,
            Self::Reset => 0x25,
            Self::SectorErase => 0x26,
            Self::Crc32 => 0x27,
            Self::GetChipId => 0x28,
            Self::SetXosc => 0x29,
            Self::MemoryRead => 0x2A,
            Self::MemoryWrite => 0x2B,
            Self::BankErase => 0x2C,
            Self::SetCcfg => 0x2D,
        }
    }

    /// Command id used by first-revision CC26xx silicon.
    pub const fn early_silicon_id(self) -> u8 {
        match self {
            Self::BankErase => 0x2A,
            Self::SetCcfg => 0x2B,
            Self::MemoryRead => 0x2C,
            Self::MemoryWrite => 0x2D,
            other => other.standard_id(),
        }
    }

    /// Protocol name of the command.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ping => "CMD_PING",
            Self::Download => "CMD_DOWNLOAD",
            Self::GetStatus => "CMD_GET_STATUS",
            Self::SendData => "CMD_SEND_DATA",
            Self::Reset => "CMD_RESET",
            Self::SectorErase => "CMD_SECTOR_ERASE",
            Self::Crc32 => "CMD_CRC32",
            Self::GetChipId => "CMD_GET_CHIP_ID",
            Self::SetXosc => "CMD_SET_XOSC",
            Self::MemoryRead => "CMD_MEMORY_READ",
            Self::MemoryWrite => "CMD_MEMORY_WRITE",
            Self::BankErase => "CMD_BANK_ERASE",
            Self::SetCcfg => "CMD_SET_CCFG",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A command and its payload, ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    command: Command,
    payload: Vec<u8>,
}

impl CommandFrame {
    /// Create a frame without payload.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            payload: Vec::new(),
        }
    }

    /// PING.
    pub fn ping() -> Self {
        Self::new(Command::Ping)
    }

    /// GET_STATUS.
    pub fn get_status() -> Self {
        Self::new(Command::GetStatus)
    }

    /// GET_CHIP_ID.
    pub fn get_chip_id() -> Self {
        Self::new(Command::GetChipId)
    }

    /// RESET.
    pub fn reset() -> Self {
        Self::new(Command::Reset)
    }

    /// BANK_ERASE.
    pub fn bank_erase() -> Self {
        Self::new(Command::BankErase)
    }

    /// SET_XOSC.
    pub fn set_xosc() -> Self {
        Self::new(Command::SetXosc)
    }

    /// DOWNLOAD: 4B program address, 4B program size.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn download(address: u32, size: u32) -> Self {
        let mut frame = Self::new(Command::Download);
        frame.payload.write_u32::<BigEndian>(address).unwrap();
        frame.payload.write_u32::<BigEndian>(size).unwrap();
        frame
    }

    /// SEND_DATA carrying raw flash bytes.
    pub fn send_data(data: &[u8]) -> Self {
        Self {
            command: Command::SendData,
            payload: data.to_vec(),
        }
    }

    /// SECTOR_ERASE for the page containing `address` (CC26xx).
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn sector_erase(address: u32) -> Self {
        let mut frame = Self::new(Command::SectorErase);
        frame.payload.write_u32::<BigEndian>(address).unwrap();
        frame
    }

    /// ERASE of `size` bytes from `address` (CC2538).
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn range_erase(address: u32, size: u32) -> Self {
        let mut frame = Self::new(Command::SectorErase);
        frame.payload.write_u32::<BigEndian>(address).unwrap();
        frame.payload.write_u32::<BigEndian>(size).unwrap();
        frame
    }

    /// CRC32: 4B address, 4B byte count, 4B read repeat (always zero).
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn crc32(address: u32, size: u32) -> Self {
        let mut frame = Self::new(Command::Crc32);
        frame.payload.write_u32::<BigEndian>(address).unwrap();
        frame.payload.write_u32::<BigEndian>(size).unwrap();
        frame.payload.write_u32::<BigEndian>(0).unwrap();
        frame
    }

    /// MEMORY_READ: 4B address, 1B access width, 1B unit count.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn memory_read(address: u32, access_width: u8, count: u8) -> Self {
        let mut frame = Self::new(Command::MemoryRead);
        frame.payload.write_u32::<BigEndian>(address).unwrap();
        frame.payload.push(access_width);
        frame.payload.push(count);
        frame
    }

    /// MEMORY_WRITE: 4B address, 1B access width, then the data.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn memory_write(address: u32, access_width: u8, data: &[u8]) -> Self {
        let mut frame = Self::new(Command::MemoryWrite);
        frame.payload.write_u32::<BigEndian>(address).unwrap();
        frame.payload.push(access_width);
        frame.payload.extend_from_slice(data);
        frame
    }

    /// SET_CCFG: 4B field id, 4B field value.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn set_ccfg(field_id: u32, value: u32) -> Self {
        let mut frame = Self::new(Command::SetCcfg);
        frame.payload.write_u32::<BigEndian>(field_id).unwrap();
        frame.payload.write_u32::<BigEndian>(value).unwrap();
        frame
    }

    /// Logical command.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize with the given wire id.
    pub fn encode(&self, command_id: u8) -> Result<Vec<u8>> {
        packet::encode(command_id, &self.payload)
    }
}
