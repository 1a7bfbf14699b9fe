//! Chip family abstraction.
//!
//! The two supported families share the wire protocol but differ in address
//! map, size registers, erase addressing and a handful of command ids.

use std::fmt;

use crate::protocol::Command;
use crate::target::profile::{CC26XX, CC2538, DeviceProfile};

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChipFamily {
    /// CC2538 (flash at 0x0020_0000).
    Cc2538,
    /// CC13xx/CC26xx (CC2650, CC2640, CC1310, ...).
    #[default]
    Cc26xx,
}

/// Silicon revision, relevant for CC26xx only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Revision {
    /// Early silicon: alternate command ids and a smaller RAM table.
    Rev1,
    /// Production silicon.
    #[default]
    Rev2,
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rev1 => write!(f, "1"),
            Self::Rev2 => write!(f, "2"),
        }
    }
}

impl ChipFamily {
    /// Get default baud rate for this chip family.
    #[must_use]
    pub fn default_baud(&self) -> u32 {
        115_200
    }

    /// Constant profile of this family.
    pub fn profile(self) -> &'static DeviceProfile {
        match self {
            Self::Cc2538 => &CC2538,
            Self::Cc26xx => &CC26XX,
        }
    }

    /// Get the chip family from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "cc2538" => Some(Self::Cc2538),
            "cc26xx" | "cc13xx" | "cc2650" | "cc2640" | "cc2630" | "cc2620" | "cc2670"
            | "cc1310" | "cc1350" => Some(Self::Cc26xx),
            _ => None,
        }
    }

    /// Get the chip family from a numeric part type such as `0x2650`.
    pub fn from_chip_type(chip_type: u32) -> Option<Self> {
        match chip_type {
            0x2538 => Some(Self::Cc2538),
            0x1310 | 0x1350 | 0x2620 | 0x2630 | 0x2640 | 0x2650 | 0x2670 => Some(Self::Cc26xx),
            _ => None,
        }
    }

    /// Silicon revision encoded in the top nibble of the chip id.
    pub fn revision_from_device_id(self, device_id: u32) -> Revision {
        match self {
            Self::Cc2538 => Revision::Rev2,
            Self::Cc26xx => match device_id >> 28 {
                0 | 1 => Revision::Rev1,
                _ => Revision::Rev2,
            },
        }
    }

    /// Wire id of `command` on this family, or `None` if the family lacks it.
    pub fn command_id(self, command: Command, revision: Revision) -> Option<u8> {
        match (self, command) {
            (Self::Cc2538, Command::BankErase | Command::SetCcfg) => None,
            (Self::Cc26xx, Command::SetXosc) => None,
            (Self::Cc26xx, _) if revision == Revision::Rev1 => Some(command.early_silicon_id()),
            _ => Some(command.standard_id()),
        }
    }

    /// Flash size in bytes from the flash size register.
    pub fn decode_flash_size(self, register: u32) -> u32 {
        match self {
            // Number of pages in bits [7:0].
            Self::Cc26xx => (register & 0xFF) * CC26XX.page_size,
            // DIECFG0.FLASH_SIZE in bits [6:4], 128 KB steps.
            Self::Cc2538 => match (register >> 4) & 0x07 {
                code @ 1..=4 => code * 0x2_0000,
                _ => 0x1_0000,
            },
        }
    }

    /// RAM size in bytes from the RAM size register.
    pub fn decode_ram_size(self, register: u32, revision: Revision) -> u32 {
        match self {
            Self::Cc26xx => match (revision, register & 0x03) {
                (Revision::Rev1, 3) => 0x4000,
                (Revision::Rev1, 2) => 0x2000,
                (Revision::Rev1, 1) => 0x1000,
                (Revision::Rev1, _) => 0x0800,
                (Revision::Rev2, 3) => 0x5000,
                (Revision::Rev2, 2) => 0x4000,
                (Revision::Rev2, 1) => 0x2800,
                (Revision::Rev2, _) => 0x1000,
            },
            // DIECFG0.SRAM_SIZE in bits [9:7] on top of the 16 KB always present.
            Self::Cc2538 => {
                0x4000
                    + match (register >> 7) & 0x07 {
                        0 => 0x4000,
                        1 => 0x2000,
                        _ => 0,
                    }
            },
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cc2538 => write!(f, "CC2538"),
            Self::Cc26xx => write!(f, "CC26xx"),
        }
    }
}
