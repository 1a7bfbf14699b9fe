//! Constant per-family device data: address map, transfer limits and the
//! memory regions the bootloader reserves for itself.

/// Inclusive address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    /// First address.
    pub start: u32,
    /// Last address (inclusive).
    pub end: u32,
}

impl AddressRange {
    /// Create a range from inclusive bounds.
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Whether `[address, address + len)` shares at least one byte with this range.
    pub fn overlaps(&self, address: u32, len: u32) -> bool {
        if len == 0 {
            return false;
        }
        let last = u64::from(address) + u64::from(len) - 1;
        u64::from(address) <= u64::from(self.end) && last >= u64::from(self.start)
    }
}

/// How the sector erase command addresses flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseStyle {
    /// One command per page, payload is the page address (CC26xx).
    Sector,
    /// Payload is address and byte count (CC2538).
    Range,
}

/// How the bootloader configuration byte encodes "bootloader enabled".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderEnable {
    /// Enabled only when the byte equals this value.
    Exact(u8),
    /// Enabled when all bits of this mask are set.
    BitMask(u8),
}

impl BootloaderEnable {
    /// Whether a configuration byte keeps the serial bootloader reachable.
    pub fn is_enabled(self, value: u8) -> bool {
        match self {
            Self::Exact(expected) => value == expected,
            Self::BitMask(mask) => value & mask == mask,
        }
    }
}

/// Constant description of one chip family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Display name.
    pub name: &'static str,
    /// First flash address.
    pub flash_base: u32,
    /// Flash erase page size in bytes.
    pub page_size: u32,
    /// First SRAM address.
    pub ram_base: u32,
    /// Register holding the flash size field.
    pub flash_size_register: u32,
    /// Register holding the RAM size field.
    pub ram_size_register: u32,
    /// Access width selector for byte accesses.
    pub access_width_8: u8,
    /// Access width selector for word accesses.
    pub access_width_32: u8,
    /// Max words per MEMORY_READ.
    pub max_read_words: u32,
    /// Max bytes per MEMORY_READ.
    pub max_read_bytes: u32,
    /// Max words per MEMORY_WRITE.
    pub max_write_words: u32,
    /// Max bytes per MEMORY_WRITE.
    pub max_write_bytes: u32,
    /// Max bytes per SEND_DATA.
    pub max_bytes_per_transfer: u32,
    /// SRAM used by the bootloader as work memory.
    pub work_memory: AddressRange,
    /// SRAM used by the bootloader as stack.
    pub stack_memory: AddressRange,
    /// Offset of the bootloader configuration byte within the last page.
    pub bl_config_offset: u32,
    /// Encoding of the bootloader configuration byte.
    pub bl_enable: BootloaderEnable,
    /// Sector erase addressing.
    pub erase_style: EraseStyle,
}

/// CC13xx/CC26xx ROM bootloader.
pub const CC26XX: DeviceProfile = DeviceProfile {
    name: "CC13xx/CC26xx",
    flash_base: 0x0000_0000,
    page_size: 4096,
    ram_base: 0x2000_0000,
    flash_size_register: 0x4003_002C,
    ram_size_register: 0x4008_2250,
    access_width_8: 0,
    access_width_32: 1,
    max_read_words: 63,
    max_read_bytes: 253,
    max_write_words: 61,
    max_write_bytes: 247,
    max_bytes_per_transfer: 252,
    work_memory: AddressRange::new(0x2000_0000, 0x2000_016F),
    stack_memory: AddressRange::new(0x2000_0FC0, 0x2000_0FFF),
    bl_config_offset: 0xFDB,
    bl_enable: BootloaderEnable::Exact(0xC5),
    erase_style: EraseStyle::Sector,
};

/// CC2538 ROM bootloader.
pub const CC2538: DeviceProfile = DeviceProfile {
    name: "CC2538",
    flash_base: 0x0020_0000,
    page_size: 2048,
    ram_base: 0x2000_0000,
    flash_size_register: 0x400D_3014,
    ram_size_register: 0x400D_3014,
    access_width_8: 1,
    access_width_32: 4,
    max_read_words: 63,
    max_read_bytes: 253,
    max_write_words: 61,
    max_write_bytes: 247,
    max_bytes_per_transfer: 252,
    work_memory: AddressRange::new(0x2000_0000, 0x2000_016F),
    stack_memory: AddressRange::new(0x2000_0FC0, 0x2000_0FFF),
    bl_config_offset: 0x7D7,
    bl_enable: BootloaderEnable::BitMask(0x10),
    erase_style: EraseStyle::Range,
};

impl DeviceProfile {
    /// Whether `[address, address + len)` lies within flash of `flash_size` bytes.
    pub fn in_flash(&self, address: u32, len: u32, flash_size: u32) -> bool {
        within(address, len, self.flash_base, flash_size)
    }

    /// Whether `[address, address + len)` lies within RAM of `ram_size` bytes.
    pub fn in_ram(&self, address: u32, len: u32, ram_size: u32) -> bool {
        within(address, len, self.ram_base, ram_size)
    }

    /// Whether `[address, address + len)` touches bootloader work memory or stack.
    pub fn touches_reserved(&self, address: u32, len: u32) -> bool {
        self.work_memory.overlaps(address, len) || self.stack_memory.overlaps(address, len)
    }

    /// Page index of a flash address.
    pub fn page_of(&self, address: u32) -> u32 {
        address.saturating_sub(self.flash_base) / self.page_size
    }

    /// Start address of a page index.
    pub fn page_address(&self, page: u32) -> u32 {
        self.flash_base + page * self.page_size
    }

    /// Absolute address of the bootloader configuration byte.
    pub fn bl_config_address(&self, flash_size: u32) -> u32 {
        self.flash_base + flash_size - self.page_size + self.bl_config_offset
    }
}

fn within(address: u32, len: u32, base: u32, size: u32) -> bool {
    let end = u64::from(address) + u64::from(len);
    address >= base && end <= u64::from(base) + u64::from(size)
}

/// CCFG fields accepted by SET_CCFG on CC26xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CcfgField {
    /// Flash sector write protection bits.
    SectorProt = 0,
    /// Image valid marker.
    ImageValid = 1,
    /// TEST TAP lock.
    TestTapLck = 2,
    /// PRCM TAP lock.
    PrcmTapLck = 3,
    /// CPU DAP lock.
    CpuDapLck = 4,
    /// WUC TAP lock.
    WucTapLck = 5,
    /// PBIST1 TAP lock.
    Pbist1TapLck = 6,
    /// PBIST2 TAP lock.
    Pbist2TapLck = 7,
    /// Disable BANK_ERASE.
    BankEraseDis = 8,
    /// Disable chip erase.
    ChipEraseDis = 9,
    /// TI failure analysis enable.
    TiFaEnable = 10,
    /// Bootloader backdoor enable.
    BlBackdoorEn = 11,
    /// Bootloader backdoor pin.
    BlBackdoorPin = 12,
    /// Bootloader backdoor active level.
    BlBackdoorLevel = 13,
    /// Bootloader enable.
    BlEnable = 14,
}

impl CcfgField {
    /// Field id sent on the wire.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Field for a wire id.
    pub fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => Self::SectorProt,
            1 => Self::ImageValid,
            2 => Self::TestTapLck,
            3 => Self::PrcmTapLck,
            4 => Self::CpuDapLck,
            5 => Self::WucTapLck,
            6 => Self::Pbist1TapLck,
            7 => Self::Pbist2TapLck,
            8 => Self::BankEraseDis,
            9 => Self::ChipEraseDis,
            10 => Self::TiFaEnable,
            11 => Self::BlBackdoorEn,
            12 => Self::BlBackdoorPin,
            13 => Self::BlBackdoorLevel,
            14 => Self::BlEnable,
            _ => return None,
        })
    }
}
