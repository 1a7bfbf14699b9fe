//! CRC32 as computed by the bootloader's CRC32 command.
//!
//! Reflected polynomial 0xEDB88320, initial value and final XOR 0xFFFFFFFF,
//! evaluated one nibble at a time with a 16-entry table.

const NIBBLE_TABLE: [u32; 16] = [
    0x00000000, 0x1DB71064, 0x3B6E20C8, 0x26D930AC, 0x76DC4190, 0x6B6B51F4, 0x4DB26158, 0x5005713C,
    0xEDB88320, 0xF00F9344, 0xD6D6A3E8, 0xCB61B38C, 0x9B64C2B0, 0x86D3D2D4, 0xA00AE278, 0xBDBDF21C,
];

/// Compute the CRC32 of `data` the way the device does.
pub fn crc32(data: &[u8]) -> u32 {
    let mut acc = 0xFFFF_FFFFu32;
    for &byte in data {
        let low = (acc ^ u32::from(byte)) & 0x0F;
        acc = (acc >> 4) ^ NIBBLE_TABLE[low as usize];
        let high = (acc ^ u32::from(byte >> 4)) & 0x0F;
        acc = (acc >> 4) ^ NIBBLE_TABLE[high as usize];
    }
    acc ^ 0xFFFF_FFFF
}
