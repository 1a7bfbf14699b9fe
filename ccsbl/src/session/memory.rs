//! Chunked memory reads and writes.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::debug;

use super::Session;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::CommandFrame;

/// Access width of a memory command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Word,
    Byte,
}

impl Width {
    fn unit(self) -> u32 {
        match self {
            Self::Word => 4,
            Self::Byte => 1,
        }
    }
}

/// Split `total` units into `(offset, len)` chunks of at most `max` units.
pub(crate) fn plan_chunks(total: u32, max: u32) -> impl Iterator<Item = (u32, u32)> {
    let max = max.max(1);
    (0..total)
        .step_by(max as usize)
        .map(move |offset| (offset, max.min(total - offset)))
}

fn check_aligned(address: u32) -> Result<()> {
    if address % 4 == 0 {
        Ok(())
    } else {
        Err(Error::Argument(format!(
            "Address {address:#010x} is not 4-byte aligned"
        )))
    }
}

fn check_span(address: u32, len: u64) -> Result<()> {
    if len == 0 {
        return Err(Error::Argument("Length must be greater than zero".into()));
    }
    if u64::from(address) + len > 1 << 32 {
        return Err(Error::Argument(format!(
            "Range {address:#010x}+{len:#x} exceeds the 32-bit address space"
        )));
    }
    Ok(())
}

impl<P: Port> Session<P> {
    /// Read `count` 32-bit words starting at a word aligned `address`.
    pub fn read_memory32(&mut self, address: u32, count: u32) -> Result<Vec<u32>> {
        self.run(|s| {
            check_aligned(address)?;
            check_span(address, u64::from(count) * 4)?;
            s.ensure_connected()?;
            s.read_words(address, count)
        })
    }

    /// Read `count` bytes starting at `address`.
    pub fn read_memory8(&mut self, address: u32, count: u32) -> Result<Vec<u8>> {
        self.run(|s| {
            check_span(address, u64::from(count))?;
            s.ensure_connected()?;
            s.read_units(address, count, Width::Byte)
        })
    }

    /// Write 32-bit words starting at a word aligned `address`.
    ///
    /// Writes touching the bootloader's work memory or stack are refused
    /// before anything is sent.
    pub fn write_memory32(&mut self, address: u32, words: &[u32]) -> Result<()> {
        self.run(|s| {
            check_aligned(address)?;
            check_span(address, words.len() as u64 * 4)?;
            s.check_unreserved(address, words.len() as u32 * 4)?;
            s.ensure_connected()?;

            let mut bytes = vec![0u8; words.len() * 4];
            BigEndian::write_u32_into(words, &mut bytes);
            s.write_units(address, &bytes, Width::Word)
        })
    }

    /// Write bytes starting at `address`.
    pub fn write_memory8(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.run(|s| {
            check_span(address, data.len() as u64)?;
            s.check_unreserved(address, data.len() as u32)?;
            s.ensure_connected()?;
            s.write_units(address, data, Width::Byte)
        })
    }

    pub(super) fn read_words(&mut self, address: u32, count: u32) -> Result<Vec<u32>> {
        let bytes = self.read_units(address, count, Width::Word)?;
        Ok(bytes.chunks_exact(4).map(LittleEndian::read_u32).collect())
    }

    pub(super) fn read_bytes(&mut self, address: u32, count: u32) -> Result<Vec<u8>> {
        self.read_units(address, count, Width::Byte)
    }

    /// Read `len` bytes of flash using word accesses. `len` is a multiple of 4.
    pub(super) fn read_flash_bytes(&mut self, address: u32, len: u32) -> Result<Vec<u8>> {
        self.read_units(address, len / 4, Width::Word)
    }

    fn check_unreserved(&self, address: u32, len: u32) -> Result<()> {
        if self.profile().touches_reserved(address, len) {
            return Err(Error::Argument(format!(
                "Range {address:#010x}+{len:#x} overlaps memory reserved by the bootloader"
            )));
        }
        Ok(())
    }

    fn read_units(&mut self, address: u32, count: u32, width: Width) -> Result<Vec<u8>> {
        let profile = self.profile();
        let (selector, max) = match width {
            Width::Word => (profile.access_width_32, profile.max_read_words),
            Width::Byte => (profile.access_width_8, profile.max_read_bytes),
        };
        let unit = width.unit();
        debug!("Reading {count} x {unit} bytes at {address:#010x}");

        // Grown chunk by chunk: a 4 GiB span is valid but must not be reserved up front.
        let mut out = Vec::new();
        for (offset, len) in plan_chunks(count, max) {
            let chunk_address = address + offset * unit;
            self.exchange(
                &CommandFrame::memory_read(chunk_address, selector, len as u8),
                false,
            )?;
            let budget = self.link_config.data_timeout;
            let data = self.link().receive_exact((len * unit) as usize, budget)?;
            out.extend_from_slice(&data);
            self.progress(u64::from(offset + len), u64::from(count));
        }
        Ok(out)
    }

    fn write_units(&mut self, address: u32, data: &[u8], width: Width) -> Result<()> {
        let profile = self.profile();
        let (selector, max) = match width {
            Width::Word => (profile.access_width_32, profile.max_write_words),
            Width::Byte => (profile.access_width_8, profile.max_write_bytes),
        };
        let max_bytes = (max * width.unit()) as usize;
        let total = data.len();
        debug!("Writing {total} bytes at {address:#010x}");

        for (index, chunk) in data.chunks(max_bytes).enumerate() {
            let offset = index * max_bytes;
            let chunk_address = address + offset as u32;
            self.exchange(
                &CommandFrame::memory_write(chunk_address, selector, chunk),
                true,
            )
            .map_err(|e| match e {
                Error::Protocol(msg) => Error::Protocol(format!(
                    "{msg} at {chunk_address:#010x}, {offset} of {total} bytes written"
                )),
                other => other,
            })?;
            self.progress((offset + chunk.len()) as u64, total as u64);
        }
        Ok(())
    }
}
