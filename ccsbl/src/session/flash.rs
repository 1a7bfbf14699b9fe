//! Flash sequencing: erase, program, verify and search.
//!
//! Programming announces a transfer with DOWNLOAD and streams it with
//! SEND_DATA packets. When a write covers the bootloader configuration byte
//! and the new value disables the bootloader, the write is split so that the
//! byte goes last: the device stops answering once it is programmed.

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};

use super::{Session, SessionState};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{CommandFrame, crc32};
use crate::target::{CcfgField, DeviceProfile, EraseStyle};

/// One DOWNLOAD + SEND_DATA sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transfer {
    /// Flash address of the first byte.
    pub address: u32,
    /// Number of bytes.
    pub byte_count: u32,
    /// Offset of the first byte in the source buffer.
    pub offset: u32,
    /// Whether the device is expected to acknowledge the data.
    pub expect_ack: bool,
}

/// Split a write of `data` at `address` around the bootloader configuration
/// byte when `data` would disable the bootloader.
pub(crate) fn plan_transfers(
    profile: &DeviceProfile,
    flash_size: u32,
    address: u32,
    data: &[u8],
) -> Vec<Transfer> {
    let len = data.len() as u32;
    let config = profile.bl_config_address(flash_size);
    let locks = config >= address
        && config - address < len
        && !profile
            .bl_enable
            .is_enabled(data[(config - address) as usize]);

    if !locks {
        return vec![Transfer {
            address,
            byte_count: len,
            offset: 0,
            expect_ack: true,
        }];
    }

    let main = (config - address) & !3;
    let mut transfers = Vec::with_capacity(2);
    if main > 0 {
        transfers.push(Transfer {
            address,
            byte_count: main,
            offset: 0,
            expect_ack: true,
        });
    }
    transfers.push(Transfer {
        address: address + main,
        byte_count: len - main,
        offset: main,
        expect_ack: false,
    });
    transfers
}

/// Every start offset of `pattern` in `haystack`.
fn match_offsets<'a>(haystack: &'a [u8], pattern: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(pattern.len())
        .enumerate()
        .filter(move |(_, window)| *window == pattern)
        .map(|(offset, _)| offset)
}

fn is_retryable(error: &Error) -> bool {
    matches!(error, Error::Protocol(_) | Error::DeviceStatus { .. })
}

impl<P: Port> Session<P> {
    /// Erase every flash page touched by `[address, address + len)`.
    ///
    /// Each page is erased separately and the device status is checked after
    /// each one, so a failure leaves earlier pages erased.
    pub fn erase_flash_range(&mut self, address: u32, len: u32) -> Result<()> {
        self.run(|s| {
            if len == 0 {
                return Err(Error::Argument("Erase length must be greater than zero".into()));
            }
            s.ensure_connected()?;
            s.check_flash_range(address, len)?;
            s.erase_pages(address, len)
        })
    }

    /// Announce a program operation of `size` bytes at `address`.
    pub fn download(&mut self, address: u32, size: u32) -> Result<()> {
        self.run(|s| {
            check_word_aligned(address, size)?;
            s.ensure_connected()?;
            s.check_flash_range(address, size)?;
            s.download_inner(address, size)
        })
    }

    /// Send one data packet of an announced program operation.
    pub fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.run(|s| {
            let max = s.profile().max_bytes_per_transfer as usize;
            if data.is_empty() || data.len() > max {
                return Err(Error::Argument(format!(
                    "Data packet must hold 1 to {max} bytes, got {}",
                    data.len()
                )));
            }
            s.ensure_connected()?;
            s.send_chunk(data, 0)
        })
    }

    /// Program `data` into erased flash at `address`.
    ///
    /// Address and length must be word aligned. If the write disables the
    /// bootloader the session is disconnected afterwards.
    pub fn write_flash_range(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.run(|s| {
            check_word_aligned(address, data.len() as u32)?;
            if data.is_empty() {
                return Err(Error::Argument("Nothing to write".into()));
            }
            s.ensure_connected()?;
            s.check_flash_range(address, data.len() as u32)?;
            s.write_flash_inner(address, data)
        })
    }

    /// Write `data` at any `address`, erasing as needed and keeping the
    /// surrounding bytes of every touched page.
    ///
    /// The covering pages are read back, erased, patched with `data` and
    /// programmed again as one range.
    pub fn write_flash_range_auto_erase(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.run(|s| {
            if data.is_empty() {
                return Err(Error::Argument("Nothing to write".into()));
            }
            s.ensure_connected()?;
            let len = data.len() as u32;
            s.check_flash_range(address, len)?;

            let profile = s.profile();
            let first = profile.page_of(address);
            let last = profile.page_of(address + len - 1);
            let start = profile.page_address(first);
            let span = (last - first + 1) * profile.page_size;
            debug!("Rewriting pages {first}..={last} ({span:#x} bytes at {start:#010x})");

            s.sink.on_status("Reading flash", false);
            let mut contents = s.read_bytes(start, span)?;
            let offset = (address - start) as usize;
            contents[offset..offset + data.len()].copy_from_slice(data);

            s.sink.on_status("Erasing flash", false);
            s.erase_pages(start, span)?;
            s.sink.on_status("Writing flash", false);
            s.write_flash_inner(start, &contents)
        })
    }

    /// CRC32 computed by the device over a range lying entirely in flash or
    /// entirely in RAM.
    pub fn calculate_crc32(&mut self, address: u32, len: u32) -> Result<u32> {
        self.run(|s| {
            if len == 0 {
                return Err(Error::Argument("CRC length must be greater than zero".into()));
            }
            s.ensure_connected()?;
            s.crc_inner(address, len)
        })
    }

    /// Compare the device CRC of `[address, address + data.len())` with `data`.
    pub fn verify_flash_range(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.run(|s| {
            if data.is_empty() {
                return Err(Error::Argument("Nothing to verify".into()));
            }
            s.ensure_connected()?;
            s.verify_inner(address, data)
        })
    }

    /// Erase, program and optionally verify a firmware image.
    ///
    /// The image is padded with 0xFF to a word boundary. Whole pages are
    /// erased, so bytes sharing a page with the image are lost.
    pub fn program(&mut self, address: u32, data: &[u8], verify: bool) -> Result<()> {
        self.run(|s| {
            if data.is_empty() {
                return Err(Error::Argument("Firmware image is empty".into()));
            }
            check_word_aligned(address, 0)?;
            s.ensure_connected()?;

            let mut image = data.to_vec();
            image.resize(data.len().next_multiple_of(4), 0xFF);
            let len = image.len() as u32;
            s.check_flash_range(address, len)?;

            info!("Erasing {len} bytes at {address:#010x}");
            s.sink.on_status("Erasing flash", false);
            s.erase_pages(address, len)?;

            info!("Writing {len} bytes at {address:#010x}");
            s.sink.on_status("Writing flash", false);
            s.write_flash_inner(address, &image)?;

            if !verify {
                return Ok(());
            }
            if s.state == SessionState::Disconnected {
                warn!("Bootloader disabled by image, skipping verification");
                return Ok(());
            }
            s.sink.on_status("Verifying flash", false);
            s.verify_inner(address, &image)?;
            s.sink.on_status("Flash verified", false);
            Ok(())
        })
    }

    /// Read the whole flash with byte reads, e.g. to keep a backup before
    /// it is rewritten.
    pub fn read_flash(&mut self) -> Result<Vec<u8>> {
        self.run(|s| {
            s.ensure_connected()?;
            let base = s.profile().flash_base;
            let size = s.flash_size;
            info!("Reading {size:#x} bytes of flash at {base:#010x}");
            s.read_bytes(base, size)
        })
    }

    /// Erase all unprotected flash (CC26xx).
    pub fn erase_flash_bank(&mut self) -> Result<()> {
        self.run(|s| {
            s.ensure_connected()?;
            info!("Erasing flash bank");
            s.exchange(&CommandFrame::bank_erase(), true)?;
            s.check_status("Bank erase")?;
            s.progress(1, 1);
            Ok(())
        })
    }

    /// Program one CCFG field (CC26xx).
    pub fn set_protected_field(&mut self, field: CcfgField, value: u32) -> Result<()> {
        self.run(|s| {
            s.ensure_connected()?;
            debug!("Setting CCFG field {field:?} to {value:#x}");
            s.exchange(&CommandFrame::set_ccfg(field.id(), value), true)?;
            s.check_status(format!("Setting CCFG field {field:?}"))
        })
    }

    /// Absolute address of every occurrence of `pattern` in flash.
    ///
    /// Flash is read one page at a time; the last `pattern.len() - 1` bytes
    /// of each page are carried over so matches spanning pages are found.
    /// Overlapping matches are all reported.
    pub fn find_bytes(&mut self, pattern: &[u8]) -> Result<Vec<u32>> {
        self.run(|s| {
            let page_size = s.profile().page_size as usize;
            if pattern.is_empty() || pattern.len() > page_size {
                return Err(Error::Argument(format!(
                    "Search pattern must be 1 to {page_size} bytes, got {}",
                    pattern.len()
                )));
            }
            s.ensure_connected()?;

            let profile = s.profile();
            let start = profile.flash_base;
            let end = start + s.flash_size;
            let mut matches = Vec::new();
            let mut previous: Vec<u8> = Vec::new();
            let mut address = start;

            while address < end {
                let len = profile.page_size.min(end - address);
                let current = s.muted(|s| s.read_flash_bytes(address, len))?;

                let mut window = Vec::with_capacity(previous.len() + current.len());
                window.extend_from_slice(&previous);
                window.extend_from_slice(&current);
                let window_start = address - previous.len() as u32;
                matches.extend(match_offsets(&window, pattern).map(|o| window_start + o as u32));

                let keep = (pattern.len() - 1).min(window.len());
                previous = window.split_off(window.len() - keep);
                address += len;
                s.progress(u64::from(address - start), u64::from(end - start));
            }

            debug!("Found {} match(es)", matches.len());
            Ok(matches)
        })
    }

    fn check_flash_range(&self, address: u32, len: u32) -> Result<()> {
        if self.profile().in_flash(address, len, self.flash_size) {
            Ok(())
        } else {
            Err(Error::Argument(format!(
                "Range {address:#010x}+{len:#x} is outside flash"
            )))
        }
    }

    fn erase_pages(&mut self, address: u32, len: u32) -> Result<()> {
        let profile = self.profile();
        let first = profile.page_of(address);
        let last = profile.page_of(address + len - 1);
        let count = last - first + 1;

        for page in first..=last {
            let page_address = profile.page_address(page);
            debug!("Erasing page {page} at {page_address:#010x}");
            let frame = match profile.erase_style {
                EraseStyle::Sector => CommandFrame::sector_erase(page_address),
                EraseStyle::Range => CommandFrame::range_erase(page_address, profile.page_size),
            };
            self.exchange(&frame, true)?;
            self.check_status(format!(
                "Erasing page {page} at {page_address:#010x} failed. Flash pages may be locked"
            ))?;
            self.progress(u64::from(page - first + 1), u64::from(count));
        }
        Ok(())
    }

    fn download_inner(&mut self, address: u32, size: u32) -> Result<()> {
        debug!("Download {size} bytes to {address:#010x}");
        self.exchange(&CommandFrame::download(address, size), false)?;
        self.check_status(format!("Download of {size} bytes to {address:#010x}"))
    }

    fn write_flash_inner(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let profile = self.profile();
        let transfers = plan_transfers(profile, self.flash_size, address, data);
        let total = data.len() as u64;
        let max = profile.max_bytes_per_transfer as usize;
        let mut done = 0u64;

        for (index, transfer) in transfers.iter().enumerate() {
            self.download_inner(transfer.address, transfer.byte_count)?;
            let start = transfer.offset as usize;
            let bytes = &data[start..start + transfer.byte_count as usize];

            for (chunk_index, chunk) in bytes.chunks(max).enumerate() {
                let chunk_address = transfer.address + (chunk_index * max) as u32;
                if transfer.expect_ack {
                    self.send_chunk_retrying(chunk, chunk_address, index)?;
                } else {
                    self.send(&CommandFrame::send_data(chunk))?;
                }
                done += chunk.len() as u64;
                self.progress(done, total);
            }
        }

        if transfers.last().is_some_and(|t| !t.expect_ack) {
            self.state = SessionState::Disconnected;
            warn!("Bootloader configuration byte written, bootloader is now disabled");
            self.sink.on_status(
                "Bootloader disabled by written data, the device no longer answers",
                false,
            );
        }
        Ok(())
    }

    fn send_chunk(&mut self, chunk: &[u8], chunk_address: u32) -> Result<()> {
        self.exchange(&CommandFrame::send_data(chunk), false)?;
        self.check_status(format!(
            "Programming {} bytes at {chunk_address:#010x}",
            chunk.len()
        ))
    }

    fn send_chunk_retrying(
        &mut self,
        chunk: &[u8],
        chunk_address: u32,
        transfer: usize,
    ) -> Result<()> {
        match self.send_chunk(chunk, chunk_address) {
            Err(e) if is_retryable(&e) => {
                warn!("Chunk at {chunk_address:#010x} rejected ({e}), retrying once");
            },
            other => return other,
        }

        match self.send_chunk(chunk, chunk_address) {
            Err(e) if is_retryable(&e) => {
                let page = self.profile().page_of(chunk_address);
                Err(Error::Protocol(format!(
                    "Writing {} bytes at {chunk_address:#010x} (page {page}, transfer {}) \
                     failed after retry: {e}",
                    chunk.len(),
                    transfer + 1
                )))
            },
            other => other,
        }
    }

    fn crc_inner(&mut self, address: u32, len: u32) -> Result<u32> {
        let profile = self.profile();
        if !profile.in_flash(address, len, self.flash_size)
            && !profile.in_ram(address, len, self.ram_size)
        {
            return Err(Error::Argument(format!(
                "Range {address:#010x}+{len:#x} must lie entirely in flash or entirely in RAM"
            )));
        }

        self.exchange(&CommandFrame::crc32(address, len), true)?;
        let budget = self.link_config.data_timeout;
        let data = self.link().receive_exact(4, budget)?;
        let crc = BigEndian::read_u32(&data);
        debug!("Device CRC32 of {address:#010x}+{len:#x}: {crc:#010x}");
        Ok(crc)
    }

    fn verify_inner(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let expected = crc32(data);
        let actual = self.crc_inner(address, data.len() as u32)?;
        if expected == actual {
            Ok(())
        } else {
            Err(Error::Integrity { expected, actual })
        }
    }
}

fn check_word_aligned(address: u32, len: u32) -> Result<()> {
    if address % 4 != 0 || len % 4 != 0 {
        return Err(Error::Argument(format!(
            "Address {address:#010x} and length {len:#x} must be 4-byte aligned"
        )));
    }
    Ok(())
}
