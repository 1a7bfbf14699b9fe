//! In-memory ports used by the unit tests.
//!
//! [`ScriptedPort`] replays canned input and records output, for link-level
//! tests. [`SimDevice`] emulates a ROM bootloader at the packet level, with
//! flash and RAM images, size registers and injectable faults, for session
//! tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::packet::{self, ACK, AUTOBAUD, NAK};
use crate::protocol::{
    Command, STATUS_FLASH_FAIL, STATUS_INVALID_ADR, STATUS_INVALID_CMD, STATUS_SUCCESS,
    STATUS_UNKNOWN_CMD, crc32,
};
use crate::target::{ChipFamily, EraseStyle, Revision};

/// Port that returns scripted input chunks, one chunk per read.
#[derive(Debug, Default)]
pub struct ScriptedPort {
    input: VecDeque<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    stalled: bool,
    clears: usize,
    timeout: Duration,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be returned by a single read.
    pub fn with_input(mut self, bytes: &[u8]) -> Self {
        self.input.push_back(bytes.to_vec());
        self
    }

    /// Queue bytes that become readable after the next write, so they
    /// survive a buffer clear before the exchange.
    pub fn reply_on_write(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    /// Make every write accept zero bytes.
    pub fn stalled_writes(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn clears(&self) -> usize {
        self.clears
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut chunk) = self.input.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.input.push_front(chunk.split_off(n));
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stalled {
            return Ok(0);
        }
        self.written.extend_from_slice(buf);
        if let Some(reply) = self.replies.pop_front() {
            self.input.push_back(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<()> {
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        115_200
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.clears += 1;
        self.input.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn set_dtr(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A command packet as received by [`SimDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub command: Command,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct DownloadState {
    next: u32,
    remaining: u32,
}

/// Packet-level emulation of a ROM serial bootloader.
#[derive(Debug)]
pub struct SimDevice {
    family: ChipFamily,
    revision: Revision,
    device_id: u32,
    flash: Vec<u8>,
    ram: Vec<u8>,
    registers: HashMap<u32, u32>,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    synced: bool,
    status: u8,
    download: Option<DownloadState>,
    locked_pages: HashSet<u32>,
    nak_send_data: u32,
    fail_send_data: u32,
    silent: bool,
    bootloader_disabled: bool,
    log: Vec<Received>,
    host_tokens: Vec<[u8; 2]>,
    ccfg_writes: Vec<(u32, u32)>,
    line_changes: Vec<(&'static str, bool)>,
    timeout: Duration,
}

impl SimDevice {
    fn blank(family: ChipFamily, device_id: u32, flash_size: u32, ram_size: u32) -> Self {
        Self {
            family,
            revision: family.revision_from_device_id(device_id),
            device_id,
            flash: vec![0xFF; flash_size as usize],
            ram: vec![0x00; ram_size as usize],
            registers: HashMap::new(),
            rx: Vec::new(),
            tx: VecDeque::new(),
            synced: false,
            status: STATUS_SUCCESS,
            download: None,
            locked_pages: HashSet::new(),
            nak_send_data: 0,
            fail_send_data: 0,
            silent: false,
            bootloader_disabled: false,
            log: Vec::new(),
            host_tokens: Vec::new(),
            ccfg_writes: Vec::new(),
            line_changes: Vec::new(),
            timeout: Duration::from_millis(1),
        }
    }

    /// CC26xx with `flash_pages` 4 KB pages and RAM size code `ram_bits`.
    pub fn cc26xx(device_id: u32, flash_pages: u32, ram_bits: u32) -> Self {
        let family = ChipFamily::Cc26xx;
        let profile = family.profile();
        let revision = family.revision_from_device_id(device_id);
        let flash_size = family.decode_flash_size(flash_pages);
        let ram_size = family.decode_ram_size(ram_bits, revision);

        let mut sim = Self::blank(family, device_id, flash_size, ram_size);
        // Upper register bits are unrelated fields and must be masked off.
        sim.registers
            .insert(profile.flash_size_register, 0x0000_AB00 | flash_pages);
        sim.registers
            .insert(profile.ram_size_register, 0x0000_0F00 | ram_bits);
        let cfg = profile.bl_config_address(flash_size) - profile.flash_base;
        sim.flash[cfg as usize] = 0xC5;
        sim
    }

    /// CC2538 with DIECFG0 flash code `flash_code` and SRAM code `sram_code`.
    pub fn cc2538(flash_code: u32, sram_code: u32) -> Self {
        let family = ChipFamily::Cc2538;
        let profile = family.profile();
        let diecfg0 = (flash_code << 4) | (sram_code << 7);
        let flash_size = family.decode_flash_size(diecfg0);
        let ram_size = family.decode_ram_size(diecfg0, Revision::Rev2);

        let mut sim = Self::blank(family, 0x0000_B964, flash_size, ram_size);
        sim.registers.insert(profile.flash_size_register, diecfg0);
        sim
    }

    pub fn family(&self) -> ChipFamily {
        self.family
    }

    pub fn lock_page(&mut self, page: u32) {
        self.locked_pages.insert(page);
    }

    /// NAK the next `count` SEND_DATA packets without programming.
    pub fn nak_next_send_data(&mut self, count: u32) {
        self.nak_send_data = count;
    }

    /// ACK the next `count` SEND_DATA packets but report FLASH_FAIL.
    pub fn fail_next_send_data(&mut self, count: u32) {
        self.fail_send_data = count;
    }

    /// Stop answering entirely.
    pub fn silence(&mut self) {
        self.silent = true;
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn log(&self) -> &[Received] {
        &self.log
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.iter().map(|r| r.command).collect()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        self.host_tokens.clear();
    }

    pub fn host_tokens(&self) -> &[[u8; 2]] {
        &self.host_tokens
    }

    pub fn ccfg_writes(&self) -> &[(u32, u32)] {
        &self.ccfg_writes
    }

    pub fn bootloader_disabled(&self) -> bool {
        self.bootloader_disabled
    }

    pub fn line_changes(&self) -> &[(&'static str, bool)] {
        &self.line_changes
    }

    fn flash_base(&self) -> u32 {
        self.family.profile().flash_base
    }

    fn ram_base(&self) -> u32 {
        self.family.profile().ram_base
    }

    fn respond(&mut self, token: [u8; 2]) {
        self.tx.extend(token);
    }

    fn respond_data(&mut self, payload: &[u8]) {
        self.tx.push_back((payload.len() + 2) as u8);
        self.tx.push_back(packet::checksum(payload));
        self.tx.extend(payload.iter().copied());
    }

    fn flash_offset(&self, address: u32, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.flash_base())? as usize;
        (offset + len <= self.flash.len()).then_some(offset)
    }

    fn ram_offset(&self, address: u32, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.ram_base())? as usize;
        (offset + len <= self.ram.len()).then_some(offset)
    }

    fn read_region(&self, address: u32, len: usize) -> Option<Vec<u8>> {
        if let Some(off) = self.flash_offset(address, len) {
            return Some(self.flash[off..off + len].to_vec());
        }
        if let Some(off) = self.ram_offset(address, len) {
            return Some(self.ram[off..off + len].to_vec());
        }
        None
    }

    fn process(&mut self) {
        loop {
            if !self.synced {
                match self.rx.windows(2).position(|w| w == AUTOBAUD) {
                    Some(pos) => {
                        self.rx.drain(..pos + 2);
                        self.synced = true;
                        self.respond(ACK);
                        continue;
                    },
                    None => {
                        let keep = usize::from(self.rx.last() == Some(&0x55));
                        let drop = self.rx.len() - keep;
                        self.rx.drain(..drop);
                        return;
                    },
                }
            }

            let Some(&len) = self.rx.first() else {
                return;
            };
            if len == 0x00 {
                if self.rx.len() < 2 {
                    return;
                }
                self.host_tokens.push([self.rx[0], self.rx[1]]);
                self.rx.drain(..2);
                continue;
            }

            let len = usize::from(len);
            if len < 3 {
                self.rx.drain(..1);
                self.respond(NAK);
                continue;
            }
            if self.rx.len() < len {
                return;
            }

            let packet: Vec<u8> = self.rx.drain(..len).collect();
            let (sum, id, payload) = (packet[1], packet[2], &packet[3..]);
            if packet::checksum(payload).wrapping_add(id) != sum {
                self.respond(NAK);
                continue;
            }
            self.handle(id, payload);
        }
    }

    fn handle(&mut self, id: u8, payload: &[u8]) {
        let command = Command::ALL
            .into_iter()
            .find(|c| self.family.command_id(*c, self.revision) == Some(id));
        let Some(command) = command else {
            self.status = STATUS_UNKNOWN_CMD;
            self.respond(NAK);
            return;
        };
        self.log.push(Received {
            command,
            payload: payload.to_vec(),
        });

        match command {
            Command::Ping => {
                self.status = STATUS_SUCCESS;
                self.respond(ACK);
            },
            Command::SetXosc => {
                // The clock switch restarts baud rate detection.
                self.status = STATUS_SUCCESS;
                self.respond(ACK);
                self.synced = false;
            },
            Command::GetStatus => {
                self.respond(ACK);
                let status = self.status;
                self.respond_data(&[status]);
            },
            Command::GetChipId => {
                self.status = STATUS_SUCCESS;
                self.respond(ACK);
                let id = self.device_id.to_be_bytes();
                self.respond_data(&id);
            },
            Command::Reset => {
                self.respond(ACK);
                self.synced = false;
                self.download = None;
                self.status = STATUS_SUCCESS;
            },
            Command::SectorErase => self.handle_erase(payload),
            Command::Crc32 => self.handle_crc(payload),
            Command::MemoryRead => self.handle_memory_read(payload),
            Command::MemoryWrite => self.handle_memory_write(payload),
            Command::Download => self.handle_download(payload),
            Command::SendData => self.handle_send_data(payload),
            Command::BankErase => {
                self.respond(ACK);
                let page_size = self.family.profile().page_size as usize;
                let locked = self.locked_pages.clone();
                for (page, chunk) in self.flash.chunks_mut(page_size).enumerate() {
                    if !locked.contains(&(page as u32)) {
                        chunk.fill(0xFF);
                    }
                }
                self.status = STATUS_SUCCESS;
            },
            Command::SetCcfg => {
                self.respond(ACK);
                self.ccfg_writes.push((be32(payload, 0), be32(payload, 4)));
                self.status = STATUS_SUCCESS;
            },
        }
    }

    fn erase_page(&mut self, page: u32) -> bool {
        let page_size = self.family.profile().page_size as usize;
        let start = page as usize * page_size;
        if self.locked_pages.contains(&page) || start + page_size > self.flash.len() {
            return false;
        }
        self.flash[start..start + page_size].fill(0xFF);
        true
    }

    fn handle_erase(&mut self, payload: &[u8]) {
        self.respond(ACK);
        let profile = self.family.profile();
        let address = be32(payload, 0);
        let (first, count) = match profile.erase_style {
            EraseStyle::Sector => (address, profile.page_size),
            EraseStyle::Range => (address, be32(payload, 4)),
        };
        if first % profile.page_size != profile.flash_base % profile.page_size
            || self.flash_offset(first, count as usize).is_none()
        {
            self.status = STATUS_INVALID_ADR;
            return;
        }
        let first_page = profile.page_of(first);
        let pages = count.div_ceil(profile.page_size);
        self.status = STATUS_SUCCESS;
        for page in first_page..first_page + pages {
            if !self.erase_page(page) {
                self.status = STATUS_FLASH_FAIL;
                return;
            }
        }
    }

    fn handle_crc(&mut self, payload: &[u8]) {
        let (address, size) = (be32(payload, 0), be32(payload, 4));
        match self.read_region(address, size as usize) {
            Some(bytes) => {
                self.status = STATUS_SUCCESS;
                self.respond(ACK);
                let crc = crc32(&bytes).to_be_bytes();
                self.respond_data(&crc);
            },
            None => {
                self.status = STATUS_INVALID_ADR;
                self.respond(NAK);
            },
        }
    }

    fn handle_memory_read(&mut self, payload: &[u8]) {
        let profile = self.family.profile();
        let address = be32(payload, 0);
        let (width, count) = (payload[4], usize::from(payload[5]));
        let (unit, max) = if width == profile.access_width_32 {
            (4, profile.max_read_words as usize)
        } else if width == profile.access_width_8 {
            (1, profile.max_read_bytes as usize)
        } else {
            self.status = STATUS_INVALID_CMD;
            self.respond(NAK);
            return;
        };
        if count == 0 || count > max {
            self.status = STATUS_INVALID_CMD;
            self.respond(NAK);
            return;
        }

        let data = match self.registers.get(&address) {
            Some(value) if unit == 4 && count == 1 => Some(value.to_le_bytes().to_vec()),
            _ => self.read_region(address, count * unit),
        };
        match data {
            Some(bytes) => {
                self.status = STATUS_SUCCESS;
                self.respond(ACK);
                self.respond_data(&bytes);
            },
            None => {
                self.status = STATUS_INVALID_ADR;
                self.respond(NAK);
            },
        }
    }

    fn handle_memory_write(&mut self, payload: &[u8]) {
        let profile = self.family.profile();
        let address = be32(payload, 0);
        let width = payload[4];
        let mut data = payload[5..].to_vec();
        if width == profile.access_width_32 {
            if data.len() % 4 != 0 {
                self.status = STATUS_INVALID_CMD;
                self.respond(NAK);
                return;
            }
            // Words arrive most significant byte first and are stored little endian.
            for word in data.chunks_mut(4) {
                word.reverse();
            }
        } else if width != profile.access_width_8 {
            self.status = STATUS_INVALID_CMD;
            self.respond(NAK);
            return;
        }

        match self.ram_offset(address, data.len()) {
            Some(off) => {
                self.ram[off..off + data.len()].copy_from_slice(&data);
                self.status = STATUS_SUCCESS;
                self.respond(ACK);
            },
            None => {
                self.status = STATUS_INVALID_ADR;
                self.respond(NAK);
            },
        }
    }

    fn handle_download(&mut self, payload: &[u8]) {
        self.respond(ACK);
        let (address, size) = (be32(payload, 0), be32(payload, 4));
        if address % 4 != 0 || size % 4 != 0 || self.flash_offset(address, size as usize).is_none()
        {
            self.download = None;
            self.status = STATUS_INVALID_ADR;
            return;
        }
        self.download = Some(DownloadState {
            next: address,
            remaining: size,
        });
        self.status = STATUS_SUCCESS;
    }

    fn handle_send_data(&mut self, payload: &[u8]) {
        if self.nak_send_data > 0 {
            self.nak_send_data -= 1;
            self.status = STATUS_FLASH_FAIL;
            self.respond(NAK);
            return;
        }
        self.respond(ACK);

        let Some(mut state) = self.download else {
            self.status = STATUS_INVALID_CMD;
            return;
        };
        if self.fail_send_data > 0 {
            self.fail_send_data -= 1;
            self.status = STATUS_FLASH_FAIL;
            return;
        }
        if payload.len() as u32 > state.remaining {
            self.status = STATUS_INVALID_CMD;
            return;
        }

        let Some(off) = self.flash_offset(state.next, payload.len()) else {
            self.status = STATUS_INVALID_ADR;
            return;
        };
        for (cell, byte) in self.flash[off..off + payload.len()].iter_mut().zip(payload) {
            *cell &= *byte;
        }

        let profile = self.family.profile();
        let cfg = profile.bl_config_address(self.flash.len() as u32);
        if (state.next..state.next + payload.len() as u32).contains(&cfg) {
            let value = self.flash[(cfg - profile.flash_base) as usize];
            self.bootloader_disabled = !profile.bl_enable.is_enabled(value);
        }

        state.next += payload.len() as u32;
        state.remaining -= payload.len() as u32;
        self.download = (state.remaining > 0).then_some(state);
        self.status = STATUS_SUCCESS;
    }
}

fn be32(bytes: &[u8], offset: usize) -> u32 {
    bytes
        .get(offset..offset + 4)
        .map_or(0, |b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

impl Read for SimDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.silent {
            return Ok(0);
        }
        let n = buf.len().min(self.tx.len());
        for (slot, byte) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.silent {
            self.rx.extend_from_slice(buf);
            self.process();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimDevice {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<()> {
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        115_200
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.tx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.line_changes.push(("DTR", level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.line_changes.push(("RTS", level));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(sim: &mut SimDevice, command: Command, payload: &[u8]) {
        let id = sim.family.command_id(command, sim.revision).unwrap();
        let bytes = packet::encode(id, payload).unwrap();
        sim.write_all(&bytes).unwrap();
    }

    fn drain(sim: &mut SimDevice) -> Vec<u8> {
        let mut out = vec![0u8; 512];
        let n = sim.read(&mut out).unwrap();
        out.truncate(n);
        out
    }

    #[test]
    fn test_autobaud_then_ping() {
        let mut sim = SimDevice::cc26xx(0x2000_0000, 32, 3);
        sim.write_all(&[0x55, 0x55]).unwrap();
        assert_eq!(drain(&mut sim), ACK.to_vec());

        send(&mut sim, Command::Ping, &[]);
        assert_eq!(drain(&mut sim), ACK.to_vec());
        assert_eq!(sim.commands(), vec![Command::Ping]);
    }

    #[test]
    fn test_register_read_is_little_endian() {
        let mut sim = SimDevice::cc26xx(0x2000_0000, 32, 3);
        sim.write_all(&AUTOBAUD).unwrap();
        drain(&mut sim);

        send(&mut sim, Command::MemoryRead, &[0x40, 0x03, 0x00, 0x2C, 1, 1]);
        let out = drain(&mut sim);
        assert_eq!(&out[..2], &ACK);
        assert_eq!(out[2], 6);
        assert_eq!(&out[4..], &[0x20, 0xAB, 0x00, 0x00]);
    }

    #[test]
    fn test_bad_checksum_is_naked() {
        let mut sim = SimDevice::cc26xx(0x2000_0000, 32, 3);
        sim.write_all(&AUTOBAUD).unwrap();
        drain(&mut sim);

        sim.write_all(&[0x03, 0x00, 0x20]).unwrap();
        assert_eq!(drain(&mut sim), NAK.to_vec());
    }

    #[test]
    fn test_download_and_program() {
        let mut sim = SimDevice::cc26xx(0x2000_0000, 32, 3);
        sim.write_all(&AUTOBAUD).unwrap();
        drain(&mut sim);

        send(&mut sim, Command::Download, &[0, 0, 0x10, 0, 0, 0, 0, 4]);
        send(&mut sim, Command::SendData, &[1, 2, 3, 4]);
        assert_eq!(&sim.flash()[0x1000..0x1004], &[1, 2, 3, 4]);
        assert_eq!(sim.status, STATUS_SUCCESS);
        assert!(sim.download.is_none());
    }

    #[test]
    fn test_rev1_uses_alternate_ids() {
        let mut sim = SimDevice::cc26xx(0x1000_0000, 32, 3);
        sim.write_all(&AUTOBAUD).unwrap();
        drain(&mut sim);

        // 0x2A is BANK_ERASE on early silicon.
        sim.write_all(&packet::encode(0x2A, &[]).unwrap()).unwrap();
        assert_eq!(sim.commands(), vec![Command::BankErase]);
    }
}
