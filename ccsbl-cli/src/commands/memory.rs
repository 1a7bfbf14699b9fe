//! Read, find, and CRC command implementations.

use anyhow::{Context, Result};
use console::style;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use super::with_session;
use crate::Cli;
use crate::config::Config;

/// Classic 16-bytes-per-line hex dump with an ASCII column.
pub(crate) fn hex_dump(address: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (index, line) in data.chunks(16).enumerate() {
        let line_address = address.wrapping_add((index * 16) as u32);
        let _ = write!(out, "{line_address:08x}: ");
        for column in 0..16 {
            match line.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                },
                None => out.push_str("   "),
            }
            if column == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(line.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

/// Read command implementation.
pub(crate) fn cmd_read(
    cli: &Cli,
    config: &mut Config,
    address: u32,
    length: u32,
    output: Option<&Path>,
) -> Result<()> {
    let data = with_session(cli, config, |session, ui| {
        ui.step("Reading");
        // Word reads move four times as much per command.
        let data: Vec<u8> = if address % 4 == 0 && length % 4 == 0 {
            session
                .read_memory32(address, length / 4)?
                .into_iter()
                .flat_map(u32::to_le_bytes)
                .collect()
        } else {
            session.read_memory8(address, length)?
        };
        Ok(data)
    })?;

    match output {
        Some(path) => {
            fs::write(path, &data).with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} Saved {} bytes from {address:#010x} to {}",
                    style("✓").green(),
                    data.len(),
                    path.display()
                );
            }
        },
        None => print!("{}", hex_dump(address, &data)),
    }
    Ok(())
}

/// Find command implementation.
pub(crate) fn cmd_find(cli: &Cli, config: &mut Config, pattern: &[u8]) -> Result<()> {
    let matches = with_session(cli, config, |session, ui| {
        ui.step("Searching flash");
        Ok(session.find_bytes(pattern)?)
    })?;

    for address in &matches {
        println!("{address:#010x}");
    }
    if !cli.quiet {
        match matches.len() {
            0 => eprintln!("{} No match", style("ℹ").blue()),
            n => eprintln!("{} {n} match(es)", style("✓").green()),
        }
    }
    Ok(())
}

/// CRC command implementation.
pub(crate) fn cmd_crc(cli: &Cli, config: &mut Config, address: u32, length: u32) -> Result<()> {
    let crc = with_session(cli, config, |session, _| {
        session
            .calculate_crc32(address, length)
            .with_context(|| format!("CRC32 of {length:#x} bytes at {address:#010x}"))
    })?;
    println!("{crc:#010x}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump_full_line() {
        let data: Vec<u8> = (0x41..0x51).collect();
        assert_eq!(
            hex_dump(0x1000, &data),
            "00001000: 41 42 43 44 45 46 47 48  49 4a 4b 4c 4d 4e 4f 50  |ABCDEFGHIJKLMNOP|\n"
        );
    }

    #[test]
    fn test_hex_dump_partial_line_and_controls() {
        let dump = hex_dump(0x0020_0010, &[0x00, b'a', 0xFF]);
        assert_eq!(
            dump,
            format!("00200010: 00 61 ff {} |.a.|\n", " ".repeat(3 * 13 + 1))
        );
    }

    #[test]
    fn test_hex_dump_line_addresses() {
        let dump = hex_dump(0x10, &[0u8; 40]);
        let addresses: Vec<&str> = dump.lines().map(|l| &l[..8]).collect();
        assert_eq!(addresses, vec!["00000010", "00000020", "00000030"]);
    }
}
