//! Flash, write, and erase command implementations.

use anyhow::{Context, Result};
use ccsbl::{ChipFamily, NativePort, Session, SessionState};
use console::style;
use std::fs;
use std::path::Path;

use super::{Ui, with_session};
use crate::config::Config;
use crate::{Cli, CliError};

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    file: &Path,
    address: Option<u32>,
    no_verify: bool,
    backup: Option<&Path>,
) -> Result<()> {
    let image =
        fs::read(file).with_context(|| format!("Failed to read image {}", file.display()))?;
    if image.is_empty() {
        return Err(CliError::Usage(format!("Image {} is empty", file.display())).into());
    }

    let family = cli.family(config);
    let address = address.unwrap_or(family.profile().flash_base);
    let verify = !no_verify && config.verify();

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes), target {:#010x}",
            style("📦").cyan(),
            file.display(),
            image.len(),
            address
        );
    }

    let disabled = with_session(cli, config, |session, ui| {
        if let Some(path) = backup {
            backup_flash(session, ui, path)?;
        }
        ui.step("Programming");
        session.program(address, &image, verify)?;
        Ok(session.state() == SessionState::Disconnected)
    })?;

    if !cli.quiet {
        if disabled {
            eprintln!(
                "{} Image disables the bootloader, the device no longer answers",
                style("⚠").yellow()
            );
        }
        let verified = if verify && !disabled { ", verified" } else { "" };
        eprintln!(
            "\n{} Flashed {} bytes at {address:#010x}{verified}",
            style("🎉").green().bold(),
            image.len()
        );
    }
    Ok(())
}

/// Write command implementation.
pub(crate) fn cmd_write(
    cli: &Cli,
    config: &mut Config,
    address: u32,
    bytes: &[u8],
    backup: Option<&Path>,
) -> Result<()> {
    with_session(cli, config, |session, ui| {
        if let Some(path) = backup {
            backup_flash(session, ui, path)?;
        }
        ui.step("Writing");
        session
            .write_flash_range_auto_erase(address, bytes)
            .with_context(|| format!("Writing {} bytes at {address:#010x}", bytes.len()))?;
        ui.note(
            style("✓").green(),
            &format!("Wrote {} bytes at {address:#010x}", bytes.len()),
        );
        Ok(())
    })
}

/// Erase command implementation.
pub(crate) fn cmd_erase(
    cli: &Cli,
    config: &mut Config,
    all: bool,
    range: Option<(u32, u32)>,
) -> Result<()> {
    with_session(cli, config, |session, ui| {
        let (address, len) = match range {
            Some(range) if !all => range,
            _ if session.family() == ChipFamily::Cc26xx => {
                ui.step("Erasing flash bank");
                session.erase_flash_bank()?;
                ui.note(style("✓").green(), "Flash bank erased");
                return Ok(());
            },
            // CC2538 has no bank erase command.
            _ => (session.profile().flash_base, session.flash_size()),
        };

        ui.step("Erasing");
        session
            .erase_flash_range(address, len)
            .with_context(|| format!("Erasing {len:#x} bytes at {address:#010x}"))?;
        ui.note(
            style("✓").green(),
            &format!("Erased {len:#x} bytes at {address:#010x}"),
        );
        Ok(())
    })
}

/// Save the whole flash to `path`. Runs before anything is erased, so a
/// failure here leaves the device untouched.
fn backup_flash(session: &mut Session<NativePort>, ui: &Ui, path: &Path) -> Result<()> {
    ui.step("Backing up flash");
    let image = session.read_flash().context("Reading flash for backup")?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create backup directory {}", dir.display()))?;
    }
    fs::write(path, &image)
        .with_context(|| format!("Failed to write backup {}", path.display()))?;
    ui.note(
        style("💾").cyan(),
        &format!("Backed up {} bytes of flash to {}", image.len(), path.display()),
    );
    Ok(())
}
