//! Port listing and device information.

use anyhow::Result;
use ccsbl::device::{detect_ports, select_port};
use console::style;

use super::with_session;
use crate::Cli;
use crate::config::Config;

/// List-ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detected)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let bridge = if port.bridge.is_known() {
            format!(" [{}]", style(port.bridge).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .info
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{bridge}{vid_pid}{product}",
            style("•").green(),
            style(port.name()).cyan(),
        );
    }

    if let Ok(best) = select_port(&detected) {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(best.name()).cyan().bold()
        );
    }
    Ok(())
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let info = with_session(cli, config, |session, _| Ok(session.info()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Chip family:  {}", info.family);
    println!("Chip id:      {:#010x}", info.device_id);
    println!("Revision:     {}", info.revision);
    println!("Flash size:   {} KB", info.flash_size / 1024);
    println!("RAM size:     {} KB", info.ram_size / 1024);
    println!("Port:         {} @ {} baud", info.port, info.baud_rate);
    Ok(())
}
