//! Interactive serial port selection.
//!
//! An explicit `--port` or a configured port is used as is. Otherwise the
//! host's ports are enumerated and classified; recognized board bridges are
//! preferred, and the user is asked to choose when several remain and the
//! session is interactive.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    ccsbl::{DetectedPort, device},
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Offer all ports, not only recognized bridges.
    pub list_all_ports: bool,
    /// Never prompt.
    pub non_interactive: bool,
    /// Ask even when a single recognized port is found.
    pub confirm_port: bool,
}

/// Outcome of port selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPort {
    /// Port name or path.
    pub name: String,
    /// Whether the user picked the port from a prompt.
    pub prompted: bool,
}

impl SelectedPort {
    fn given(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prompted: false,
        }
    }
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Ports offered for selection: recognized bridges unless `all` is set or
/// none is recognized.
fn candidates(ports: Vec<DetectedPort>, all: bool) -> Vec<DetectedPort> {
    if all || !ports.iter().any(|p| p.bridge.is_known()) {
        return ports;
    }
    ports.into_iter().filter(|p| p.bridge.is_known()).collect()
}

/// Deterministic choice without prompting: the best ranked bridge.
fn select_non_interactive_port(ports: &[DetectedPort]) -> Result<SelectedPort> {
    let port = device::select_port(ports).map_err(|_| usage_err("No serial ports available"))?;
    if ports.len() > 1 {
        info!("Several ports found, using {}", port.describe());
    }
    Ok(SelectedPort::given(port.name()))
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(SelectedPort::given(port_name));
    }

    if let Some(port_name) = &config.connection.port {
        debug!("Using port from config: {port_name}");
        return Ok(SelectedPort::given(port_name));
    }

    let ports = device::detect_ports()?;
    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found. Connect the board or pass --port",
        ));
    }
    let ports = candidates(ports, options.list_all_ports);

    if options.non_interactive {
        return select_non_interactive_port(&ports);
    }

    if let [port] = ports.as_slice() {
        if port.bridge.is_known() && !options.confirm_port {
            info!("Auto-selected port: {}", port.describe());
            return Ok(SelectedPort::given(port.name()));
        }
        ensure_interactive_terminal()?;
        return confirm_single_port(port);
    }

    ensure_interactive_terminal()?;
    select_port_interactive(ports)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs a terminal. Pass --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

fn port_label(port: &DetectedPort) -> String {
    let name = if port.bridge.is_known() {
        style(port.name()).bold().to_string()
    } else {
        port.name().to_string()
    };

    let bridge = if port.bridge.is_known() {
        format!(" [{}]", style(port.bridge).yellow())
    } else if let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .info
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{bridge}{product}")
}

fn select_port_interactive(mut ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    ports.sort_by_key(|p| !p.bridge.is_known());

    // Truncate labels so narrow terminals do not wrap the menu.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the board's serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .get(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                name: port.name().to_string(),
                prompted: true,
            })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

fn confirm_single_port(port: &DetectedPort) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port.describe()))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            name: port.name().to_string(),
            prompted: true,
        })
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

/// Offer to store a prompted port in the configuration.
pub fn ask_remember_port(port: &SelectedPort, config: &mut Config) -> Result<()> {
    if !port.prompted {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {} for next time?", port.name))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(&port.name) {
            error!("Failed to save port configuration: {e:#}");
        }
    }

    Ok(())
}
