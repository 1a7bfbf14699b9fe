//! ccsbl CLI - Command-line tool for the TI CC2538/CC26xx serial bootloader.
//!
//! ## Features
//!
//! - Program, verify and erase flash
//! - Read and write memory, search flash, device-side CRC32
//! - Bootloader entry through DTR/RTS
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use ccsbl::{ChipFamily, ErrorKind};
use chrono::{Local, NaiveDateTime};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod serial;

use commands::{device, flash, memory};
use config::{Config, EntryMode};
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Baud rate used when neither the command line nor the config names one.
const DEFAULT_BAUD: u32 = 115_200;

/// ccsbl - program TI CC2538 and CC13xx/CC26xx chips through their ROM
/// serial bootloader.
///
/// Environment variables:
///   CCSBL_PORT              - Default serial port
///   CCSBL_BAUD              - Default baud rate (default: 115200)
///   CCSBL_CHIP              - Default chip family (cc26xx, cc2538)
///   CCSBL_ENTRY             - Bootloader entry (none, dtr-rts, dtr-rts-inverted)
///   CCSBL_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "ccsbl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "CCSBL_PORT")]
    port: Option<String>,

    /// Baud rate (default: 115200).
    #[arg(short, long, global = true, env = "CCSBL_BAUD")]
    baud: Option<u32>,

    /// Target chip family (default: cc26xx).
    #[arg(short, long, global = true, env = "CCSBL_CHIP")]
    chip: Option<Chip>,

    /// How to put the board into its bootloader.
    #[arg(long, global = true, env = "CCSBL_ENTRY", value_enum)]
    entry: Option<EntryMode>,

    /// Switch a CC2538 to its external 32 MHz crystal after connecting.
    #[arg(long, global = true)]
    xosc: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "CCSBL_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Offer all serial ports, including unrecognized ones.
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported chip families.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Chip {
    /// CC13xx/CC26xx (CC2650, CC2640, CC1310, ...).
    Cc26xx,
    /// CC2538.
    Cc2538,
}

impl From<Chip> for ChipFamily {
    fn from(chip: Chip) -> Self {
        match chip {
            Chip::Cc26xx => ChipFamily::Cc26xx,
            Chip::Cc2538 => ChipFamily::Cc2538,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Connect and show chip id, revision and memory sizes.
    Info {
        /// Output device information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Erase, program and verify a binary image.
    Flash {
        /// Raw binary image.
        file: PathBuf,

        /// Flash address of the image (default: start of flash).
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// Skip CRC32 verification.
        #[arg(long)]
        no_verify: bool,

        #[command(flatten)]
        backup: BackupArgs,
    },

    /// Read memory to a file or as a hex dump.
    Read {
        /// Start address (hex).
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes (decimal, or hex with 0x).
        #[arg(short = 'n', long = "length", value_parser = parse_length)]
        length: u32,

        /// Write the bytes to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write bytes to flash, keeping the rest of each touched page.
    Write {
        /// Start address (hex).
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Bytes as hex (0x0102ff) or literal text.
        #[arg(value_parser = parse_bytes)]
        bytes: ByteString,

        #[command(flatten)]
        backup: BackupArgs,
    },

    /// Search flash for a byte sequence.
    Find {
        /// Bytes as hex (0x0102ff) or literal text.
        #[arg(value_parser = parse_bytes)]
        bytes: ByteString,
    },

    /// Erase a flash range or the whole flash.
    Erase {
        /// Erase all unprotected flash.
        #[arg(long, conflicts_with_all = ["address", "length"])]
        all: bool,

        /// Start address (hex).
        #[arg(value_parser = parse_hex_u32, required_unless_present = "all")]
        address: Option<u32>,

        /// Number of bytes (decimal, or hex with 0x).
        #[arg(value_parser = parse_length, required_unless_present = "all")]
        length: Option<u32>,
    },

    /// Device-computed CRC32 of a flash or RAM range.
    Crc {
        /// Start address (hex).
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes (decimal, or hex with 0x).
        #[arg(value_parser = parse_length)]
        length: u32,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flash backup taken before a command changes flash.
#[derive(Args, Debug, Clone, Default)]
struct BackupArgs {
    /// Save the whole flash to FILE before anything is erased.
    #[arg(long, value_name = "FILE", conflicts_with = "no_backup")]
    backup: Option<PathBuf>,

    /// Skip the backup configured with `[flash] backup_dir`.
    #[arg(long)]
    no_backup: bool,
}

impl BackupArgs {
    /// File the backup goes to, if one is wanted.
    fn target(&self, config: &Config, now: NaiveDateTime) -> Option<PathBuf> {
        if self.no_backup {
            return None;
        }
        if let Some(path) = &self.backup {
            return Some(path.clone());
        }
        config
            .flash
            .backup_dir
            .as_ref()
            .map(|dir| dir.join(backup_file_name(now)))
    }
}

/// Name of an automatic backup taken at `now`.
fn backup_file_name(now: NaiveDateTime) -> String {
    format!("ccsbl-backup{}.bin", now.format("--%Y-%m-%dT%Hh%Mm%Ss"))
}

/// Byte sequence given on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ByteString(Vec<u8>);

/// CLI-level failures with their own exit codes.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Invalid usage or missing setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration file (exit code 3).
    #[error("{0}")]
    Config(String),
    /// Cancelled by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error to the process exit code.
///
/// 2: usage, 3: configuration, 4: device unreachable, 130: cancelled,
/// 1: everything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return match cli {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }
    let device_error = err
        .chain()
        .find_map(|e| e.downcast_ref::<ccsbl::Error>());
    match device_error.map(ccsbl::Error::kind) {
        Some(ErrorKind::Argument) => 2,
        Some(ErrorKind::Port | ErrorKind::Timeout | ErrorKind::NotConnected) => 4,
        _ => 1,
    }
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    // Support underscore separators like 0x00_20_00_00
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Parse a byte count: decimal, or hex with a 0x prefix. Zero is rejected.
fn parse_length(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
    .map_err(|e| format!("Invalid length: {e}"))?;

    if value == 0 {
        return Err("Length must be greater than zero".to_string());
    }
    Ok(value)
}

/// Parse `0x`-prefixed hex or literal text into bytes.
fn parse_bytes(s: &str) -> Result<ByteString, String> {
    let bytes = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => {
            let digits: String = digits.chars().filter(|c| *c != '_').collect();
            hex::decode(digits).map_err(|e| format!("Invalid hex bytes: {e}"))?
        },
        None => s.as_bytes().to_vec(),
    };
    if bytes.is_empty() {
        return Err("At least one byte is required".to_string());
    }
    Ok(ByteString(bytes))
}

fn main() {
    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "ccsbl v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => device::cmd_list_ports(*json),
        Commands::Info { json } => device::cmd_info(cli, &mut config, *json),
        Commands::Flash {
            file,
            address,
            no_verify,
            backup,
        } => {
            let backup = backup.target(&config, Local::now().naive_local());
            flash::cmd_flash(
                cli,
                &mut config,
                file,
                *address,
                *no_verify,
                backup.as_deref(),
            )
        },
        Commands::Read {
            address,
            length,
            output,
        } => memory::cmd_read(cli, &mut config, *address, *length, output.as_deref()),
        Commands::Write {
            address,
            bytes,
            backup,
        } => {
            let backup = backup.target(&config, Local::now().naive_local());
            flash::cmd_write(cli, &mut config, *address, &bytes.0, backup.as_deref())
        },
        Commands::Find { bytes } => memory::cmd_find(cli, &mut config, &bytes.0),
        Commands::Erase {
            all,
            address,
            length,
        } => {
            let range = address.zip(*length);
            flash::cmd_erase(cli, &mut config, *all, range)
        },
        Commands::Crc { address, length } => memory::cmd_crc(cli, &mut config, *address, *length),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

impl Cli {
    /// Chip family from the command line, the config, or the default.
    fn family(&self, config: &Config) -> ChipFamily {
        self.chip
            .map(ChipFamily::from)
            .or_else(|| config.device.family())
            .unwrap_or_default()
    }

    /// Baud rate from the command line, the config, or the default.
    fn baud(&self, config: &Config) -> u32 {
        self.baud
            .or(config.connection.baud)
            .unwrap_or(DEFAULT_BAUD)
    }

    /// Bootloader entry from the command line, the config, or none.
    fn entry(&self, config: &Config) -> EntryMode {
        self.entry
            .or(config.device.bootloader_entry)
            .unwrap_or_default()
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    if !cli.non_interactive {
        ask_remember_port(&selected, config)?;
    }

    Ok(selected.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x00200000"), Ok(0x0020_0000));
        assert_eq!(parse_hex_u32("0X1F000"), Ok(0x1F000));
        assert_eq!(parse_hex_u32("0x00_20_00_00"), Ok(0x0020_0000));
        assert_eq!(parse_hex_u32("1000"), Ok(0x1000));
        assert!(parse_hex_u32("0xZZ").is_err());
        assert!(parse_hex_u32("0x1_0000_0000").is_err());
    }

    #[test]
    fn test_parse_length() {
        assert_eq!(parse_length("4096"), Ok(4096));
        assert_eq!(parse_length("0x1000"), Ok(4096));
        assert!(parse_length("0").is_err());
        assert!(parse_length("0x0").is_err());
        assert!(parse_length("-1").is_err());
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("0x01ff"), Ok(ByteString(vec![0x01, 0xFF])));
        assert_eq!(parse_bytes("0xDE_AD"), Ok(ByteString(vec![0xDE, 0xAD])));
        assert_eq!(parse_bytes("boot"), Ok(ByteString(b"boot".to_vec())));
        assert!(parse_bytes("0x123").is_err());
        assert!(parse_bytes("0x").is_err());
        assert!(parse_bytes("").is_err());
    }

    #[test]
    fn test_settings_fall_back_to_config_then_default() {
        let cli = Cli::try_parse_from(["ccsbl", "info"]).unwrap();
        let mut config = Config::default();
        assert_eq!(cli.family(&config), ChipFamily::Cc26xx);
        assert_eq!(cli.baud(&config), DEFAULT_BAUD);
        assert_eq!(cli.entry(&config), EntryMode::None);

        config.device.chip = Some("cc2538".to_string());
        config.connection.baud = Some(57600);
        config.device.bootloader_entry = Some(EntryMode::DtrRts);
        assert_eq!(cli.family(&config), ChipFamily::Cc2538);
        assert_eq!(cli.baud(&config), 57600);
        assert_eq!(cli.entry(&config), EntryMode::DtrRts);

        let cli = Cli::try_parse_from(["ccsbl", "-c", "cc26xx", "-b", "230400", "info"]).unwrap();
        assert_eq!(cli.family(&config), ChipFamily::Cc26xx);
        assert_eq!(cli.baud(&config), 230400);
    }

    #[test]
    fn test_erase_requires_range_or_all() {
        assert!(Cli::try_parse_from(["ccsbl", "erase"]).is_err());
        assert!(Cli::try_parse_from(["ccsbl", "erase", "0x1000"]).is_err());
        assert!(Cli::try_parse_from(["ccsbl", "erase", "--all", "0x1000", "16"]).is_err());
        assert!(Cli::try_parse_from(["ccsbl", "erase", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["ccsbl", "erase", "0x1000", "0x800"]).is_ok());
    }

    #[test]
    fn test_backup_flags() {
        assert!(Cli::try_parse_from(["ccsbl", "flash", "fw.bin", "--backup", "old.bin"]).is_ok());
        assert!(Cli::try_parse_from(["ccsbl", "write", "0x1000", "0x01", "--no-backup"]).is_ok());
        assert!(
            Cli::try_parse_from([
                "ccsbl",
                "write",
                "0x1000",
                "0x01",
                "--backup",
                "old.bin",
                "--no-backup"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_backup_target() {
        let now = chrono::NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap();
        let mut config = Config::default();
        let explicit = BackupArgs {
            backup: Some(PathBuf::from("old.bin")),
            no_backup: false,
        };
        let skip = BackupArgs {
            backup: None,
            no_backup: true,
        };

        assert_eq!(BackupArgs::default().target(&config, now), None);
        assert_eq!(explicit.target(&config, now), Some(PathBuf::from("old.bin")));

        config.flash.backup_dir = Some(PathBuf::from("backups"));
        assert_eq!(
            BackupArgs::default().target(&config, now),
            Some(PathBuf::from("backups").join("ccsbl-backup--2024-03-05T14h07m09s.bin"))
        );
        assert_eq!(explicit.target(&config, now), Some(PathBuf::from("old.bin")));
        assert_eq!(skip.target(&config, now), None);
    }

    #[test]
    fn test_exit_codes() {
        let usage = anyhow::Error::from(CliError::Usage("x".into()));
        assert_eq!(exit_code(&usage), 2);
        let config = anyhow::Error::from(CliError::Config("x".into()));
        assert_eq!(exit_code(&config), 3);
        let cancelled = anyhow::Error::from(CliError::Cancelled("x".into()));
        assert_eq!(exit_code(&cancelled), 130);

        let port = anyhow::Error::from(ccsbl::Error::Port("gone".into())).context("Connecting");
        assert_eq!(exit_code(&port), 4);
        let argument = anyhow::Error::from(ccsbl::Error::Argument("odd".into()));
        assert_eq!(exit_code(&argument), 2);
        let integrity = anyhow::Error::from(ccsbl::Error::Integrity {
            expected: 1,
            actual: 2,
        });
        assert_eq!(exit_code(&integrity), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
