//! Configuration file support for ccsbl.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (CCSBL_*)
//! 3. Local config file (./ccsbl.toml)
//! 4. Global config file (<config dir>/ccsbl/config.toml)
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyACM0"
//! baud = 115200
//!
//! [device]
//! chip = "cc26xx"
//! bootloader_entry = "dtr-rts"
//!
//! [flash]
//! verify = true
//! backup_dir = "backups"
//! ```

use anyhow::Context;
use ccsbl::{BootloaderEntry, ChipFamily};
use clap::ValueEnum;
use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "ccsbl.toml";

/// How the board is put into its bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EntryMode {
    /// The device is already waiting in the bootloader.
    #[default]
    None,
    /// DTR drives the backdoor pin high, RTS pulses reset.
    DtrRts,
    /// Same as `dtr-rts` with the backdoor pin active low.
    DtrRtsInverted,
}

impl From<EntryMode> for BootloaderEntry {
    fn from(mode: EntryMode) -> Self {
        match mode {
            EntryMode::None => BootloaderEntry::None,
            EntryMode::DtrRts => BootloaderEntry::DtrRts { active_high: true },
            EntryMode::DtrRtsInverted => BootloaderEntry::DtrRts { active_high: false },
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Target device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Default chip family ("cc26xx", "cc2538", "cc2650", ...).
    pub chip: Option<String>,
    /// Bootloader entry sequence.
    pub bootloader_entry: Option<EntryMode>,
}

impl DeviceConfig {
    /// Configured chip family, if the name is recognized.
    pub fn family(&self) -> Option<ChipFamily> {
        let name = self.chip.as_deref()?;
        let family = ChipFamily::from_name(name);
        if family.is_none() {
            warn!("Unknown chip '{name}' in config, ignoring");
        }
        family
    }
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Verify after programming (default: true).
    pub verify: Option<bool>,
    /// Back up the whole flash into this directory before `flash` and
    /// `write` change it.
    pub backup_dir: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Device configuration.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    ///
    /// Unreadable or malformed files are reported and skipped.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_lenient(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_lenient(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// An explicitly named file must exist and parse.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("Invalid config file {}: {e}", path.display()))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn load_lenient(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ccsbl").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Whether to verify after programming.
    pub fn verify(&self) -> bool {
        self.flash.verify.unwrap_or(true)
    }

    /// Merge another config into this one. Values set in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.device.chip.is_some() {
            self.device.chip = other.device.chip;
        }
        if other.device.bootloader_entry.is_some() {
            self.device.bootloader_entry = other.device.bootloader_entry;
        }
        if other.flash.verify.is_some() {
            self.flash.verify = other.flash.verify;
        }
        if other.flash.backup_dir.is_some() {
            self.flash.backup_dir = other.flash.backup_dir;
        }
    }

    /// Remember a serial port in the local config file, or in the global one
    /// when no local file exists.
    pub fn remember_port(&mut self, port: &str) -> anyhow::Result<()> {
        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)
                .with_context(|| format!("Cannot create {}", global_dir.display()))?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };
        self.save_port_to(&path, port)
    }

    fn save_port_to(&mut self, path: &Path, port: &str) -> anyhow::Result<()> {
        // Keep whatever else the file already holds.
        let mut stored = Self::load_lenient(path).unwrap_or_default();
        stored.connection.port = Some(port.to_string());
        self.connection.port = Some(port.to_string());

        let content = toml::to_string_pretty(&stored)?;
        fs::write(path, content).with_context(|| format!("Cannot write {}", path.display()))?;
        info!("Saved port {port} to {}", path.display());
        Ok(())
    }
}
