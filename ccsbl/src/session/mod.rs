//! Session façade over one bootloader connection.
//!
//! A [`Session`] owns the port, tracks the connection state and the device
//! identity, and exposes every bootloader operation as a blocking method.
//! Failures are returned to the caller, remembered as the last diagnostic
//! and forwarded to the session's [`EventSink`].
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──autobaud──▶ Identifying ──▶ Ready
//!      ▲                                                               │
//!      └────────── reset / bootloader lock / port error ───────────────┘
//! ```

mod flash;
mod memory;

use std::fmt;
use std::thread;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::event::{EventSink, NullSink, percent};
use crate::port::Port;
use crate::protocol::{Command, CommandFrame, Link, LinkConfig, STATUS_SUCCESS, status_name};
use crate::target::{ChipFamily, DeviceProfile, Revision};

#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};

/// Time RTS holds the device in reset when entering the bootloader by modem lines.
const RESET_PULSE: Duration = Duration::from_millis(10);

/// Time given to the ROM to start after reset is released.
const BOOT_SETTLE: Duration = Duration::from_millis(100);

/// Connection state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No bootloader connection.
    #[default]
    Disconnected,
    /// Autobaud in progress.
    Connecting,
    /// Reading device id and memory sizes.
    Identifying,
    /// Identified and ready for commands.
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// How to put the device into its serial bootloader before autobaud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum BootloaderEntry {
    /// The device is already in the bootloader.
    #[default]
    None,
    /// DTR drives the bootloader backdoor pin, RTS drives reset.
    DtrRts {
        /// Backdoor pin level that selects the bootloader.
        active_high: bool,
    },
}

/// Options applied by [`Session::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectOptions {
    /// Switch a CC2538 to the external crystal after autobaud.
    pub enable_xosc: bool,
    /// Bootloader entry sequence.
    pub entry: BootloaderEntry,
}

impl ConnectOptions {
    /// Enable or disable the external crystal switch.
    #[must_use]
    pub fn with_xosc(mut self, enable: bool) -> Self {
        self.enable_xosc = enable;
        self
    }

    /// Set the bootloader entry sequence.
    #[must_use]
    pub fn with_entry(mut self, entry: BootloaderEntry) -> Self {
        self.entry = entry;
        self
    }
}

/// Snapshot of the connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    /// Chip family.
    pub family: ChipFamily,
    /// 32-bit chip id.
    pub device_id: u32,
    /// Silicon revision.
    pub revision: Revision,
    /// Flash size in bytes.
    pub flash_size: u32,
    /// RAM size in bytes.
    pub ram_size: u32,
    /// Port name.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id {:#010x}, rev {}), {} KB flash, {} KB RAM on {} @ {}",
            self.family,
            self.device_id,
            self.revision,
            self.flash_size / 1024,
            self.ram_size / 1024,
            self.port,
            self.baud_rate
        )
    }
}

/// Last failure seen by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Error class.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
}

/// One bootloader connection over an exclusively owned port.
pub struct Session<P: Port> {
    port: P,
    family: ChipFamily,
    link_config: LinkConfig,
    options: ConnectOptions,
    state: SessionState,
    device_id: u32,
    revision: Revision,
    flash_size: u32,
    ram_size: u32,
    last_device_status: Option<u8>,
    last_status: Option<Diagnostic>,
    progress_muted: bool,
    sink: Box<dyn EventSink>,
}

impl<P: Port> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.port.name())
            .field("family", &self.family)
            .field("state", &self.state)
            .field("device_id", &self.device_id)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl<P: Port> Session<P> {
    /// Create a disconnected session for a chip family.
    pub fn new(port: P, family: ChipFamily) -> Self {
        Self {
            port,
            family,
            link_config: LinkConfig::default(),
            options: ConnectOptions::default(),
            state: SessionState::Disconnected,
            device_id: 0,
            revision: Revision::default(),
            flash_size: 0,
            ram_size: 0,
            last_device_status: None,
            last_status: None,
            progress_muted: false,
            sink: Box::new(NullSink),
        }
    }

    /// Replace the link timing configuration.
    #[must_use]
    pub fn with_link_config(mut self, config: LinkConfig) -> Self {
        self.link_config = config;
        self
    }

    /// Replace the connect options.
    #[must_use]
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Route status and progress to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Chip family this session talks to.
    pub fn family(&self) -> ChipFamily {
        self.family
    }

    /// Constant profile of the chip family.
    pub fn profile(&self) -> &'static DeviceProfile {
        self.family.profile()
    }

    /// Silicon revision detected by the last connect.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Chip id read by the last connect.
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Flash size in bytes read by the last connect.
    pub fn flash_size(&self) -> u32 {
        self.flash_size
    }

    /// RAM size in bytes read by the last connect.
    pub fn ram_size(&self) -> u32 {
        self.ram_size
    }

    /// Status byte returned by the most recent GET_STATUS.
    pub fn last_device_status(&self) -> Option<u8> {
        self.last_device_status
    }

    /// Most recent failure, kept until the next one.
    pub fn last_status(&self) -> Option<&Diagnostic> {
        self.last_status.as_ref()
    }

    /// Borrow the port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Identity snapshot.
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            family: self.family,
            device_id: self.device_id,
            revision: self.revision,
            flash_size: self.flash_size,
            ram_size: self.ram_size,
            port: self.port.name().to_string(),
            baud_rate: self.port.baud_rate(),
        }
    }

    /// Enter the bootloader, autobaud and identify the device.
    pub fn connect(&mut self) -> Result<DeviceInfo> {
        let result = self.connect_inner();
        if result.is_err() {
            self.state = SessionState::Disconnected;
        }
        self.track(result)
    }

    /// Check that the bootloader answers.
    pub fn ping(&mut self) -> Result<()> {
        self.run(|s| {
            s.ensure_connected()?;
            s.exchange(&CommandFrame::ping(), false)
        })
    }

    /// Status byte of the previous command.
    pub fn read_status(&mut self) -> Result<u8> {
        self.run(|s| {
            s.ensure_connected()?;
            s.read_status_inner()
        })
    }

    /// Read the 32-bit chip id.
    pub fn read_device_id(&mut self) -> Result<u32> {
        self.run(|s| {
            s.ensure_connected()?;
            s.read_device_id_inner()
        })
    }

    /// Read the flash size register and decode it to bytes.
    pub fn read_flash_size(&mut self) -> Result<u32> {
        self.run(|s| {
            s.ensure_connected()?;
            s.read_flash_size_inner()
        })
    }

    /// Read the RAM size register and decode it to bytes.
    pub fn read_ram_size(&mut self) -> Result<u32> {
        self.run(|s| {
            s.ensure_connected()?;
            s.read_ram_size_inner()
        })
    }

    /// Reset the device. The session is disconnected afterwards.
    pub fn reset(&mut self) -> Result<()> {
        self.run(|s| {
            s.ensure_connected()?;
            s.exchange(&CommandFrame::reset(), false)?;
            s.state = SessionState::Disconnected;
            info!("Device reset");
            s.sink.on_status("Device reset", false);
            Ok(())
        })
    }

    /// Switch a CC2538 to the external 32 MHz crystal.
    ///
    /// The bootloader expects a new autobaud afterwards, which this does.
    pub fn set_xosc(&mut self) -> Result<()> {
        self.run(|s| {
            s.ensure_connected()?;
            s.switch_to_xosc()
        })
    }

    /// Release the port.
    pub fn close(mut self) -> Result<()> {
        self.state = SessionState::Disconnected;
        self.port.close()
    }

    /// Consume the session and return the port.
    pub fn into_port(self) -> P {
        self.port
    }

    fn connect_inner(&mut self) -> Result<DeviceInfo> {
        info!("Connecting to {} on {}", self.family, self.port.name());
        self.state = SessionState::Connecting;
        self.last_device_status = None;
        self.port.clear_buffers()?;
        self.enter_bootloader()?;
        self.link().autobaud()?;
        debug!("Autobaud acknowledged");

        if self.options.enable_xosc {
            match self.family {
                ChipFamily::Cc2538 => self.switch_to_xosc()?,
                ChipFamily::Cc26xx => {
                    warn!("External crystal switch is only available on CC2538, skipping");
                    self.sink.on_status(
                        "External crystal switch is only available on CC2538, skipping",
                        false,
                    );
                },
            }
        }

        self.state = SessionState::Identifying;
        self.device_id = self.read_device_id_inner()?;
        self.revision = self.family.revision_from_device_id(self.device_id);
        self.flash_size = self.read_flash_size_inner()?;
        self.ram_size = self.read_ram_size_inner()?;
        self.state = SessionState::Ready;

        let info = self.info();
        info!("Connected: {info}");
        self.sink.on_status(&format!("Connected to {info}"), false);
        Ok(info)
    }

    fn enter_bootloader(&mut self) -> Result<()> {
        let BootloaderEntry::DtrRts { active_high } = self.options.entry else {
            return Ok(());
        };
        debug!("Entering bootloader: boot pin {active_high}, pulsing reset");
        self.port.set_dtr(active_high)?;
        self.port.set_rts(true)?;
        thread::sleep(RESET_PULSE);
        self.port.set_rts(false)?;
        thread::sleep(BOOT_SETTLE);
        self.port.clear_buffers()
    }

    fn switch_to_xosc(&mut self) -> Result<()> {
        self.send(&CommandFrame::set_xosc())?;
        // The clock switch may garble the ACK, so only a new autobaud counts.
        let budget = self.link_config.ack_timeout;
        if let Err(e) = self.link().await_ack_nak(budget, true) {
            debug!("No clean ACK for CMD_SET_XOSC: {e}");
        }
        self.port.clear_buffers()?;
        self.link().autobaud()?;
        info!("Running from external crystal");
        Ok(())
    }

    fn read_device_id_inner(&mut self) -> Result<u32> {
        self.exchange(&CommandFrame::get_chip_id(), false)?;
        let budget = self.link_config.data_timeout;
        let data = self.link().receive_exact(4, budget)?;
        let id = BigEndian::read_u32(&data);
        debug!("Chip id {id:#010x}");
        Ok(id)
    }

    fn read_flash_size_inner(&mut self) -> Result<u32> {
        let register = self.profile().flash_size_register;
        let value = self.read_register(register)?;
        Ok(self.family.decode_flash_size(value))
    }

    fn read_ram_size_inner(&mut self) -> Result<u32> {
        let register = self.profile().ram_size_register;
        let value = self.read_register(register)?;
        Ok(self.family.decode_ram_size(value, self.revision))
    }

    fn read_register(&mut self, address: u32) -> Result<u32> {
        let words = self.muted(|s| s.read_words(address, 1))?;
        words
            .first()
            .copied()
            .ok_or_else(|| Error::Protocol(format!("Empty read of register {address:#010x}")))
    }

    fn read_status_inner(&mut self) -> Result<u8> {
        self.exchange(&CommandFrame::get_status(), false)?;
        let budget = self.link_config.data_timeout;
        let data = self.link().receive_exact(1, budget)?;
        let status = data[0];
        debug!("Device status {} ({status:#04x})", status_name(status));
        self.last_device_status = Some(status);
        Ok(status)
    }

    /// Read the device status and fail unless it is SUCCESS.
    fn check_status(&mut self, context: impl Into<String>) -> Result<()> {
        let status = self.read_status_inner()?;
        if status == STATUS_SUCCESS {
            Ok(())
        } else {
            Err(Error::DeviceStatus {
                status,
                context: context.into(),
            })
        }
    }

    fn link(&mut self) -> Link<'_, P> {
        Link::new(&mut self.port, self.link_config)
    }

    fn command_id(&self, command: Command) -> Result<u8> {
        self.family
            .command_id(command, self.revision)
            .ok_or_else(|| Error::Unsupported(format!("{command} is not available on {}", self.family)))
    }

    fn send(&mut self, frame: &CommandFrame) -> Result<()> {
        let id = self.command_id(frame.command())?;
        debug!("Sending {} ({id:#04x})", frame.command());
        self.link().send_command(id, frame)
    }

    /// Send a command and wait for its ACK. `long` selects the budget for
    /// commands that touch flash.
    fn exchange(&mut self, frame: &CommandFrame, long: bool) -> Result<()> {
        self.send(frame)?;
        let budget = if long {
            self.link_config.long_ack_timeout
        } else {
            self.link_config.ack_timeout
        };
        self.link().expect_ack(budget, frame.command().name())
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            SessionState::Identifying | SessionState::Ready => Ok(()),
            SessionState::Disconnected | SessionState::Connecting => Err(Error::NotConnected),
        }
    }

    fn progress(&mut self, done: u64, total: u64) {
        if !self.progress_muted {
            self.sink.on_progress(percent(done, total));
        }
    }

    /// Run `op` without forwarding its progress to the sink.
    fn muted<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let previous = std::mem::replace(&mut self.progress_muted, true);
        let result = op(self);
        self.progress_muted = previous;
        result
    }

    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        self.track(result)
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            let message = e.to_string();
            debug!("Operation failed ({}): {message}", e.kind());
            self.sink.on_status(&message, true);
            if e.is_port_error() {
                self.state = SessionState::Disconnected;
            }
            self.last_status = Some(Diagnostic {
                kind: e.kind(),
                message,
            });
        }
        result
    }
}

#[cfg(feature = "native")]
impl Session<NativePort> {
    /// Open a native serial port and create a session on it.
    pub fn open(config: &SerialConfig, family: ChipFamily) -> Result<Self> {
        Ok(Self::new(NativePort::open(config)?, family))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use super::Session;
    use crate::event::testing::RecordingSink;
    use crate::port::sim::SimDevice;
    use crate::protocol::LinkConfig;

    pub fn fast_link() -> LinkConfig {
        LinkConfig::default()
            .with_ack_timeout(Duration::from_millis(30))
            .with_long_ack_timeout(Duration::from_millis(30))
            .with_data_timeout(Duration::from_millis(30))
            .with_autobaud_timeout(Duration::from_millis(30))
            .with_write_attempts(4)
    }

    /// Session over `sim` with short timeouts and a recording sink.
    pub fn session(sim: SimDevice) -> (Session<SimDevice>, RecordingSink) {
        let _ = env_logger::builder().is_test(true).try_init();
        let family = sim.family();
        let sink = RecordingSink::default();
        let session = Session::new(sim, family)
            .with_link_config(fast_link())
            .with_sink(sink.clone());
        (session, sink)
    }

    /// Connected session over a 32-page CC26xx rev 2 device.
    pub fn connected_cc26xx() -> (Session<SimDevice>, RecordingSink) {
        let (mut session, sink) = session(SimDevice::cc26xx(0x2B9A_402F, 32, 3));
        session.connect().unwrap();
        session.port_mut().clear_log();
        (session, sink)
    }
}
