//! # ccsbl
//!
//! Host side of the TI CC2538 / CC13xx / CC26xx ROM serial bootloader.
//!
//! The crate speaks the bootloader's packet protocol over any byte
//! transport implementing [`Port`]:
//!
//! - packet framing, checksums and ACK/NAK handling ([`protocol`])
//! - chip family profiles and early-silicon command remapping ([`target`])
//! - chunked memory access, flash erase/program/verify, CRC32 and
//!   in-flash pattern search ([`Session`])
//! - serial port discovery for TI LaunchPads and USB-UART bridges ([`device`])
//!
//! ## Features
//!
//! - `native` (default): serial ports through the `serialport` crate
//! - `serde`: serialization of port and device records
//!
//! ## Example
//!
//! ```rust,no_run
//! use ccsbl::{ChipFamily, SerialConfig, Session};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SerialConfig::new("/dev/ttyACM0", 115_200);
//!     let mut session = Session::open(&config, ChipFamily::Cc26xx)?;
//!
//!     let info = session.connect()?;
//!     println!("{info}");
//!
//!     let firmware = std::fs::read("app.bin")?;
//!     session.program(0x0000_0000, &firmware, true)?;
//!     session.reset()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod event;
pub mod port;
pub mod protocol;
pub mod session;
pub mod target;

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{BridgeKind, DetectedPort},
    error::{Error, ErrorKind, Result},
    event::{EventSink, LogSink, NullSink},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Command, LinkConfig, crc32},
    session::{
        BootloaderEntry, ConnectOptions, DeviceInfo, Diagnostic, Session, SessionState,
    },
    target::{CcfgField, ChipFamily, DeviceProfile, Revision},
};
