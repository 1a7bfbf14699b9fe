//! Port discovery.
//!
//! Enumerated serial ports are classified by the USB bridge behind them so
//! that a front end can pick the board without asking the user.

use std::fmt;

use crate::error::{Error, Result};
use crate::port::PortInfo;

#[cfg(feature = "native")]
use crate::port::{NativePortEnumerator, PortEnumerator};
#[cfg(feature = "native")]
use log::{debug, info};

/// USB bridges found on TI boards and common adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BridgeKind {
    /// XDS110 debugger on LaunchPads (backchannel UART).
    Xds110,
    /// Silicon Labs CP210x USB-to-UART.
    Cp210x,
    /// Silicon Labs CP2110 HID-to-UART (SmartRF06 and similar boards).
    Cp2110,
    /// FTDI FT232/FT2232/FT4232.
    Ftdi,
    /// CH340/CH341.
    Ch340,
    /// Anything else.
    Unknown,
}

const KNOWN_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (0x0451, &[0xBEF3, 0xBEF4], BridgeKind::Xds110),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], BridgeKind::Cp210x),
    (0x10C4, &[0xEA80], BridgeKind::Cp2110),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        BridgeKind::Ftdi,
    ),
    (0x1A86, &[0x7523, 0x7522, 0x5523], BridgeKind::Ch340),
];

impl BridgeKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_BRIDGES
            .iter()
            .find(|(known_vid, pids, _)| *known_vid == vid && pids.contains(&pid))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Xds110 => "XDS110",
            Self::Cp210x => "CP210x",
            Self::Cp2110 => "CP2110",
            Self::Ftdi => "FTDI",
            Self::Ch340 => "CH340/CH341",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the bridge is recognized.
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    /// Auto-selection rank, lower is preferred.
    fn rank(self) -> u8 {
        match self {
            Self::Xds110 => 0,
            Self::Cp2110 | Self::Cp210x => 1,
            Self::Ftdi => 2,
            Self::Ch340 => 3,
            Self::Unknown => 4,
        }
    }
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An enumerated port and its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Enumeration record.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub info: PortInfo,
    /// Bridge behind the port.
    pub bridge: BridgeKind,
}

impl DetectedPort {
    /// Classify an enumeration record.
    pub fn from_info(info: PortInfo) -> Self {
        let bridge = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => BridgeKind::from_vid_pid(vid, pid),
            _ => BridgeKind::Unknown,
        };
        Self { info, bridge }
    }

    /// Port name or path.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// One-line description: name, bridge or VID:PID, product.
    pub fn describe(&self) -> String {
        let bridge = if self.bridge.is_known() {
            format!(" [{}]", self.bridge)
        } else if let (Some(vid), Some(pid)) = (self.info.vid, self.info.pid) {
            format!(" [{vid:04X}:{pid:04X}]")
        } else {
            String::new()
        };
        let product = self
            .info
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();
        format!("{}{bridge}{product}", self.info.name)
    }
}

/// Classify enumeration records.
pub fn classify(ports: Vec<PortInfo>) -> Vec<DetectedPort> {
    ports.into_iter().map(DetectedPort::from_info).collect()
}

/// Pick the most likely board port: the best ranked bridge, first listed
/// on ties.
pub fn select_port(ports: &[DetectedPort]) -> Result<&DetectedPort> {
    ports
        .iter()
        .enumerate()
        .min_by_key(|(index, port)| (port.bridge.rank(), *index))
        .map(|(_, port)| port)
        .ok_or_else(|| Error::Port("No serial ports found".into()))
}

/// Enumerate and classify the host's serial ports.
#[cfg(feature = "native")]
pub fn detect_ports() -> Result<Vec<DetectedPort>> {
    let ports = classify(NativePortEnumerator::list_ports()?);
    for port in &ports {
        debug!("Found {}", port.describe());
    }
    Ok(ports)
}

/// Enumerate the host's serial ports and pick the most likely board.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports()?;
    let port = select_port(&ports)?.clone();
    info!("Auto-selected {}", port.describe());
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(name: &str, vid: u16, pid: u16) -> PortInfo {
        PortInfo {
            name: name.into(),
            vid: Some(vid),
            pid: Some(pid),
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    fn plain(name: &str) -> PortInfo {
        PortInfo {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    #[test]
    fn test_bridge_from_vid_pid() {
        assert_eq!(BridgeKind::from_vid_pid(0x0451, 0xBEF3), BridgeKind::Xds110);
        assert_eq!(BridgeKind::from_vid_pid(0x10C4, 0xEA60), BridgeKind::Cp210x);
        assert_eq!(BridgeKind::from_vid_pid(0x10C4, 0xEA80), BridgeKind::Cp2110);
        assert_eq!(BridgeKind::from_vid_pid(0x0403, 0x6010), BridgeKind::Ftdi);
        assert_eq!(BridgeKind::from_vid_pid(0x1A86, 0x7523), BridgeKind::Ch340);
        assert_eq!(BridgeKind::from_vid_pid(0x0451, 0x1234), BridgeKind::Unknown);
    }

    #[test]
    fn test_select_prefers_xds110() {
        let ports = classify(vec![
            plain("/dev/ttyS0"),
            usb("/dev/ttyUSB0", 0x1A86, 0x7523),
            usb("/dev/ttyACM0", 0x0451, 0xBEF3),
            usb("/dev/ttyACM1", 0x0451, 0xBEF3),
        ]);
        assert_eq!(select_port(&ports).unwrap().name(), "/dev/ttyACM0");
    }

    #[test]
    fn test_select_falls_back_to_first_unknown() {
        let ports = classify(vec![plain("COM3"), plain("COM4")]);
        assert_eq!(select_port(&ports).unwrap().name(), "COM3");
    }

    #[test]
    fn test_select_empty_is_port_error() {
        let err = select_port(&[]).unwrap_err();
        assert!(err.is_port_error());
    }

    #[test]
    fn test_describe() {
        let mut info = usb("/dev/ttyACM0", 0x0451, 0xBEF3);
        info.product = Some("XDS110 (03.00.00.13) Embed with CMSIS-DAP".into());
        assert_eq!(
            DetectedPort::from_info(info).describe(),
            "/dev/ttyACM0 [XDS110] - XDS110 (03.00.00.13) Embed with CMSIS-DAP"
        );
        assert_eq!(
            DetectedPort::from_info(usb("COM7", 0x1234, 0x5678)).describe(),
            "COM7 [1234:5678]"
        );
        assert_eq!(DetectedPort::from_info(plain("COM1")).describe(), "COM1");
    }
}
