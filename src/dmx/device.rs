//! Serial port discovery for DMX output.
//!
//! Lists candidate ports only. Any adapter that can run at 250 kbaud and the
//! break baud rate will do, so nothing here tries to recognise fixtures.

use std::fmt;

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortInfo, SerialPortType};

use super::config::FTDI_VID;

/// Opaque name of a transport, usable directly as the `open` argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentifier(String);

impl DeviceIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceIdentifier {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for DeviceIdentifier {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Source of candidate DMX ports.
///
/// Failing to enumerate is not an error; an environment without ports
/// yields an empty list.
pub trait DeviceEnumerator {
    fn enumerate(&self) -> Vec<DeviceIdentifier>;
}

/// Enumerates the serial ports the operating system reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortEnumerator;

impl DeviceEnumerator for SerialPortEnumerator {
    fn enumerate(&self) -> Vec<DeviceIdentifier> {
        find_dmx_ports()
            .into_iter()
            .map(|port| port.identifier)
            .collect()
    }
}

/// Fixed list of identifiers, for simulated environments.
#[derive(Debug, Default, Clone)]
pub struct StaticEnumerator {
    identifiers: Vec<DeviceIdentifier>,
}

impl StaticEnumerator {
    pub fn new(identifiers: Vec<DeviceIdentifier>) -> Self {
        Self { identifiers }
    }
}

impl DeviceEnumerator for StaticEnumerator {
    fn enumerate(&self) -> Vec<DeviceIdentifier> {
        self.identifiers.clone()
    }
}

/// Information about a candidate DMX port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmxPort {
    /// Port identifier (e.g., "/dev/ttyUSB0" or "COM3").
    pub identifier: DeviceIdentifier,
    /// USB Vendor ID, for USB adapters.
    pub vid: Option<u16>,
    /// USB Product ID, for USB adapters.
    pub pid: Option<u16>,
    /// Adapter serial number (if available).
    pub serial_number: Option<String>,
    /// Product name (if available).
    pub product_name: Option<String>,
    /// Manufacturer name (if available).
    pub manufacturer: Option<String>,
}

impl DmxPort {
    /// Whether the adapter is an FTDI bridge (Open DMX USB style).
    pub fn is_ftdi(&self) -> bool {
        self.vid == Some(FTDI_VID)
    }

    /// Get a display label for this port.
    pub fn display_label(&self) -> String {
        match (&self.product_name, self.is_ftdi()) {
            (Some(name), _) => format!("{} ({})", name, self.identifier),
            (None, true) => format!("FTDI serial ({})", self.identifier),
            (None, false) => self.identifier.to_string(),
        }
    }
}

/// Build a [`DmxPort`] from what the OS reports about a serial port.
///
/// Returns `None` for ports that should not be offered.
fn port_from_info(info: SerialPortInfo) -> Option<DmxPort> {
    // On macOS every device appears as both /dev/cu.* and /dev/tty.*
    if cfg!(target_os = "macos") && info.port_name.starts_with("/dev/tty.") {
        return None;
    }

    let identifier = DeviceIdentifier::new(info.port_name);
    let port = match info.port_type {
        SerialPortType::UsbPort(usb) => DmxPort {
            identifier,
            vid: Some(usb.vid),
            pid: Some(usb.pid),
            serial_number: usb.serial_number,
            product_name: usb.product,
            manufacturer: usb.manufacturer,
        },
        _ => DmxPort {
            identifier,
            vid: None,
            pid: None,
            serial_number: None,
            product_name: None,
            manufacturer: None,
        },
    };
    Some(port)
}

/// Find all serial ports that could carry DMX output.
pub fn find_dmx_ports() -> Vec<DmxPort> {
    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            tracing::warn!("Serial port enumeration failed: {}", e);
            return Vec::new();
        }
    };

    let devices: Vec<DmxPort> = ports.into_iter().filter_map(port_from_info).collect();
    tracing::debug!("Found {} candidate DMX ports", devices.len());
    devices
}

/// Get port info for a specific port name.
pub fn get_port_by_name(port_name: &str) -> Option<DmxPort> {
    find_dmx_ports()
        .into_iter()
        .find(|p| p.identifier.as_str() == port_name)
}
