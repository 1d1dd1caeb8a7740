use crate::dmx::{DeviceIdentifier, DmxPort};
use crate::dmx::config::FTDI_VID;

/// Builder for creating test DmxPort instances
pub struct DmxPortBuilder {
    identifier: String,
    vid: Option<u16>,
    pid: Option<u16>,
    serial_number: Option<String>,
    product_name: Option<String>,
    manufacturer: Option<String>,
}

impl DmxPortBuilder {
    pub fn new() -> Self {
        Self {
            identifier: "/dev/ttyUSB0".to_string(),
            vid: None,
            pid: None,
            serial_number: None,
            product_name: None,
            manufacturer: None,
        }
    }

    pub fn identifier(mut self, identifier: &str) -> Self {
        self.identifier = identifier.to_string();
        self
    }

    pub fn usb(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    pub fn serial_number(mut self, serial: &str) -> Self {
        self.serial_number = Some(serial.to_string());
        self
    }

    pub fn product_name(mut self, name: &str) -> Self {
        self.product_name = Some(name.to_string());
        self
    }

    pub fn manufacturer(mut self, name: &str) -> Self {
        self.manufacturer = Some(name.to_string());
        self
    }

    /// An FT232R based Open DMX USB adapter
    pub fn open_dmx_usb(self) -> Self {
        self.usb(FTDI_VID, 0x6001)
            .manufacturer("FTDI")
            .serial_number("A10KQ2XY")
    }

    pub fn build(self) -> DmxPort {
        DmxPort {
            identifier: DeviceIdentifier::new(self.identifier),
            vid: self.vid,
            pid: self.pid,
            serial_number: self.serial_number,
            product_name: self.product_name,
            manufacturer: self.manufacturer,
        }
    }
}

impl Default for DmxPortBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dmx_port_builder_defaults() {
        let port = DmxPortBuilder::new().build();
        assert_eq!(port.identifier.as_str(), "/dev/ttyUSB0");
        assert!(port.vid.is_none());
        assert!(!port.is_ftdi());
    }

    #[test]
    fn test_dmx_port_builder_open_dmx_usb() {
        let port = DmxPortBuilder::new().identifier("COM4").open_dmx_usb().build();
        assert!(port.is_ftdi());
        assert_eq!(port.serial_number.as_deref(), Some("A10KQ2XY"));
        assert_eq!(port.display_label(), "FTDI serial (COM4)");
    }
}
