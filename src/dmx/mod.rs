//! DMX512 output over plain USB/RS-485 serial adapters.
//!
//! This module keeps a 512-slot universe and streams it continuously as DMX
//! frames through an ordinary serial port. Adapters of this kind have no
//! break primitive, so each frame's break is produced by dropping the baud
//! rate and writing a single zero byte.
//!
//! # Frame Layout
//!
//! 1. **Break** - zero byte at 76.8 kbaud (~117µs low)
//! 2. **Mark After Break** - its two stop bits (~26µs high)
//! 3. **Start Code** - one byte at 250 kbaud, 0x00 for dimmer data
//! 4. **Slots** - 512 bytes at 250 kbaud
//!
//! # Example
//!
//! ```no_run
//! use opendmx::dmx::{find_dmx_ports, DmxDevice};
//!
//! # fn main() -> opendmx::dmx::DmxResult<()> {
//! if let Some(port) = find_dmx_ports().first() {
//!     let device = DmxDevice::open(port.identifier.as_str())?;
//!     let _output = device.start_background()?;
//!
//!     device.set_slot(0, 255)?;
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!
//!     device.close()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
mod device;
mod engine;
mod error;
mod transport;
mod universe;

// Device discovery
pub use device::{
    find_dmx_ports, get_port_by_name, DeviceEnumerator, DeviceIdentifier, DmxPort,
    SerialPortEnumerator, StaticEnumerator,
};

// Engine
pub use engine::{send_frame, DmxDevice, FailureHistory};

// Errors
pub use error::{DmxError, DmxResult};

// Transports
pub use transport::{
    DmxTransport, SerialTransport, SimulatedHandle, SimulatedTransport, TransportOp,
};

pub use config::{InterpacketPeriod, OutputConfig};
pub use universe::Universe;
