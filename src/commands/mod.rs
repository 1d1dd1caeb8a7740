//! Async command layer for applications embedding the DMX output.
//!
//! Every command returns `Result<_, String>` so it can be handed straight to
//! a UI.

pub mod device;
pub mod output;

pub use device::{detect_dmx_ports, find_dmx_port, DmxPortInfo};
pub use output::{OutputSession, OutputStatus};
