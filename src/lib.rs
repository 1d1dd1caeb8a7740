//! DMX512 output over plain USB/RS-485 serial adapters.
//!
//! - [`dmx`] - the output engine, transports and port discovery
//! - [`settings`] - persisted output settings
//! - [`commands`] - async façade for applications embedding the output

pub mod commands;
pub mod dmx;
pub mod settings;

#[cfg(test)]
mod test_helpers;
