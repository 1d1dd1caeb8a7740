//! Serial transport layer for DMX output.
//!
//! Provides a trait-based abstraction over the serial adapter so the output
//! engine is written once and runs against real hardware, the simulated
//! transport, or a mock in tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use serialport::SerialPort;

use super::config::{BREAK_BAUD_RATE, DMX_BAUD_RATE, SERIAL_WRITE_TIMEOUT};
use super::error::{DmxError, DmxResult};

/// Capability set the output engine needs from a serial adapter.
#[cfg_attr(test, automock)]
pub trait DmxTransport: Send {
    /// Switch the line to a new baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> DmxResult<()>;

    /// Write bytes, returning how many the transport accepted.
    ///
    /// Blocks until the transport takes the data. There is no timeout at
    /// this level; a hung adapter blocks the caller.
    fn write(&mut self, data: &[u8]) -> DmxResult<usize>;

    /// Wait until every written byte has left the transmitter.
    fn flush(&mut self) -> DmxResult<()>;

    /// Release the underlying handle.
    fn close(&mut self) -> DmxResult<()>;
}

/// Serial port transport implementation (termios on Linux/macOS, VCP on Windows).
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open a serial port for DMX output.
    ///
    /// Applies 250 kbaud 8N2 framing with no flow control, then checks that
    /// the adapter also accepts the break baud rate.
    pub fn open(port_name: &str) -> DmxResult<Self> {
        let normalized_name = normalize_port_name(port_name);

        // USB adapters can briefly refuse opens right after being plugged in.
        const MAX_OPEN_RETRIES: u32 = 3;
        const RETRY_DELAY_MS: u64 = 200;

        let mut attempt = 0;
        let mut port = loop {
            attempt += 1;
            match serialport::new(&normalized_name, DMX_BAUD_RATE)
                .timeout(SERIAL_WRITE_TIMEOUT)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::Two)
                .flow_control(serialport::FlowControl::None)
                .open()
            {
                Ok(port) => break port,
                Err(e) => {
                    let err_str = e.to_string().to_lowercase();
                    let is_transient = err_str.contains("temporarily unavailable")
                        || err_str.contains("interrupted")
                        || err_str.contains("not functioning");

                    if is_transient && attempt < MAX_OPEN_RETRIES {
                        tracing::debug!(
                            "Open of {} failed transiently (attempt {}): {}",
                            port_name,
                            attempt,
                            e
                        );
                        std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                        continue;
                    }

                    return Err(open_error(port_name, e));
                }
            }
        };

        // Probe both rates; dropping `port` on failure releases the handle.
        configure(port.as_mut()).map_err(|e| DmxError::ConfigureFailed {
            port: port_name.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            "Opened serial port: {} at {} baud (8N2)",
            port_name,
            DMX_BAUD_RATE
        );

        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
        })
    }

    fn port(&mut self) -> DmxResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            DmxError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serial port already closed",
            ))
        })
    }
}

fn configure(port: &mut dyn SerialPort) -> Result<(), serialport::Error> {
    port.set_baud_rate(BREAK_BAUD_RATE)?;
    port.set_baud_rate(DMX_BAUD_RATE)?;
    port.write_request_to_send(false).ok();
    port.clear(serialport::ClearBuffer::All)?;
    Ok(())
}

fn open_error(port_name: &str, e: serialport::Error) -> DmxError {
    let err_str = e.to_string().to_lowercase();
    match e.kind() {
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            DmxError::PermissionDenied {
                port: port_name.to_string(),
            }
        }
        serialport::ErrorKind::NoDevice
        | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => DmxError::OpenFailed {
            port: port_name.to_string(),
            reason: "device not found".to_string(),
        },
        _ if err_str.contains("busy") || err_str.contains("in use") => DmxError::OpenFailed {
            port: port_name.to_string(),
            reason: "port is busy or in use by another application".to_string(),
        },
        serialport::ErrorKind::InvalidInput => DmxError::ConfigureFailed {
            port: port_name.to_string(),
            reason: e.to_string(),
        },
        _ => DmxError::OpenFailed {
            port: port_name.to_string(),
            reason: e.to_string(),
        },
    }
}

impl DmxTransport for SerialTransport {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DmxResult<()> {
        self.port()?.set_baud_rate(baud_rate)?;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> DmxResult<usize> {
        use std::io::Write;

        // One write call; a short count is reported, not retried.
        Ok(self.port()?.write(data)?)
    }

    fn flush(&mut self) -> DmxResult<()> {
        use std::io::Write;

        // tcdrain on POSIX; the break byte must be on the wire before the baud switch
        self.port()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> DmxResult<()> {
        if let Some(port) = self.port.take() {
            drop(port);
            tracing::info!("Closed serial port: {}", self.name);
        }
        Ok(())
    }
}

/// Normalize a port name for cross-platform compatibility.
fn normalize_port_name(name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        // cu.* does not block waiting for DCD
        if name.starts_with("/dev/tty.") {
            return name.replace("/dev/tty.", "/dev/cu.");
        }
    }

    #[cfg(target_os = "windows")]
    {
        // COM ports > 9 need \\.\\ prefix
        if name.starts_with("COM") {
            if let Ok(n) = name[3..].parse::<u32>() {
                if n > 9 {
                    return format!("\\\\.\\{}", name);
                }
            }
        }
    }

    name.to_string()
}

// ============================================================================
// Simulated transport
// ============================================================================

/// Operation observed by a [`SimulatedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    SetBaudRate(u32),
    Write(Vec<u8>),
    Flush,
    Close,
}

#[derive(Debug, Default)]
struct SimulatedState {
    ops: Vec<TransportOp>,
    fail_always: bool,
    fail_next: usize,
    write_delay: Duration,
    writing: bool,
    closed_while_writing: bool,
    closed: bool,
}

/// Inspection and fault-injection handle for a [`SimulatedTransport`].
///
/// Stays usable after the transport itself has been moved into a device.
#[derive(Debug, Clone, Default)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedHandle {
    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every operation seen so far, in order.
    pub fn ops(&self) -> Vec<TransportOp> {
        self.lock().ops.clone()
    }

    /// Slot data writes (any write longer than one byte) seen so far.
    pub fn slot_writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                TransportOp::Write(data) if data.len() > 1 => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of slot data writes attempted.
    pub fn frame_attempts(&self) -> usize {
        self.slot_writes().len()
    }

    /// Make every slot data write come up short.
    pub fn fail_always(&self, fail: bool) {
        self.lock().fail_always = fail;
    }

    /// Make the next `count` slot data writes come up short.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Hold every slot data write for `delay` before accepting it.
    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = delay;
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether `close` ever ran while a slot data write was in progress.
    pub fn closed_while_writing(&self) -> bool {
        self.lock().closed_while_writing
    }
}

/// In-memory transport that records every operation.
///
/// Useful for dry runs without hardware and for exercising the engine's
/// timing sequence and failure policy.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    handle: SimulatedHandle,
}

impl SimulatedTransport {
    /// Create a transport and the handle used to inspect it.
    pub fn new() -> (Self, SimulatedHandle) {
        let handle = SimulatedHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl DmxTransport for SimulatedTransport {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DmxResult<()> {
        self.handle.lock().ops.push(TransportOp::SetBaudRate(baud_rate));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> DmxResult<usize> {
        let delay = {
            let mut state = self.handle.lock();
            if data.len() > 1 {
                state.writing = true;
            }
            state.write_delay
        };

        if data.len() > 1 && !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.handle.lock();
        state.ops.push(TransportOp::Write(data.to_vec()));
        if data.len() <= 1 {
            return Ok(data.len());
        }
        state.writing = false;

        let fail = if state.fail_always {
            true
        } else if state.fail_next > 0 {
            state.fail_next -= 1;
            true
        } else {
            false
        };

        Ok(if fail { data.len() - 1 } else { data.len() })
    }

    fn flush(&mut self) -> DmxResult<()> {
        self.handle.lock().ops.push(TransportOp::Flush);
        Ok(())
    }

    fn close(&mut self) -> DmxResult<()> {
        let mut state = self.handle.lock();
        if state.writing {
            state.closed_while_writing = true;
        }
        state.closed = true;
        state.ops.push(TransportOp::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_port_name_passthrough() {
        assert_eq!(normalize_port_name("/dev/ttyUSB0"), "/dev/ttyUSB0");
        assert_eq!(normalize_port_name("COM1"), "COM1");
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_normalize_port_name_macos_tty_to_cu() {
        assert_eq!(
            normalize_port_name("/dev/tty.usbserial-A10K"),
            "/dev/cu.usbserial-A10K"
        );
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn test_normalize_port_name_windows_high_com() {
        assert_eq!(normalize_port_name("COM9"), "COM9");
        assert_eq!(normalize_port_name("COM10"), "\\\\.\\COM10");
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialTransport::open("/dev/opendmx-does-not-exist");
        assert!(result.is_err());
    }

    #[test]
    fn test_simulated_records_ops() {
        let (mut transport, handle) = SimulatedTransport::new();
        transport.set_baud_rate(BREAK_BAUD_RATE).unwrap();
        assert_eq!(transport.write(&[0]).unwrap(), 1);
        transport.flush().unwrap();
        transport.close().unwrap();

        assert_eq!(
            handle.ops(),
            vec![
                TransportOp::SetBaudRate(BREAK_BAUD_RATE),
                TransportOp::Write(vec![0]),
                TransportOp::Flush,
                TransportOp::Close,
            ]
        );
        assert!(handle.is_closed());
        assert!(!handle.closed_while_writing());
    }

    #[test]
    fn test_simulated_short_writes() {
        let (mut transport, handle) = SimulatedTransport::new();
        handle.fail_next(2);

        assert_eq!(transport.write(&[1, 2, 3]).unwrap(), 2);
        // single-byte writes are never failed
        assert_eq!(transport.write(&[0]).unwrap(), 1);
        assert_eq!(transport.write(&[1, 2, 3]).unwrap(), 2);
        assert_eq!(transport.write(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(handle.frame_attempts(), 3);

        handle.fail_always(true);
        assert_eq!(transport.write(&[1, 2, 3]).unwrap(), 2);
    }
}
