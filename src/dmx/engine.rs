//! DMX output engine.
//!
//! Owns one open transport and one [`Universe`], and runs the continuous
//! frame loop:
//! 1. Mark the frame in flight
//! 2. Break + MAB - one zero byte at [`BREAK_BAUD_RATE`]
//! 3. Back to [`DMX_BAUD_RATE`]
//! 4. Start code
//! 5. 512 slots in one write
//! 6. Clear the in-flight mark
//! 7. Record the outcome; halt after eight consecutive failures
//! 8. Sleep for the interpacket period
//!
//! `stop` is advisory and takes effect at the top of the next iteration.
//! `close` is the synchronous form: it does not release the transport until
//! the frame in flight has been written.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use super::config::{
    OutputConfig, BREAK_BAUD_RATE, BREAK_BYTE, CLOSE_POLL_INTERVAL, DMX_BAUD_RATE,
    MAX_CONSECUTIVE_FAILURES, UNIVERSE_LENGTH,
};
use super::error::{DmxError, DmxResult};
use super::transport::{DmxTransport, SerialTransport};
use super::universe::Universe;

/// Outcome history of the most recent frames, newest in bit 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureHistory(u8);

impl FailureHistory {
    /// Shift in the outcome of one frame.
    pub fn record(&mut self, failed: bool) {
        self.0 = (self.0 << 1) | u8::from(failed);
    }

    /// Number of failures since the last success (at most 8).
    pub fn consecutive_failures(&self) -> u32 {
        self.0.trailing_ones()
    }

    /// True once every frame in the window has failed.
    pub fn is_exhausted(&self) -> bool {
        self.consecutive_failures() >= MAX_CONSECUTIVE_FAILURES
    }
}

struct Shared {
    port: String,
    universe: Universe,
    transport: Mutex<Option<Box<dyn DmxTransport>>>,
    config: Mutex<OutputConfig>,
    running: AtomicBool,
    /// Bumped by every start. A loop keeps sending only while it owns the
    /// current generation.
    generation: AtomicU64,
    /// Held while starting and while the loop records a fatal halt.
    lifecycle: Mutex<()>,
    has_error: AtomicBool,
    /// Frames currently between break and last slot byte.
    in_flight: AtomicUsize,
    frames_sent: AtomicU64,
}

impl Shared {
    fn lock_transport(&self) -> MutexGuard<'_, Option<Box<dyn DmxTransport>>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config(&self) -> OutputConfig {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the loop started as `generation` should keep sending.
    fn owns(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Send one frame with the in-flight mark held across every step.
    ///
    /// `owner` is the loop generation, or `None` for a one-off frame. Returns
    /// `None` if that loop was stopped or the transport is gone, in which case
    /// nothing was written.
    fn transmit(
        &self,
        frame: &mut [u8; UNIVERSE_LENGTH],
        start_code: u8,
        owner: Option<u64>,
    ) -> Option<DmxResult<()>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        // Paired with `stop` + the in_flight poll in `close`: either we see the
        // stop here, or close sees in_flight and waits for us.
        if owner.is_some_and(|generation| !self.owns(generation)) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return None;
        }

        let result = {
            let mut guard = self.lock_transport();
            match guard.as_mut() {
                Some(transport) => {
                    self.universe.copy_into(frame);
                    Some(send_frame(transport.as_mut(), start_code, frame))
                }
                None => None,
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn run(&self, generation: u64) -> DmxResult<()> {
        let mut frame = [0u8; UNIVERSE_LENGTH];
        let mut history = FailureHistory::default();

        tracing::info!("DMX output started on {}", self.port);

        while self.owns(generation) {
            let config = self.config();

            let result = match self.transmit(&mut frame, config.start_code, Some(generation)) {
                Some(result) => result,
                None => break,
            };

            match result {
                Ok(()) => {
                    history.record(false);
                    let sent = self.frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::trace!("Sent DMX frame {} on {}", sent, self.port);
                }
                Err(e) => {
                    history.record(true);
                    tracing::debug!(
                        "DMX frame failed on {} ({} in a row): {}",
                        self.port,
                        history.consecutive_failures(),
                        e
                    );
                }
            }

            if history.is_exhausted() {
                let _lifecycle = self.lock_lifecycle();
                // A restart after our stop belongs to a newer loop; leave its state alone.
                if self.generation.load(Ordering::SeqCst) == generation {
                    self.running.store(false, Ordering::SeqCst);
                    self.has_error.store(true, Ordering::SeqCst);
                }
                tracing::warn!(
                    "DMX output on {} halted after {} consecutive failed frames",
                    self.port,
                    MAX_CONSECUTIVE_FAILURES
                );
                return Err(DmxError::fatal());
            }

            thread::sleep(config.interpacket_period.duration());
        }

        tracing::info!("DMX output stopped on {}", self.port);
        Ok(())
    }
}

/// Write one complete frame: break, MAB, start code, slots.
pub fn send_frame(
    transport: &mut dyn DmxTransport,
    start_code: u8,
    slots: &[u8; UNIVERSE_LENGTH],
) -> DmxResult<()> {
    step("break baud switch", transport.set_baud_rate(BREAK_BAUD_RATE))?;
    write_exact(transport, &[BREAK_BYTE], "break")?;
    step("break drain", transport.flush())?;
    step("data baud switch", transport.set_baud_rate(DMX_BAUD_RATE))?;
    write_exact(transport, &[start_code], "start code")?;
    write_exact(transport, slots, "slots")?;
    step("slot drain", transport.flush())
}

fn step<T>(name: &str, result: DmxResult<T>) -> DmxResult<T> {
    result.map_err(|e| DmxError::TransientSendFailure {
        reason: format!("{}: {}", name, e),
    })
}

fn write_exact(transport: &mut dyn DmxTransport, data: &[u8], name: &str) -> DmxResult<()> {
    let written = step(name, transport.write(data))?;
    if written != data.len() {
        return Err(DmxError::TransientSendFailure {
            reason: format!("{}: short write ({} of {} bytes)", name, written, data.len()),
        });
    }
    Ok(())
}

/// An open DMX output device.
///
/// Cheap to share by reference across threads; every method takes `&self`
/// except [`DmxDevice::close`], which consumes the device.
pub struct DmxDevice {
    shared: Arc<Shared>,
}

impl DmxDevice {
    /// Open a serial port for DMX output with the default configuration.
    pub fn open(port_name: &str) -> DmxResult<Self> {
        Self::open_with_config(port_name, OutputConfig::default())
    }

    /// Open a serial port for DMX output.
    pub fn open_with_config(port_name: &str, config: OutputConfig) -> DmxResult<Self> {
        let transport = SerialTransport::open(port_name)?;
        Ok(Self::with_transport(port_name, Box::new(transport), config))
    }

    /// Build a device around an already-open transport.
    pub fn with_transport(
        port_name: &str,
        transport: Box<dyn DmxTransport>,
        config: OutputConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                port: port_name.to_string(),
                universe: Universe::new(),
                transport: Mutex::new(Some(transport)),
                config: Mutex::new(config),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                lifecycle: Mutex::new(()),
                has_error: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                frames_sent: AtomicU64::new(0),
            }),
        }
    }

    /// Port name the device was opened with.
    pub fn port(&self) -> &str {
        &self.shared.port
    }

    /// Claim the output for a new loop and return its generation.
    ///
    /// A loop that was stopped but has not noticed yet sees the generation
    /// change and exits at its next check.
    fn begin(&self) -> DmxResult<u64> {
        let _lifecycle = self.shared.lock_lifecycle();
        self.shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DmxError::AlreadyRunning)?;
        self.shared.has_error.store(false, Ordering::SeqCst);
        Ok(self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Run the output loop on the calling thread.
    ///
    /// Blocks until [`DmxDevice::stop`] is called from another thread
    /// (`Ok`) or output halts after repeated failures
    /// (`FatalTransmissionFailure`).
    pub fn start(&self) -> DmxResult<()> {
        let generation = self.begin()?;
        self.shared.run(generation)
    }

    /// Run the output loop on a dedicated thread and return immediately.
    ///
    /// The device reports running as soon as this returns. The handle yields
    /// the loop's result; dropping it detaches the thread.
    pub fn start_background(&self) -> DmxResult<JoinHandle<DmxResult<()>>> {
        let generation = self.begin()?;

        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("dmx-output {}", self.shared.port))
            .spawn(move || shared.run(generation))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                DmxError::Io(e)
            })
    }

    /// Request the output loop to stop. Does not wait.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("Stop requested for DMX output on {}", self.shared.port);
        }
    }

    /// Stop output, wait for the frame in flight, and release the transport.
    pub fn close(self) -> DmxResult<()> {
        self.stop();

        while self.shared.in_flight.load(Ordering::SeqCst) > 0 {
            thread::sleep(CLOSE_POLL_INTERVAL);
        }

        let transport = self.shared.lock_transport().take();
        match transport {
            Some(mut transport) => {
                transport.close().map_err(|e| DmxError::CloseFailed {
                    reason: e.to_string(),
                })?;
                tracing::info!("DMX device {} closed", self.shared.port);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Send a single frame outside the loop.
    ///
    /// Does not touch the failure history. Waits for the loop's frame if the
    /// loop is running.
    pub fn send_once(&self) -> DmxResult<()> {
        let mut frame = [0u8; UNIVERSE_LENGTH];
        let start_code = self.shared.config().start_code;
        let result = self
            .shared
            .transmit(&mut frame, start_code, None)
            .unwrap_or_else(|| {
                Err(DmxError::TransientSendFailure {
                    reason: "transport closed".to_string(),
                })
            });
        if result.is_ok() {
            self.shared.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Current value of a slot, or 0 outside the universe.
    pub fn get_slot(&self, index: usize) -> u8 {
        self.shared.universe.get(index)
    }

    /// Set a slot; visible to the next frame.
    pub fn set_slot(&self, index: usize, value: u8) -> DmxResult<()> {
        self.shared.universe.set(index, value)
    }

    /// Set a contiguous run of slots starting at `start`.
    pub fn set_slots(&self, start: usize, values: &[u8]) -> DmxResult<()> {
        self.shared.universe.set_range(start, values)
    }

    /// Copy of every slot.
    pub fn snapshot(&self) -> [u8; UNIVERSE_LENGTH] {
        self.shared.universe.snapshot()
    }

    /// Set every slot to zero.
    pub fn blackout(&self) {
        self.shared.universe.clear();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn has_error(&self) -> bool {
        self.shared.has_error.load(Ordering::SeqCst)
    }

    /// Frames written successfully since the device was opened.
    pub fn frames_sent(&self) -> u64 {
        self.shared.frames_sent.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> OutputConfig {
        self.shared.config()
    }

    /// Replace the output configuration; takes effect on the next frame.
    pub fn set_config(&self, config: OutputConfig) {
        *self
            .shared
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }
}

impl Drop for DmxDevice {
    fn drop(&mut self) {
        // A dropped device must not leave a detached loop transmitting forever.
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for DmxDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmxDevice")
            .field("port", &self.shared.port)
            .field("running", &self.is_running())
            .field("has_error", &self.has_error())
            .field("frames_sent", &self.frames_sent())
            .finish()
    }
}
