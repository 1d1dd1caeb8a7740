//! Output session commands.
//!
//! Holds at most one open device for the surrounding application. Blocking
//! engine calls (open, close) run on the blocking pool; the output loop runs
//! on its own thread and callers poll [`OutputSession::status`] to notice a
//! fatal halt.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::dmx::DmxDevice;
use crate::settings::OutputSettings;

/// Status snapshot sent to the frontend.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputStatus {
    /// Port the output is bound to.
    pub port: String,
    /// Whether frames are being sent.
    pub running: bool,
    /// Whether output halted after repeated failures.
    pub has_error: bool,
    /// Frames sent since the port was opened.
    pub frames_sent: u64,
    /// Start code in use.
    pub start_code: u8,
    /// Approximate frame rate for the configured period.
    pub frames_per_second: f64,
}

impl From<&DmxDevice> for OutputStatus {
    fn from(device: &DmxDevice) -> Self {
        let config = device.config();
        Self {
            port: device.port().to_string(),
            running: device.is_running(),
            has_error: device.has_error(),
            frames_sent: device.frames_sent(),
            start_code: config.start_code,
            frames_per_second: config.interpacket_period.frames_per_second(),
        }
    }
}

/// The application's single DMX output.
#[derive(Default, Clone)]
pub struct OutputSession {
    device: Arc<Mutex<Option<DmxDevice>>>,
}

impl OutputSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<DmxDevice>>, String> {
        self.device
            .lock()
            .map_err(|_| "Output session lock poisoned".to_string())
    }

    fn with_device<T>(&self, f: impl FnOnce(&DmxDevice) -> Result<T, String>) -> Result<T, String> {
        let guard = self.lock()?;
        let device = guard.as_ref().ok_or_else(|| "No DMX output is open".to_string())?;
        f(device)
    }

    /// Open a port and start output, replacing any output already open.
    pub async fn open_output(
        &self,
        port: String,
        settings: OutputSettings,
    ) -> Result<OutputStatus, String> {
        self.close_output().await?;

        let config = settings.output_config();
        let device = tokio::task::spawn_blocking(move || DmxDevice::open_with_config(&port, config))
            .await
            .map_err(|e| format!("Open task panicked: {}", e))?
            .map_err(|e| format!("{} [{}]", e, e.error_code()))?;

        self.attach(device).await
    }

    /// Start output on an already-open device and make it the session's output.
    ///
    /// A device already attached is closed first.
    pub async fn attach(&self, device: DmxDevice) -> Result<OutputStatus, String> {
        self.close_output().await?;

        // The loop reports a fatal halt through `has_error`; no need to keep the handle.
        device.start_background().map_err(|e| e.to_string())?;
        let status = OutputStatus::from(&device);
        *self.lock()? = Some(device);
        Ok(status)
    }

    /// Current status, or `None` when no output is open.
    pub fn status(&self) -> Option<OutputStatus> {
        self.lock().ok()?.as_ref().map(OutputStatus::from)
    }

    /// Set one channel (0-based slot).
    pub fn set_channel(&self, slot: usize, value: u8) -> Result<(), String> {
        self.with_device(|device| device.set_slot(slot, value).map_err(|e| e.to_string()))
    }

    /// Set a run of channels starting at `start`.
    pub fn set_channels(&self, start: usize, values: Vec<u8>) -> Result<(), String> {
        self.with_device(|device| device.set_slots(start, &values).map_err(|e| e.to_string()))
    }

    /// Current value of every channel.
    pub fn channels(&self) -> Result<Vec<u8>, String> {
        self.with_device(|device| Ok(device.snapshot().to_vec()))
    }

    /// Zero every channel.
    pub fn blackout(&self) -> Result<(), String> {
        self.with_device(|device| {
            device.blackout();
            Ok(())
        })
    }

    /// Apply new settings to the running output.
    pub fn apply_settings(&self, settings: &OutputSettings) -> Result<(), String> {
        self.with_device(|device| {
            device.set_config(settings.output_config());
            Ok(())
        })
    }

    /// Restart output after it halted. Does nothing if it is already running.
    pub fn restart_output(&self) -> Result<OutputStatus, String> {
        self.with_device(|device| {
            if !device.is_running() {
                tracing::info!("Restarting DMX output on {}", device.port());
                device.start_background().map_err(|e| e.to_string())?;
            }
            Ok(OutputStatus::from(device))
        })
    }

    /// Stop output and release the port. Closing with nothing open is a no-op.
    pub async fn close_output(&self) -> Result<(), String> {
        let device = self.lock()?.take();
        let Some(device) = device else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || device.close())
            .await
            .map_err(|e| format!("Close task panicked: {}", e))?
            .map_err(|e| e.to_string())
    }
}
