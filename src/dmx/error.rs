//! DMX error types for the serial output engine.

use thiserror::Error;

use super::config::{MAX_CONSECUTIVE_FAILURES, UNIVERSE_LENGTH};

/// Result type alias for DMX operations.
pub type DmxResult<T> = Result<T, DmxError>;

/// Errors that can occur while opening, driving or closing a DMX output.
#[derive(Debug, Error)]
pub enum DmxError {
    /// Serial port error from the serialport crate.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device missing, busy, or otherwise could not be opened.
    #[error("Failed to open '{port}': {reason}")]
    OpenFailed { port: String, reason: String },

    /// Permission denied accessing serial port.
    #[error("Permission denied for port '{port}'")]
    PermissionDenied { port: String },

    /// The transport rejected framing or one of the required baud rates.
    #[error("Failed to configure '{port}': {reason}")]
    ConfigureFailed { port: String, reason: String },

    /// One frame's break, baud switch or write step failed.
    #[error("Frame send failed: {reason}")]
    TransientSendFailure { reason: String },

    /// Too many consecutive frames failed; output has halted.
    #[error("Output halted after {failures} consecutive failed frames")]
    FatalTransmissionFailure { failures: u32 },

    /// Slot index outside the universe.
    #[error("Slot {index} is outside the universe (0-{max})", max = UNIVERSE_LENGTH - 1)]
    OutOfRange { index: usize },

    /// The transport failed to release cleanly.
    #[error("Failed to close device: {reason}")]
    CloseFailed { reason: String },

    /// Output loop is already running on this device.
    #[error("Output is already running")]
    AlreadyRunning,

    /// Settings could not be read or written.
    #[error("Settings error: {reason}")]
    Settings { reason: String },
}

impl DmxError {
    /// Shorthand for the fatal error raised by the fail-stop policy.
    pub fn fatal() -> Self {
        DmxError::FatalTransmissionFailure {
            failures: MAX_CONSECUTIVE_FAILURES,
        }
    }

    /// Check if this error is transient (absorbed by the output loop).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DmxError::TransientSendFailure { .. } | DmxError::Io(_) | DmxError::Serial(_)
        )
    }

    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            DmxError::Serial(_) => "DMX-001",
            DmxError::Io(_) => "DMX-002",
            DmxError::OpenFailed { .. } => "DMX-010",
            DmxError::PermissionDenied { .. } => "DMX-011",
            DmxError::ConfigureFailed { .. } => "DMX-012",
            DmxError::TransientSendFailure { .. } => "DMX-020",
            DmxError::FatalTransmissionFailure { .. } => "DMX-021",
            DmxError::OutOfRange { .. } => "DMX-030",
            DmxError::CloseFailed { .. } => "DMX-040",
            DmxError::AlreadyRunning => "DMX-050",
            DmxError::Settings { .. } => "DMX-060",
        }
    }
}
