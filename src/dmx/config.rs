//! Configuration constants for DMX512 output over a plain serial adapter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Universe
// ============================================================================

/// Number of slots in one DMX universe.
pub const UNIVERSE_LENGTH: usize = 512;

/// Start code for standard dimmer data.
pub const DEFAULT_START_CODE: u8 = 0x00;

// ============================================================================
// Serial Communication
// ============================================================================

/// Baud rate for the start code and slot data (4µs per bit, 44µs per 8N2 byte).
pub const DMX_BAUD_RATE: u32 = 250_000;

/// Baud rate used to stretch a single zero byte into a break.
///
/// At 76.8 kbaud the start bit plus eight zero data bits hold the line low
/// for ~117µs, then the two stop bits hold it high for ~26µs (MAB).
pub const BREAK_BAUD_RATE: u32 = 76_800;

/// Byte written at the break baud rate.
pub const BREAK_BYTE: u8 = 0x00;

/// Minimum break length required by DMX512 (µs).
pub const MIN_BREAK_US: f64 = 92.0;

/// Minimum mark-after-break length required by DMX512 (µs).
pub const MIN_MAB_US: f64 = 12.0;

/// Port timeout handed to the serialport crate.
///
/// The engine itself has no write timeout; this only bounds how long the
/// serial variant can block before reporting a failed frame.
pub const SERIAL_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// FTDI USB Vendor ID (FT232R based Open DMX USB adapters).
pub const FTDI_VID: u16 = 0x0403;

// ============================================================================
// Frame Timing
// ============================================================================

/// Nominal wire time of one frame, from which the interpacket presets derive.
///
/// Budgets 104µs of break and 26µs of MAB, 40µs of start code and 20480µs of
/// slots. The break actually produced at [`BREAK_BAUD_RATE`] is ~117µs, so
/// real frames run slightly longer.
pub const FRAME_TIME: Duration = Duration::from_nanos(20_650_000);

/// Interpacket gap for ~40 frames per second.
pub const PERIOD_HIGH: Duration = Duration::from_nanos(4_350_000);

/// Interpacket gap for ~30 frames per second.
pub const PERIOD_MID: Duration = Duration::from_nanos(12_683_333);

/// Interpacket gap for ~20 frames per second.
pub const PERIOD_LOW: Duration = Duration::from_nanos(29_350_000);

// ============================================================================
// Failure Policy
// ============================================================================

/// Consecutive failed frames after which output halts.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 8;

/// Interval between `in_flight` polls while closing.
pub const CLOSE_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Interpacket period between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "nanos", rename_all = "camelCase")]
pub enum InterpacketPeriod {
    /// ~40 frames per second.
    High,
    /// ~30 frames per second.
    Mid,
    /// ~20 frames per second.
    Low,
    /// Raw gap in nanoseconds.
    Custom(u64),
}

impl Default for InterpacketPeriod {
    fn default() -> Self {
        InterpacketPeriod::Mid
    }
}

impl InterpacketPeriod {
    /// Gap slept between the end of one frame and the start of the next.
    pub fn duration(&self) -> Duration {
        match self {
            InterpacketPeriod::High => PERIOD_HIGH,
            InterpacketPeriod::Mid => PERIOD_MID,
            InterpacketPeriod::Low => PERIOD_LOW,
            InterpacketPeriod::Custom(nanos) => Duration::from_nanos(*nanos),
        }
    }

    /// Approximate frames per second including the frame's own wire time.
    pub fn frames_per_second(&self) -> f64 {
        1.0 / (FRAME_TIME + self.duration()).as_secs_f64()
    }

    /// Map a raw duration back onto a preset when it matches one exactly.
    pub fn from_duration(duration: Duration) -> Self {
        match duration {
            d if d == PERIOD_HIGH => InterpacketPeriod::High,
            d if d == PERIOD_MID => InterpacketPeriod::Mid,
            d if d == PERIOD_LOW => InterpacketPeriod::Low,
            d => InterpacketPeriod::Custom(d.as_nanos().min(u64::MAX as u128) as u64),
        }
    }
}

/// Per-device output parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Start code sent ahead of the slot data.
    #[serde(default)]
    pub start_code: u8,
    /// Gap between frames.
    #[serde(default)]
    pub interpacket_period: InterpacketPeriod,
}

/// Length of the break and mark-after-break produced by writing one zero
/// byte (8N2) at `baud_rate`, in microseconds.
pub fn break_timing_us(baud_rate: u32) -> (f64, f64) {
    let bit_us = 1_000_000.0 / baud_rate as f64;
    // start bit + 8 zero data bits low, 2 stop bits high
    (bit_us * 9.0, bit_us * 2.0)
}

/// Check that a baud rate produces a break and MAB within DMX512 minimums.
pub fn is_valid_break_baud(baud_rate: u32) -> bool {
    if baud_rate == 0 {
        return false;
    }
    let (break_us, mab_us) = break_timing_us(baud_rate);
    break_us >= MIN_BREAK_US && mab_us >= MIN_MAB_US
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_baud_meets_dmx_minimums() {
        assert!(is_valid_break_baud(BREAK_BAUD_RATE));
        let (break_us, mab_us) = break_timing_us(BREAK_BAUD_RATE);
        assert!(break_us > 110.0 && break_us < 120.0);
        assert!(mab_us > 25.0 && mab_us < 27.0);
    }

    #[test]
    fn test_data_baud_is_too_fast_for_break() {
        assert!(!is_valid_break_baud(DMX_BAUD_RATE));
        assert!(!is_valid_break_baud(0));
        // 56k is the slow end of the historical range and still valid
        assert!(is_valid_break_baud(56_000));
    }

    #[test]
    fn test_period_presets() {
        assert_eq!(InterpacketPeriod::High.duration(), Duration::from_micros(4350));
        assert_eq!(InterpacketPeriod::Low.duration(), Duration::from_micros(29_350));
        assert_eq!(InterpacketPeriod::default(), InterpacketPeriod::Mid);

        assert!((InterpacketPeriod::High.frames_per_second() - 40.0).abs() < 0.1);
        assert!((InterpacketPeriod::Mid.frames_per_second() - 30.0).abs() < 0.1);
        assert!((InterpacketPeriod::Low.frames_per_second() - 20.0).abs() < 0.1);
    }

    #[test]
    fn test_period_from_duration() {
        assert_eq!(
            InterpacketPeriod::from_duration(PERIOD_LOW),
            InterpacketPeriod::Low
        );
        assert_eq!(
            InterpacketPeriod::from_duration(Duration::from_millis(1)),
            InterpacketPeriod::Custom(1_000_000)
        );
        assert_eq!(
            InterpacketPeriod::Custom(5).duration(),
            Duration::from_nanos(5)
        );
    }

    #[test]
    fn test_output_config_default() {
        let config = OutputConfig::default();
        assert_eq!(config.start_code, DEFAULT_START_CODE);
        assert_eq!(config.interpacket_period, InterpacketPeriod::Mid);
    }
}
