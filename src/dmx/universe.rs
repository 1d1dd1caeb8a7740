//! Slot buffer shared between the controlling thread and the output loop.
//!
//! Every slot is an independent atomic byte. Writers never block the output
//! loop, and the loop never blocks writers; a frame may go out with a mix of
//! old and new values when a multi-slot update races a send. There is no
//! frame-level transaction.

use std::sync::atomic::{AtomicU8, Ordering};

use super::config::UNIVERSE_LENGTH;
use super::error::{DmxError, DmxResult};

/// One DMX universe of 512 slots.
pub struct Universe {
    slots: [AtomicU8; UNIVERSE_LENGTH],
}

impl Universe {
    /// Create a universe with every slot at zero.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }

    /// Read a slot, returning 0 for indices outside the universe.
    pub fn get(&self, index: usize) -> u8 {
        self.slots
            .get(index)
            .map(|slot| slot.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Write a slot. Out-of-range indices are rejected without touching the buffer.
    pub fn set(&self, index: usize, value: u8) -> DmxResult<()> {
        let slot = self
            .slots
            .get(index)
            .ok_or(DmxError::OutOfRange { index })?;
        slot.store(value, Ordering::Relaxed);
        Ok(())
    }

    /// Write a contiguous run of slots starting at `start`.
    ///
    /// The whole run is rejected if any part of it falls outside the universe.
    pub fn set_range(&self, start: usize, values: &[u8]) -> DmxResult<()> {
        let end = start
            .checked_add(values.len())
            .filter(|end| *end <= UNIVERSE_LENGTH)
            .ok_or(DmxError::OutOfRange {
                index: start.saturating_add(values.len()).saturating_sub(1),
            })?;

        for (slot, value) in self.slots[start..end].iter().zip(values) {
            slot.store(*value, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Set every slot to zero.
    pub fn clear(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Copy the current values into `buffer` in slot order.
    pub fn copy_into(&self, buffer: &mut [u8; UNIVERSE_LENGTH]) {
        for (byte, slot) in buffer.iter_mut().zip(&self.slots) {
            *byte = slot.load(Ordering::Relaxed);
        }
    }

    /// Copy of the current values.
    pub fn snapshot(&self) -> [u8; UNIVERSE_LENGTH] {
        let mut buffer = [0u8; UNIVERSE_LENGTH];
        self.copy_into(&mut buffer);
        buffer
    }

    /// Number of slots (always 512).
    pub fn len(&self) -> usize {
        UNIVERSE_LENGTH
    }

    /// Always false; a universe is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Universe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.slots.iter().filter(|s| s.load(Ordering::Relaxed) != 0).count();
        f.debug_struct("Universe")
            .field("len", &UNIVERSE_LENGTH)
            .field("active_slots", &active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_universe_is_zeroed() {
        let universe = Universe::new();
        assert_eq!(universe.len(), 512);
        assert!(universe.snapshot().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_set_then_get_every_slot() {
        let universe = Universe::new();
        for i in 0..UNIVERSE_LENGTH {
            universe.set(i, (i % 256) as u8).unwrap();
        }
        for i in 0..UNIVERSE_LENGTH {
            assert_eq!(universe.get(i), (i % 256) as u8);
        }
    }

    #[test]
    fn test_out_of_range_is_rejected_without_mutation() {
        let universe = Universe::new();
        universe.set(511, 42).unwrap();
        let before = universe.snapshot();

        for index in [512, 513, 1000, usize::MAX] {
            assert_eq!(universe.get(index), 0);
            assert!(matches!(
                universe.set(index, 255),
                Err(DmxError::OutOfRange { index: i }) if i == index
            ));
        }

        assert_eq!(universe.snapshot(), before);
    }

    #[test]
    fn test_set_range() {
        let universe = Universe::new();
        universe.set_range(10, &[1, 2, 3]).unwrap();
        assert_eq!(universe.get(9), 0);
        assert_eq!(universe.get(10), 1);
        assert_eq!(universe.get(12), 3);
        assert_eq!(universe.get(13), 0);

        universe.set_range(509, &[7, 8, 9]).unwrap();
        assert_eq!(universe.get(511), 9);
    }

    #[test]
    fn test_set_range_past_end_is_rejected() {
        let universe = Universe::new();
        assert!(universe.set_range(510, &[1, 2, 3]).is_err());
        assert!(universe.set_range(usize::MAX, &[1]).is_err());
        assert_eq!(universe.get(510), 0);
        assert_eq!(universe.get(511), 0);
    }

    #[test]
    fn test_clear() {
        let universe = Universe::new();
        universe.set_range(0, &[255; 512]).unwrap();
        universe.clear();
        assert!(universe.snapshot().iter().all(|&b| b == 0));
    }
}
