//! Tick counting and time slice accounting.

use super::{Duration, Instant};
use portable_atomic::{AtomicU64, Ordering};

/// System uptime counter.
///
/// Advanced by the clock driver through
/// [`Kernel::announce_ticks`](crate::Kernel::announce_ticks) and readable from
/// any context without taking the scheduler lock.
pub struct TickCounter {
    /// Number of ticks since the kernel started
    ticks: AtomicU64,
    /// Tick frequency in Hz
    frequency: u32,
}

impl TickCounter {
    /// Create a counter for a clock running at `frequency` Hz.
    pub const fn new(frequency: u32) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frequency,
        }
    }

    /// Move the counter forward by `ticks`.
    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::AcqRel);
    }

    /// Current tick count.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Tick frequency in Hz.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Convert ticks to nanoseconds.
    pub fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        ((ticks as u128 * 1_000_000_000) / self.frequency as u128) as u64
    }

    /// Convert nanoseconds to ticks, rounding down.
    pub fn nanos_to_ticks(&self, nanos: u64) -> u64 {
        ((nanos as u128 * self.frequency as u128) / 1_000_000_000) as u64
    }

    /// Current time as an instant.
    pub fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks())
    }
}

/// Round-robin slice state for the running thread.
///
/// Only preemptible threads whose priority is not higher than
/// `prio_ceiling` are sliced. Owned by the scheduler and mutated under its
/// lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlice {
    /// Slice length; zero disables slicing
    ticks: u64,
    /// Highest priority that is still sliced
    prio_ceiling: i32,
    /// Ticks the current thread has consumed of its slice
    used: u64,
}

impl TimeSlice {
    pub const fn new(ticks: u64, prio_ceiling: i32) -> Self {
        Self {
            ticks,
            prio_ceiling,
            used: 0,
        }
    }

    /// Change the slice length and ceiling, restarting the current slice.
    pub fn configure(&mut self, ticks: u64, prio_ceiling: i32) {
        self.ticks = ticks;
        self.prio_ceiling = prio_ceiling;
        self.used = 0;
    }

    /// Start a fresh slice, on every context switch.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Whether a thread running at `prio` is subject to slicing.
    pub fn applies_to(&self, prio: i32) -> bool {
        self.ticks > 0 && prio >= 0 && prio >= self.prio_ceiling
    }

    /// Charge `elapsed` ticks to the current slice.
    ///
    /// Returns `true` once the slice is used up; the slice restarts then.
    pub fn charge(&mut self, elapsed: u64) -> bool {
        self.used = self.used.saturating_add(elapsed);
        if self.used >= self.ticks {
            self.used = 0;
            true
        } else {
            false
        }
    }

    /// Ticks left in the current slice.
    pub fn remaining(&self) -> Duration {
        Duration::from_ticks(self.ticks.saturating_sub(self.used))
    }

    pub fn length(&self) -> Duration {
        Duration::from_ticks(self.ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counter() {
        let counter = TickCounter::new(1000);
        assert_eq!(counter.ticks(), 0);
        counter.advance(1);
        counter.advance(4);
        assert_eq!(counter.ticks(), 5);
        assert_eq!(counter.now(), Instant::from_ticks(5));
        assert_eq!(counter.ticks_to_nanos(5), 5_000_000);
        assert_eq!(counter.nanos_to_ticks(2_500_000), 2);
        assert_eq!(counter.frequency(), 1000);
    }

    #[test]
    fn test_time_slice_expiry() {
        let mut slice = TimeSlice::new(3, 0);
        assert!(!slice.charge(1));
        assert!(!slice.charge(1));
        assert_eq!(slice.remaining(), Duration::from_ticks(1));
        assert!(slice.charge(1));
        assert_eq!(slice.remaining(), Duration::from_ticks(3));
        slice.charge(2);
        slice.reset();
        assert_eq!(slice.remaining(), slice.length());
    }

    #[test]
    fn test_time_slice_applicability() {
        let slice = TimeSlice::new(5, 2);
        assert!(!slice.applies_to(-1));
        assert!(!slice.applies_to(1));
        assert!(slice.applies_to(2));
        assert!(slice.applies_to(10));
        assert!(!TimeSlice::new(0, 0).applies_to(5));
    }
}
