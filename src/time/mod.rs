//! Kernel time in system clock ticks.

pub mod tick;

pub use tick::{TickCounter, TimeSlice};

use crate::config::TICK_RATE_HZ;

/// A point on the kernel clock, in ticks since [`Kernel::start`](crate::Kernel::start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant(u64);

impl Instant {
    /// Create an instant from an absolute tick count.
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Ticks since the clock started.
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Ticks from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }
}

/// A span of kernel time, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Self = Self(0);

    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Milliseconds rounded up to whole ticks.
    pub const fn from_millis(millis: u64) -> Self {
        Self(ceil_div(millis.saturating_mul(TICK_RATE_HZ as u64), 1_000))
    }

    /// Microseconds rounded up to whole ticks.
    pub const fn from_micros(micros: u64) -> Self {
        Self(ceil_div(micros.saturating_mul(TICK_RATE_HZ as u64), 1_000_000))
    }

    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Whole milliseconds in this duration.
    pub const fn as_millis(self) -> u64 {
        self.0.saturating_mul(1_000) / TICK_RATE_HZ as u64
    }
}

const fn ceil_div(value: u64, divisor: u64) -> u64 {
    value / divisor + (value % divisor != 0) as u64
}

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Do not block; fail immediately if the operation cannot complete.
    NoWait,
    /// Block until the operation completes.
    Forever,
    /// Block for at most this long.
    After(Duration),
    /// Block until this point on the kernel clock.
    At(Instant),
}

impl Timeout {
    /// Shorthand for `Timeout::After(Duration::from_ticks(ticks))`.
    pub const fn ticks(ticks: u64) -> Self {
        Timeout::After(Duration::from_ticks(ticks))
    }

    /// Shorthand for `Timeout::After(Duration::from_millis(millis))`.
    pub const fn millis(millis: u64) -> Self {
        Timeout::After(Duration::from_millis(millis))
    }

    /// Absolute tick at which a wait started at `now` expires.
    ///
    /// Relative waits last at least one tick. `None` for `NoWait` and
    /// `Forever`, neither of which arms a timer.
    pub(crate) fn deadline(self, now: u64) -> Option<u64> {
        match self {
            Timeout::NoWait | Timeout::Forever => None,
            Timeout::After(d) => Some(now.saturating_add(d.0.max(1))),
            Timeout::At(at) => Some(at.0.max(now + 1)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_conversions() {
        assert_eq!(Duration::from_millis(5).ticks(), 5);
        assert_eq!(Duration::from_micros(1).ticks(), 1);
        assert_eq!(Duration::from_micros(2_500).ticks(), 3);
        assert_eq!(Duration::from_ticks(7).as_millis(), 7);
    }

    #[test]
    fn test_deadlines() {
        assert_eq!(Timeout::NoWait.deadline(10), None);
        assert_eq!(Timeout::Forever.deadline(10), None);
        assert_eq!(Timeout::ticks(0).deadline(10), Some(11));
        assert_eq!(Timeout::ticks(5).deadline(10), Some(15));
        assert_eq!(Timeout::At(Instant::from_ticks(3)).deadline(10), Some(11));
        assert_eq!(Timeout::At(Instant::from_ticks(30)).deadline(10), Some(30));
    }

    #[test]
    fn test_instant_arithmetic() {
        let a = Instant::from_ticks(10);
        let b = a + Duration::from_ticks(5);
        assert_eq!(b.ticks(), 15);
        assert_eq!(b.saturating_duration_since(a), Duration::from_ticks(5));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    }
}
