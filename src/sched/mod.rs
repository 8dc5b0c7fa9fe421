//! Scheduler core: ready queue, wait queues, timeouts.
//!
//! Everything here is mutated only under the kernel's scheduler lock.

pub(crate) mod list;
pub(crate) mod run_queue;
pub(crate) mod state;
pub(crate) mod timeout;
pub(crate) mod wait_queue;

/// Ready queue used by the kernel.
#[cfg(not(feature = "sched-sorted"))]
pub(crate) type DefaultRunQueue = run_queue::MultiQueue;

/// Ready queue used by the kernel.
#[cfg(feature = "sched-sorted")]
pub(crate) type DefaultRunQueue = run_queue::SortedQueue;

/// Priority levels.
///
/// Numerically lower values run first. Negative priorities form the
/// cooperative band: such threads are only switched out when they block or
/// yield. Non-negative priorities are preemptible. The lowest level belongs to
/// the idle thread.
pub mod priority {
    use crate::config::{NUM_COOP_PRIORITIES, NUM_PREEMPT_PRIORITIES};

    /// Highest priority of all (the most urgent cooperative level).
    pub const HIGHEST: i32 = -NUM_COOP_PRIORITIES;

    /// Idle thread priority.
    pub const IDLE: i32 = NUM_PREEMPT_PRIORITIES;

    /// Lowest priority of all; the idle level.
    pub const LOWEST: i32 = IDLE;

    /// Lowest priority an application thread may use.
    pub const LOWEST_APPLICATION: i32 = IDLE - 1;

    /// The `x`-th cooperative level, counting from the most urgent.
    ///
    /// ```
    /// use priority_threads::sched::priority;
    /// assert_eq!(priority::coop(0), priority::HIGHEST);
    /// assert_eq!(priority::coop(15), -1);
    /// ```
    pub const fn coop(x: i32) -> i32 {
        -(NUM_COOP_PRIORITIES - x)
    }

    /// The `x`-th preemptible level.
    pub const fn preempt(x: i32) -> i32 {
        x
    }

    /// Within `HIGHEST..=IDLE`.
    pub const fn is_valid(prio: i32) -> bool {
        prio >= HIGHEST && prio <= IDLE
    }

    /// Within `HIGHEST..=LOWEST_APPLICATION`.
    pub const fn is_application(prio: i32) -> bool {
        prio >= HIGHEST && prio <= LOWEST_APPLICATION
    }

    pub const fn is_coop(prio: i32) -> bool {
        prio < 0
    }

    /// Whether `a` runs before `b`.
    pub const fn is_higher(a: i32, b: i32) -> bool {
        a < b
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_bands() {
            assert_eq!(HIGHEST, -16);
            assert_eq!(IDLE, 15);
            assert_eq!(coop(15), -1);
            assert_eq!(preempt(0), 0);
            assert!(is_coop(coop(3)));
            assert!(!is_coop(preempt(0)));
            assert!(is_valid(IDLE));
            assert!(!is_application(IDLE));
            assert!(is_application(LOWEST_APPLICATION));
            assert!(!is_valid(HIGHEST - 1));
            assert!(is_higher(coop(0), preempt(0)));
        }
    }
}
