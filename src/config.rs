//! Compile-time constants and run-time kernel configuration.

use crate::errors::ConfigError;
use crate::mem::StackSizeClass;
use crate::sched::priority;

/// Number of cooperative priority levels (negative priorities).
pub const NUM_COOP_PRIORITIES: i32 = 16;

/// Number of preemptible priority levels, excluding the idle level.
pub const NUM_PREEMPT_PRIORITIES: i32 = 15;

/// Total number of priority levels, idle included.
pub const NUM_PRIORITIES: usize = (NUM_COOP_PRIORITIES + NUM_PREEMPT_PRIORITIES + 1) as usize;

/// System clock tick rate in Hz.
pub const TICK_RATE_HZ: u32 = 1000;

/// Upper bound on the thread table; slot indexes must fit in 16 bits.
pub const MAX_THREADS_LIMIT: usize = u16::MAX as usize;

/// Run-time kernel parameters.
///
/// ```
/// use priority_threads::config::KernelConfig;
///
/// let config = KernelConfig::DEFAULT.max_threads(8).time_slice(10, 0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Capacity of the thread table, main and idle threads included.
    pub max_threads: usize,
    /// Length of a time slice in ticks; `0` disables time slicing.
    pub time_slice_ticks: u64,
    /// Threads with a priority numerically below this value are not sliced.
    pub time_slice_prio_ceiling: i32,
    /// Highest priority a mutex owner may be boosted to.
    pub prio_ceiling: i32,
    /// Priority of the thread adopted by [`Kernel::start`](crate::Kernel::start).
    pub main_priority: i32,
    /// Stack class for the idle thread.
    pub idle_stack: StackSizeClass,
    /// Stack class used when a builder does not name one.
    pub default_stack: StackSizeClass,
}

impl KernelConfig {
    /// Default configuration: 32 threads, no time slicing.
    pub const DEFAULT: Self = Self {
        max_threads: 32,
        time_slice_ticks: 0,
        time_slice_prio_ceiling: 0,
        prio_ceiling: priority::HIGHEST,
        main_priority: 0,
        idle_stack: StackSizeClass::Small,
        default_stack: StackSizeClass::Medium,
    };

    /// Set the thread table capacity.
    pub const fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Enable time slicing for threads at or below `prio_ceiling`.
    ///
    /// # Arguments
    ///
    /// * `ticks` - Slice length in ticks, `0` disables slicing
    /// * `prio_ceiling` - Highest priority that is still sliced
    pub const fn time_slice(mut self, ticks: u64, prio_ceiling: i32) -> Self {
        self.time_slice_ticks = ticks;
        self.time_slice_prio_ceiling = prio_ceiling;
        self
    }

    /// Set the priority inheritance ceiling.
    pub const fn prio_ceiling(mut self, prio: i32) -> Self {
        self.prio_ceiling = prio;
        self
    }

    /// Set the priority of the adopted main thread.
    pub const fn main_priority(mut self, prio: i32) -> Self {
        self.main_priority = prio;
        self
    }

    /// Set the default stack class for spawned threads.
    pub const fn default_stack(mut self, class: StackSizeClass) -> Self {
        self.default_stack = class;
        self
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads < 2 {
            return Err(ConfigError::TooFewThreads(self.max_threads));
        }
        if self.max_threads > MAX_THREADS_LIMIT {
            return Err(ConfigError::TooManyThreads(self.max_threads));
        }
        if !priority::is_valid(self.prio_ceiling) {
            return Err(ConfigError::InvalidCeiling(self.prio_ceiling));
        }
        if !priority::is_application(self.main_priority) {
            return Err(ConfigError::InvalidMainPriority(self.main_priority));
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(KernelConfig::DEFAULT.validate().is_ok());
        assert_eq!(KernelConfig::default(), KernelConfig::DEFAULT);
    }

    #[test]
    fn test_invalid_configs() {
        assert_eq!(
            KernelConfig::DEFAULT.max_threads(1).validate(),
            Err(ConfigError::TooFewThreads(1))
        );
        assert_eq!(
            KernelConfig::DEFAULT.max_threads(70_000).validate(),
            Err(ConfigError::TooManyThreads(70_000))
        );
        assert_eq!(
            KernelConfig::DEFAULT.prio_ceiling(-100).validate(),
            Err(ConfigError::InvalidCeiling(-100))
        );
        assert_eq!(
            KernelConfig::DEFAULT.main_priority(priority::IDLE).validate(),
            Err(ConfigError::InvalidMainPriority(priority::IDLE))
        );
    }

    #[test]
    fn test_priority_level_count() {
        assert_eq!(NUM_PRIORITIES, 32);
    }
}
