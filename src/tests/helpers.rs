//! Test helper utilities and common functionality.

use std::boxed::Box;
use std::vec::Vec;

use crate::arch::host::HostArch;
use crate::config::KernelConfig;
use crate::kernel::Kernel;

pub(crate) type TestKernel = Kernel<HostArch>;

/// An unstarted kernel that lives for the rest of the test run.
pub(crate) fn leaked_kernel(config: KernelConfig) -> &'static TestKernel {
    leak(Kernel::new(HostArch::new(), config).expect("valid config"))
}

/// A started kernel whose main thread is the calling test thread.
pub(crate) fn started_kernel() -> &'static TestKernel {
    started_kernel_with(KernelConfig::DEFAULT)
}

pub(crate) fn started_kernel_with(config: KernelConfig) -> &'static TestKernel {
    let kernel = leaked_kernel(config);
    kernel.start().expect("kernel start");
    kernel
}

pub(crate) fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// Ordered record of events observed by kernel threads.
pub(crate) struct EventLog<T> {
    events: spin::Mutex<Vec<T>>,
}

impl<T: Clone> EventLog<T> {
    pub(crate) fn new() -> Self {
        Self {
            events: spin::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, event: T) {
        self.events.lock().push(event);
    }

    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.events.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.lock().len()
    }
}

/// Leaked, empty event log.
pub(crate) fn event_log<T: Clone + Send + 'static>() -> &'static EventLog<T> {
    leak(EventLog::new())
}

/// Simple linear congruential generator for property testing.
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state >> 16
    }

    /// Uniform-ish value in `min..max`.
    pub(crate) fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        min + (self.next_u64() % (max - min))
    }
}
