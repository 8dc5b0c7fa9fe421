//! Thread configuration before spawning.

extern crate alloc;
use alloc::boxed::Box;
use alloc::string::String;

use super::{JoinHandle, ThreadOptions};
use crate::arch::Arch;
use crate::errors::SpawnError;
use crate::kernel::Kernel;
use crate::mem::{Stack, StackSizeClass};
use crate::time::Timeout;

/// Where a new thread's stack comes from.
#[derive(Debug)]
pub(crate) enum StackRequest {
    /// Smallest pool class holding this many bytes
    Size(usize),
    Class(StackSizeClass),
    /// Caller-owned memory
    Provided(Stack),
}

/// Builder for kernel threads.
///
/// ```ignore
/// use priority_threads::arch::host::HostArch;
/// use priority_threads::{Kernel, KernelConfig, StackSizeClass, ThreadBuilder, Timeout};
///
/// let kernel: &'static Kernel<HostArch> =
///     Box::leak(Box::new(Kernel::new(HostArch::new(), KernelConfig::DEFAULT).unwrap()));
/// kernel.start().unwrap();
///
/// let handle = ThreadBuilder::new()
///     .name("worker")
///     .priority(3)
///     .stack_size(StackSizeClass::Small)
///     .spawn(kernel, || {})
///     .unwrap();
/// handle.join(Timeout::Forever).unwrap();
/// ```
#[derive(Debug)]
pub struct ThreadBuilder {
    pub(crate) priority: i32,
    pub(crate) name: Option<String>,
    pub(crate) stack: Option<StackRequest>,
    pub(crate) options: ThreadOptions,
    pub(crate) delay: Timeout,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            priority: 0,
            name: None,
            stack: None,
            options: ThreadOptions::empty(),
            delay: Timeout::NoWait,
        }
    }

    /// Use a pool stack of the given class.
    pub fn stack_size(mut self, size: StackSizeClass) -> Self {
        self.stack = Some(StackRequest::Class(size));
        self
    }

    /// Use the smallest pool stack of at least `bytes` bytes.
    pub fn stack_bytes(mut self, bytes: usize) -> Self {
        self.stack = Some(StackRequest::Size(bytes));
        self
    }

    /// Run on caller-provided memory instead of a pool stack.
    pub fn stack(mut self, stack: Stack) -> Self {
        self.stack = Some(StackRequest::Provided(stack));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn options(mut self, options: ThreadOptions) -> Self {
        self.options = options;
        self
    }

    /// Halt the system if this thread exits or is aborted.
    pub fn essential(mut self) -> Self {
        self.options.insert(ThreadOptions::ESSENTIAL);
        self
    }

    /// Start delay: `NoWait` runs at once, `Forever` waits for
    /// [`Kernel::start_thread`], anything else delays the first run.
    pub fn delay(mut self, delay: Timeout) -> Self {
        self.delay = delay;
        self
    }

    pub fn spawn<A, F>(self, kernel: &'static Kernel<A>, f: F) -> Result<JoinHandle<A>, SpawnError>
    where
        A: Arch,
        F: FnOnce() + Send + 'static,
    {
        kernel.spawn_with(self, Box::new(f))
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::priority;

    #[test]
    fn test_builder_defaults() {
        let b = ThreadBuilder::default();
        assert_eq!(b.priority, 0);
        assert!(b.name.is_none());
        assert!(b.stack.is_none());
        assert_eq!(b.delay, Timeout::NoWait);
    }

    #[test]
    fn test_builder_settings() {
        let b = ThreadBuilder::new()
            .priority(priority::coop(2))
            .name("rx")
            .stack_bytes(5000)
            .essential()
            .delay(Timeout::Forever);
        assert_eq!(b.priority, -14);
        assert_eq!(b.name.as_deref(), Some("rx"));
        assert!(matches!(b.stack, Some(StackRequest::Size(5000))));
        assert!(b.options.contains(ThreadOptions::ESSENTIAL));
        assert_eq!(b.delay, Timeout::Forever);
    }
}
