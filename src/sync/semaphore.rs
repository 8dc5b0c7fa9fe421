//! Counting semaphore.

use core::fmt;

use crate::arch::Arch;
use crate::errors::{SyncError, SyncResult};
use crate::kernel::Kernel;
use crate::sched::wait_queue::{WaitOrder, WaitQueueId};
use crate::sync::spinlock::SpinLock;
use crate::time::Timeout;

/// What [`Semaphore::give`] does when the count is already at its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GivePolicy {
    /// Leave the count at the limit and report success
    #[default]
    Saturate,
    /// Fail with [`SyncError::LimitReached`]
    Strict,
}

struct Count {
    value: u32,
    limit: u32,
    policy: GivePolicy,
}

/// Counting semaphore with a fixed upper limit.
///
/// A unit given while threads are waiting goes straight to the
/// highest-priority waiter; the count only grows when nobody waits.
pub struct Semaphore<A: Arch> {
    kernel: &'static Kernel<A>,
    count: SpinLock<A, Count>,
    wait_q: WaitQueueId,
}

impl<A: Arch> Semaphore<A> {
    /// Create a semaphore holding `initial` units out of `limit`.
    pub fn new(kernel: &'static Kernel<A>, initial: u32, limit: u32) -> SyncResult<Self> {
        Self::with_policy(kernel, initial, limit, GivePolicy::Saturate)
    }

    pub fn with_policy(
        kernel: &'static Kernel<A>,
        initial: u32,
        limit: u32,
        policy: GivePolicy,
    ) -> SyncResult<Self> {
        if limit == 0 || initial > limit {
            return Err(SyncError::InvalidArgument);
        }
        Ok(Self {
            kernel,
            count: SpinLock::new(Count {
                value: initial,
                limit,
                policy,
            }),
            wait_q: kernel.alloc_wait_queue(WaitOrder::Priority),
        })
    }

    /// Semaphore with no practical limit, counting pending events.
    pub(crate) fn unbounded(kernel: &'static Kernel<A>) -> Self {
        Self {
            kernel,
            count: SpinLock::new(Count {
                value: 0,
                limit: u32::MAX,
                policy: GivePolicy::Saturate,
            }),
            wait_q: kernel.alloc_wait_queue(WaitOrder::Priority),
        }
    }

    /// Take one unit, waiting up to `timeout` for one to be given.
    ///
    /// # Errors
    ///
    /// * `WouldBlock` - `timeout` is `NoWait` and the count is zero
    /// * `TimedOut` - no unit arrived in time
    /// * `Aborted` - the semaphore was [reset](Semaphore::reset) while waiting
    pub fn take(&self, timeout: Timeout) -> SyncResult<()> {
        let mut count = self.count.lock();
        if count.value > 0 {
            count.value -= 1;
            return Ok(());
        }
        if timeout == Timeout::NoWait {
            return Err(SyncError::WouldBlock);
        }
        self.kernel.pend_current(count, self.wait_q, timeout)
    }

    /// Give one unit. Callable from interrupt context.
    pub fn give(&self) -> SyncResult<()> {
        let mut count = self.count.lock();
        let handed_off = self
            .kernel
            .lock_sched()
            .unpend_first(self.wait_q, Ok(()))
            .is_some();
        if !handed_off {
            if count.value < count.limit {
                count.value += 1;
            } else if count.policy == GivePolicy::Strict {
                return Err(SyncError::LimitReached);
            } else {
                log::trace!("semaphore give at limit {}", count.limit);
            }
        }
        drop(count);
        if handed_off {
            self.kernel.reschedule();
        }
        Ok(())
    }

    /// Drop the count to zero and fail every waiter with `Aborted`.
    pub fn reset(&self) {
        let mut count = self.count.lock();
        count.value = 0;
        let woken = self.kernel.lock_sched().unpend_all(self.wait_q, Err(SyncError::Aborted));
        drop(count);
        if woken > 0 {
            log::debug!("semaphore reset aborted {} waiters", woken);
            self.kernel.reschedule();
        }
    }

    pub fn count(&self) -> u32 {
        self.count.lock().value
    }

    pub fn limit(&self) -> u32 {
        self.count.lock().limit
    }

    /// Number of threads waiting to take.
    pub fn waiters(&self) -> usize {
        self.kernel.lock_sched().wait_queue_len(self.wait_q)
    }
}

impl<A: Arch> fmt::Debug for Semaphore<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.count.lock();
        f.debug_struct("Semaphore")
            .field("count", &count.value)
            .field("limit", &count.limit)
            .field("policy", &count.policy)
            .finish()
    }
}

impl<A: Arch> Drop for Semaphore<A> {
    fn drop(&mut self) {
        self.kernel.free_wait_queue(self.wait_q);
    }
}
