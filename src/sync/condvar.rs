//! Condition variable paired with a kernel [`Mutex`].

use core::fmt;

use super::mutex::Mutex;
use crate::arch::Arch;
use crate::errors::{SyncError, SyncResult};
use crate::kernel::Kernel;
use crate::sched::wait_queue::{WaitOrder, WaitQueueId};
use crate::sync::spinlock::SpinLock;
use crate::time::Timeout;

/// Condition variable.
///
/// Waiters are woken in priority order. A signal with nobody waiting is lost.
pub struct Condvar<A: Arch> {
    kernel: &'static Kernel<A>,
    lock: SpinLock<A, ()>,
    wait_q: WaitQueueId,
}

impl<A: Arch> Condvar<A> {
    pub fn new(kernel: &'static Kernel<A>) -> Self {
        Self {
            kernel,
            lock: SpinLock::new(()),
            wait_q: kernel.alloc_wait_queue(WaitOrder::Priority),
        }
    }

    /// Wake the highest-priority waiter, if any.
    pub fn signal(&self) {
        let guard = self.lock.lock();
        let woke = self
            .kernel
            .lock_sched()
            .unpend_first(self.wait_q, Ok(()))
            .is_some();
        drop(guard);
        if woke {
            self.kernel.reschedule();
        }
    }

    /// Wake every waiter; returns how many were woken.
    pub fn broadcast(&self) -> usize {
        let guard = self.lock.lock();
        let woken = self.kernel.lock_sched().unpend_all(self.wait_q, Ok(()));
        drop(guard);
        if woken > 0 {
            self.kernel.reschedule();
        }
        woken
    }

    /// Release `mutex`, wait for a signal, then lock `mutex` again.
    ///
    /// The caller must own `mutex` exactly once. The mutex is re-acquired
    /// without a timeout even when the wait itself timed out.
    ///
    /// # Errors
    ///
    /// * `WouldBlock` - `timeout` is `NoWait`; the mutex is not released
    /// * `TimedOut` - no signal arrived in time
    /// * `NotOwner`, `NotLocked`, `InIsr` - from unlocking `mutex`
    pub fn wait(&self, mutex: &Mutex<A>, timeout: Timeout) -> SyncResult<()> {
        if self.kernel.in_isr() {
            return Err(SyncError::InIsr);
        }
        if timeout == Timeout::NoWait {
            return Err(SyncError::WouldBlock);
        }
        let guard = self.lock.lock();
        // Interrupts stay masked until we are queued, so a signal sent after
        // the unlock cannot slip past us.
        mutex.unlock()?;
        let result = self.kernel.pend_current(guard, self.wait_q, timeout);
        mutex.lock(Timeout::Forever)?;
        result
    }

    /// Number of threads waiting.
    pub fn waiters(&self) -> usize {
        self.kernel.lock_sched().wait_queue_len(self.wait_q)
    }
}

impl<A: Arch> fmt::Debug for Condvar<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar").field("waiters", &self.waiters()).finish()
    }
}

impl<A: Arch> Drop for Condvar<A> {
    fn drop(&mut self) {
        self.kernel.free_wait_queue(self.wait_q);
    }
}
