//! Fixed-capacity message queue with blocking put and get.

use alloc::collections::VecDeque;
use core::fmt;

use crate::arch::Arch;
use crate::errors::{SyncError, SyncResult};
use crate::kernel::Kernel;
use crate::sched::wait_queue::{WaitOrder, WaitQueueId};
use crate::sync::spinlock::{SpinLock, SpinLockGuard};
use crate::time::{Instant, Timeout};

/// Bounded FIFO of `Copy` messages.
///
/// Senders block while the queue is full and receivers while it is empty.
/// Each put wakes the highest-priority receiver and each get the
/// highest-priority sender. A woken thread retries, so a thread that did not
/// wait can still take the slot first; the retry keeps the original deadline.
pub struct MsgQueue<A: Arch, T> {
    kernel: &'static Kernel<A>,
    slots: SpinLock<A, VecDeque<T>>,
    capacity: usize,
    readers: WaitQueueId,
    writers: WaitQueueId,
}

/// Deadline of a wait that may go round several times.
struct Deadline {
    timeout: Timeout,
    at: Option<u64>,
}

impl Deadline {
    fn new<A: Arch>(kernel: &Kernel<A>, timeout: Timeout) -> Self {
        Self {
            timeout,
            at: timeout.deadline(kernel.uptime_ticks()),
        }
    }

    /// Timeout for the next wait, or why there is none.
    fn next<A: Arch>(&self, kernel: &Kernel<A>) -> SyncResult<Timeout> {
        match (self.timeout, self.at) {
            (Timeout::NoWait, _) => Err(SyncError::WouldBlock),
            (_, None) => Ok(Timeout::Forever),
            (_, Some(at)) if kernel.uptime_ticks() >= at => Err(SyncError::TimedOut),
            (_, Some(at)) => Ok(Timeout::At(Instant::from_ticks(at))),
        }
    }
}

impl<A: Arch, T: Copy + Send> MsgQueue<A, T> {
    /// Create an empty queue holding at most `capacity` messages.
    pub fn new(kernel: &'static Kernel<A>, capacity: usize) -> SyncResult<Self> {
        if capacity == 0 {
            return Err(SyncError::InvalidArgument);
        }
        Ok(Self {
            kernel,
            slots: SpinLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            readers: kernel.alloc_wait_queue(WaitOrder::Priority),
            writers: kernel.alloc_wait_queue(WaitOrder::Priority),
        })
    }

    /// Append `msg`, waiting up to `timeout` for a free slot.
    ///
    /// Callable from interrupt context with [`Timeout::NoWait`].
    ///
    /// # Errors
    ///
    /// * `WouldBlock` - `timeout` is `NoWait` and the queue is full
    /// * `TimedOut` - no slot freed up in time
    /// * `Aborted` - the queue was [purged](MsgQueue::purge) while waiting
    pub fn put(&self, msg: T, timeout: Timeout) -> SyncResult<()> {
        let deadline = Deadline::new(self.kernel, timeout);
        loop {
            let mut slots = self.slots.lock();
            if slots.len() < self.capacity {
                slots.push_back(msg);
                self.wake_one(slots, self.readers);
                return Ok(());
            }
            let wait = deadline.next(self.kernel)?;
            self.kernel.pend_current(slots, self.writers, wait)?;
        }
    }

    /// Remove the oldest message, waiting up to `timeout` for one.
    ///
    /// # Errors
    ///
    /// * `WouldBlock` - `timeout` is `NoWait` and the queue is empty
    /// * `TimedOut` - nothing arrived in time
    pub fn get(&self, timeout: Timeout) -> SyncResult<T> {
        let deadline = Deadline::new(self.kernel, timeout);
        loop {
            let mut slots = self.slots.lock();
            if let Some(msg) = slots.pop_front() {
                self.wake_one(slots, self.writers);
                return Ok(msg);
            }
            let wait = deadline.next(self.kernel)?;
            self.kernel.pend_current(slots, self.readers, wait)?;
        }
    }

    /// Copy of the oldest message, left in place.
    pub fn peek(&self) -> Option<T> {
        self.slots.lock().front().copied()
    }

    /// Discard every message and fail blocked senders with `Aborted`.
    ///
    /// Returns the number of messages discarded.
    pub fn purge(&self) -> usize {
        let mut slots = self.slots.lock();
        let discarded = slots.len();
        slots.clear();
        let woken = self.kernel.lock_sched().unpend_all(self.writers, Err(SyncError::Aborted));
        drop(slots);
        if woken > 0 {
            log::debug!("message queue purge aborted {} senders", woken);
            self.kernel.reschedule();
        }
        discarded
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots.
    pub fn space(&self) -> usize {
        self.capacity - self.len()
    }

    fn wake_one(&self, slots: SpinLockGuard<'_, A, VecDeque<T>>, wq: WaitQueueId) {
        let woke = self.kernel.lock_sched().unpend_first(wq, Ok(())).is_some();
        drop(slots);
        if woke {
            self.kernel.reschedule();
        }
    }
}

impl<A: Arch, T> fmt::Debug for MsgQueue<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgQueue")
            .field("len", &self.slots.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<A: Arch, T> Drop for MsgQueue<A, T> {
    fn drop(&mut self) {
        self.kernel.free_wait_queue(self.readers);
        self.kernel.free_wait_queue(self.writers);
    }
}
