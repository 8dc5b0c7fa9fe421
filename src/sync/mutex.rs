//! Recursive kernel mutex with optional priority inheritance.
//!
//! Ownership is handed directly to the highest-priority waiter on the final
//! unlock, so a woken waiter never has to race for the lock again. With the
//! `priority-inheritance` feature, a blocked waiter raises the owner to its
//! own priority (never above the configured ceiling) until the owner lets go.

use core::fmt;

use crate::arch::Arch;
use crate::errors::{SyncError, SyncResult};
use crate::kernel::{Kernel, SchedGuard};
use crate::sched::list::Slot;
use crate::sched::priority;
use crate::sched::wait_queue::{WaitOrder, WaitQueueId};
use crate::sync::spinlock::SpinLock;
use crate::thread::ThreadId;
use crate::time::Timeout;

struct Ownership {
    owner: Option<ThreadId>,
    lock_count: u32,
    /// Owner's priority before any inheritance
    owner_orig_prio: i32,
}

/// Recursive, thread-owned kernel mutex. Not usable from interrupt context.
///
/// There is no guard type: every successful [`Mutex::lock`] must be paired
/// with an [`Mutex::unlock`] from the same thread.
pub struct Mutex<A: Arch> {
    kernel: &'static Kernel<A>,
    state: SpinLock<A, Ownership>,
    wait_q: WaitQueueId,
}

/// Priority an owner should run at given a waiter at `waiter` priority,
/// bounded by `ceiling`.
fn inherited(waiter: i32, base: i32, ceiling: i32) -> i32 {
    let wanted = if priority::is_higher(waiter, base) { waiter } else { base };
    if priority::is_higher(wanted, ceiling) {
        ceiling
    } else {
        wanted
    }
}

impl<A: Arch> Mutex<A> {
    pub fn new(kernel: &'static Kernel<A>) -> Self {
        Self {
            kernel,
            state: SpinLock::new(Ownership {
                owner: None,
                lock_count: 0,
                owner_orig_prio: 0,
            }),
            wait_q: kernel.alloc_wait_queue(WaitOrder::Priority),
        }
    }

    /// Lock the mutex, waiting up to `timeout` if another thread owns it.
    ///
    /// Locking a mutex the caller already owns succeeds at once and must be
    /// matched by one more unlock.
    ///
    /// # Errors
    ///
    /// * `InIsr` - called from interrupt context
    /// * `Busy` - `timeout` is `NoWait` and another thread owns the mutex
    /// * `TimedOut` - the owner did not unlock in time
    pub fn lock(&self, timeout: Timeout) -> SyncResult<()> {
        if self.kernel.in_isr() {
            return Err(SyncError::InIsr);
        }
        let mut state = self.state.lock();
        let mut st = self.kernel.lock_sched();
        let me = st.current;
        let (my_id, my_prio) = {
            let tcb = st.tcb(me);
            (tcb.id, tcb.prio)
        };

        let owner = match state.owner {
            None => {
                state.owner = Some(my_id);
                state.lock_count = 1;
                state.owner_orig_prio = my_prio;
                return Ok(());
            }
            Some(owner) if owner == my_id => {
                state.lock_count += 1;
                return Ok(());
            }
            Some(owner) => owner,
        };
        if timeout == Timeout::NoWait {
            return Err(SyncError::Busy);
        }

        #[cfg(feature = "priority-inheritance")]
        {
            if let Some(slot) = st.lookup(owner) {
                let ceiling = self.kernel.config().prio_ceiling;
                let current = st.tcb(slot).prio;
                let boosted = inherited(my_prio, current, ceiling);
                if boosted != current {
                    log::trace!("mutex owner {} inherits priority {}", owner, boosted);
                    st.set_prio(slot, boosted);
                }
            }
        }
        #[cfg(not(feature = "priority-inheritance"))]
        let _ = owner;
        drop(st);

        let result = self.kernel.pend_current(state, self.wait_q, timeout);
        if result.is_err() {
            self.restore_after_timeout();
        }
        result
    }

    /// A waiter gave up; drop the owner back to what the remaining waiters
    /// justify.
    fn restore_after_timeout(&self) {
        #[cfg(feature = "priority-inheritance")]
        {
            let state = self.state.lock();
            let mut st = self.kernel.lock_sched();
            let Some(owner) = state.owner else {
                return;
            };
            let Some(slot) = st.lookup(owner) else {
                return;
            };
            let target = self.priority_for_owner(&st, state.owner_orig_prio);
            if st.tcb(slot).prio != target {
                st.set_prio(slot, target);
            }
            drop(st);
            drop(state);
            self.kernel.reschedule();
        }
    }

    /// Priority the owner runs at: its own, raised to the head waiter's.
    fn priority_for_owner(&self, st: &SchedGuard<'_, A>, base: i32) -> i32 {
        if !cfg!(feature = "priority-inheritance") {
            return base;
        }
        match st.wait_queue_front(self.wait_q) {
            Some(waiter) => inherited(st.tcb(waiter).prio, base, self.kernel.config().prio_ceiling),
            None => base,
        }
    }

    /// Release one level of ownership.
    ///
    /// The final unlock restores the caller's original priority and passes
    /// the mutex to the highest-priority waiter.
    ///
    /// # Errors
    ///
    /// * `InIsr` - called from interrupt context
    /// * `NotLocked` - nobody owns the mutex
    /// * `NotOwner` - another thread owns the mutex
    pub fn unlock(&self) -> SyncResult<()> {
        if self.kernel.in_isr() {
            return Err(SyncError::InIsr);
        }
        let mut state = self.state.lock();
        let mut st = self.kernel.lock_sched();
        let me = st.current;
        match state.owner {
            None => return Err(SyncError::NotLocked),
            Some(owner) if owner != st.tcb(me).id => return Err(SyncError::NotOwner),
            Some(_) => {}
        }
        if state.lock_count > 1 {
            state.lock_count -= 1;
            return Ok(());
        }

        if st.tcb(me).prio != state.owner_orig_prio {
            st.set_prio(me, state.owner_orig_prio);
        }
        let next = st.unpend_first(self.wait_q, Ok(()));
        match next {
            Some(slot) => self.hand_over(&mut state, &mut st, slot),
            None => {
                state.owner = None;
                state.lock_count = 0;
            }
        }
        drop(st);
        drop(state);
        if next.is_some() {
            self.kernel.reschedule();
        }
        Ok(())
    }

    fn hand_over(&self, state: &mut Ownership, st: &mut SchedGuard<'_, A>, slot: Slot) {
        let (id, prio) = {
            let tcb = st.tcb(slot);
            (tcb.id, tcb.prio)
        };
        state.owner = Some(id);
        state.lock_count = 1;
        state.owner_orig_prio = prio;
        let target = self.priority_for_owner(st, prio);
        if target != prio {
            st.set_prio(slot, target);
        }
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Recursion depth of the current owner, zero when unlocked.
    pub fn lock_count(&self) -> u32 {
        self.state.lock().lock_count
    }
}

impl<A: Arch> fmt::Debug for Mutex<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mutex")
            .field("owner", &state.owner)
            .field("lock_count", &state.lock_count)
            .finish()
    }
}

impl<A: Arch> Drop for Mutex<A> {
    fn drop(&mut self) {
        self.kernel.free_wait_queue(self.wait_q);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inherited_priority() {
        // waiter more urgent than owner
        assert_eq!(inherited(2, 8, priority::HIGHEST), 2);
        // waiter less urgent: owner keeps its own
        assert_eq!(inherited(9, 8, priority::HIGHEST), 8);
        // bounded by the ceiling
        assert_eq!(inherited(-10, 8, 0), 0);
    }
}
