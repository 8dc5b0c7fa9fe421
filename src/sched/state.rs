//! Scheduler state and the transitions between thread states.
//!
//! A thread is in at most one queue at a time: the ready queue (flag
//! `QUEUED`) or one wait queue (flag `PENDING`). The running thread and the
//! idle thread are never in the ready queue. Every waker and the timeout path
//! go through [`SchedState::wake`] under the same lock, so a racing signal and
//! timeout resolve to exactly one outcome: whichever unlinks the thread first.

extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;

use super::list::{Link, Slot};
use super::run_queue::RunQueue;
use super::timeout::TimeoutQueue;
use super::wait_queue::{WaitOrder, WaitQueueId, WaitQueues};
use super::DefaultRunQueue;
use crate::errors::SyncError;
use crate::thread::table::ThreadTable;
use crate::thread::{Tcb, ThreadFlags, ThreadId, ThreadOptions, ThreadState};
use crate::time::TimeSlice;

pub(crate) struct SchedState {
    pub(crate) threads: ThreadTable,
    links: Vec<Link>,
    run_q: DefaultRunQueue,
    wait_qs: WaitQueues,
    timeouts: TimeoutQueue,
    /// Slot of the running thread
    pub(crate) current: Slot,
    pub(crate) idle: Option<Slot>,
    /// The running thread asked to give way to equal-priority peers
    pub(crate) swap_ok: bool,
    /// Kernel time in ticks
    now: u64,
    slice: TimeSlice,
}

impl SchedState {
    pub(crate) fn new(capacity: usize, slice: TimeSlice) -> Self {
        Self {
            threads: ThreadTable::with_capacity(capacity),
            links: vec![Link::default(); capacity],
            run_q: DefaultRunQueue::with_capacity(capacity),
            wait_qs: WaitQueues::new(),
            timeouts: TimeoutQueue::with_capacity(capacity),
            current: 0,
            idle: None,
            swap_ok: false,
            now: 0,
            slice,
        }
    }

    pub(crate) fn now(&self) -> u64 {
        self.now
    }

    pub(crate) fn tcb(&self, slot: Slot) -> &Tcb {
        self.threads.get(slot)
    }

    pub(crate) fn tcb_mut(&mut self, slot: Slot) -> &mut Tcb {
        self.threads.get_mut(slot)
    }

    pub(crate) fn current_tcb(&self) -> &Tcb {
        self.threads.get(self.current)
    }

    pub(crate) fn lookup(&self, id: ThreadId) -> Option<Slot> {
        self.threads.lookup(id)
    }

    pub(crate) fn is_idle(&self, slot: Slot) -> bool {
        self.idle == Some(slot)
    }

    /// Allocate a control block in the `PRESTART` state.
    pub(crate) fn create_thread(&mut self, prio: i32, options: ThreadOptions) -> Option<ThreadId> {
        let id = self.threads.reserve()?;
        let join_q = self.wait_qs.alloc(WaitOrder::Fifo);
        let mut tcb = Tcb::new(id, prio, options, join_q);
        tcb.flags = ThreadFlags::PRESTART;
        self.threads.install(tcb);
        Some(id)
    }

    /// Remove a slot from the table; the thread must not be queued anywhere.
    pub(crate) fn release_thread(&mut self, slot: Slot) -> Option<Tcb> {
        let join_q = self.threads.get(slot).join_q;
        self.timeouts.cancel(slot);
        self.wait_qs.free(join_q);
        self.threads.release(slot)
    }

    pub(crate) fn alloc_wait_queue(&mut self, order: WaitOrder) -> WaitQueueId {
        self.wait_qs.alloc(order)
    }

    pub(crate) fn free_wait_queue(&mut self, wq: WaitQueueId) {
        self.wait_qs.free(wq);
    }

    /// Put `slot` in the ready queue if nothing prevents it from running.
    pub(crate) fn ready(&mut self, slot: Slot) {
        let tcb = self.threads.get(slot);
        if !tcb.is_active()
            || tcb.flags.contains(ThreadFlags::QUEUED)
            || slot == self.current
            || self.is_idle(slot)
        {
            return;
        }
        let prio = tcb.prio;
        self.run_q.enqueue(&mut self.links, slot, prio);
        self.threads.get_mut(slot).flags.insert(ThreadFlags::QUEUED);
    }

    pub(crate) fn unready(&mut self, slot: Slot) {
        let tcb = self.threads.get_mut(slot);
        if tcb.flags.contains(ThreadFlags::QUEUED) {
            tcb.flags.remove(ThreadFlags::QUEUED);
            let prio = tcb.prio;
            self.run_q.dequeue(&mut self.links, slot, prio);
        }
    }

    /// Block `slot` on `wq`, optionally until tick `deadline`.
    ///
    /// The wake result defaults to `TimedOut`; wakers overwrite it.
    pub(crate) fn pend(&mut self, slot: Slot, wq: WaitQueueId, deadline: Option<u64>) {
        self.unready(slot);
        let tcb = self.threads.get_mut(slot);
        tcb.flags.insert(ThreadFlags::PENDING);
        tcb.pended_on = Some(wq);
        tcb.wake_result = Err(SyncError::TimedOut);
        let threads = &self.threads;
        self.wait_qs
            .get_mut(wq)
            .insert(&mut self.links, slot, |s| threads.get(s).prio);
        if let Some(deadline) = deadline {
            self.timeouts.arm(slot, deadline);
        }
    }

    /// Take `slot` off its wait queue and disarm its timeout.
    fn unpend(&mut self, slot: Slot) {
        let tcb = self.threads.get_mut(slot);
        if let Some(wq) = tcb.pended_on.take() {
            tcb.flags.remove(ThreadFlags::PENDING);
            self.wait_qs.get_mut(wq).remove(&mut self.links, slot);
        }
        self.timeouts.cancel(slot);
    }

    /// End the wait of a pending thread with `result` and make it ready.
    pub(crate) fn wake(&mut self, slot: Slot, result: Result<(), SyncError>) {
        self.unpend(slot);
        self.threads.get_mut(slot).wake_result = result;
        self.ready(slot);
    }

    pub(crate) fn wait_queue_front(&self, wq: WaitQueueId) -> Option<Slot> {
        self.wait_qs.get(wq).front()
    }

    pub(crate) fn wait_queue_len(&self, wq: WaitQueueId) -> usize {
        self.wait_qs.get(wq).len()
    }

    /// Wake the head waiter of `wq`.
    pub(crate) fn unpend_first(&mut self, wq: WaitQueueId, result: Result<(), SyncError>) -> Option<Slot> {
        let slot = self.wait_queue_front(wq)?;
        self.wake(slot, result);
        Some(slot)
    }

    /// Wake every waiter of `wq`, returning how many there were.
    pub(crate) fn unpend_all(&mut self, wq: WaitQueueId, result: Result<(), SyncError>) -> usize {
        let mut woken = 0;
        while self.unpend_first(wq, result).is_some() {
            woken += 1;
        }
        woken
    }

    /// Put `slot` to sleep until tick `deadline`.
    pub(crate) fn sleep(&mut self, slot: Slot, deadline: u64) {
        self.unready(slot);
        self.threads.get_mut(slot).flags.insert(ThreadFlags::SLEEPING);
        self.timeouts.arm(slot, deadline);
    }

    /// Arm a delayed start.
    pub(crate) fn delay_start(&mut self, slot: Slot, deadline: u64) {
        self.timeouts.arm(slot, deadline);
    }

    /// Cancel a sleep early. Returns `false` if `slot` was not sleeping.
    pub(crate) fn wakeup(&mut self, slot: Slot) -> bool {
        let tcb = self.threads.get_mut(slot);
        if !tcb.flags.contains(ThreadFlags::SLEEPING) {
            return false;
        }
        tcb.flags.remove(ThreadFlags::SLEEPING);
        self.timeouts.cancel(slot);
        self.ready(slot);
        true
    }

    /// Clear `flag` and make the thread ready if nothing else holds it back.
    pub(crate) fn release_flag(&mut self, slot: Slot, flag: ThreadFlags) -> bool {
        let tcb = self.threads.get_mut(slot);
        if !tcb.flags.contains(flag) {
            return false;
        }
        tcb.flags.remove(flag);
        self.ready(slot);
        true
    }

    /// Start a thread created with a delay. Returns `false` if it already started.
    pub(crate) fn start_now(&mut self, slot: Slot) -> bool {
        if !self.threads.get(slot).flags.contains(ThreadFlags::PRESTART) {
            return false;
        }
        self.timeouts.cancel(slot);
        self.release_flag(slot, ThreadFlags::PRESTART)
    }

    /// Suspend `slot`. A pending wait stays pending but loses its timeout.
    pub(crate) fn suspend(&mut self, slot: Slot) {
        self.unready(slot);
        self.timeouts.cancel(slot);
        let tcb = self.threads.get_mut(slot);
        tcb.flags.remove(ThreadFlags::SLEEPING);
        tcb.flags.insert(ThreadFlags::SUSPENDED);
    }

    /// Handle an expired timeout.
    fn expire(&mut self, slot: Slot) {
        let flags = self.threads.get(slot).flags;
        if flags.contains(ThreadFlags::PENDING) {
            self.wake(slot, Err(SyncError::TimedOut));
        } else if flags.contains(ThreadFlags::SLEEPING) {
            self.release_flag(slot, ThreadFlags::SLEEPING);
        } else if flags.contains(ThreadFlags::PRESTART) {
            self.release_flag(slot, ThreadFlags::PRESTART);
        }
    }

    /// Advance time by `ticks`, firing due timeouts in deadline order and
    /// charging the running thread's time slice.
    ///
    /// Returns the number of timeouts that fired.
    pub(crate) fn announce(&mut self, ticks: u64) -> usize {
        self.now = self.now.saturating_add(ticks);
        let mut fired = 0;
        while let Some(slot) = self.timeouts.pop_expired(self.now) {
            self.expire(slot);
            fired += 1;
        }

        let cur = self.current;
        if !self.is_idle(cur) {
            let tcb = self.threads.get(cur);
            if tcb.is_active()
                && tcb.sched_locked == 0
                && self.slice.applies_to(tcb.prio)
                && self.slice.charge(ticks)
            {
                self.swap_ok = true;
            }
        }
        fired
    }

    /// Ticks until the earliest armed timeout.
    pub(crate) fn next_timeout_in(&self) -> Option<u64> {
        self.timeouts
            .next_deadline()
            .map(|deadline| deadline.saturating_sub(self.now))
    }

    pub(crate) fn timeout_remaining(&self, slot: Slot) -> Option<u64> {
        self.timeouts
            .deadline_of(slot)
            .map(|deadline| deadline.saturating_sub(self.now))
    }

    pub(crate) fn set_time_slice(&mut self, ticks: u64, prio_ceiling: i32) {
        self.slice.configure(ticks, prio_ceiling);
    }

    /// Change the priority of `slot`, keeping its queue position consistent.
    pub(crate) fn set_prio(&mut self, slot: Slot, prio: i32) {
        let tcb = self.threads.get(slot);
        if tcb.prio == prio {
            return;
        }
        if tcb.flags.contains(ThreadFlags::QUEUED) {
            self.unready(slot);
            self.threads.get_mut(slot).prio = prio;
            self.ready(slot);
        } else if let Some(wq) = tcb.pended_on {
            self.threads.get_mut(slot).prio = prio;
            let threads = &self.threads;
            self.wait_qs
                .get_mut(wq)
                .reposition(&mut self.links, slot, |s| threads.get(s).prio);
        } else {
            self.threads.get_mut(slot).prio = prio;
        }
    }

    /// Mark `slot` dead and release its joiners.
    ///
    /// Returns `true` if the thread was essential.
    pub(crate) fn mark_dead(&mut self, slot: Slot) -> bool {
        self.unready(slot);
        self.unpend(slot);
        let tcb = self.threads.get_mut(slot);
        let detached = tcb.flags & ThreadFlags::DETACHED;
        tcb.flags = ThreadFlags::DEAD | detached;
        let join_q = tcb.join_q;
        let essential = tcb.options.contains(ThreadOptions::ESSENTIAL);
        self.unpend_all(join_q, Ok(()));
        essential
    }

    /// Dead, detached threads other than the running one.
    pub(crate) fn zombies(&self) -> Vec<Slot> {
        self.threads
            .iter()
            .filter(|(slot, tcb)| {
                *slot != self.current
                    && tcb.flags.contains(ThreadFlags::DEAD | ThreadFlags::DETACHED)
            })
            .map(|(slot, _)| slot)
            .collect()
    }

    pub(crate) fn state_of(&self, slot: Slot) -> ThreadState {
        self.threads
            .get(slot)
            .state(slot == self.current, self.timeouts.is_armed(slot))
    }

    /// Pick the thread that should run now.
    ///
    /// The running thread keeps the CPU against lower-priority threads, and
    /// against equal-priority ones unless it yielded or its slice expired.
    /// Cooperative or scheduler-locked threads keep it against everyone
    /// until they block or yield.
    pub(crate) fn next_up(&self) -> Slot {
        let cur = self.current;
        let cur_runnable = !self.is_idle(cur) && self.threads.get(cur).is_active();
        match (self.run_q.best(), cur_runnable) {
            (None, true) => cur,
            (None, false) => self.idle.unwrap_or(cur),
            (Some(best), false) => best,
            (Some(best), true) => {
                let running = self.threads.get(cur);
                let candidate = self.threads.get(best);
                if running.prio < candidate.prio
                    || (running.prio == candidate.prio && !self.swap_ok)
                    || (!self.swap_ok && !running.is_preemptible())
                {
                    cur
                } else {
                    best
                }
            }
        }
    }

    /// Make `next` the running thread.
    ///
    /// A still-runnable previous thread goes to the back of its priority
    /// level. Returns the previous slot, or `None` if `next` already runs.
    pub(crate) fn switch_to(&mut self, next: Slot) -> Option<Slot> {
        self.swap_ok = false;
        let prev = self.current;
        if next == prev {
            return None;
        }
        self.unready(next);
        self.current = next;
        self.ready(prev);
        self.slice.reset();
        Some(prev)
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.threads.len()
    }
}
