//! The kernel: thread lifecycle, blocking, interrupt bookkeeping and the tick.
//!
//! A [`Kernel`] is created once, leaked or placed in a `static`, and started
//! from the boot flow, which becomes the main thread. All scheduler state sits
//! behind one interrupt-masking spinlock. Object locks (semaphores, mutexes)
//! are always taken before it, never after.

use core::cell::UnsafeCell;

extern crate alloc;
use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::Once;

use crate::arch::{Arch, IrqKey};
use crate::config::{KernelConfig, TICK_RATE_HZ};
use crate::errors::{
    ConfigError, FatalError, InvalidOperationError, JoinError, SpawnError, SyncResult, ThreadResult,
};
use crate::mem::{Stack, StackPool, StackPoolStats, STACK_CANARY};
use crate::sched::list::Slot;
use crate::sched::priority;
use crate::sched::state::SchedState;
use crate::sched::wait_queue::{WaitOrder, WaitQueueId};
use crate::sync::atomic::{AtomicVal, MemoryBarriers};
use crate::sync::spinlock::{SpinLock, SpinLockGuard};
use crate::thread::builder::StackRequest;
use crate::thread::{Entry, JoinHandle, Tcb, ThreadBuilder, ThreadFlags, ThreadId, ThreadOptions, ThreadState};
use crate::time::{Instant, TickCounter, TimeSlice, Timeout};

pub(crate) type SchedGuard<'a, A> = SpinLockGuard<'a, A, SchedState>;

/// Saved context of one thread slot.
///
/// Written when a thread is created or reclaimed, read by the thread that
/// switches away from or to it. Never touched by two contexts at once.
struct ContextCell<C>(UnsafeCell<Option<C>>);

/// Priority-based preemptive kernel for one logical CPU.
///
/// # Example
///
/// ```ignore
/// use priority_threads::arch::host::HostArch;
/// use priority_threads::{Kernel, KernelConfig, Timeout};
///
/// let kernel: &'static Kernel<HostArch> =
///     Box::leak(Box::new(Kernel::new(HostArch::new(), KernelConfig::DEFAULT).unwrap()));
/// kernel.start().unwrap();
///
/// let worker = kernel.spawn(|| {}).unwrap();
/// worker.join(Timeout::Forever).unwrap();
/// ```
pub struct Kernel<A: Arch> {
    arch: A,
    config: KernelConfig,
    sched: SpinLock<A, SchedState>,
    contexts: Box<[ContextCell<A::Context>]>,
    stacks: StackPool,
    clock: TickCounter,
    isr_nesting: AtomicVal,
    /// Set by `start`, holding the main thread id
    started: Once<ThreadId>,
}

// SAFETY: context cells are only accessed by the thread switching to or from
// them, or under the scheduler lock while their slot is not runnable.
unsafe impl<A: Arch> Sync for Kernel<A> {}

impl<A: Arch> Kernel<A> {
    /// Create a kernel. No thread exists until [`Kernel::start`].
    pub fn new(arch: A, config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let contexts = (0..config.max_threads)
            .map(|_| ContextCell(UnsafeCell::new(None)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let slice = TimeSlice::new(config.time_slice_ticks, config.time_slice_prio_ceiling);
        Ok(Self {
            arch,
            config,
            sched: SpinLock::new(SchedState::new(config.max_threads, slice)),
            contexts,
            stacks: StackPool::new(),
            clock: TickCounter::new(TICK_RATE_HZ),
            isr_nesting: AtomicVal::new(0),
            started: Once::new(),
        })
    }

    /// Turn the calling context into the main thread and create the idle
    /// thread. Returns the main thread's id.
    pub fn start(&'static self) -> ThreadResult<ThreadId> {
        if self.started.is_completed() {
            return Err(InvalidOperationError::AlreadyStarted.into());
        }
        let idle_stack = self
            .stacks
            .allocate(self.config.idle_stack)
            .ok_or(SpawnError::OutOfMemory)?;

        let (main, idle) = {
            let mut st = self.sched.lock();
            let main = st
                .create_thread(self.config.main_priority, ThreadOptions::empty())
                .ok_or(SpawnError::TooManyThreads)?;
            let idle = st
                .create_thread(priority::IDLE, ThreadOptions::empty())
                .ok_or(SpawnError::TooManyThreads)?;
            let tcb = st.tcb_mut(main.slot());
            tcb.flags = ThreadFlags::empty();
            tcb.name = Some("main".to_string());
            st.tcb_mut(idle.slot()).name = Some("idle".to_string());
            st.current = main.slot();
            (main, idle)
        };

        // SAFETY: neither slot is runnable yet.
        unsafe { self.set_context(main.slot(), self.arch.adopt_current()) };
        idle_stack.install_canary(STACK_CANARY);
        let ctx = self
            .arch
            .init_context(
                &idle_stack,
                idle_main::<A>,
                self as *const Self as usize,
                idle.slot(),
                ThreadOptions::empty(),
            )
            .map_err(SpawnError::from)?;
        unsafe { self.set_context(idle.slot(), ctx) };

        {
            let mut st = self.sched.lock();
            let tcb = st.tcb_mut(idle.slot());
            tcb.flags = ThreadFlags::empty();
            tcb.stack = Some(idle_stack);
            st.idle = Some(idle.slot());
        }
        self.started.call_once(|| main);
        log::debug!("kernel started: main {} idle {}", main, idle);
        Ok(main)
    }

    pub fn is_started(&self) -> bool {
        self.started.is_completed()
    }

    /// Id of the thread adopted by [`Kernel::start`].
    pub fn main_thread(&self) -> Option<ThreadId> {
        self.started.get().copied()
    }

    pub fn idle_thread(&self) -> Option<ThreadId> {
        let st = self.sched.lock();
        st.idle.map(|slot| st.tcb(slot).id)
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Thread creation and teardown
    // ---------------------------------------------------------------------

    /// Spawn a thread running `f` with the builder defaults.
    pub fn spawn<F>(&'static self, f: F) -> Result<JoinHandle<A>, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        ThreadBuilder::new().spawn(self, f)
    }

    /// Create a thread running `entry(p1, p2, p3)`.
    ///
    /// # Arguments
    ///
    /// * `entry` - Thread body
    /// * `args` - The three arguments passed to `entry`
    /// * `prio` - Thread priority
    /// * `stack_size` - Minimum stack size in bytes
    /// * `options` - Thread options
    /// * `delay` - `NoWait` starts now, `Forever` waits for
    ///   [`Kernel::start_thread`], anything else delays the start
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &'static self,
        entry: fn(usize, usize, usize),
        args: [usize; 3],
        prio: i32,
        stack_size: usize,
        options: ThreadOptions,
        delay: Timeout,
    ) -> Result<JoinHandle<A>, SpawnError> {
        let [p1, p2, p3] = args;
        ThreadBuilder::new()
            .priority(prio)
            .stack_bytes(stack_size)
            .options(options)
            .delay(delay)
            .spawn(self, move || entry(p1, p2, p3))
    }

    pub(crate) fn spawn_with(
        &'static self,
        builder: ThreadBuilder,
        entry: Entry,
    ) -> Result<JoinHandle<A>, SpawnError> {
        let ThreadBuilder {
            priority: prio,
            name,
            stack,
            options,
            delay,
        } = builder;
        if !priority::is_application(prio) {
            return Err(SpawnError::InvalidPriority(prio));
        }
        if !self.is_started() {
            return Err(SpawnError::NotInitialized);
        }
        let stack = self.obtain_stack(stack)?;
        self.reap_zombies();

        let reserved = self.sched.lock().create_thread(prio, options);
        let Some(id) = reserved else {
            self.stacks.deallocate(stack);
            return Err(SpawnError::TooManyThreads);
        };
        let slot = id.slot();

        stack.install_canary(STACK_CANARY);
        let ctx = match self.arch.init_context(
            &stack,
            thread_start::<A>,
            self as *const Self as usize,
            slot,
            options,
        ) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.sched.lock().release_thread(slot);
                self.stacks.deallocate(stack);
                return Err(e.into());
            }
        };
        // SAFETY: the slot is PRESTART and cannot be switched to yet.
        unsafe { self.set_context(slot, ctx) };

        {
            let mut st = self.sched.lock();
            let now = st.now();
            let tcb = st.tcb_mut(slot);
            tcb.stack = Some(stack);
            tcb.entry = Some(entry);
            tcb.name = name;
            match delay {
                Timeout::NoWait => {
                    st.release_flag(slot, ThreadFlags::PRESTART);
                }
                Timeout::Forever => {}
                later => {
                    if let Some(deadline) = later.deadline(now) {
                        st.delay_start(slot, deadline);
                    }
                }
            }
        }
        log::debug!("spawned thread {} at priority {}", id, prio);
        self.reschedule();
        Ok(JoinHandle::new(self, id))
    }

    fn obtain_stack(&self, request: Option<StackRequest>) -> Result<Stack, SpawnError> {
        let class = match request {
            None => self.config.default_stack,
            Some(StackRequest::Class(class)) => class,
            Some(StackRequest::Size(size)) => {
                crate::mem::StackSizeClass::for_size(size).ok_or(SpawnError::InvalidStackSize(size))?
            }
            Some(StackRequest::Provided(stack)) => return Ok(stack),
        };
        self.stacks.allocate(class).ok_or(SpawnError::OutOfMemory)
    }

    /// First code of every spawned thread.
    fn run_thread(&self, slot: Slot) -> ! {
        let entry = self.sched.lock().tcb_mut(slot).entry.take();
        if let Some(entry) = entry {
            entry();
        }
        self.exit_current()
    }

    /// Terminate the running thread.
    pub(crate) fn exit_current(&self) -> ! {
        let mut st = self.sched.lock();
        let me = st.current;
        let id = st.tcb(me).id;
        if st.mark_dead(me) {
            drop(st);
            self.halt(FatalError::EssentialThreadExited(id));
        }
        let next = st.next_up();
        st.switch_to(next);
        let _masked = st.release_keep_irq();
        log::debug!("thread {} exited", id);
        MemoryBarriers::full();
        // SAFETY: `next` holds a valid context and is now the current thread.
        unsafe { self.arch.exit_to(self.context_ptr(next)) }
    }

    /// Wait for thread `id` to exit.
    ///
    /// Joining a thread that already exited succeeds immediately. The slot
    /// stays allocated until it is reclaimed.
    pub fn join(&self, id: ThreadId, timeout: Timeout) -> Result<(), JoinError> {
        if self.in_isr() {
            return Err(JoinError::InIsr);
        }
        let st = self.sched.lock();
        let slot = st.lookup(id).ok_or(JoinError::InvalidHandle)?;
        let target = st.tcb(slot);
        if target.is_dead() {
            return Ok(());
        }
        if slot == st.current {
            return Err(JoinError::Deadlock);
        }
        if target.pended_on == Some(st.current_tcb().join_q) {
            return Err(JoinError::Deadlock);
        }
        if timeout == Timeout::NoWait {
            return Err(JoinError::Busy);
        }
        let join_q = target.join_q;
        self.pend_locked(st, join_q, timeout, None).map_err(JoinError::from)
    }

    /// Kill thread `id`. Aborting the running thread does not return.
    pub fn abort(&self, id: ThreadId) -> ThreadResult<()> {
        let mut st = self.sched.lock();
        let slot = st.lookup(id).ok_or(InvalidOperationError::InvalidHandle)?;
        if st.is_idle(slot) {
            return Err(InvalidOperationError::IdleThread.into());
        }
        if st.tcb(slot).is_dead() {
            return Ok(());
        }
        if slot == st.current && !self.in_isr() {
            drop(st);
            self.exit_current();
        }
        if st.mark_dead(slot) {
            drop(st);
            self.halt(FatalError::EssentialThreadExited(id));
        }
        drop(st);
        log::debug!("aborted thread {}", id);
        self.reschedule();
        Ok(())
    }

    /// Free the slot and stack of a dead thread.
    pub fn reclaim(&self, id: ThreadId) -> ThreadResult<()> {
        let (ctx, tcb) = {
            let mut st = self.sched.lock();
            let slot = st.lookup(id).ok_or(InvalidOperationError::InvalidHandle)?;
            if !st.tcb(slot).is_dead() || slot == st.current {
                return Err(InvalidOperationError::StillRunning.into());
            }
            // SAFETY: the thread is dead and switched out.
            let ctx = unsafe { self.take_context(slot) };
            (ctx, st.release_thread(slot))
        };
        drop(ctx);
        self.dispose(id, tcb);
        Ok(())
    }

    /// Mark `id` detached; reclaim it now if it already died.
    pub(crate) fn detach(&self, id: ThreadId) {
        let dead = {
            let mut st = self.sched.lock();
            let current = st.current;
            match st.lookup(id) {
                Some(slot) => {
                    let tcb = st.tcb_mut(slot);
                    tcb.flags.insert(ThreadFlags::DETACHED);
                    tcb.is_dead() && slot != current
                }
                None => false,
            }
        };
        if dead {
            let _ = self.reclaim(id);
        }
    }

    fn reap_zombies(&self) {
        let reaped: Vec<_> = {
            let mut st = self.sched.lock();
            st.zombies()
                .into_iter()
                .map(|slot| {
                    let id = st.tcb(slot).id;
                    // SAFETY: zombies are dead and switched out.
                    let ctx = unsafe { self.take_context(slot) };
                    (id, ctx, st.release_thread(slot))
                })
                .collect()
        };
        for (id, ctx, tcb) in reaped {
            drop(ctx);
            self.dispose(id, tcb);
        }
    }

    fn dispose(&self, id: ThreadId, tcb: Option<Tcb>) {
        if let Some(stack) = tcb.and_then(|tcb| tcb.stack) {
            if !stack.check_canary(STACK_CANARY) {
                log::warn!("stack canary of thread {} damaged", id);
                self.halt(FatalError::StackOverflow(id));
            }
            self.stacks.deallocate(stack);
        }
        log::debug!("reclaimed thread {}", id);
    }

    // ---------------------------------------------------------------------
    // Running-thread operations
    // ---------------------------------------------------------------------

    /// Id of the running thread.
    ///
    /// # Panics
    ///
    /// Panics if the kernel has not been started.
    pub fn current(&self) -> ThreadId {
        self.sched.lock().current_tcb().id
    }

    /// Sleep for `timeout`; returns the ticks left if woken early.
    ///
    /// `NoWait` yields and returns 0; `Forever` suspends the caller until
    /// [`Kernel::resume`] and returns `u64::MAX`.
    pub fn sleep(&self, timeout: Timeout) -> u64 {
        self.check_can_block();
        match timeout {
            Timeout::NoWait => {
                self.yield_now();
                return 0;
            }
            Timeout::Forever => {
                let _ = self.suspend(self.current());
                return u64::MAX;
            }
            _ => {}
        }
        let mut st = self.sched.lock();
        let me = st.current;
        if !st.irq_was_enabled() {
            let id = st.tcb(me).id;
            drop(st);
            self.halt(FatalError::BlockInCriticalSection(id));
        }
        let Some(deadline) = timeout.deadline(st.now()) else {
            return 0;
        };
        st.sleep(me, deadline);
        let _ = self.swap(st, None);
        deadline.saturating_sub(self.sched.lock().now())
    }

    /// Let equal-priority threads run. A no-op in interrupt context.
    pub fn yield_now(&self) {
        if self.in_isr() || !self.is_started() {
            return;
        }
        let mut st = self.sched.lock();
        st.swap_ok = true;
        let _ = self.swap(st, None);
    }

    /// Make the running thread non-preemptible until the matching
    /// [`Kernel::sched_unlock`]. Calls nest.
    pub fn sched_lock(&self) {
        debug_assert!(!self.in_isr(), "sched_lock from interrupt context");
        let mut st = self.sched.lock();
        let cur = st.current;
        st.tcb_mut(cur).sched_locked += 1;
    }

    pub fn sched_unlock(&self) {
        let mut st = self.sched.lock();
        let cur = st.current;
        let tcb = st.tcb_mut(cur);
        if tcb.sched_locked == 0 {
            let id = tcb.id;
            drop(st);
            self.halt(FatalError::SchedUnlockUnbalanced(id));
        }
        tcb.sched_locked -= 1;
        let unlocked = tcb.sched_locked == 0;
        drop(st);
        if unlocked {
            self.reschedule();
        }
    }

    // ---------------------------------------------------------------------
    // Operations on any thread
    // ---------------------------------------------------------------------

    fn with_thread<R>(
        &self,
        id: ThreadId,
        f: impl FnOnce(&mut SchedState, Slot) -> ThreadResult<R>,
    ) -> ThreadResult<R> {
        let mut st = self.sched.lock();
        let slot = st.lookup(id).ok_or(InvalidOperationError::InvalidHandle)?;
        f(&mut *st, slot)
    }

    /// End the sleep of thread `id` early. Threads that are not sleeping are
    /// left alone.
    pub fn wakeup(&self, id: ThreadId) -> ThreadResult<()> {
        self.with_thread(id, |st, slot| {
            st.wakeup(slot);
            Ok(())
        })?;
        self.reschedule();
        Ok(())
    }

    /// Suspend thread `id` until [`Kernel::resume`]. Suspending the running
    /// thread switches away immediately.
    pub fn suspend(&self, id: ThreadId) -> ThreadResult<()> {
        let mut st = self.sched.lock();
        let slot = st.lookup(id).ok_or(InvalidOperationError::InvalidHandle)?;
        if st.is_idle(slot) {
            return Err(InvalidOperationError::IdleThread.into());
        }
        if st.tcb(slot).is_dead() {
            return Ok(());
        }
        st.suspend(slot);
        if slot == st.current && !self.in_isr() {
            let _ = self.swap(st, None);
        }
        Ok(())
    }

    pub fn resume(&self, id: ThreadId) -> ThreadResult<()> {
        self.with_thread(id, |st, slot| {
            st.release_flag(slot, ThreadFlags::SUSPENDED);
            Ok(())
        })?;
        self.reschedule();
        Ok(())
    }

    /// Start a thread created with a delay before its delay expires.
    pub fn start_thread(&self, id: ThreadId) -> ThreadResult<()> {
        self.with_thread(id, |st, slot| {
            if st.start_now(slot) {
                Ok(())
            } else {
                Err(InvalidOperationError::AlreadyStarted.into())
            }
        })?;
        self.reschedule();
        Ok(())
    }

    pub fn priority(&self, id: ThreadId) -> ThreadResult<i32> {
        self.with_thread(id, |st, slot| Ok(st.tcb(slot).prio))
    }

    /// Change the priority of thread `id`, rescheduling if needed.
    pub fn set_priority(&self, id: ThreadId, prio: i32) -> ThreadResult<()> {
        if !priority::is_application(prio) {
            return Err(InvalidOperationError::InvalidPriority(prio).into());
        }
        self.with_thread(id, |st, slot| {
            if st.is_idle(slot) {
                return Err(InvalidOperationError::IdleThread.into());
            }
            if !st.tcb(slot).is_dead() {
                st.set_prio(slot, prio);
            }
            Ok(())
        })?;
        self.reschedule();
        Ok(())
    }

    pub fn state(&self, id: ThreadId) -> ThreadResult<ThreadState> {
        self.with_thread(id, |st, slot| Ok(st.state_of(slot)))
    }

    pub fn name(&self, id: ThreadId) -> ThreadResult<Option<String>> {
        self.with_thread(id, |st, slot| Ok(st.tcb(slot).name.clone()))
    }

    pub fn set_name(&self, id: ThreadId, name: &str) -> ThreadResult<()> {
        self.with_thread(id, |st, slot| {
            st.tcb_mut(slot).name = Some(name.to_string());
            Ok(())
        })
    }

    /// Ticks until the timeout of thread `id` fires, if one is armed.
    pub fn thread_timeout_remaining(&self, id: ThreadId) -> ThreadResult<Option<u64>> {
        self.with_thread(id, |st, slot| Ok(st.timeout_remaining(slot)))
    }

    /// Number of allocated thread slots, dead but unreclaimed ones included.
    pub fn thread_count(&self) -> usize {
        self.sched.lock().thread_count()
    }

    pub fn stack_stats(&self) -> StackPoolStats {
        self.stacks.stats()
    }

    // ---------------------------------------------------------------------
    // Time
    // ---------------------------------------------------------------------

    /// Reconfigure round-robin slicing.
    ///
    /// # Arguments
    ///
    /// * `ticks` - Slice length, `0` disables slicing
    /// * `prio_ceiling` - Threads with a higher priority than this are not sliced
    pub fn set_time_slice(&self, ticks: u64, prio_ceiling: i32) {
        self.sched.lock().set_time_slice(ticks, prio_ceiling);
    }

    pub fn uptime_ticks(&self) -> u64 {
        self.clock.ticks()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Clock driver entry: `ticks` ticks have elapsed.
    ///
    /// Fires due timeouts in deadline order and charges the running thread's
    /// time slice. Outside interrupt context this reschedules right away;
    /// inside, the outermost [`Kernel::isr_exit`] does.
    pub fn announce_ticks(&self, ticks: u64) {
        let fired = {
            let mut st = self.sched.lock();
            let fired = st.announce(ticks);
            self.clock.advance(ticks);
            fired
        };
        if fired > 0 {
            log::trace!("{} timeouts fired at tick {}", fired, self.clock.ticks());
        }
        if !self.in_isr() {
            self.reschedule();
        }
    }

    /// One system clock interrupt.
    pub fn tick(&self) {
        self.isr_enter();
        self.announce_ticks(1);
        self.isr_exit();
    }

    // ---------------------------------------------------------------------
    // Interrupt bookkeeping
    // ---------------------------------------------------------------------

    /// Mark entry into an interrupt handler.
    pub fn isr_enter(&self) {
        self.isr_nesting.inc();
    }

    /// Mark exit from an interrupt handler. Leaving the outermost handler
    /// switches to a higher-priority thread the handler made ready.
    pub fn isr_exit(&self) {
        let depth = self.isr_nesting.get();
        if depth == 0 {
            self.halt(FatalError::IsrExitUnbalanced);
        }
        self.isr_nesting.dec();
        if depth == 1 && self.is_started() {
            let st = self.sched.lock();
            let _ = self.swap(st, None);
        }
    }

    pub fn in_isr(&self) -> bool {
        self.isr_nesting.get() > 0
    }

    /// Report a fatal error and stop the system.
    pub fn halt(&self, reason: FatalError) -> ! {
        match self.sched.try_lock() {
            Some(st) if self.is_started() => {
                let tcb = st.current_tcb();
                log::error!(
                    "kernel halted: {} (current thread {}, priority {})",
                    reason,
                    tcb.id,
                    tcb.prio
                );
            }
            _ => log::error!("kernel halted: {}", reason),
        }
        self.arch.halt(&reason);
        panic!("kernel halted: {}", reason);
    }

    // ---------------------------------------------------------------------
    // Blocking core used by the synchronization primitives
    // ---------------------------------------------------------------------

    pub(crate) fn lock_sched(&self) -> SchedGuard<'_, A> {
        self.sched.lock()
    }

    pub(crate) fn alloc_wait_queue(&self, order: WaitOrder) -> WaitQueueId {
        self.sched.lock().alloc_wait_queue(order)
    }

    pub(crate) fn free_wait_queue(&self, wq: WaitQueueId) {
        self.sched.lock().free_wait_queue(wq);
    }

    fn check_can_block(&self) {
        if self.in_isr() {
            self.halt(FatalError::BlockInIsr);
        }
        if !self.is_started() {
            self.halt(FatalError::BlockBeforeStart);
        }
    }

    /// Block the running thread on `wq`, releasing the object lock `obj`.
    ///
    /// Returns the result handed over by the waker, or `TimedOut`.
    pub(crate) fn pend_current<T: ?Sized>(
        &self,
        obj: SpinLockGuard<'_, A, T>,
        wq: WaitQueueId,
        timeout: Timeout,
    ) -> SyncResult<()> {
        if self.in_isr() {
            drop(obj);
            self.halt(FatalError::BlockInIsr);
        }
        if !self.is_started() {
            drop(obj);
            self.halt(FatalError::BlockBeforeStart);
        }
        let st = self.sched.lock();
        let outer = obj.release_keep_irq();
        self.pend_locked(st, wq, timeout, Some(outer))
    }

    fn pend_locked(
        &self,
        mut st: SchedGuard<'_, A>,
        wq: WaitQueueId,
        timeout: Timeout,
        outer: Option<IrqKey>,
    ) -> SyncResult<()> {
        debug_assert!(timeout != Timeout::NoWait, "pend with NoWait");
        let irq_enabled = match outer {
            Some(key) => key.was_enabled(),
            None => st.irq_was_enabled(),
        };
        let me = st.current;
        if !irq_enabled || self.in_isr() {
            let id = st.tcb(me).id;
            drop(st);
            if let Some(key) = outer {
                A::irq_unlock(key);
            }
            if self.in_isr() {
                self.halt(FatalError::BlockInIsr);
            }
            self.halt(FatalError::BlockInCriticalSection(id));
        }
        let deadline = timeout.deadline(st.now());
        st.pend(me, wq, deadline);
        self.swap(st, outer)
    }

    /// Run the scheduling decision and switch if another thread should run.
    ///
    /// `outer` is the interrupt key of an object lock released on the way
    /// in; it is restored instead of the scheduler lock's own key. Returns
    /// the wake result of the calling thread.
    fn swap(&self, mut st: SchedGuard<'_, A>, outer: Option<IrqKey>) -> SyncResult<()> {
        let me = st.current;
        let next = st.next_up();
        let switched = st.switch_to(next).is_some();
        if switched {
            log::trace!("switch {} -> {}", st.tcb(me).id, st.tcb(next).id);
        }
        let own = st.release_keep_irq();
        let key = outer.unwrap_or(own);
        if switched {
            MemoryBarriers::full();
            // SAFETY: `me` is the running thread, `next` holds a context that
            // is not running, and interrupts are masked.
            unsafe { self.arch.context_switch(self.context_ptr(me), self.context_ptr(next)) };
        }
        A::irq_unlock(key);
        let mut st = self.sched.lock();
        core::mem::replace(&mut st.tcb_mut(me).wake_result, Ok(()))
    }

    /// Reschedule from thread context if interrupts are enabled.
    pub(crate) fn reschedule(&self) {
        if self.in_isr() || !A::interrupts_enabled() || !self.is_started() {
            return;
        }
        let st = self.sched.lock();
        let _ = self.swap(st, None);
    }

    fn idle_loop(&self) -> ! {
        loop {
            self.reschedule();
            let next_timeout = self.sched.lock().next_timeout_in();
            match self.arch.cpu_idle(next_timeout) {
                Some(0) => {}
                Some(elapsed) => {
                    self.isr_enter();
                    self.announce_ticks(elapsed);
                    self.isr_exit();
                }
                None => self.halt(FatalError::Deadlock),
            }
        }
    }

    // ---------------------------------------------------------------------
    // Context storage
    // ---------------------------------------------------------------------

    fn context_ptr(&self, slot: Slot) -> *mut A::Context {
        // SAFETY: see `ContextCell`.
        match unsafe { &mut *self.contexts[slot].0.get() } {
            Some(ctx) => ctx as *mut A::Context,
            None => panic!("thread slot {} has no context", slot),
        }
    }

    /// # Safety
    ///
    /// The slot must not be runnable.
    unsafe fn set_context(&self, slot: Slot, ctx: A::Context) {
        unsafe { *self.contexts[slot].0.get() = Some(ctx) };
    }

    /// # Safety
    ///
    /// The slot's thread must be dead and switched out.
    unsafe fn take_context(&self, slot: Slot) -> Option<A::Context> {
        unsafe { (*self.contexts[slot].0.get()).take() }
    }
}

fn thread_start<A: Arch>(kernel: usize, slot: usize) -> ! {
    // SAFETY: `spawn_with` passes the address of a `&'static Kernel<A>`.
    let kernel = unsafe { &*(kernel as *const Kernel<A>) };
    kernel.run_thread(slot)
}

fn idle_main<A: Arch>(kernel: usize, _slot: usize) -> ! {
    // SAFETY: `start` passes the address of a `&'static Kernel<A>`.
    let kernel = unsafe { &*(kernel as *const Kernel<A>) };
    kernel.idle_loop()
}
