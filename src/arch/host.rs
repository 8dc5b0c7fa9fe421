//! Host port: every kernel thread runs on its own std thread.
//!
//! Exactly one host thread holds the baton at a time. A context switch opens
//! the gate of the next thread and parks the current one on its own gate, so
//! the kernel sees a single CPU even though the host runs many OS threads.
//! Time is simulated: the idle thread jumps the clock straight to the next
//! armed timeout, and if there is none the system is deadlocked and halts.
//!
//! Interrupt masking is a per-host-thread flag. Only kernel threads may call
//! into the kernel; foreign host threads are not serialized with it.
//!
//! A thread that exits unwinds its host thread with a private payload, so the
//! OS thread ends once it hands the CPU on. A thread retired while parked
//! mid-call stays parked: unwinding it would run its destructors alongside
//! the thread that holds the CPU.

use core::any::Any;
use core::cell::Cell;
use core::panic::AssertUnwindSafe;

use portable_atomic::{AtomicUsize, Ordering};
use std::boxed::Box;
use std::format;
use std::string::{String, ToString};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::vec::Vec;

use super::{Arch, ThreadEntry};
use crate::errors::{ArchError, FatalError};
use crate::mem::Stack;
use crate::thread::ThreadOptions;

/// Host stack size for kernel threads; the pool stack is bookkeeping only.
const HOST_STACK_SIZE: usize = 256 * 1024;

static NEXT_OWNER: AtomicUsize = AtomicUsize::new(1);

std::thread_local! {
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
    static OWNER: Cell<usize> = const { Cell::new(0) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Closed,
    Open,
    Halted,
    /// The thread's context was dropped; it will never run again
    Retired,
}

/// Why a parked thread was released without being switched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Released {
    Halted,
    Retired,
}

/// Parking spot of one kernel thread.
struct Gate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Closed),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) {
        let mut state = self.lock();
        if *state == GateState::Closed {
            *state = GateState::Open;
        }
        self.cv.notify_one();
    }

    fn halt(&self) {
        *self.lock() = GateState::Halted;
        self.cv.notify_all();
    }

    fn retire(&self) {
        let mut state = self.lock();
        if *state != GateState::Halted {
            *state = GateState::Retired;
        }
        self.cv.notify_all();
    }

    /// Park until the gate opens.
    fn wait(&self) -> Result<(), Released> {
        let mut state = self.lock();
        loop {
            match *state {
                GateState::Open => {
                    *state = GateState::Closed;
                    return Ok(());
                }
                GateState::Halted => return Err(Released::Halted),
                GateState::Retired => return Err(Released::Retired),
                GateState::Closed => {
                    state = self.cv.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

/// Unwind payload of a kernel thread that exited.
struct ThreadExited;

struct Shared {
    gates: Mutex<Vec<Weak<Gate>>>,
    halted: Mutex<Option<String>>,
    live: AtomicUsize,
}

/// Counts one spawned host thread until it returns.
struct LiveThread(Arc<Shared>);

impl LiveThread {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.live.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(shared))
    }
}

impl Drop for LiveThread {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Shared {
    fn register(&self, gate: &Arc<Gate>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.retain(|g| g.strong_count() > 0);
        gates.push(Arc::downgrade(gate));
    }

    fn halt(&self, reason: String) {
        {
            let mut halted = self.halted.lock().unwrap_or_else(PoisonError::into_inner);
            if halted.is_some() {
                return;
            }
            *halted = Some(reason);
        }
        let gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        for gate in gates.iter().filter_map(Weak::upgrade) {
            gate.halt();
        }
    }

    fn reason(&self) -> String {
        self.halted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Saved context of a kernel thread on the host port.
pub struct HostContext {
    gate: Arc<Gate>,
}

impl Drop for HostContext {
    fn drop(&mut self) {
        // Lets a thread that never ran, or was aborted while parked, stop waiting.
        self.gate.retire();
    }
}

/// Baton-passing host port.
pub struct HostArch {
    shared: Arc<Shared>,
}

impl HostArch {
    /// Create a host port with no threads.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                gates: Mutex::new(Vec::new()),
                halted: Mutex::new(None),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// Whether the kernel using this port has halted.
    pub fn is_halted(&self) -> bool {
        self.shared
            .halted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Host threads spawned for kernel threads that have not returned yet.
    pub fn live_threads(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    fn park(&self, gate: &Gate) {
        match gate.wait() {
            Ok(()) => {}
            Err(Released::Halted) => panic!("kernel halted: {}", self.shared.reason()),
            Err(Released::Retired) => loop {
                std::thread::park();
            },
        }
    }
}

impl Default for HostArch {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Arch for HostArch {
    type Context = HostContext;

    fn init_context(
        &self,
        _stack: &Stack,
        entry: ThreadEntry,
        arg0: usize,
        arg1: usize,
        _options: ThreadOptions,
    ) -> Result<Self::Context, ArchError> {
        let gate = Arc::new(Gate::new());
        self.shared.register(&gate);

        let start_gate = Arc::clone(&gate);
        let live = LiveThread::new(&self.shared);
        std::thread::Builder::new()
            .name(format!("kthread-{}", arg1))
            .stack_size(HOST_STACK_SIZE)
            .spawn(move || {
                let live = live;
                if start_gate.wait().is_err() {
                    return;
                }
                IRQ_ENABLED.with(|f| f.set(true));
                let result = std::panic::catch_unwind(AssertUnwindSafe(move || entry(arg0, arg1)));
                match result {
                    Ok(_) => {}
                    Err(payload) if payload.is::<ThreadExited>() => {}
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        live.0.halt(format!("{}: {}", FatalError::ThreadPanicked, message));
                    }
                }
            })
            .map_err(|_| ArchError::ContextInit)?;

        Ok(HostContext { gate })
    }

    fn adopt_current(&self) -> Self::Context {
        let gate = Arc::new(Gate::new());
        self.shared.register(&gate);
        HostContext { gate }
    }

    unsafe fn context_switch(&self, prev: *mut Self::Context, next: *const Self::Context) {
        // Take our own gate before opening the next one: once `next` runs it
        // may reclaim `prev`.
        let own = Arc::clone(unsafe { &(*prev).gate });
        unsafe { (*next).gate.open() };
        self.park(&own);
    }

    unsafe fn exit_to(&self, next: *const Self::Context) -> ! {
        unsafe { (*next).gate.open() };
        std::panic::resume_unwind(Box::new(ThreadExited))
    }

    fn cpu_idle(&self, next_timeout: Option<u64>) -> Option<u64> {
        next_timeout.map(|ticks| ticks.max(1))
    }

    fn halt(&self, reason: &FatalError) {
        self.shared.halt(reason.to_string());
    }

    fn enable_interrupts() {
        IRQ_ENABLED.with(|f| f.set(true));
    }

    fn disable_interrupts() {
        IRQ_ENABLED.with(|f| f.set(false));
    }

    fn interrupts_enabled() -> bool {
        IRQ_ENABLED.with(Cell::get)
    }

    fn owner_token() -> usize {
        OWNER.with(|owner| {
            if owner.get() == 0 {
                owner.set(NEXT_OWNER.fetch_add(1, Ordering::Relaxed));
            }
            owner.get()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_irq_key_nesting() {
        assert!(HostArch::interrupts_enabled());
        let outer = HostArch::irq_lock();
        let inner = HostArch::irq_lock();
        assert!(outer.was_enabled());
        assert!(!inner.was_enabled());
        HostArch::irq_unlock(inner);
        assert!(!HostArch::interrupts_enabled());
        HostArch::irq_unlock(outer);
        assert!(HostArch::interrupts_enabled());
    }

    #[test]
    fn test_owner_tokens_differ_between_threads() {
        let here = HostArch::owner_token();
        assert_ne!(here, 0);
        assert_eq!(here, HostArch::owner_token());
        let there = std::thread::spawn(HostArch::owner_token).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_gate_handoff() {
        let gate = Arc::new(Gate::new());
        let (tx, rx) = mpsc::channel();
        let waiter = Arc::clone(&gate);
        let handle = std::thread::spawn(move || {
            let result = waiter.wait();
            tx.send(result).unwrap();
        });
        gate.open();
        assert_eq!(rx.recv().unwrap(), Ok(()));
        handle.join().unwrap();
    }

    #[test]
    fn test_halt_releases_gates() {
        let arch = HostArch::new();
        let ctx = arch.adopt_current();
        let gate = Arc::clone(&ctx.gate);
        let handle = std::thread::spawn(move || gate.wait());
        arch.halt(&FatalError::Deadlock);
        assert_eq!(handle.join().unwrap(), Err(Released::Halted));
        assert!(arch.is_halted());
    }

    #[test]
    fn test_dropped_context_retires_unstarted_thread() {
        fn never_runs(_: usize, _: usize) -> ! {
            unreachable!("retired thread was started")
        }
        let arch = HostArch::new();
        let pool = crate::mem::StackPool::new();
        let stack = pool.allocate(crate::mem::StackSizeClass::Small).unwrap();
        let ctx = arch
            .init_context(&stack, never_runs, 0, 0, ThreadOptions::empty())
            .unwrap();
        let gate = Arc::clone(&ctx.gate);
        drop(ctx);
        assert_eq!(gate.wait(), Err(Released::Retired));
        assert!(!arch.is_halted());
    }

    #[test]
    fn test_idle_reports_deadlock() {
        let arch = HostArch::new();
        assert_eq!(arch.cpu_idle(Some(5)), Some(5));
        assert_eq!(arch.cpu_idle(None), None);
    }
}
