//! Thread identities, states and control blocks.

use core::fmt;
use core::num::NonZeroU32;

extern crate alloc;
use alloc::boxed::Box;
use alloc::string::String;

use crate::errors::SyncError;
use crate::mem::Stack;
use crate::sched::wait_queue::WaitQueueId;

pub mod builder;
pub mod handle;
pub(crate) mod table;

pub use builder::ThreadBuilder;
pub use handle::JoinHandle;

/// Identifier of a kernel thread.
///
/// Packs the thread table slot (low 16 bits) with the slot's generation
/// (high 16 bits), so a handle to a reclaimed thread never aliases the thread
/// that reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroU32);

impl ThreadId {
    pub(crate) fn new(slot: usize, generation: u16) -> Self {
        debug_assert!(slot <= u16::MAX as usize);
        debug_assert!(generation != 0);
        let raw = ((generation as u32) << 16) | slot as u32;
        match NonZeroU32::new(raw) {
            Some(raw) => Self(raw),
            None => unreachable!("generation is never zero"),
        }
    }

    pub(crate) fn slot(self) -> usize {
        (self.0.get() & 0xFFFF) as usize
    }

    pub(crate) fn generation(self) -> u16 {
        (self.0.get() >> 16) as u16
    }

    /// Raw id value.
    pub fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.slot(), self.generation())
    }
}

/// Externally visible state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Runnable, waiting in the ready queue
    Ready,
    /// Currently executing
    Running,
    /// Waiting on an object, sleeping, or waiting for a delayed start
    Blocked,
    /// Suspended, or created with an infinite start delay
    Suspended,
    /// Exited or aborted, not yet reclaimed
    Dead,
}

bitflags::bitflags! {
    /// Options fixed at thread creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadOptions: u32 {
        /// The system halts if this thread exits or is aborted
        const ESSENTIAL = 1 << 0;
        /// The thread uses floating point registers
        const FP_REGS = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Scheduler bookkeeping bits of a thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ThreadFlags: u8 {
        /// Waiting in a wait queue
        const PENDING = 1 << 0;
        /// Sleeping until its timeout fires
        const SLEEPING = 1 << 1;
        const SUSPENDED = 1 << 2;
        const DEAD = 1 << 3;
        /// Linked into the ready queue
        const QUEUED = 1 << 4;
        /// Created but not started
        const PRESTART = 1 << 5;
        /// No handle left; reclaim as soon as it dies
        const DETACHED = 1 << 6;
    }
}

impl ThreadFlags {
    /// Any bit that keeps a thread off the CPU.
    pub(crate) const BLOCKING: Self = Self::PENDING
        .union(Self::SLEEPING)
        .union(Self::SUSPENDED)
        .union(Self::DEAD)
        .union(Self::PRESTART);
}

/// Thread body as stored until the thread first runs.
pub(crate) type Entry = Box<dyn FnOnce() + Send + 'static>;

/// Thread control block.
pub(crate) struct Tcb {
    pub(crate) id: ThreadId,
    pub(crate) prio: i32,
    pub(crate) flags: ThreadFlags,
    pub(crate) options: ThreadOptions,
    /// Wait queue the thread is pending on
    pub(crate) pended_on: Option<WaitQueueId>,
    /// Joiners wait here
    pub(crate) join_q: WaitQueueId,
    /// Outcome of the last wait, written by whoever wakes the thread
    pub(crate) wake_result: Result<(), SyncError>,
    pub(crate) sched_locked: u32,
    pub(crate) name: Option<String>,
    pub(crate) stack: Option<Stack>,
    pub(crate) entry: Option<Entry>,
}

impl Tcb {
    pub(crate) fn new(id: ThreadId, prio: i32, options: ThreadOptions, join_q: WaitQueueId) -> Self {
        Self {
            id,
            prio,
            flags: ThreadFlags::empty(),
            options,
            pended_on: None,
            join_q,
            wake_result: Ok(()),
            sched_locked: 0,
            name: None,
            stack: None,
            entry: None,
        }
    }

    /// Not prevented from running by any blocking bit.
    pub(crate) fn is_active(&self) -> bool {
        !self.flags.intersects(ThreadFlags::BLOCKING)
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.flags.contains(ThreadFlags::DEAD)
    }

    /// Preemptible right now: a non-negative priority and no scheduler lock.
    pub(crate) fn is_preemptible(&self) -> bool {
        self.prio >= 0 && self.sched_locked == 0
    }

    /// Public state; `running` says whether this is the current thread.
    pub(crate) fn state(&self, running: bool, delayed: bool) -> ThreadState {
        let flags = self.flags;
        if flags.contains(ThreadFlags::DEAD) {
            ThreadState::Dead
        } else if flags.contains(ThreadFlags::SUSPENDED) {
            ThreadState::Suspended
        } else if flags.contains(ThreadFlags::PRESTART) {
            if delayed {
                ThreadState::Blocked
            } else {
                ThreadState::Suspended
            }
        } else if flags.intersects(ThreadFlags::PENDING | ThreadFlags::SLEEPING) {
            ThreadState::Blocked
        } else if running {
            ThreadState::Running
        } else {
            ThreadState::Ready
        }
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("prio", &self.prio)
            .field("flags", &self.flags)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
