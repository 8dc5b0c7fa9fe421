//! Work items deferred to a dedicated kernel thread.
//!
//! Interrupt handlers and drivers [submit](WorkQueue::submit) a [`Work`]
//! item; the queue's thread runs the handlers one at a time, in submission
//! order, at the priority it was started with.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::fmt;

use spin::Once;

use super::atomic::AtomicVal;
use super::semaphore::Semaphore;
use crate::arch::Arch;
use crate::errors::SpawnError;
use crate::kernel::Kernel;
use crate::sync::spinlock::SpinLock;
use crate::thread::{ThreadBuilder, ThreadId};
use crate::time::Timeout;

const PENDING: usize = 0;

/// A deferred handler that can sit on at most one queue at a time.
pub struct Work {
    handler: Box<dyn Fn() + Send + Sync>,
    flags: AtomicVal,
}

impl Work {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            flags: AtomicVal::new(0),
        }
    }

    /// Whether the item is queued and has not started running yet.
    pub fn is_pending(&self) -> bool {
        self.flags.test_bit(PENDING)
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work").field("pending", &self.is_pending()).finish()
    }
}

/// Queue of [`Work`] items drained by its own kernel thread.
pub struct WorkQueue<A: Arch> {
    items: SpinLock<A, VecDeque<&'static Work>>,
    ready: Semaphore<A>,
    thread: Once<ThreadId>,
}

impl<A: Arch> WorkQueue<A> {
    /// Create a work queue and start its thread at `priority`.
    ///
    /// The queue lives for the rest of the program.
    pub fn start(
        kernel: &'static Kernel<A>,
        name: &str,
        priority: i32,
    ) -> Result<&'static Self, SpawnError> {
        let queue: &'static Self = Box::leak(Box::new(Self {
            items: SpinLock::new(VecDeque::new()),
            ready: Semaphore::unbounded(kernel),
            thread: Once::new(),
        }));
        let handle = ThreadBuilder::new()
            .name(name)
            .priority(priority)
            .spawn(kernel, move || queue.run())?;
        let id = handle.thread_id();
        queue.thread.call_once(|| id);
        log::debug!("work queue {} started as thread {}", name, id);
        Ok(queue)
    }

    /// Queue `work` unless it is already pending. Callable from interrupt
    /// context.
    ///
    /// Returns whether the item was queued by this call.
    pub fn submit(&self, work: &'static Work) -> bool {
        let mut items = self.items.lock();
        if work.flags.test_and_set_bit(PENDING) {
            return false;
        }
        items.push_back(work);
        drop(items);
        if let Err(err) = self.ready.give() {
            log::warn!("work queue wakeup failed: {}", err);
        }
        true
    }

    /// Remove `work` if it is still pending.
    ///
    /// Returns whether the item was removed. A handler that already started
    /// runs to completion.
    pub fn cancel(&self, work: &'static Work) -> bool {
        let mut items = self.items.lock();
        if !work.flags.test_and_clear_bit(PENDING) {
            return false;
        }
        items.retain(|queued| !core::ptr::eq(*queued, work));
        true
    }

    /// Items waiting to run.
    pub fn pending(&self) -> usize {
        self.items.lock().len()
    }

    /// The thread draining this queue.
    pub fn thread(&self) -> Option<ThreadId> {
        self.thread.get().copied()
    }

    fn next(&self) -> Option<&'static Work> {
        let mut items = self.items.lock();
        let work = items.pop_front()?;
        // Cleared before the handler runs so it may submit itself again.
        work.flags.clear_bit(PENDING);
        Some(work)
    }

    fn run(&self) {
        loop {
            if let Err(err) = self.ready.take(Timeout::Forever) {
                log::warn!("work queue wait failed: {}", err);
                continue;
            }
            while let Some(work) = self.next() {
                (work.handler)();
            }
        }
    }
}

impl<A: Arch> fmt::Debug for WorkQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("thread", &self.thread())
            .field("pending", &self.pending())
            .finish()
    }
}
