//! Wait queues for blocked threads.
//!
//! Every blocking object (semaphore, mutex, condition variable, the join
//! point of a thread) owns one wait queue, allocated from an arena inside
//! the scheduler and named by a [`WaitQueueId`]. Queues are only touched with
//! the scheduler lock held.

extern crate alloc;
use alloc::vec::Vec;

use super::list::{IndexList, Link, Slot};

/// Handle to a wait queue in the scheduler's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaitQueueId(u32);

/// Order in which waiters are woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOrder {
    /// Highest priority first, FIFO among equal priorities.
    Priority,
    /// Strict arrival order.
    Fifo,
}

#[derive(Debug)]
pub(crate) struct WaitQueue {
    list: IndexList,
    order: WaitOrder,
}

impl WaitQueue {
    fn new(order: WaitOrder) -> Self {
        Self {
            list: IndexList::new(),
            order,
        }
    }

    pub(crate) fn insert(&mut self, links: &mut [Link], slot: Slot, prio_of: impl Fn(Slot) -> i32) {
        match self.order {
            WaitOrder::Priority => self.list.insert_sorted(links, slot, prio_of),
            WaitOrder::Fifo => self.list.push_back(links, slot),
        }
    }

    pub(crate) fn remove(&mut self, links: &mut [Link], slot: Slot) {
        self.list.remove(links, slot);
    }

    /// Move `slot` to the position its (changed) priority calls for.
    pub(crate) fn reposition(&mut self, links: &mut [Link], slot: Slot, prio_of: impl Fn(Slot) -> i32) {
        if self.order == WaitOrder::Priority {
            self.list.remove(links, slot);
            self.list.insert_sorted(links, slot, prio_of);
        }
    }

    pub(crate) fn front(&self) -> Option<Slot> {
        self.list.front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }
}

/// Arena of wait queues with slot reuse.
#[derive(Debug, Default)]
pub(crate) struct WaitQueues {
    queues: Vec<Option<WaitQueue>>,
    free: Vec<u32>,
}

impl WaitQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&mut self, order: WaitOrder) -> WaitQueueId {
        match self.free.pop() {
            Some(index) => {
                self.queues[index as usize] = Some(WaitQueue::new(order));
                WaitQueueId(index)
            }
            None => {
                self.queues.push(Some(WaitQueue::new(order)));
                WaitQueueId((self.queues.len() - 1) as u32)
            }
        }
    }

    /// Return a queue to the arena. The queue must be empty.
    pub(crate) fn free(&mut self, id: WaitQueueId) {
        if let Some(queue) = self.queues[id.0 as usize].take() {
            debug_assert!(queue.is_empty(), "freeing wait queue with waiters");
            self.free.push(id.0);
        }
    }

    pub(crate) fn get(&self, id: WaitQueueId) -> &WaitQueue {
        match &self.queues[id.0 as usize] {
            Some(queue) => queue,
            None => panic!("wait queue {:?} used after free", id),
        }
    }

    pub(crate) fn get_mut(&mut self, id: WaitQueueId) -> &mut WaitQueue {
        match &mut self.queues[id.0 as usize] {
            Some(queue) => queue,
            None => panic!("wait queue {:?} used after free", id),
        }
    }

    /// Number of live queues.
    pub(crate) fn live(&self) -> usize {
        self.queues.len() - self.free.len()
    }
}
