//! Ready queue implementations.
//!
//! Threads are ordered by priority (numerically lower runs first) and FIFO
//! among equal priorities. The running thread and the idle thread are never
//! in the ready queue.

extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;

use super::list::{IndexList, Link, Slot};
use super::priority;
use crate::config::NUM_PRIORITIES;

const BITMAP_WORDS: usize = (NUM_PRIORITIES + 31) / 32;

/// Ready queue interface.
///
/// The scheduler holds its lock around every call, so implementations need no
/// internal synchronization.
pub(crate) trait RunQueue: Send {
    /// Create an empty queue for a thread table of `slots` entries.
    fn with_capacity(slots: usize) -> Self
    where
        Self: Sized;

    /// Add `slot` behind every queued thread of priority `prio` or higher.
    fn enqueue(&mut self, links: &mut [Link], slot: Slot, prio: i32);

    /// Remove `slot`, which was enqueued with priority `prio`.
    fn dequeue(&mut self, links: &mut [Link], slot: Slot, prio: i32);

    /// The thread that should run next, without removing it.
    fn best(&self) -> Option<Slot>;

    /// Number of queued threads.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn level(prio: i32) -> usize {
    debug_assert!(priority::is_valid(prio), "priority {} out of range", prio);
    (prio - priority::HIGHEST) as usize
}

/// One FIFO list per priority level plus an occupancy bitmap.
///
/// Insert and remove are O(1); finding the best thread is a find-first-set
/// over the bitmap words.
#[cfg_attr(feature = "sched-sorted", allow(dead_code))]
pub(crate) struct MultiQueue {
    bitmap: [u32; BITMAP_WORDS],
    levels: [IndexList; NUM_PRIORITIES],
    len: usize,
}

impl RunQueue for MultiQueue {
    fn with_capacity(_slots: usize) -> Self {
        Self {
            bitmap: [0; BITMAP_WORDS],
            levels: [IndexList::new(); NUM_PRIORITIES],
            len: 0,
        }
    }

    fn enqueue(&mut self, links: &mut [Link], slot: Slot, prio: i32) {
        let lvl = level(prio);
        self.levels[lvl].push_back(links, slot);
        self.bitmap[lvl / 32] |= 1 << (lvl % 32);
        self.len += 1;
    }

    fn dequeue(&mut self, links: &mut [Link], slot: Slot, prio: i32) {
        let lvl = level(prio);
        self.levels[lvl].remove(links, slot);
        if self.levels[lvl].is_empty() {
            self.bitmap[lvl / 32] &= !(1 << (lvl % 32));
        }
        self.len -= 1;
    }

    fn best(&self) -> Option<Slot> {
        self.bitmap
            .iter()
            .enumerate()
            .find(|(_, word)| **word != 0)
            .and_then(|(index, word)| {
                let lvl = index * 32 + word.trailing_zeros() as usize;
                self.levels[lvl].front()
            })
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// A single list kept sorted by priority.
///
/// O(n) insert, O(1) remove and best. Smaller than [`MultiQueue`] and fast
/// enough for a handful of threads.
#[cfg_attr(not(feature = "sched-sorted"), allow(dead_code))]
pub(crate) struct SortedQueue {
    list: IndexList,
    prio: Vec<i32>,
}

impl RunQueue for SortedQueue {
    fn with_capacity(slots: usize) -> Self {
        Self {
            list: IndexList::new(),
            prio: vec![priority::IDLE; slots],
        }
    }

    fn enqueue(&mut self, links: &mut [Link], slot: Slot, prio: i32) {
        self.prio[slot] = prio;
        let keys = &self.prio;
        self.list.insert_sorted(links, slot, |s| keys[s]);
    }

    fn dequeue(&mut self, links: &mut [Link], slot: Slot, _prio: i32) {
        self.list.remove(links, slot);
    }

    fn best(&self) -> Option<Slot> {
        self.list.front()
    }

    fn len(&self) -> usize {
        self.list.len()
    }
}
