//! Per-thread timeouts ordered by absolute deadline.

extern crate alloc;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use super::list::Slot;

/// Deadline plus insertion sequence, so equal deadlines expire in arming order.
type Key = (u64, u64);

#[derive(Debug)]
pub(crate) struct TimeoutQueue {
    entries: BTreeMap<Key, Slot>,
    armed: Vec<Option<Key>>,
    seq: u64,
}

impl TimeoutQueue {
    pub(crate) fn with_capacity(slots: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            armed: vec![None; slots],
            seq: 0,
        }
    }

    /// Arm (or re-arm) the timeout of `slot` to fire at tick `deadline`.
    pub(crate) fn arm(&mut self, slot: Slot, deadline: u64) {
        self.cancel(slot);
        let key = (deadline, self.seq);
        self.seq = self.seq.wrapping_add(1);
        self.entries.insert(key, slot);
        self.armed[slot] = Some(key);
    }

    /// Disarm `slot`, returning the deadline it had.
    pub(crate) fn cancel(&mut self, slot: Slot) -> Option<u64> {
        let key = self.armed[slot].take()?;
        self.entries.remove(&key);
        Some(key.0)
    }

    pub(crate) fn deadline_of(&self, slot: Slot) -> Option<u64> {
        self.armed[slot].map(|(deadline, _)| deadline)
    }

    pub(crate) fn is_armed(&self, slot: Slot) -> bool {
        self.armed[slot].is_some()
    }

    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timeout due at or before `now`.
    pub(crate) fn pop_expired(&mut self, now: u64) -> Option<Slot> {
        let (&key, &slot) = self.entries.iter().next()?;
        if key.0 > now {
            return None;
        }
        self.entries.remove(&key);
        self.armed[slot] = None;
        Some(slot)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn test_expiry_order() {
        let mut q = TimeoutQueue::with_capacity(4);
        q.arm(0, 30);
        q.arm(1, 10);
        q.arm(2, 10);
        q.arm(3, 20);
        assert_eq!(q.next_deadline(), Some(10));
        let mut fired = Vec::new();
        while let Some(slot) = q.pop_expired(20) {
            fired.push(slot);
        }
        assert_eq!(fired, [1, 2, 3]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_deadline(), Some(30));
    }

    #[test]
    fn test_cancel_and_rearm() {
        let mut q = TimeoutQueue::with_capacity(2);
        q.arm(0, 5);
        assert_eq!(q.deadline_of(0), Some(5));
        q.arm(0, 8);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_expired(7), None);
        assert_eq!(q.cancel(0), Some(8));
        assert!(!q.is_armed(0));
        assert_eq!(q.cancel(0), None);
        assert_eq!(q.next_deadline(), None);
    }
}
