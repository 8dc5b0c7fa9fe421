//! Fixed-capacity arena of thread control blocks.

extern crate alloc;
use alloc::vec::Vec;

use super::{Tcb, ThreadId};
use crate::sched::list::Slot;

struct Entry {
    generation: u16,
    tcb: Option<Tcb>,
}

/// Thread table indexed by slot, allocated once at kernel construction.
pub(crate) struct ThreadTable {
    entries: Vec<Entry>,
    free: Vec<Slot>,
}

impl ThreadTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || Entry {
            generation: 1,
            tcb: None,
        });
        Self {
            entries,
            // Lowest slot first
            free: (0..capacity).rev().collect(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    /// Reserve a slot and return the id its thread will carry.
    pub(crate) fn reserve(&mut self) -> Option<ThreadId> {
        let slot = self.free.pop()?;
        Some(ThreadId::new(slot, self.entries[slot].generation))
    }

    /// Fill a slot obtained from [`ThreadTable::reserve`].
    pub(crate) fn install(&mut self, tcb: Tcb) {
        let slot = tcb.id.slot();
        debug_assert!(self.entries[slot].tcb.is_none());
        self.entries[slot].tcb = Some(tcb);
    }

    /// Empty `slot`, bump its generation and put it back on the free list.
    pub(crate) fn release(&mut self, slot: Slot) -> Option<Tcb> {
        let entry = &mut self.entries[slot];
        let tcb = entry.tcb.take();
        entry.generation = match entry.generation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.free.push(slot);
        tcb
    }

    /// Slot of `id` if the id still names a live entry.
    pub(crate) fn lookup(&self, id: ThreadId) -> Option<Slot> {
        let entry = self.entries.get(id.slot())?;
        if entry.generation == id.generation() && entry.tcb.is_some() {
            Some(id.slot())
        } else {
            None
        }
    }

    pub(crate) fn get(&self, slot: Slot) -> &Tcb {
        match &self.entries[slot].tcb {
            Some(tcb) => tcb,
            None => panic!("thread slot {} is empty", slot),
        }
    }

    pub(crate) fn get_mut(&mut self, slot: Slot) -> &mut Tcb {
        match &mut self.entries[slot].tcb {
            Some(tcb) => tcb,
            None => panic!("thread slot {} is empty", slot),
        }
    }

    pub(crate) fn try_get(&self, slot: Slot) -> Option<&Tcb> {
        self.entries.get(slot)?.tcb.as_ref()
    }

    /// Occupied slots with their control blocks.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Slot, &Tcb)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.tcb.as_ref().map(|tcb| (slot, tcb)))
    }
}
