//! Intrusive doubly-linked lists over thread slot indexes.
//!
//! Every thread slot owns one [`Link`] in a shared array. A thread sits in at
//! most one list at a time (the ready queue or a single wait queue), so one
//! link pair per thread is enough for both kinds of queue.

/// Thread slot index.
pub(crate) type Slot = usize;

/// Neighbours of a slot in whichever list it is linked into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Link {
    prev: Option<Slot>,
    next: Option<Slot>,
}

/// A FIFO list of slots threaded through a shared link array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct IndexList {
    head: Option<Slot>,
    tail: Option<Slot>,
    len: usize,
}

impl IndexList {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn front(&self) -> Option<Slot> {
        self.head
    }

    pub(crate) fn push_back(&mut self, links: &mut [Link], slot: Slot) {
        links[slot] = Link {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(tail) => links[tail].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.len += 1;
    }

    /// Link `slot` directly in front of `at`, which must be in this list.
    pub(crate) fn insert_before(&mut self, links: &mut [Link], at: Slot, slot: Slot) {
        let prev = links[at].prev;
        links[slot] = Link {
            prev,
            next: Some(at),
        };
        links[at].prev = Some(slot);
        match prev {
            Some(prev) => links[prev].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.len += 1;
    }

    /// Insert `slot` behind every element whose key is less than or equal to
    /// its own, keeping equal keys in insertion order.
    pub(crate) fn insert_sorted<K: Ord>(
        &mut self,
        links: &mut [Link],
        slot: Slot,
        key: impl Fn(Slot) -> K,
    ) {
        let own = key(slot);
        let mut cursor = self.head;
        while let Some(at) = cursor {
            if key(at) > own {
                self.insert_before(links, at, slot);
                return;
            }
            cursor = links[at].next;
        }
        self.push_back(links, slot);
    }

    /// Unlink `slot`, which must be in this list.
    pub(crate) fn remove(&mut self, links: &mut [Link], slot: Slot) {
        let Link { prev, next } = links[slot];
        match prev {
            Some(prev) => links[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => links[next].prev = prev,
            None => self.tail = prev,
        }
        links[slot] = Link::default();
        self.len -= 1;
    }

    pub(crate) fn pop_front(&mut self, links: &mut [Link]) -> Option<Slot> {
        let head = self.head?;
        self.remove(links, head);
        Some(head)
    }

    pub(crate) fn iter<'a>(&self, links: &'a [Link]) -> Iter<'a> {
        Iter {
            links,
            cursor: self.head,
        }
    }
}

pub(crate) struct Iter<'a> {
    links: &'a [Link],
    cursor: Option<Slot>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let slot = self.cursor?;
        self.cursor = self.links[slot].next;
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn collect(list: &IndexList, links: &[Link]) -> Vec<Slot> {
        list.iter(links).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut links = [Link::default(); 4];
        let mut list = IndexList::new();
        list.push_back(&mut links, 2);
        list.push_back(&mut links, 0);
        list.push_back(&mut links, 3);
        assert_eq!(list.len(), 3);
        assert_eq!(collect(&list, &links), [2, 0, 3]);
        assert_eq!(list.pop_front(&mut links), Some(2));
        assert_eq!(list.pop_front(&mut links), Some(0));
        assert_eq!(list.pop_front(&mut links), Some(3));
        assert_eq!(list.pop_front(&mut links), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_remove_middle_and_ends() {
        let mut links = [Link::default(); 5];
        let mut list = IndexList::new();
        for slot in 0..5 {
            list.push_back(&mut links, slot);
        }
        list.remove(&mut links, 2);
        list.remove(&mut links, 0);
        list.remove(&mut links, 4);
        assert_eq!(collect(&list, &links), [1, 3]);
        assert_eq!(list.front(), Some(1));
        list.push_back(&mut links, 4);
        assert_eq!(collect(&list, &links), [1, 3, 4]);
    }

    #[test]
    fn test_insert_sorted_is_stable() {
        let prio = [5, 1, 5, 3, 1];
        let mut links = [Link::default(); 5];
        let mut list = IndexList::new();
        for slot in 0..5 {
            list.insert_sorted(&mut links, slot, |s| prio[s]);
        }
        assert_eq!(collect(&list, &links), [1, 4, 3, 0, 2]);
    }
}
