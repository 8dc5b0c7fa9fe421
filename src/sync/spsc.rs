//! Single-producer single-consumer lock-free ring queue.
//!
//! The queue owns `N` slots (`N` a power of two). The producer acquires a
//! slot, fills it in place and produces it; the consumer consumes the oldest
//! slot, reads it in place and releases it. Neither side ever blocks or
//! allocates: a full or empty queue is reported as `None`.
//!
//! Each cursor is written by exactly one side. Both cursors are free-running
//! `usize` counters; only their difference matters, so wrapping is harmless.
//!
//! ```
//! use priority_threads::sync::Spsc;
//!
//! let mut queue: Spsc<u32, 4> = Spsc::new(0);
//! let (mut tx, mut rx) = queue.split();
//!
//! *tx.acquire().unwrap() = 10;
//! tx.produce();
//!
//! assert_eq!(rx.consume(), Some(&10));
//! rx.release();
//! assert_eq!(rx.consumable(), 0);
//! ```

use core::cell::UnsafeCell;
use core::marker::PhantomData;

use portable_atomic::{AtomicUsize, Ordering};

use super::atomic::{AtomicVal, CacheLinePadded};

const PRODUCER_BIT: usize = 0;
const CONSUMER_BIT: usize = 1;

/// Lock-free single-producer single-consumer queue of `N` slots.
pub struct Spsc<T, const N: usize> {
    /// Count of produced slots (`in`).
    head: CacheLinePadded<AtomicUsize>,
    /// Count of released slots (`out`).
    tail: CacheLinePadded<AtomicUsize>,
    roles: AtomicVal,
    slots: UnsafeCell<[T; N]>,
}

unsafe impl<T: Send, const N: usize> Send for Spsc<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for Spsc<T, N> {}

impl<T: Copy, const N: usize> Spsc<T, N> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(
        N.is_power_of_two(),
        "SPSC capacity must be a non-zero power of two"
    );

    /// Create an empty queue with every slot set to `init`.
    pub const fn new(init: T) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POWER_OF_TWO;
        Self {
            head: CacheLinePadded::new(AtomicUsize::new(0)),
            tail: CacheLinePadded::new(AtomicUsize::new(0)),
            roles: AtomicVal::new(0),
            slots: UnsafeCell::new([init; N]),
        }
    }
}

impl<T, const N: usize> Spsc<T, N> {
    const MASK: usize = N - 1;

    /// Number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of produced slots not yet released.
    ///
    /// Diagnostic only for the side that does not own a cursor.
    pub fn consumable(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// Number of slots the producer could acquire right now.
    pub fn acquirable(&self) -> usize {
        N - self.consumable()
    }

    /// Split into producer and consumer handles.
    pub fn split(&mut self) -> (Producer<'_, T, N>, Consumer<'_, T, N>) {
        self.roles.set((1 << PRODUCER_BIT) | (1 << CONSUMER_BIT));
        let queue: &Self = self;
        (Producer::new(queue), Consumer::new(queue))
    }

    /// Claim the producer role of a shared queue.
    ///
    /// # Returns
    ///
    /// `None` if a producer handle already exists.
    pub fn producer(&self) -> Option<Producer<'_, T, N>> {
        if self.roles.test_and_set_bit(PRODUCER_BIT) {
            None
        } else {
            Some(Producer::new(self))
        }
    }

    /// Claim the consumer role of a shared queue.
    ///
    /// # Returns
    ///
    /// `None` if a consumer handle already exists.
    pub fn consumer(&self) -> Option<Consumer<'_, T, N>> {
        if self.roles.test_and_set_bit(CONSUMER_BIT) {
            None
        } else {
            Some(Consumer::new(self))
        }
    }

    /// Discard all queued slots.
    pub fn reset(&mut self) {
        *self.head.value.get_mut() = 0;
        *self.tail.value.get_mut() = 0;
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut T {
        // Raw pointer arithmetic: never materialize a reference to the whole array
        // while the other side holds a reference into it.
        unsafe { self.slots.get().cast::<T>().add(index & Self::MASK) }
    }
}

/// Producer side of an [`Spsc`] queue.
pub struct Producer<'a, T, const N: usize> {
    queue: &'a Spsc<T, N>,
    acquired: bool,
    _not_sync: PhantomData<core::cell::Cell<()>>,
}

impl<'a, T, const N: usize> Producer<'a, T, N> {
    fn new(queue: &'a Spsc<T, N>) -> Self {
        Self {
            queue,
            acquired: false,
            _not_sync: PhantomData,
        }
    }

    /// Get the next free slot, or `None` if the queue is full.
    ///
    /// Acquiring again before [`produce`](Self::produce) returns the same slot.
    pub fn acquire(&mut self) -> Option<&mut T> {
        let head = self.queue.head.load(Ordering::Relaxed);
        let tail = self.queue.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= N {
            return None;
        }
        self.acquired = true;
        Some(unsafe { &mut *self.queue.slot(head) })
    }

    /// Publish the acquired slot to the consumer.
    ///
    /// # Panics
    ///
    /// Panics if no slot was acquired since the last produce.
    pub fn produce(&mut self) {
        assert!(self.acquired, "SPSC produce without a successful acquire");
        self.acquired = false;
        let head = self.queue.head.load(Ordering::Relaxed);
        self.queue.head.store(head.wrapping_add(1), Ordering::Release);
    }

    /// Acquire, write `value` and produce in one step.
    ///
    /// # Returns
    ///
    /// `Err(value)` if the queue is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        match self.acquire() {
            Some(slot) => {
                *slot = value;
                self.produce();
                Ok(())
            }
            None => Err(value),
        }
    }

    /// See [`Spsc::consumable`].
    pub fn consumable(&self) -> usize {
        self.queue.consumable()
    }

    /// See [`Spsc::acquirable`].
    pub fn acquirable(&self) -> usize {
        self.queue.acquirable()
    }
}

impl<'a, T, const N: usize> Drop for Producer<'a, T, N> {
    fn drop(&mut self) {
        self.queue.roles.clear_bit(PRODUCER_BIT);
    }
}

/// Consumer side of an [`Spsc`] queue.
pub struct Consumer<'a, T, const N: usize> {
    queue: &'a Spsc<T, N>,
    consumed: bool,
    _not_sync: PhantomData<core::cell::Cell<()>>,
}

impl<'a, T, const N: usize> Consumer<'a, T, N> {
    fn new(queue: &'a Spsc<T, N>) -> Self {
        Self {
            queue,
            consumed: false,
            _not_sync: PhantomData,
        }
    }

    /// Get the oldest produced slot, or `None` if the queue is empty.
    ///
    /// The slot stays owned by the consumer until [`release`](Self::release).
    pub fn consume(&mut self) -> Option<&T> {
        let slot = self.front()?;
        self.consumed = true;
        Some(unsafe { &*slot })
    }

    /// Hand the consumed slot back to the producer.
    ///
    /// # Panics
    ///
    /// Panics if no slot was consumed since the last release.
    pub fn release(&mut self) {
        assert!(self.consumed, "SPSC release without a successful consume");
        self.consumed = false;
        let tail = self.queue.tail.load(Ordering::Relaxed);
        self.queue.tail.store(tail.wrapping_add(1), Ordering::Release);
    }

    /// Look at the oldest produced slot without consuming it.
    pub fn peek(&self) -> Option<&T> {
        self.front().map(|slot| unsafe { &*slot })
    }

    /// Iterate over every produced slot, oldest first, without consuming.
    pub fn iter(&self) -> Iter<'_, T, N> {
        let tail = self.queue.tail.load(Ordering::Relaxed);
        let head = self.queue.head.load(Ordering::Acquire);
        Iter {
            queue: self.queue,
            next: tail,
            end: head,
        }
    }

    /// See [`Spsc::consumable`].
    pub fn consumable(&self) -> usize {
        self.queue.consumable()
    }

    fn front(&self) -> Option<*mut T> {
        let tail = self.queue.tail.load(Ordering::Relaxed);
        let head = self.queue.head.load(Ordering::Acquire);
        if head == tail {
            None
        } else {
            Some(self.queue.slot(tail))
        }
    }
}

impl<'a, T: Copy, const N: usize> Consumer<'a, T, N> {
    /// Consume, copy out and release in one step.
    pub fn pop(&mut self) -> Option<T> {
        let value = *self.consume()?;
        self.release();
        Some(value)
    }
}

impl<'a, T, const N: usize> Drop for Consumer<'a, T, N> {
    fn drop(&mut self) {
        self.queue.roles.clear_bit(CONSUMER_BIT);
    }
}

/// Iterator over the produced slots of an [`Spsc`] queue.
pub struct Iter<'a, T, const N: usize> {
    queue: &'a Spsc<T, N>,
    next: usize,
    end: usize,
}

impl<'a, T, const N: usize> Iterator for Iter<'a, T, N> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.next == self.end {
            return None;
        }
        let slot = self.queue.slot(self.next);
        self.next = self.next.wrapping_add(1);
        Some(unsafe { &*slot })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.end.wrapping_sub(self.next);
        (len, Some(len))
    }
}

impl<'a, T, const N: usize> ExactSizeIterator for Iter<'a, T, N> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn test_capacity_four_scenario() {
        let mut queue: Spsc<u32, 4> = Spsc::new(0);
        let (mut tx, mut rx) = queue.split();

        for value in [10, 20, 30] {
            *tx.acquire().unwrap() = value;
            tx.produce();
        }
        assert_eq!(rx.consumable(), 3);

        assert_eq!(rx.consume(), Some(&10));
        rx.release();
        assert_eq!(rx.consume(), Some(&20));
        rx.release();
        assert_eq!(rx.consumable(), 1);

        assert_eq!(rx.consume(), Some(&30));
    }

    #[test]
    fn test_full_and_empty() {
        let mut queue: Spsc<u8, 2> = Spsc::new(0);
        let (mut tx, mut rx) = queue.split();

        assert!(rx.consume().is_none());
        assert_eq!(tx.push(1), Ok(()));
        assert_eq!(tx.push(2), Ok(()));
        assert_eq!(tx.push(3), Err(3));
        assert!(tx.acquire().is_none());
        assert_eq!(tx.acquirable(), 0);

        assert_eq!(rx.pop(), Some(1));
        assert_eq!(tx.acquirable(), 1);
        assert_eq!(tx.push(3), Ok(()));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), Some(3));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_peek_and_iter_do_not_consume() {
        let mut queue: Spsc<i32, 8> = Spsc::new(0);
        let (mut tx, mut rx) = queue.split();
        for value in 1..=3 {
            tx.push(value).unwrap();
        }
        assert_eq!(rx.peek(), Some(&1));
        assert_eq!(rx.peek(), Some(&1));
        let seen: Vec<i32> = rx.iter().copied().collect();
        assert_eq!(seen, [1, 2, 3]);
        assert_eq!(rx.iter().len(), 3);
        assert_eq!(rx.consumable(), 3);
    }

    #[test]
    fn test_cursor_wraparound() {
        let mut queue: Spsc<usize, 4> = Spsc::new(0);
        *queue.head.value.get_mut() = usize::MAX - 1;
        *queue.tail.value.get_mut() = usize::MAX - 1;
        let (mut tx, mut rx) = queue.split();
        for value in 0..4 {
            tx.push(value).unwrap();
        }
        assert_eq!(tx.consumable(), 4);
        assert!(tx.acquire().is_none());
        for value in 0..4 {
            assert_eq!(rx.pop(), Some(value));
        }
        assert_eq!(rx.consumable(), 0);
    }

    #[test]
    fn test_role_claiming() {
        let queue: Spsc<u8, 4> = Spsc::new(0);
        let tx = queue.producer().unwrap();
        assert!(queue.producer().is_none());
        let rx = queue.consumer().unwrap();
        assert!(queue.consumer().is_none());
        drop(tx);
        drop(rx);
        assert!(queue.producer().is_some());
        assert!(queue.consumer().is_some());
    }

    #[test]
    fn test_reset() {
        let mut queue: Spsc<u8, 4> = Spsc::new(0);
        {
            let (mut tx, _rx) = queue.split();
            tx.push(1).unwrap();
            tx.push(2).unwrap();
        }
        queue.reset();
        assert_eq!(queue.consumable(), 0);
        assert_eq!(queue.acquirable(), 4);
    }

    #[test]
    #[should_panic(expected = "produce without a successful acquire")]
    fn test_produce_without_acquire_panics() {
        let mut queue: Spsc<u8, 4> = Spsc::new(0);
        let (mut tx, _rx) = queue.split();
        tx.produce();
    }

    #[test]
    #[should_panic(expected = "release without a successful consume")]
    fn test_release_without_consume_panics() {
        let mut queue: Spsc<u8, 4> = Spsc::new(0);
        let (_tx, mut rx) = queue.split();
        rx.release();
    }

    #[test]
    fn test_static_queue() {
        static QUEUE: Spsc<u16, 8> = Spsc::new(0);
        let mut tx = QUEUE.producer().unwrap();
        let mut rx = QUEUE.consumer().unwrap();
        tx.push(7).unwrap();
        assert_eq!(rx.pop(), Some(7));
    }
}
