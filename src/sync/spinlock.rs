//! Interrupt-masking spinlock with an RAII guard.
//!
//! Locking masks local interrupts first and then spins on the lock word, so
//! a holder can never be preempted on its own CPU. Dropping the guard
//! releases the word and restores the interrupt state captured at lock time.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use spin::relax::{RelaxStrategy, Spin};

use super::atomic::AtomicVal;
use crate::arch::{Arch, IrqKey};

const FREE: usize = 0;
const HELD: usize = 1;

/// A spinlock protecting a `T`, masking interrupts through `A`.
pub struct SpinLock<A: Arch, T: ?Sized> {
    word: AtomicVal,
    #[cfg(debug_assertions)]
    owner: AtomicVal,
    _arch: PhantomData<fn() -> A>,
    data: UnsafeCell<T>,
}

unsafe impl<A: Arch, T: ?Sized + Send> Send for SpinLock<A, T> {}
unsafe impl<A: Arch, T: ?Sized + Send> Sync for SpinLock<A, T> {}

impl<A: Arch, T> SpinLock<A, T> {
    /// Create an unlocked spinlock.
    pub const fn new(data: T) -> Self {
        Self {
            word: AtomicVal::new(FREE),
            #[cfg(debug_assertions)]
            owner: AtomicVal::new(0),
            _arch: PhantomData,
            data: UnsafeCell::new(data),
        }
    }

    /// Consume the lock, returning the protected data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<A: Arch, T: ?Sized> SpinLock<A, T> {
    /// Mask interrupts and spin until the lock is acquired.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the calling context already holds the lock.
    pub fn lock(&self) -> SpinLockGuard<'_, A, T> {
        let key = A::irq_lock();
        #[cfg(debug_assertions)]
        self.check_not_recursive();
        while !self.word.cas(FREE, HELD) {
            while self.word.get() != FREE {
                Spin::relax();
            }
        }
        self.acquired(key)
    }

    /// Try to acquire the lock without spinning.
    ///
    /// Interrupts are left as they were if the lock is held.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, A, T>> {
        let key = A::irq_lock();
        if self.word.cas(FREE, HELD) {
            Some(self.acquired(key))
        } else {
            A::irq_unlock(key);
            None
        }
    }

    /// Whether some context currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.word.get() != FREE
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn acquired(&self, key: IrqKey) -> SpinLockGuard<'_, A, T> {
        #[cfg(debug_assertions)]
        self.owner.set(A::owner_token());
        SpinLockGuard {
            lock: self,
            key,
            _not_send: PhantomData,
        }
    }

    #[cfg(debug_assertions)]
    fn check_not_recursive(&self) {
        let token = A::owner_token();
        if self.word.get() == HELD && self.owner.get() == token {
            panic!("recursive acquisition of spinlock {:p} by owner {}", self, token);
        }
    }

    fn release(&self) {
        #[cfg(debug_assertions)]
        {
            let token = A::owner_token();
            let owner = self.owner.clear();
            if owner != token {
                panic!(
                    "spinlock {:p} released by {} but held by {}",
                    self, token, owner
                );
            }
        }
        self.word.set(FREE);
    }
}

impl<A: Arch, T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Proof of holding a [`SpinLock`]; releases it when dropped.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct SpinLockGuard<'a, A: Arch, T: ?Sized> {
    lock: &'a SpinLock<A, T>,
    key: IrqKey,
    _not_send: PhantomData<*const ()>,
}

impl<'a, A: Arch, T: ?Sized> SpinLockGuard<'a, A, T> {
    /// Whether interrupts were enabled before the lock was taken.
    pub fn irq_was_enabled(&self) -> bool {
        self.key.was_enabled()
    }

    /// Release the lock word but keep interrupts masked.
    ///
    /// The returned key must eventually be passed to [`Arch::irq_unlock`].
    pub fn release_keep_irq(self) -> IrqKey {
        let key = self.key;
        let lock = self.lock;
        core::mem::forget(self);
        lock.release();
        key
    }
}

impl<'a, A: Arch, T: ?Sized> Deref for SpinLockGuard<'a, A, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, A: Arch, T: ?Sized> DerefMut for SpinLockGuard<'a, A, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, A: Arch, T: ?Sized> Drop for SpinLockGuard<'a, A, T> {
    fn drop(&mut self) {
        self.lock.release();
        A::irq_unlock(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::HostArch;
    use std::sync::Arc;
    use std::vec::Vec;

    type Lock<T> = SpinLock<HostArch, T>;

    #[test]
    fn test_lock_masks_and_restores_interrupts() {
        let lock = Lock::new(0u32);
        {
            let mut guard = lock.lock();
            assert!(!HostArch::interrupts_enabled());
            assert!(guard.irq_was_enabled());
            *guard += 1;
        }
        assert!(HostArch::interrupts_enabled());
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn test_nested_locks_restore_in_order() {
        let outer = Lock::new(());
        let inner = Lock::new(());
        let a = outer.lock();
        let b = inner.lock();
        assert!(!b.irq_was_enabled());
        drop(b);
        assert!(!HostArch::interrupts_enabled());
        drop(a);
        assert!(HostArch::interrupts_enabled());
    }

    #[test]
    fn test_try_lock() {
        let lock = Lock::new(5);
        let guard = lock.try_lock().unwrap();
        assert!(lock.is_locked());
        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_release_keep_irq() {
        let lock = Lock::new(());
        let guard = lock.lock();
        let key = guard.release_keep_irq();
        assert!(!lock.is_locked());
        assert!(!HostArch::interrupts_enabled());
        HostArch::irq_unlock(key);
        assert!(HostArch::interrupts_enabled());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "recursive acquisition")]
    fn test_recursive_lock_panics() {
        let lock = Lock::new(());
        let _a = lock.lock();
        let _b = lock.lock();
    }

    #[test]
    fn test_mutual_exclusion_across_threads() {
        let lock = Arc::new(Lock::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
