//! Atomic word operations and memory barriers.
//!
//! [`AtomicVal`] is the primitive every other synchronization object builds
//! on. All read-modify-write operations return the previous value and are
//! sequentially consistent.

use portable_atomic::{AtomicUsize, Ordering};

/// Number of bits in an [`AtomicVal`].
pub const ATOMIC_BITS: usize = usize::BITS as usize;

/// A machine word with atomic arithmetic and bit operations.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicVal(AtomicUsize);

impl AtomicVal {
    /// Create a new atomic value.
    pub const fn new(value: usize) -> Self {
        Self(AtomicUsize::new(value))
    }

    /// Read the value.
    #[inline]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Store `value`, returning the previous value.
    #[inline]
    pub fn set(&self, value: usize) -> usize {
        self.0.swap(value, Ordering::SeqCst)
    }

    /// Store zero, returning the previous value.
    #[inline]
    pub fn clear(&self) -> usize {
        self.set(0)
    }

    /// Wrapping add, returning the previous value.
    #[inline]
    pub fn add(&self, value: usize) -> usize {
        self.0.fetch_add(value, Ordering::SeqCst)
    }

    /// Wrapping subtract, returning the previous value.
    #[inline]
    pub fn sub(&self, value: usize) -> usize {
        self.0.fetch_sub(value, Ordering::SeqCst)
    }

    /// Increment, returning the previous value.
    #[inline]
    pub fn inc(&self) -> usize {
        self.add(1)
    }

    /// Decrement, returning the previous value.
    #[inline]
    pub fn dec(&self) -> usize {
        self.sub(1)
    }

    /// Bitwise or, returning the previous value.
    #[inline]
    pub fn or(&self, value: usize) -> usize {
        self.0.fetch_or(value, Ordering::SeqCst)
    }

    /// Bitwise and, returning the previous value.
    #[inline]
    pub fn and(&self, value: usize) -> usize {
        self.0.fetch_and(value, Ordering::SeqCst)
    }

    /// Bitwise xor, returning the previous value.
    #[inline]
    pub fn xor(&self, value: usize) -> usize {
        self.0.fetch_xor(value, Ordering::SeqCst)
    }

    /// Bitwise nand, returning the previous value.
    #[inline]
    pub fn nand(&self, value: usize) -> usize {
        self.0.fetch_nand(value, Ordering::SeqCst)
    }

    /// Replace `old` with `new` if the value equals `old`.
    ///
    /// # Returns
    ///
    /// `true` if the swap happened.
    #[inline]
    pub fn cas(&self, old: usize, new: usize) -> bool {
        self.0
            .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Check whether `bit` is set.
    #[inline]
    pub fn test_bit(&self, bit: usize) -> bool {
        self.get() & Self::mask(bit) != 0
    }

    /// Set `bit`.
    #[inline]
    pub fn set_bit(&self, bit: usize) {
        self.or(Self::mask(bit));
    }

    /// Clear `bit`.
    #[inline]
    pub fn clear_bit(&self, bit: usize) {
        self.and(!Self::mask(bit));
    }

    /// Set `bit`, returning whether it was already set.
    #[inline]
    pub fn test_and_set_bit(&self, bit: usize) -> bool {
        self.or(Self::mask(bit)) & Self::mask(bit) != 0
    }

    /// Clear `bit`, returning whether it was set.
    #[inline]
    pub fn test_and_clear_bit(&self, bit: usize) -> bool {
        self.and(!Self::mask(bit)) & Self::mask(bit) != 0
    }

    #[inline]
    fn mask(bit: usize) -> usize {
        debug_assert!(bit < ATOMIC_BITS, "bit {} out of range", bit);
        1 << bit
    }
}

/// Memory fences independent of any particular atomic.
pub struct MemoryBarriers;

impl MemoryBarriers {
    /// Order all earlier memory accesses before all later ones.
    #[inline(always)]
    pub fn full() {
        core::sync::atomic::fence(Ordering::SeqCst);
    }

    /// Later accesses are not hoisted above earlier loads.
    #[inline(always)]
    pub fn acquire() {
        core::sync::atomic::fence(Ordering::Acquire);
    }

    /// Earlier accesses are not sunk below later stores.
    #[inline(always)]
    pub fn release() {
        core::sync::atomic::fence(Ordering::Release);
    }
}

/// Padding structure to prevent false sharing.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct CacheLinePadded<T> {
    pub value: T,
}

impl<T> CacheLinePadded<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> core::ops::Deref for CacheLinePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}
