//! Synchronization primitives.
//!
//! The blocking primitives ([`Semaphore`], [`Mutex`], [`Condvar`],
//! [`MsgQueue`]) pend threads on kernel wait queues; a [`WorkQueue`] runs
//! deferred handlers on its own thread. The rest are lock-free or spin-based and
//! usable without a kernel.

pub mod atomic;
pub mod condvar;
pub mod msgq;
pub mod mutex;
pub mod ring_buf;
pub mod semaphore;
pub mod spinlock;
pub mod spsc;
pub mod work;

pub use atomic::{AtomicVal, CacheLinePadded, MemoryBarriers};
pub use condvar::Condvar;
pub use msgq::MsgQueue;
pub use mutex::Mutex;
pub use ring_buf::{Item, ItemRingBuffer, RingBuffer};
pub use semaphore::{GivePolicy, Semaphore};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use spsc::Spsc;
pub use work::{Work, WorkQueue};
