#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(unreachable_pub)]

//! Priority-based preemptive threads for small real-time systems.
//!
//! The crate provides the core of a single-CPU real-time kernel: a
//! priority scheduler with cooperative and preemptible bands, timeouts driven
//! by a tick, kernel-aware blocking primitives and a handful of lock-free
//! building blocks.
//!
//! # Features
//!
//! - `priority-inheritance`: mutex owners inherit the priority of their
//!   waiters (default)
//! - `sched-sorted`: single sorted ready list instead of the bitmap
//!   multi-queue
//! - `std-shim`: host port running kernel threads on std threads
//!
//! # Quick Start
//!
//! ```ignore
//! use priority_threads::arch::host::HostArch;
//! use priority_threads::{Kernel, KernelConfig, Semaphore, Timeout};
//!
//! let kernel: &'static Kernel<HostArch> =
//!     Box::leak(Box::new(Kernel::new(HostArch::new(), KernelConfig::DEFAULT)?));
//! kernel.start()?;
//!
//! let ready: &'static Semaphore<HostArch> = Box::leak(Box::new(Semaphore::new(kernel, 0, 1)?));
//! let worker = kernel.spawn(move || {
//!     ready.give().unwrap();
//! })?;
//! ready.take(Timeout::millis(10))?;
//! worker.join(Timeout::Forever)?;
//! ```
//!
//! # Architecture
//!
//! - [`sched`]: ready queue, wait queues and timeouts, all under one lock
//! - [`kernel`]: thread lifecycle, blocking and interrupt bookkeeping
//! - [`sync`]: semaphores, mutexes, condition variables, message and work
//!   queues, ring buffers, SPSC queues, spinlocks and atomics
//! - [`arch`]: the port interface, with a host port for simulation and tests

// Core modules
pub mod arch;
pub mod config;
pub mod errors;
pub mod kernel;
pub mod mem;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod time;

#[cfg(any(test, feature = "std-shim"))]
extern crate std;

extern crate alloc;

#[cfg(test)]
mod tests;

// ============================================================================
// Public API
// ============================================================================

// Architecture abstraction
pub use arch::{Arch, IrqKey};

#[cfg(any(test, feature = "std-shim"))]
pub use arch::DefaultArch;

// Kernel
pub use config::KernelConfig;
pub use kernel::Kernel;

// Threads
pub use thread::{JoinHandle, ThreadBuilder, ThreadId, ThreadOptions, ThreadState};

// Memory management
pub use mem::{Stack, StackPool, StackSizeClass};

// Synchronization
pub use sync::{
    Condvar, GivePolicy, MsgQueue, Mutex, RingBuffer, Semaphore, SpinLock, Spsc, Work, WorkQueue,
};

// Time
pub use time::{Duration, Instant, Timeout};

// Errors
pub use errors::{
    FatalError, JoinError, RingBufError, SpawnError, SyncError, SyncResult, ThreadError, ThreadResult,
};
