//! Architecture abstraction layer for context switching and interrupt masking.
//!
//! The kernel never touches registers itself. Everything that depends on the
//! CPU (building an initial context, switching, masking interrupts, idling)
//! goes through the [`Arch`] trait. One port ships with the crate: the host
//! port in [`host`], which runs each kernel thread on its own std thread and
//! passes a baton between them.

use crate::errors::{ArchError, FatalError};
use crate::mem::Stack;
use crate::thread::ThreadOptions;

#[cfg(any(test, feature = "std-shim"))]
pub mod host;

#[cfg(any(test, feature = "std-shim"))]
pub use host::HostArch as DefaultArch;

/// First code run by every kernel thread.
///
/// The two arguments are opaque to the architecture layer and are passed
/// through unchanged from [`Arch::init_context`].
pub type ThreadEntry = fn(usize, usize) -> !;

/// Interrupt state captured when interrupts were masked.
///
/// Restoring a key re-enables interrupts only if they were enabled when the
/// key was taken, so critical sections nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "dropping an IrqKey leaves interrupts masked"]
pub struct IrqKey {
    enabled: bool,
}

impl IrqKey {
    /// Whether interrupts were enabled before this key was taken.
    pub fn was_enabled(&self) -> bool {
        self.enabled
    }
}

/// Architecture abstraction trait.
///
/// # Safety
///
/// Implementations perform the actual stack switch. The kernel guarantees
/// that context pointers handed to [`Arch::context_switch`] and
/// [`Arch::exit_to`] stay valid until the switch completes, and that both
/// are called with interrupts masked.
pub trait Arch: Sized + Send + Sync + 'static {
    /// Saved execution state of a thread.
    type Context: Send;

    /// Build the initial context for a new thread.
    ///
    /// When the context is first switched to, it calls `entry(arg0, arg1)`
    /// on `stack` with interrupts enabled.
    ///
    /// # Arguments
    ///
    /// * `stack` - Stack owned by the new thread
    /// * `entry` - Function the thread starts in
    /// * `arg0`, `arg1` - Arguments passed to `entry`
    /// * `options` - Thread options (for example, whether FP state is saved)
    fn init_context(
        &self,
        stack: &Stack,
        entry: ThreadEntry,
        arg0: usize,
        arg1: usize,
        options: ThreadOptions,
    ) -> Result<Self::Context, ArchError>;

    /// Build a context describing the code currently executing.
    ///
    /// Used once at kernel start to turn the boot flow into the main thread.
    fn adopt_current(&self) -> Self::Context;

    /// Save the running thread into `prev` and resume `next`.
    ///
    /// Returns when some other thread switches back to `prev`.
    ///
    /// # Safety
    ///
    /// - `prev` must be the context of the running thread
    /// - `next` must be a context built by this port and not currently running
    /// - Must be called with interrupts disabled
    unsafe fn context_switch(&self, prev: *mut Self::Context, next: *const Self::Context);

    /// Resume `next` without saving the running thread, which has exited.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Arch::context_switch`] for `next`.
    unsafe fn exit_to(&self, next: *const Self::Context) -> !;

    /// Wait for an interrupt while no thread is ready.
    ///
    /// `next_timeout` is the number of ticks until the earliest armed timeout.
    /// Returns the number of ticks that elapsed and still need announcing, or
    /// `None` if nothing can ever wake the CPU again.
    fn cpu_idle(&self, next_timeout: Option<u64>) -> Option<u64>;

    /// Hook run before the kernel halts on a fatal error.
    fn halt(&self, _reason: &FatalError) {}

    /// Enable interrupts on the current CPU.
    fn enable_interrupts();

    /// Disable interrupts on the current CPU.
    fn disable_interrupts();

    /// Check if interrupts are currently enabled.
    fn interrupts_enabled() -> bool;

    /// Identifier of the current execution context, used for lock ownership
    /// diagnostics. Never zero.
    fn owner_token() -> usize;

    /// Mask interrupts and return the previous state.
    #[inline]
    fn irq_lock() -> IrqKey {
        let enabled = Self::interrupts_enabled();
        Self::disable_interrupts();
        IrqKey { enabled }
    }

    /// Restore the interrupt state captured in `key`.
    #[inline]
    fn irq_unlock(key: IrqKey) {
        if key.enabled {
            Self::enable_interrupts();
        }
    }
}
