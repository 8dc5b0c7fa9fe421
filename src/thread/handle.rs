//! Owned handle to a spawned thread.

use core::fmt;

use super::{ThreadId, ThreadState};
use crate::arch::Arch;
use crate::errors::JoinError;
use crate::kernel::Kernel;
use crate::time::Timeout;

/// Handle returned by spawning a thread.
///
/// Dropping the handle detaches the thread: its slot and stack are reclaimed
/// as soon as it has exited.
pub struct JoinHandle<A: Arch> {
    kernel: &'static Kernel<A>,
    id: ThreadId,
}

impl<A: Arch> JoinHandle<A> {
    pub(crate) fn new(kernel: &'static Kernel<A>, id: ThreadId) -> Self {
        Self { kernel, id }
    }

    /// Wait for the thread to exit.
    pub fn join(&self, timeout: Timeout) -> Result<(), JoinError> {
        self.kernel.join(self.id, timeout)
    }

    /// `Ok` if the thread has exited, `Busy` otherwise.
    pub fn try_join(&self) -> Result<(), JoinError> {
        self.kernel.join(self.id, Timeout::NoWait)
    }

    pub fn thread_id(&self) -> ThreadId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.kernel.state(self.id), Ok(ThreadState::Dead) | Err(_))
    }
}

impl<A: Arch> fmt::Debug for JoinHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle").field("id", &self.id).finish()
    }
}

impl<A: Arch> Drop for JoinHandle<A> {
    fn drop(&mut self) {
        self.kernel.detach(self.id);
    }
}
