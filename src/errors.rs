//! Error types for the scheduler and synchronization primitives.
//!
//! Recoverable conditions (full buffers, empty queues, timeouts, contention)
//! are reported through these types. Programming errors that leave kernel
//! state untrustworthy are reported as [`FatalError`] and halt the system.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

use crate::thread::ThreadId;

/// Result type for thread lifecycle operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Result type for blocking synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error type for thread lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// Thread spawning errors
    Spawn(SpawnError),
    /// Thread joining errors
    Join(JoinError),
    /// Invalid operation errors
    InvalidOperation(InvalidOperationError),
    /// Kernel configuration errors
    Config(ConfigError),
}

/// Errors that can occur during thread spawning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Kernel has not been started
    NotInitialized,
    /// Out of memory for stack allocation
    OutOfMemory,
    /// Every thread slot is in use
    TooManyThreads,
    /// Invalid stack size specified
    InvalidStackSize(usize),
    /// Priority outside the application range
    InvalidPriority(i32),
    /// The architecture layer could not build the initial context
    Arch(ArchError),
}

/// Errors that can occur during thread joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// Handle refers to a thread slot that was already reclaimed
    InvalidHandle,
    /// Join with no-wait on a thread that is still alive
    Busy,
    /// Join operation timed out
    Timeout,
    /// A thread tried to join itself, or two threads joined each other
    Deadlock,
    /// Join called from interrupt context
    InIsr,
}

/// Errors returned by semaphores, mutexes and condition variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// No-wait take on an empty semaphore
    WouldBlock,
    /// No-wait lock on a contended mutex
    Busy,
    /// Waited until the deadline without being signaled
    TimedOut,
    /// The wait was cancelled (semaphore reset)
    Aborted,
    /// Invalid initialization parameters
    InvalidArgument,
    /// Give on a semaphore at its limit under the strict policy
    LimitReached,
    /// Unlock by a thread that does not own the mutex
    NotOwner,
    /// Unlock of a mutex that is not locked
    NotLocked,
    /// Operation not permitted from interrupt context
    InIsr,
}

/// Invalid operation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidOperationError {
    /// Handle refers to a thread slot that was already reclaimed
    InvalidHandle,
    /// Operation is not permitted on the idle thread
    IdleThread,
    /// Priority outside the application range
    InvalidPriority(i32),
    /// Operation requires a dead thread
    StillRunning,
    /// Kernel was already started
    AlreadyStarted,
}

/// Errors raised by the architecture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchError {
    /// Building the initial thread context failed
    ContextInit,
}

/// Invalid kernel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Thread table must hold at least the main and idle threads
    TooFewThreads(usize),
    /// Thread table larger than thread ids can address
    TooManyThreads(usize),
    /// Priority ceiling outside the valid priority range
    InvalidCeiling(i32),
    /// Main thread priority outside the application range
    InvalidMainPriority(i32),
}

/// Errors returned by the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingBufError {
    /// No item is stored
    Empty,
    /// Not enough free space for the item
    NoSpace,
    /// Item payload longer than the header can describe
    TooLarge,
    /// Destination too small; `needed` is the payload length in words
    TooSmall {
        /// Payload length of the stored item, in 32-bit words
        needed: usize,
    },
    /// `finish` committed more bytes than were claimed
    FinishExceedsClaim {
        /// Bytes passed to finish
        requested: usize,
        /// Bytes outstanding in the claim
        claimed: usize,
    },
}

/// Invariant violations that halt the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// A blocking call was made from interrupt context
    BlockInIsr,
    /// A blocking call was made before the kernel started
    BlockBeforeStart,
    /// A blocking call was made with interrupts masked by a critical section
    BlockInCriticalSection(ThreadId),
    /// A thread flagged essential exited or was aborted
    EssentialThreadExited(ThreadId),
    /// `sched_unlock` without a matching `sched_lock`
    SchedUnlockUnbalanced(ThreadId),
    /// `isr_exit` without a matching `isr_enter`
    IsrExitUnbalanced,
    /// Every thread is blocked and no timeout is pending
    Deadlock,
    /// Stack canary overwritten
    StackOverflow(ThreadId),
    /// A thread body panicked on the host port
    ThreadPanicked,
}

// Display implementations for user-friendly error messages

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::Spawn(e) => write!(f, "Thread spawn error: {}", e),
            ThreadError::Join(e) => write!(f, "Thread join error: {}", e),
            ThreadError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
            ThreadError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NotInitialized => write!(f, "Kernel not started"),
            SpawnError::OutOfMemory => write!(f, "Out of memory for thread stack"),
            SpawnError::TooManyThreads => write!(f, "Maximum number of threads reached"),
            SpawnError::InvalidStackSize(size) => write!(f, "Invalid stack size: {}", size),
            SpawnError::InvalidPriority(prio) => write!(f, "Invalid priority: {}", prio),
            SpawnError::Arch(e) => write!(f, "Architecture error: {}", e),
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::InvalidHandle => write!(f, "Invalid thread handle"),
            JoinError::Busy => write!(f, "Thread is still running"),
            JoinError::Timeout => write!(f, "Join operation timed out"),
            JoinError::Deadlock => write!(f, "Join would deadlock"),
            JoinError::InIsr => write!(f, "Join called from interrupt context"),
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::WouldBlock => write!(f, "Operation would block"),
            SyncError::Busy => write!(f, "Resource busy"),
            SyncError::TimedOut => write!(f, "Wait timed out"),
            SyncError::Aborted => write!(f, "Wait aborted"),
            SyncError::InvalidArgument => write!(f, "Invalid argument"),
            SyncError::LimitReached => write!(f, "Count limit reached"),
            SyncError::NotOwner => write!(f, "Caller does not own the lock"),
            SyncError::NotLocked => write!(f, "Lock is not held"),
            SyncError::InIsr => write!(f, "Not permitted in interrupt context"),
        }
    }
}

impl fmt::Display for InvalidOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidOperationError::InvalidHandle => write!(f, "Invalid thread handle"),
            InvalidOperationError::IdleThread => write!(f, "Not permitted on the idle thread"),
            InvalidOperationError::InvalidPriority(prio) => write!(f, "Invalid priority: {}", prio),
            InvalidOperationError::StillRunning => write!(f, "Thread has not exited"),
            InvalidOperationError::AlreadyStarted => write!(f, "Kernel already started"),
        }
    }
}

impl fmt::Display for ArchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchError::ContextInit => write!(f, "Failed to build initial thread context"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TooFewThreads(n) => write!(f, "Thread table too small: {}", n),
            ConfigError::TooManyThreads(n) => write!(f, "Thread table too large: {}", n),
            ConfigError::InvalidCeiling(prio) => write!(f, "Invalid priority ceiling: {}", prio),
            ConfigError::InvalidMainPriority(prio) => write!(f, "Invalid main thread priority: {}", prio),
        }
    }
}

impl fmt::Display for RingBufError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingBufError::Empty => write!(f, "Ring buffer empty"),
            RingBufError::NoSpace => write!(f, "Not enough space in ring buffer"),
            RingBufError::TooLarge => write!(f, "Item too large"),
            RingBufError::TooSmall { needed } => write!(f, "Buffer too small, item needs {} words", needed),
            RingBufError::FinishExceedsClaim { requested, claimed } => {
                write!(f, "Finish of {} bytes exceeds claim of {} bytes", requested, claimed)
            }
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::BlockInIsr => write!(f, "blocking call from interrupt context"),
            FatalError::BlockBeforeStart => write!(f, "blocking call before the kernel started"),
            FatalError::BlockInCriticalSection(id) => {
                write!(f, "thread {} blocked inside a critical section", id)
            }
            FatalError::EssentialThreadExited(id) => write!(f, "essential thread {} exited", id),
            FatalError::SchedUnlockUnbalanced(id) => {
                write!(f, "thread {} unlocked the scheduler without locking it", id)
            }
            FatalError::IsrExitUnbalanced => write!(f, "interrupt exit without matching entry"),
            FatalError::Deadlock => write!(f, "all threads blocked with no pending timeout"),
            FatalError::StackOverflow(id) => write!(f, "stack canary of thread {} overwritten", id),
            FatalError::ThreadPanicked => write!(f, "thread body panicked"),
        }
    }
}

// Conversion implementations for ergonomic error handling

impl From<SpawnError> for ThreadError {
    fn from(error: SpawnError) -> Self {
        ThreadError::Spawn(error)
    }
}

impl From<JoinError> for ThreadError {
    fn from(error: JoinError) -> Self {
        ThreadError::Join(error)
    }
}

impl From<InvalidOperationError> for ThreadError {
    fn from(error: InvalidOperationError) -> Self {
        ThreadError::InvalidOperation(error)
    }
}

impl From<ConfigError> for ThreadError {
    fn from(error: ConfigError) -> Self {
        ThreadError::Config(error)
    }
}

impl From<ArchError> for SpawnError {
    fn from(error: ArchError) -> Self {
        SpawnError::Arch(error)
    }
}

impl From<SyncError> for JoinError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::WouldBlock | SyncError::Busy => JoinError::Busy,
            SyncError::InIsr => JoinError::InIsr,
            _ => JoinError::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_messages() {
        assert_eq!(SyncError::TimedOut.to_string(), "Wait timed out");
        assert_eq!(
            ThreadError::from(SpawnError::InvalidPriority(99)).to_string(),
            "Thread spawn error: Invalid priority: 99"
        );
        assert_eq!(
            RingBufError::TooSmall { needed: 3 }.to_string(),
            "Buffer too small, item needs 3 words"
        );
    }

    #[test]
    fn test_join_error_from_sync_error() {
        assert_eq!(JoinError::from(SyncError::TimedOut), JoinError::Timeout);
        assert_eq!(JoinError::from(SyncError::Busy), JoinError::Busy);
        assert_eq!(JoinError::from(SyncError::InIsr), JoinError::InIsr);
    }
}
