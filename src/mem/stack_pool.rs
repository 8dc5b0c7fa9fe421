//! Stack pool allocator for thread stacks.
//!
//! Stacks come in a few size classes and are recycled through per-class free
//! lists. A stack can also wrap caller-provided static memory, which is never
//! returned to the pool.

extern crate alloc;

use alloc::alloc::{alloc, dealloc, Layout};
use alloc::vec::Vec;
use core::ptr::NonNull;

use portable_atomic::{AtomicUsize, Ordering};
use spin::Mutex;

/// Stack alignment; also the alignment of pool allocations.
const STACK_ALIGN: usize = 16;

/// Pattern written at the lowest word of every stack.
pub const STACK_CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Stack size classes for the pool allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackSizeClass {
    /// Small stack: 4 KiB
    Small = 4096,
    /// Medium stack: 16 KiB
    Medium = 16384,
    /// Large stack: 64 KiB
    Large = 65536,
    /// Extra large stack: 256 KiB
    ExtraLarge = 262144,
}

impl StackSizeClass {
    const ALL: [Self; 4] = [Self::Small, Self::Medium, Self::Large, Self::ExtraLarge];

    /// Size in bytes.
    pub const fn size(self) -> usize {
        self as usize
    }

    /// Smallest class holding at least `requested_size` bytes.
    pub fn for_size(requested_size: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.size() >= requested_size)
    }

    fn index(self) -> usize {
        match self {
            Self::Small => 0,
            Self::Medium => 1,
            Self::Large => 2,
            Self::ExtraLarge => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Pool(StackSizeClass),
    Static,
}

/// Memory for one thread stack, exclusively owned by that thread.
#[derive(Debug)]
pub struct Stack {
    /// Lowest address of the stack memory
    memory: NonNull<u8>,
    size: usize,
    origin: Origin,
}

// SAFETY: a `Stack` is the unique owner of its memory.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    /// Wrap caller-provided memory as a thread stack.
    ///
    /// Returns `None` if the region is too small to hold the canary.
    pub fn from_static(memory: &'static mut [u8]) -> Option<Self> {
        if memory.len() < 2 * core::mem::size_of::<u64>() {
            return None;
        }
        let size = memory.len();
        Some(Self {
            memory: NonNull::new(memory.as_mut_ptr())?,
            size,
            origin: Origin::Static,
        })
    }

    /// Usable stack size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size class, or `None` for caller-provided memory.
    pub fn size_class(&self) -> Option<StackSizeClass> {
        match self.origin {
            Origin::Pool(class) => Some(class),
            Origin::Static => None,
        }
    }

    /// Initial stack pointer: the highest address, 16-byte aligned.
    pub fn stack_bottom(&self) -> *mut u8 {
        let end = self.memory.as_ptr() as usize + self.size;
        (end & !(STACK_ALIGN - 1)) as *mut u8
    }

    /// Lowest address of the stack; overflow runs into it first.
    pub fn stack_top(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    fn canary_slot(&self) -> *mut u64 {
        let addr = self.memory.as_ptr() as usize;
        let aligned = (addr + core::mem::align_of::<u64>() - 1) & !(core::mem::align_of::<u64>() - 1);
        aligned as *mut u64
    }

    /// Write the overflow canary at the lowest word of the stack.
    pub fn install_canary(&self, canary: u64) {
        // SAFETY: the slot lies inside memory this stack owns.
        unsafe { self.canary_slot().write_volatile(canary) }
    }

    /// Whether the canary written by [`Stack::install_canary`] is intact.
    pub fn check_canary(&self, expected: u64) -> bool {
        // SAFETY: as in `install_canary`.
        unsafe { self.canary_slot().read_volatile() == expected }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Origin::Pool(class) = self.origin {
            if let Ok(layout) = Layout::from_size_align(class.size(), STACK_ALIGN) {
                // SAFETY: pool stacks are allocated with exactly this layout.
                unsafe { dealloc(self.memory.as_ptr(), layout) }
            }
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackPoolStats {
    /// Stacks obtained from the global allocator
    pub allocated: usize,
    /// Stacks handed back to the pool
    pub recycled: usize,
    /// Pool stacks currently owned by threads
    pub in_use: usize,
}

/// Pool-based allocator for thread stacks.
pub struct StackPool {
    free_stacks: [Mutex<Vec<Stack>>; 4],
    allocated: AtomicUsize,
    recycled: AtomicUsize,
    in_use: AtomicUsize,
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StackPool {
    pub const fn new() -> Self {
        Self {
            free_stacks: [
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
            ],
            allocated: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Take a stack of `size_class`, reusing a free one when possible.
    ///
    /// Returns `None` if the global allocator is out of memory.
    pub fn allocate(&self, size_class: StackSizeClass) -> Option<Stack> {
        let reused = self.free_stacks[size_class.index()].lock().pop();
        let stack = match reused {
            Some(stack) => stack,
            None => {
                let stack = Self::allocate_new(size_class)?;
                self.allocated.fetch_add(1, Ordering::AcqRel);
                stack
            }
        };
        self.in_use.fetch_add(1, Ordering::AcqRel);
        Some(stack)
    }

    /// Give a stack back. Caller-provided stacks are simply dropped.
    pub fn deallocate(&self, stack: Stack) {
        if let Origin::Pool(class) = stack.origin {
            self.free_stacks[class.index()].lock().push(stack);
            self.in_use.fetch_sub(1, Ordering::AcqRel);
            self.recycled.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Number of free stacks held for reuse.
    pub fn free_count(&self) -> usize {
        self.free_stacks.iter().map(|list| list.lock().len()).sum()
    }

    pub fn stats(&self) -> StackPoolStats {
        StackPoolStats {
            allocated: self.allocated.load(Ordering::Acquire),
            recycled: self.recycled.load(Ordering::Acquire),
            in_use: self.in_use.load(Ordering::Acquire),
        }
    }

    fn allocate_new(size_class: StackSizeClass) -> Option<Stack> {
        let layout = Layout::from_size_align(size_class.size(), STACK_ALIGN).ok()?;
        // SAFETY: the layout has a non-zero size.
        let memory = NonNull::new(unsafe { alloc(layout) })?;
        Some(Stack {
            memory,
            size: size_class.size(),
            origin: Origin::Pool(size_class),
        })
    }
}
