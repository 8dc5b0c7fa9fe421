//! General-purpose ring buffer with byte and item modes.
//!
//! Byte mode moves raw bytes, either by copy (`put`/`get`) or in place through
//! the two-phase claim/finish protocol. Item mode prefixes each record with a
//! one-word header so typed records of different lengths can share a buffer.
//!
//! Each side keeps three free-running `u32` cursors: `head` (end of the
//! claimed area), `tail` (end of the finished area) and `base` (cursor value
//! of storage offset zero, advanced by `N` every time the side wraps). The
//! producer owns the `put` cursors and the consumer the `get` cursors.
//!
//! At most one producer and one consumer may use a buffer at a time; the
//! handle types enforce this. Several producers or consumers must be
//! serialized by the caller, for example by sharing one handle behind a
//! mutex.
//!
//! ```
//! use priority_threads::sync::RingBuffer;
//!
//! let mut ring: RingBuffer<16> = RingBuffer::new();
//! let (mut tx, mut rx) = ring.split();
//!
//! assert_eq!(tx.put(b"ABCDEFGH"), 8);
//! let mut out = [0u8; 8];
//! assert_eq!(rx.get(&mut out), 8);
//! assert_eq!(&out, b"ABCDEFGH");
//! ```

use core::cell::UnsafeCell;
use core::marker::PhantomData;

use portable_atomic::{AtomicU32, Ordering};

use super::atomic::AtomicVal;
use crate::errors::RingBufError;

const PRODUCER_BIT: usize = 0;
const CONSUMER_BIT: usize = 1;

/// Size of an item header in bytes.
pub const ITEM_HEADER_BYTES: usize = 4;

/// Largest item payload in 32-bit words.
pub const MAX_ITEM_WORDS: usize = u8::MAX as usize;

#[repr(C, align(4))]
struct Storage<const N: usize>([u8; N]);

#[derive(Debug, Default)]
struct Cursors {
    head: AtomicU32,
    tail: AtomicU32,
    base: AtomicU32,
}

impl Cursors {
    const fn new() -> Self {
        Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            base: AtomicU32::new(0),
        }
    }

    fn reset(&mut self, value: u32) {
        *self.head.get_mut() = value;
        *self.tail.get_mut() = value;
        *self.base.get_mut() = value;
    }
}

/// Byte ring buffer of capacity `N`.
pub struct RingBuffer<const N: usize> {
    storage: UnsafeCell<Storage<N>>,
    put: Cursors,
    get: Cursors,
    roles: AtomicVal,
}

unsafe impl<const N: usize> Send for RingBuffer<N> {}
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    const SIZE: u32 = {
        assert!(N > 0, "ring buffer capacity must be non-zero");
        assert!(N <= (u32::MAX / 2) as usize, "ring buffer capacity too large");
        N as u32
    };

    /// Create an empty ring buffer.
    pub const fn new() -> Self {
        let _ = Self::SIZE;
        Self {
            storage: UnsafeCell::new(Storage([0; N])),
            put: Cursors::new(),
            get: Cursors::new(),
            roles: AtomicVal::new(0),
        }
    }

    /// Capacity in bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes that can still be claimed or put.
    pub fn space_available(&self) -> usize {
        let get_tail = self.get.tail.load(Ordering::Acquire);
        let put_head = self.put.head.load(Ordering::Acquire);
        (Self::SIZE - put_head.wrapping_sub(get_tail)) as usize
    }

    /// Bytes that have been finished by the producer and not yet finished by
    /// the consumer. An open get claim still counts.
    pub fn bytes_available(&self) -> usize {
        let get_tail = self.get.tail.load(Ordering::Acquire);
        let put_tail = self.put.tail.load(Ordering::Acquire);
        put_tail.wrapping_sub(get_tail) as usize
    }

    /// Whether no finished data is waiting.
    pub fn is_empty(&self) -> bool {
        self.bytes_available() == 0
    }

    /// Discard all data and outstanding claims.
    pub fn reset(&mut self) {
        self.reset_to(0);
    }

    fn reset_to(&mut self, value: u32) {
        self.put.reset(value);
        self.get.reset(value);
    }

    /// Split into producer and consumer handles.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        self.roles.set((1 << PRODUCER_BIT) | (1 << CONSUMER_BIT));
        let ring: &Self = self;
        (Producer::new(ring), Consumer::new(ring))
    }

    /// Claim the producer role of a shared buffer.
    ///
    /// # Returns
    ///
    /// `None` if a producer handle already exists.
    pub fn producer(&self) -> Option<Producer<'_, N>> {
        if self.roles.test_and_set_bit(PRODUCER_BIT) {
            None
        } else {
            Some(Producer::new(self))
        }
    }

    /// Claim the consumer role of a shared buffer.
    ///
    /// # Returns
    ///
    /// `None` if a consumer handle already exists.
    pub fn consumer(&self) -> Option<Consumer<'_, N>> {
        if self.roles.test_and_set_bit(CONSUMER_BIT) {
            None
        } else {
            Some(Consumer::new(self))
        }
    }

    /// Reserve up to `size` contiguous bytes after the side's head.
    ///
    /// Returns the storage offset and the granted length, which is cut at the
    /// end of storage.
    fn area_claim(ring: &Cursors, size: u32) -> (usize, u32) {
        let head = ring.head.load(Ordering::Relaxed);
        let mut offset = head.wrapping_sub(ring.base.load(Ordering::Relaxed));
        if offset >= Self::SIZE {
            // base not adjusted yet: the previous claim ended exactly at the wrap
            offset -= Self::SIZE;
        }
        let size = size.min(Self::SIZE - offset);
        ring.head.store(head.wrapping_add(size), Ordering::Release);
        (offset as usize, size)
    }

    /// Commit `size` claimed bytes and drop the rest of the claim.
    fn area_finish(ring: &Cursors, size: usize) -> Result<(), RingBufError> {
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Relaxed);
        let claimed = head.wrapping_sub(tail);
        let requested = u32::try_from(size).unwrap_or(u32::MAX);
        if requested > claimed {
            log::error!(
                "ring buffer finish of {} bytes exceeds claim of {} bytes",
                size,
                claimed
            );
            return Err(RingBufError::FinishExceedsClaim {
                requested: size,
                claimed: claimed as usize,
            });
        }

        let tail = tail.wrapping_add(requested);
        ring.head.store(tail, Ordering::Relaxed);
        let base = ring.base.load(Ordering::Relaxed);
        if tail.wrapping_sub(base) >= Self::SIZE {
            ring.base.store(base.wrapping_add(Self::SIZE), Ordering::Relaxed);
        }
        ring.tail.store(tail, Ordering::Release);
        Ok(())
    }

    fn area(&self, offset: usize, len: u32) -> *mut u8 {
        debug_assert!(offset + len as usize <= N);
        unsafe { self.storage.get().cast::<u8>().add(offset) }
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for RingBuffer<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &N)
            .field("bytes_available", &self.bytes_available())
            .field("space_available", &self.space_available())
            .finish()
    }
}

fn clamp_u32(size: usize) -> u32 {
    u32::try_from(size).unwrap_or(u32::MAX)
}

/// Producer side of a [`RingBuffer`].
pub struct Producer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
    _not_sync: PhantomData<core::cell::Cell<()>>,
}

impl<'a, const N: usize> Producer<'a, N> {
    fn new(ring: &'a RingBuffer<N>) -> Self {
        Self {
            ring,
            _not_sync: PhantomData,
        }
    }

    /// Claim up to `size` contiguous bytes of free space for in-place writing.
    ///
    /// The returned slice may be shorter than `size` if the buffer is nearly
    /// full or the free area wraps; claim again to get the remainder.
    pub fn put_claim(&mut self, size: usize) -> &mut [u8] {
        let ring = self.ring;
        let get_tail = ring.get.tail.load(Ordering::Acquire);
        let put_head = ring.put.head.load(Ordering::Relaxed);
        let free = RingBuffer::<N>::SIZE - put_head.wrapping_sub(get_tail);
        let (offset, len) = RingBuffer::<N>::area_claim(&ring.put, clamp_u32(size).min(free));
        unsafe { core::slice::from_raw_parts_mut(ring.area(offset, len), len as usize) }
    }

    /// Commit `size` bytes of the outstanding claims, abandoning the rest.
    ///
    /// # Errors
    ///
    /// [`RingBufError::FinishExceedsClaim`] if `size` is larger than the
    /// claimed amount; the cursors are left untouched.
    pub fn put_finish(&mut self, size: usize) -> Result<(), RingBufError> {
        RingBuffer::<N>::area_finish(&self.ring.put, size)
    }

    /// Copy as much of `data` as fits.
    ///
    /// # Returns
    ///
    /// Number of bytes written, which is less than `data.len()` when the
    /// buffer fills up.
    pub fn put(&mut self, data: &[u8]) -> usize {
        let mut total = 0;
        let mut rest = data;
        loop {
            let area = self.put_claim(rest.len());
            let len = area.len();
            area.copy_from_slice(&rest[..len]);
            total += len;
            rest = &rest[len..];
            if rest.is_empty() || len == 0 {
                break;
            }
        }
        let finished = self.put_finish(total);
        debug_assert!(finished.is_ok());
        total
    }

    /// See [`RingBuffer::space_available`].
    pub fn space_available(&self) -> usize {
        self.ring.space_available()
    }
}

impl<'a, const N: usize> Drop for Producer<'a, N> {
    fn drop(&mut self) {
        self.ring.roles.clear_bit(PRODUCER_BIT);
    }
}

/// Consumer side of a [`RingBuffer`].
pub struct Consumer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
    _not_sync: PhantomData<core::cell::Cell<()>>,
}

impl<'a, const N: usize> Consumer<'a, N> {
    fn new(ring: &'a RingBuffer<N>) -> Self {
        Self {
            ring,
            _not_sync: PhantomData,
        }
    }

    /// Claim up to `size` contiguous bytes of data for in-place reading.
    pub fn get_claim(&mut self, size: usize) -> &[u8] {
        let ring = self.ring;
        let put_tail = ring.put.tail.load(Ordering::Acquire);
        let get_head = ring.get.head.load(Ordering::Relaxed);
        let available = put_tail.wrapping_sub(get_head);
        let (offset, len) = RingBuffer::<N>::area_claim(&ring.get, clamp_u32(size).min(available));
        unsafe { core::slice::from_raw_parts(ring.area(offset, len), len as usize) }
    }

    /// Consume `size` bytes of the outstanding claims and return the rest.
    ///
    /// `get_finish(0)` abandons the claims, leaving the data in place.
    ///
    /// # Errors
    ///
    /// [`RingBufError::FinishExceedsClaim`] if `size` is larger than the
    /// claimed amount; the cursors are left untouched.
    pub fn get_finish(&mut self, size: usize) -> Result<(), RingBufError> {
        RingBuffer::<N>::area_finish(&self.ring.get, size)
    }

    /// Copy up to `out.len()` bytes out of the buffer.
    ///
    /// # Returns
    ///
    /// Number of bytes read.
    pub fn get(&mut self, out: &mut [u8]) -> usize {
        let total = self.drain(Some(out), usize::MAX);
        let finished = self.get_finish(total);
        debug_assert!(finished.is_ok());
        total
    }

    /// Discard up to `size` bytes.
    ///
    /// # Returns
    ///
    /// Number of bytes discarded.
    pub fn skip(&mut self, size: usize) -> usize {
        let total = self.drain(None, size);
        let finished = self.get_finish(total);
        debug_assert!(finished.is_ok());
        total
    }

    /// Copy up to `out.len()` bytes without consuming them.
    ///
    /// # Returns
    ///
    /// Number of bytes copied. Repeated calls return the same data.
    pub fn peek(&mut self, out: &mut [u8]) -> usize {
        let total = self.drain(Some(out), usize::MAX);
        let abandoned = self.get_finish(0);
        debug_assert!(abandoned.is_ok());
        total
    }

    /// See [`RingBuffer::bytes_available`].
    pub fn bytes_available(&self) -> usize {
        self.ring.bytes_available()
    }

    /// See [`RingBuffer::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Claim data until `limit` bytes (or `out.len()`) are claimed or the
    /// buffer runs dry, copying into `out` if given.
    fn drain(&mut self, mut out: Option<&mut [u8]>, limit: usize) -> usize {
        let mut remaining = match &out {
            Some(out) => out.len(),
            None => limit,
        };
        let mut total = 0;
        while remaining > 0 {
            let area = self.get_claim(remaining);
            let len = area.len();
            if len == 0 {
                break;
            }
            if let Some(out) = out.as_deref_mut() {
                out[total..total + len].copy_from_slice(area);
            }
            total += len;
            remaining -= len;
        }
        total
    }
}

impl<'a, const N: usize> Drop for Consumer<'a, N> {
    fn drop(&mut self) {
        self.ring.roles.clear_bit(CONSUMER_BIT);
    }
}

/// Metadata of a record stored in an [`ItemRingBuffer`].
///
/// Stored as one header word: bits 0-15 type, bits 16-23 payload length in
/// words, bits 24-31 value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    /// Application-defined record type.
    pub item_type: u16,
    /// Small application-defined value carried in the header.
    pub value: u8,
    /// Payload length in 32-bit words.
    pub len: usize,
}

impl Item {
    fn to_header(self) -> u32 {
        u32::from(self.item_type) | ((self.len as u32 & 0xff) << 16) | (u32::from(self.value) << 24)
    }

    fn from_header(header: u32) -> Self {
        Self {
            item_type: (header & 0xffff) as u16,
            len: ((header >> 16) & 0xff) as usize,
            value: (header >> 24) as u8,
        }
    }
}

fn words_as_bytes(words: &[u32]) -> &[u8] {
    unsafe { core::slice::from_raw_parts(words.as_ptr().cast::<u8>(), words.len() * 4) }
}

fn words_as_bytes_mut(words: &mut [u32]) -> &mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), words.len() * 4) }
}

/// Ring buffer of word-aligned typed records.
///
/// `N` must be a multiple of four so a header never straddles the wrap.
pub struct ItemRingBuffer<const N: usize> {
    ring: RingBuffer<N>,
}

impl<const N: usize> ItemRingBuffer<N> {
    const WORD_ALIGNED: () = assert!(N % 4 == 0, "item ring buffer capacity must be a multiple of 4");

    /// Create an empty item buffer.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::WORD_ALIGNED;
        Self {
            ring: RingBuffer::new(),
        }
    }

    /// Capacity in bytes, headers included.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Free bytes, headers included.
    pub fn space_available(&self) -> usize {
        self.ring.space_available()
    }

    /// Stored bytes, headers included.
    pub fn bytes_available(&self) -> usize {
        self.ring.bytes_available()
    }

    /// Whether no item is stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Discard all items.
    pub fn reset(&mut self) {
        self.ring.reset();
    }

    /// Split into producer and consumer handles.
    pub fn split(&mut self) -> (ItemProducer<'_, N>, ItemConsumer<'_, N>) {
        let (producer, consumer) = self.ring.split();
        (ItemProducer { inner: producer }, ItemConsumer { inner: consumer })
    }

    /// Claim the producer role of a shared buffer.
    pub fn producer(&self) -> Option<ItemProducer<'_, N>> {
        self.ring.producer().map(|inner| ItemProducer { inner })
    }

    /// Claim the consumer role of a shared buffer.
    pub fn consumer(&self) -> Option<ItemConsumer<'_, N>> {
        self.ring.consumer().map(|inner| ItemConsumer { inner })
    }
}

impl<const N: usize> Default for ItemRingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side of an [`ItemRingBuffer`].
pub struct ItemProducer<'a, const N: usize> {
    inner: Producer<'a, N>,
}

impl<'a, const N: usize> ItemProducer<'a, N> {
    /// Store one record.
    ///
    /// # Errors
    ///
    /// - [`RingBufError::TooLarge`] if `data` is longer than [`MAX_ITEM_WORDS`]
    /// - [`RingBufError::NoSpace`] if header and payload do not fit
    pub fn put(&mut self, item_type: u16, value: u8, data: &[u32]) -> Result<(), RingBufError> {
        if data.len() > MAX_ITEM_WORDS {
            return Err(RingBufError::TooLarge);
        }
        let payload = words_as_bytes(data);
        let total = ITEM_HEADER_BYTES + payload.len();
        if total > self.inner.space_available() {
            return Err(RingBufError::NoSpace);
        }

        let item = Item {
            item_type,
            value,
            len: data.len(),
        };
        let header = self.inner.put_claim(ITEM_HEADER_BYTES);
        header.copy_from_slice(&item.to_header().to_ne_bytes());

        let mut rest = payload;
        while !rest.is_empty() {
            let area = self.inner.put_claim(rest.len());
            let len = area.len();
            area.copy_from_slice(&rest[..len]);
            rest = &rest[len..];
        }
        self.inner.put_finish(total)
    }

    /// See [`RingBuffer::space_available`].
    pub fn space_available(&self) -> usize {
        self.inner.space_available()
    }
}

/// Consumer side of an [`ItemRingBuffer`].
pub struct ItemConsumer<'a, const N: usize> {
    inner: Consumer<'a, N>,
}

impl<'a, const N: usize> ItemConsumer<'a, N> {
    /// Take the oldest record, copying its payload into the front of `data`.
    ///
    /// # Errors
    ///
    /// - [`RingBufError::Empty`] if no record is stored
    /// - [`RingBufError::TooSmall`] if `data` cannot hold the payload; the
    ///   record stays in the buffer
    pub fn get(&mut self, data: &mut [u32]) -> Result<Item, RingBufError> {
        let item = self.claim_header()?;
        if item.len > data.len() {
            self.inner.get_finish(0)?;
            return Err(RingBufError::TooSmall { needed: item.len });
        }
        let copied = self.inner.drain(Some(words_as_bytes_mut(&mut data[..item.len])), 0);
        debug_assert_eq!(copied, item.len * 4);
        self.inner.get_finish(ITEM_HEADER_BYTES + copied)?;
        Ok(item)
    }

    /// Drop the oldest record without copying it.
    pub fn skip(&mut self) -> Result<Item, RingBufError> {
        let item = self.claim_header()?;
        let skipped = self.inner.drain(None, item.len * 4);
        self.inner.get_finish(ITEM_HEADER_BYTES + skipped)?;
        Ok(item)
    }

    /// Whether no record is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn claim_header(&mut self) -> Result<Item, RingBufError> {
        if self.inner.is_empty() {
            return Err(RingBufError::Empty);
        }
        let area = self.inner.get_claim(ITEM_HEADER_BYTES);
        let mut raw = [0u8; ITEM_HEADER_BYTES];
        raw.copy_from_slice(area);
        Ok(Item::from_header(u32::from_ne_bytes(raw)))
    }
}
