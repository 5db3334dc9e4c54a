//! Fixed-size circular record buffer.
//!
//! A `RingBuffer` owns a byte region (heap or memory-mapped file) and appends
//! self-framed records to it. Every record is laid out as
//!
//! ```text
//! [progress:u8][size:u32][payload: size bytes][trailing_size:u32][next progress:u8]
//! ```
//!
//! `size` is the payload length and `trailing_size` the distance from this
//! record's progress byte to the next one, so the same bytes can be walked
//! forward (leading sizes) or backward (trailing sizes). The progress byte is
//! the only field a reader can sample without tearing, so every state change
//! of a record goes through it in a fixed order.
//!
//! When a record does not fit in the space left, the writer records the
//! distance back to the last record boundary as a ULEB128 varint growing
//! backward from the end of the buffer, then restarts at the front.

use std::ops::{Deref, DerefMut, Range};
use std::sync::atomic::{fence, Ordering};

use memmap2::MmapMut;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Integer type used for both size fields of a record.
pub type Size = u32;

/// Bytes taken by a progress marker.
pub const PROGRESS_BYTES: usize = 1;

/// Bytes taken by each size field.
pub const SIZE_BYTES: usize = std::mem::size_of::<Size>();

/// Framing around a payload: leading size, trailing size and the next record's progress byte.
pub const FRAMING_BYTES: usize = SIZE_BYTES + SIZE_BYTES + PROGRESS_BYTES;

/// Offset of the first record's size field; byte 0 is the initial progress byte.
pub const FIRST_OFFSET: usize = PROGRESS_BYTES;

/// Smallest usable buffer: a single progress byte.
pub const MIN_CAPACITY: usize = PROGRESS_BYTES;

/// Continuation bit of a ULEB128 byte.
pub(crate) const CONTINUATION: u8 = 0b1000_0000;

/// Lifecycle of a record, stored in its leading progress byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Progress {
    Unused = 0,
    Preparing = 1,
    Prepared = 2,
    Completing = 3,
    Completed = 4,
    Used = 5,
}

impl Progress {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Progress::Unused),
            1 => Some(Progress::Preparing),
            2 => Some(Progress::Prepared),
            3 => Some(Progress::Completing),
            4 => Some(Progress::Completed),
            5 => Some(Progress::Used),
            _ => None,
        }
    }
}

/// Storage behind a ring buffer.
pub enum Backing {
    /// Zero-initialized heap memory.
    Memory(Box<[u8]>),
    /// A shared, writable file mapping.
    Mapped(MmapMut),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Memory(bytes) => bytes,
            Backing::Mapped(map) => map,
        }
    }
}

impl DerefMut for Backing {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Backing::Memory(bytes) => bytes,
            Backing::Mapped(map) => map,
        }
    }
}

/// Single-writer circular buffer of self-framed records.
///
/// `checkpoint` is the position of the progress byte for the record being
/// written (or about to be), `offset` the next byte to hand out. Outside of a
/// reservation `offset == checkpoint + 1`.
///
/// # Examples
///
/// ```
/// use chronicle::ring_buffer::RingBuffer;
///
/// let mut ring = RingBuffer::in_memory(64).unwrap();
/// let payload = ring.reserve(3).unwrap();
/// payload.copy_from_slice(b"abc");
/// ring.complete();
///
/// assert_eq!(ring.checkpoint(), 1 + 4 + 3 + 4);
/// ```
pub struct RingBuffer {
    bytes: Backing,
    offset: usize,
    checkpoint: usize,
    reserved: bool,
}

impl RingBuffer {
    /// Wraps existing storage. The storage is expected to be zeroed (a fresh
    /// allocation or a newly created file); nothing is read from it.
    pub fn new(bytes: Backing) -> Result<Self> {
        if bytes.len() < MIN_CAPACITY {
            return Err(Error::BufferTooSmall {
                capacity: bytes.len(),
                minimum: MIN_CAPACITY,
            });
        }
        Ok(Self {
            bytes,
            offset: FIRST_OFFSET,
            checkpoint: 0,
            reserved: false,
        })
    }

    /// Creates a heap-backed buffer of `capacity` zero bytes.
    pub fn in_memory(capacity: usize) -> Result<Self> {
        Self::new(Backing::Memory(vec![0u8; capacity].into_boxed_slice()))
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn checkpoint(&self) -> usize {
        self.checkpoint
    }

    /// Raw buffer contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total bytes a record with a `size`-byte payload occupies past its progress byte.
    pub fn framed_size(size: usize) -> Option<usize> {
        size.checked_add(FRAMING_BYTES)
    }

    /// Reserves a payload span of exactly `size` bytes.
    ///
    /// Returns `None` when the record cannot fit even in an empty buffer; in
    /// that case nothing in the buffer is touched. Every successful call must
    /// be followed by [`complete`](Self::complete).
    pub fn reserve(&mut self, size: usize) -> Option<&mut [u8]> {
        let span = self.reserve_range(size)?;
        Some(&mut self.bytes[span])
    }

    /// Same as [`reserve`](Self::reserve) but hands back the payload position.
    pub fn reserve_range(&mut self, size: usize) -> Option<Range<usize>> {
        debug_assert!(!self.reserved, "reserve called twice without complete");

        let leading = Size::try_from(size).ok()?;
        let total = Self::framed_size(size)?;
        let fits = self
            .offset
            .checked_add(total)
            .is_some_and(|end| end <= self.capacity());

        if !fits && !self.fits_after_wraparound(total) {
            debug!(size, capacity = self.capacity(), "dropping record larger than the buffer");
            return None;
        }

        self.set_progress(Progress::Preparing);
        if !fits && !self.wraparound(total) {
            return None;
        }

        self.bytes[self.offset..self.offset + SIZE_BYTES].copy_from_slice(&leading.to_le_bytes());
        self.set_progress(Progress::Prepared);

        let start = self.offset + SIZE_BYTES;
        self.offset = start + size + SIZE_BYTES + PROGRESS_BYTES;
        self.reserved = true;
        Some(start..start + size)
    }

    /// Mutable view of a span handed out by [`reserve_range`](Self::reserve_range).
    pub(crate) fn span_mut(&mut self, span: Range<usize>) -> &mut [u8] {
        debug_assert!(self.reserved && span.end < self.offset);
        &mut self.bytes[span]
    }

    fn fits_after_wraparound(&self, total: usize) -> bool {
        FIRST_OFFSET + total < self.capacity()
    }

    /// Writes the wraparound trailer and restarts at the front of the buffer.
    ///
    /// The trailer is `end - checkpoint - 1` as ULEB128, least significant
    /// group at the last byte of the buffer. Returns whether a record of
    /// `total` framed bytes fits from the front.
    fn wraparound(&mut self, total: usize) -> bool {
        let end = self.capacity();
        let mut distance = (end - self.checkpoint - 1) as u64;
        let mut cursor = end;

        trace!(checkpoint = self.checkpoint, distance, "wrapping around");

        loop {
            cursor -= 1;
            self.bytes[cursor] = (distance & 0b0111_1111) as u8 | CONTINUATION;
            distance >>= 7;
            if distance == 0 {
                break;
            }
        }
        self.bytes[cursor] &= !CONTINUATION;

        self.checkpoint = 0;
        self.offset = FIRST_OFFSET;
        // The front record is about to be reused; it stops being `used` before its size changes.
        self.set_progress(Progress::Preparing);

        self.fits_after_wraparound(total)
    }

    /// Closes the record opened by the last [`reserve`](Self::reserve).
    ///
    /// Each step is one store; a reader sampling the progress bytes at any
    /// point sees either a fully committed record or one it must not trust,
    /// and the byte after a `used` record is always `unused`.
    pub fn complete(&mut self) {
        if !self.reserved {
            debug_assert!(false, "complete called without a reservation");
            return;
        }
        let old = self.checkpoint;
        let new = self.offset - PROGRESS_BYTES;

        self.set_progress(Progress::Completing);

        let size = (new - old) as Size;
        self.bytes[new - SIZE_BYTES..new].copy_from_slice(&size.to_le_bytes());

        self.set_progress(Progress::Completed);

        self.checkpoint = new;
        self.set_progress(Progress::Unused);
        self.checkpoint = old;
        self.set_progress(Progress::Used);

        self.checkpoint = new;
        self.reserved = false;
    }

    fn set_progress(&mut self, progress: Progress) {
        fence(Ordering::Release);
        self.bytes[self.checkpoint] = progress as u8;
        fence(Ordering::Release);
    }

    /// Flushes a mapped buffer to its file. No-op for heap buffers.
    pub fn flush(&self) -> Result<()> {
        if let Backing::Mapped(map) = &self.bytes {
            map.flush()?;
        }
        Ok(())
    }
}
