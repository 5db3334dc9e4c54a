//! Offline reconstruction of a ring buffer.
//!
//! An [`Epilog`] pairs one snapshot of buffer bytes with the metadata and
//! string tables needed to interpret it. Nothing in the bytes is trusted
//! beyond what progress markers and size chains prove:
//!
//! - The forward region runs from the front of the buffer to the first
//!   record that is not `used`. The same scan records how far the writer may
//!   have touched, including the partly written record where it stopped.
//! - The backward region ends at the most recent wraparound point, located by
//!   the varint trailer at the end of the buffer, and extends toward the
//!   front by following trailing sizes. It never reaches into bytes the
//!   forward scan claimed.
//!
//! # Invariants
//!
//! - Both regions start and end on record boundaries.
//! - The regions never overlap.
//! - Decoding the same bytes always yields the same regions.

use std::borrow::Cow;
use std::ops::Range;
use std::path::Path;

use crate::error::Result;
use crate::log_reader::LogReader;
use crate::metadata::{Metadata, Timing};
use crate::ring_buffer::{Progress, CONTINUATION, FRAMING_BYTES, PROGRESS_BYTES, SIZE_BYTES};
use crate::store;
use crate::string_registry::{StringBlock, StringTable};

/// Byte ranges of a buffer that hold provably complete records.
///
/// Each range starts at a record's progress byte and ends at the progress
/// byte following its last record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Regions {
    pub forward: Option<Range<usize>>,
    pub backward: Option<Range<usize>>,
}

/// Finds the forward and backward regions of `bytes`.
pub fn read_regions(bytes: &[u8]) -> Regions {
    let (forward, claimed) = scan_forward(bytes);
    let backward = scan_backward(bytes, claimed);
    Regions { forward, backward }
}

fn read_size(bytes: &[u8], at: usize) -> Option<usize> {
    let field = bytes.get(at..at.checked_add(SIZE_BYTES)?)?;
    let mut size = [0u8; SIZE_BYTES];
    size.copy_from_slice(field);
    Some(u32::from_le_bytes(size) as usize)
}

/// Walks `used` records from the front.
///
/// Returns the forward region and the end of the bytes the writer may have
/// touched: the state of the first record that is not `used` tells how much
/// of its framing can already have been written.
fn scan_forward(bytes: &[u8]) -> (Option<Range<usize>>, usize) {
    let len = bytes.len();
    let mut position = 0;

    let claimed = loop {
        let Some(progress) = bytes.get(position).copied().and_then(Progress::from_byte) else {
            break position.saturating_add(PROGRESS_BYTES);
        };

        let sized = position + PROGRESS_BYTES + SIZE_BYTES;
        let payload_end = || read_size(bytes, position + PROGRESS_BYTES).map(|size| sized + size);

        match progress {
            Progress::Unused => break position + PROGRESS_BYTES,
            Progress::Preparing => break sized,
            Progress::Prepared => break payload_end().unwrap_or(len),
            Progress::Completing => {
                break payload_end().map_or(len, |end| end + SIZE_BYTES);
            }
            Progress::Completed => {
                break payload_end().map_or(len, |end| end + SIZE_BYTES + PROGRESS_BYTES);
            }
            Progress::Used => {
                let Some(size) = read_size(bytes, position + PROGRESS_BYTES) else {
                    break len;
                };
                let next = position + size + FRAMING_BYTES;
                if next >= len {
                    // The next progress byte would lie outside the buffer.
                    break len;
                }
                position = next;
            }
        }
    };

    let forward = (position > 0).then_some(0..position);
    (forward, claimed.min(len))
}

/// Reads the wraparound trailer and walks trailing sizes back toward `claimed`.
fn scan_backward(bytes: &[u8], claimed: usize) -> Option<Range<usize>> {
    let len = bytes.len();
    let mut distance = 0u64;
    let mut shift = 0u32;
    let mut cursor = len;

    loop {
        cursor = cursor.checked_sub(1)?;
        if cursor < claimed || shift >= u64::BITS {
            return None;
        }
        let byte = bytes[cursor];
        distance |= u64::from(byte & !CONTINUATION) << shift;
        shift += 7;
        if byte & CONTINUATION == 0 {
            break;
        }
    }

    let distance = usize::try_from(distance).ok()?.checked_add(1)?;
    let end = len.checked_sub(distance)?;
    if end < claimed {
        return None;
    }

    let mut start = end;
    while let Some(header) = previous_record(bytes, start, claimed) {
        start = header;
    }
    (start < end).then_some(start..end)
}

/// Header of the record ending at `boundary`, if it is complete and lies
/// entirely outside the claimed front of the buffer.
fn previous_record(bytes: &[u8], boundary: usize, claimed: usize) -> Option<usize> {
    let trailing = read_size(bytes, boundary.checked_sub(SIZE_BYTES)?)?;
    if trailing == 0 {
        return None;
    }
    let header = boundary.checked_sub(trailing)?;
    if header < claimed || bytes[header] != Progress::Used as u8 {
        return None;
    }
    let leading = read_size(bytes, header + PROGRESS_BYTES)?;
    (leading.checked_add(FRAMING_BYTES)? == trailing).then_some(header)
}

/// A buffer snapshot together with everything needed to decode it.
pub struct Epilog<'a> {
    buffer: Cow<'a, [u8]>,
    regions: Regions,
    bit_width: u32,
    loggers: Vec<String>,
    timing: Timing,
    strings: StringTable,
}

impl<'a> Epilog<'a> {
    /// Builds a decoder over `buffer` using `metadata` and the string tables
    /// it describes.
    ///
    /// Fails if the metadata has an unsupported version or bit width.
    pub fn new(
        buffer: impl Into<Cow<'a, [u8]>>,
        metadata: &Metadata,
        strings: &[StringBlock],
    ) -> Result<Self> {
        metadata.validate()?;
        let buffer = buffer.into();
        let regions = read_regions(&buffer);
        let strings =
            StringTable::from_blocks(strings.iter().map(|block| (block.address, &block.bytes[..])));

        Ok(Self {
            buffer,
            regions,
            bit_width: metadata.bit_width,
            loggers: metadata.loggers.clone(),
            timing: metadata.timing,
            strings,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn regions(&self) -> &Regions {
        &self.regions
    }

    pub fn forward_region(&self) -> Option<Range<usize>> {
        self.regions.forward.clone()
    }

    pub fn backward_region(&self) -> Option<Range<usize>> {
        self.regions.backward.clone()
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub fn loggers(&self) -> &[String] {
        &self.loggers
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Decoded entries, oldest first.
    pub fn entries(&self) -> LogReader<'_> {
        LogReader::new(self)
    }
}

impl Epilog<'static> {
    /// Reads a chronicle directory written by a [`DirectoryStore`](crate::store::DirectoryStore).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let (metadata, buffer, strings) = store::load(dir.as_ref())?;
        Self::new(buffer, &metadata, &strings)
    }
}
