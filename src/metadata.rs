//! Metadata snapshot describing how to interpret a buffer.
//!
//! A snapshot is produced by the writer whenever the logger table or the
//! interned string table changes and handed to a
//! [`MetadataHandler`](crate::MetadataHandler) to persist. The decoder needs the latest one to
//! resolve logger ids, string addresses and timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Version tag of the record and metadata format.
pub const FORMAT_VERSION: u32 = 1;

/// Width in bits of native-width fields written by this process.
pub const NATIVE_BIT_WIDTH: u32 = usize::BITS;

/// Radix used for string table file names.
pub const STRING_NAME_RADIX: u32 = 16;

/// Clock calibration captured alongside a snapshot.
///
/// `timestamp` is a raw monotonic counter reading taken at the same instant
/// as the wall clock `seconds`/`nanoseconds`. Counter ticks convert to
/// nanoseconds as `ticks * numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub numerator: u32,
    pub denominator: u32,
    pub timestamp: u64,
    pub seconds: i64,
    pub nanoseconds: i64,
}

/// Location and size of one interned string table in the writer's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringDescriptor {
    pub start: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub version: u32,
    pub bit_width: u32,
    pub compressed_strings: bool,
    pub strings: Vec<StringDescriptor>,
    pub loggers: Vec<String>,
    pub timing: Timing,
}

impl Metadata {
    /// Snapshot for this process with the current format version and bit width.
    pub fn new(
        compressed_strings: bool,
        strings: Vec<StringDescriptor>,
        loggers: Vec<String>,
        timing: Timing,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            bit_width: NATIVE_BIT_WIDTH,
            compressed_strings,
            strings,
            loggers,
            timing,
        }
    }

    /// Rejects snapshots this decoder cannot interpret.
    pub fn validate(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }
        if self.bit_width != 32 && self.bit_width != 64 {
            return Err(Error::UnsupportedBitWidth(self.bit_width));
        }
        if self.timing.denominator == 0 {
            return Err(Error::InvalidTiming("denominator is zero".to_string()));
        }
        let representable = DateTime::<Utc>::MIN_UTC.timestamp()..=DateTime::<Utc>::MAX_UTC.timestamp();
        if !representable.contains(&self.timing.seconds) {
            return Err(Error::InvalidTiming(format!(
                "seconds out of range: {}",
                self.timing.seconds
            )));
        }
        if !(0..1_000_000_000).contains(&self.timing.nanoseconds) {
            return Err(Error::InvalidTiming(format!(
                "nanoseconds out of range: {}",
                self.timing.nanoseconds
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// File name for the string table starting at `address`: lowercase hex,
/// zero-padded to the width of a native pointer.
pub fn string_file_name(address: u64) -> String {
    let width = (NATIVE_BIT_WIDTH / 4) as usize;
    format!("{:0width$x}", address, width = width)
}

/// Inverse of [`string_file_name`]; `None` for names that are not hex addresses.
pub fn parse_string_file_name(name: &str) -> Option<u64> {
    u64::from_str_radix(name, STRING_NAME_RADIX).ok()
}
