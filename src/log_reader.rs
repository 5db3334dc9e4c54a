//! Reader for the records of an [`Epilog`].
//!
//! This module turns the raw field sections of records back into typed
//! values and assembles them, together with the record's timestamp and
//! logger, into [`Entry`] values.

use std::fmt;
use std::ops::Range;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use crate::chronicle::ENTRY_PREFIX_BYTES;
use crate::efficient_clock::reconcile;
use crate::epilog::Epilog;
use crate::error::DecodeError;
use crate::loggable::Tag;
use crate::ring_buffer::{FRAMING_BYTES, PROGRESS_BYTES, SIZE_BYTES};
use crate::string_registry::StringResolver;

/// A value decoded from one field of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Any signed integer, widened
    Int(i64),

    /// Any unsigned integer, widened
    UInt(u64),

    Float32(f32),

    Float64(f64),

    Bool(bool),

    /// Inline string carried in the record
    String(String),

    /// Interned string resolved through the string tables
    Literal(String),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(i) => write!(f, "{}", i),
            Field::UInt(u) => write!(f, "{}", u),
            Field::Float32(fl) => write!(f, "{}", fl),
            Field::Float64(fl) => write!(f, "{}", fl),
            Field::Bool(b) => write!(f, "{}", b),
            Field::String(s) | Field::Literal(s) => f.write_str(s),
        }
    }
}

/// Cursor over a field section.
struct FieldReader<'a> {
    bytes: &'a [u8],
    position: usize,
    bit_width: u32,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8], bit_width: u32) -> Self {
        Self {
            bytes,
            position: 0,
            bit_width,
        }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.bytes.len() - self.position;
        if needed > remaining {
            return Err(DecodeError::Truncated { needed, remaining });
        }
        let slice = &self.bytes[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn native_unsigned(&mut self) -> Result<u64, DecodeError> {
        if self.bit_width == 32 {
            Ok(u64::from(u32::from_le_bytes(self.take_array()?)))
        } else {
            Ok(u64::from_le_bytes(self.take_array()?))
        }
    }

    fn native_signed(&mut self) -> Result<i64, DecodeError> {
        if self.bit_width == 32 {
            Ok(i64::from(i32::from_le_bytes(self.take_array()?)))
        } else {
            Ok(i64::from_le_bytes(self.take_array()?))
        }
    }

    fn field(&mut self, tag: Tag, strings: &dyn StringResolver) -> Result<Field, DecodeError> {
        let field = match tag {
            Tag::I8 => Field::Int(i64::from(i8::from_le_bytes(self.take_array()?))),
            Tag::I16 => Field::Int(i64::from(i16::from_le_bytes(self.take_array()?))),
            Tag::I32 => Field::Int(i64::from(i32::from_le_bytes(self.take_array()?))),
            Tag::I64 => Field::Int(i64::from_le_bytes(self.take_array()?)),
            Tag::Isize => Field::Int(self.native_signed()?),
            Tag::U8 => Field::UInt(u64::from(self.take_array::<1>()?[0])),
            Tag::U16 => Field::UInt(u64::from(u16::from_le_bytes(self.take_array()?))),
            Tag::U32 => Field::UInt(u64::from(u32::from_le_bytes(self.take_array()?))),
            Tag::U64 => Field::UInt(u64::from_le_bytes(self.take_array()?)),
            Tag::Usize => Field::UInt(self.native_unsigned()?),
            Tag::F32 => Field::Float32(f32::from_le_bytes(self.take_array()?)),
            Tag::F64 => Field::Float64(f64::from_le_bytes(self.take_array()?)),
            Tag::Bool => match self.take_array::<1>()?[0] {
                0 => Field::Bool(false),
                1 => Field::Bool(true),
                other => return Err(DecodeError::InvalidBool(other)),
            },
            Tag::Str => {
                let len = self.native_unsigned()?;
                let remaining = self.bytes.len() - self.position;
                let len = usize::try_from(len).map_err(|_| DecodeError::Truncated {
                    needed: usize::MAX,
                    remaining,
                })?;
                let bytes = self.take(len)?;
                match std::str::from_utf8(bytes) {
                    Ok(s) => Field::String(s.to_owned()),
                    Err(_) => return Err(DecodeError::InvalidUtf8),
                }
            }
            Tag::Literal => {
                let address = self.native_unsigned()?;
                match strings.resolve(address) {
                    Some(s) => Field::Literal(s.to_owned()),
                    None => return Err(DecodeError::UnresolvedLiteral(address)),
                }
            }
        };
        Ok(field)
    }
}

/// Decodes a field section `[count][tags][payloads]`.
///
/// Corruption anywhere in the section wins over a localized failure, so a
/// caller that keeps going after a localized error is never misled about the
/// state of the bytes.
pub fn decode_fields(
    section: &[u8],
    bit_width: u32,
    strings: &dyn StringResolver,
) -> Result<Vec<Field>, DecodeError> {
    let mut reader = FieldReader::new(section, bit_width);
    let count = reader.take_array::<1>()?[0];
    let tags = reader
        .take(usize::from(count))?
        .iter()
        .map(|&byte| Tag::from_byte(byte).ok_or(DecodeError::UnknownTag(byte)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut fields = Vec::with_capacity(tags.len());
    let mut localized = None;
    for tag in tags {
        match reader.field(tag, strings) {
            Ok(field) => fields.push(field),
            Err(err) if err.is_corruption() => return Err(err),
            Err(err) => {
                localized.get_or_insert(err);
            }
        }
    }

    match localized {
        Some(err) => Err(err),
        None => Ok(fields),
    }
}

/// A single decoded log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Wall-clock time the record was written
    pub timestamp: SystemTime,

    /// Name of the logger that wrote it
    pub logger: String,

    /// Fields in the order they were written
    pub fields: Vec<Field>,
}

impl Entry {
    /// Decodes one record payload: `[timestamp:u64][logger id:u16][field section]`.
    pub fn decode(payload: &[u8], epilog: &Epilog<'_>) -> Result<Self, DecodeError> {
        if payload.len() < ENTRY_PREFIX_BYTES {
            return Err(DecodeError::Truncated {
                needed: ENTRY_PREFIX_BYTES,
                remaining: payload.len(),
            });
        }
        let (prefix, section) = payload.split_at(ENTRY_PREFIX_BYTES);
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&prefix[..8]);
        let counter = u64::from_le_bytes(counter);
        let id = u16::from_le_bytes([prefix[8], prefix[9]]);

        let fields = decode_fields(section, epilog.bit_width(), epilog.strings())?;

        let logger = usize::from(id)
            .checked_sub(1)
            .and_then(|index| epilog.loggers().get(index))
            .ok_or(DecodeError::UnknownLogger(id))?
            .clone();

        Ok(Self {
            timestamp: reconcile(epilog.timing(), counter),
            logger,
            fields,
        })
    }

    /// The rendered fields, concatenated.
    pub fn message(&self) -> String {
        self.fields.iter().map(ToString::to_string).collect()
    }

    /// Multi-line dump of the entry for troubleshooting.
    pub fn to_detailed_string(&self) -> String {
        let mut result = String::new();

        let ts = self.timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
        result.push_str(&format!(
            "Timestamp: {}.{:09} ({})\n",
            ts.as_secs(),
            ts.subsec_nanos(),
            rfc3339(self.timestamp)
        ));
        result.push_str(&format!("Logger: {}\n", self.logger));

        result.push_str(&format!("Fields ({}):\n", self.fields.len()));
        for (i, field) in self.fields.iter().enumerate() {
            result.push_str(&format!("  {}: {:?}\n", i, field));
        }
        result
    }
}

/// Seconds and nanoseconds relative to the Unix epoch, nanoseconds always positive.
fn unix_parts(time: SystemTime) -> Option<(i64, u32)> {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => Some((i64::try_from(after.as_secs()).ok()?, after.subsec_nanos())),
        Err(err) => {
            let before = err.duration();
            let secs = i64::try_from(before.as_secs()).ok()?;
            match before.subsec_nanos() {
                0 => Some((-secs, 0)),
                nanos => Some((-secs - 1, 1_000_000_000 - nanos)),
            }
        }
    }
}

/// RFC 3339 rendering, or raw `secs.nanos` when the time is outside what chrono represents.
fn rfc3339(time: SystemTime) -> String {
    let Some((secs, nanos)) = unix_parts(time) else {
        return "<unrepresentable time>".to_string();
    };
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(datetime) => datetime.to_rfc3339_opts(SecondsFormat::Micros, true),
        None => format!("{}.{:09}", secs, nanos),
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ", rfc3339(self.timestamp), self.logger)?;
        for field in &self.fields {
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}

/// Lazy sequence of entries over the proven regions of an [`Epilog`].
///
/// The backward region (records written before the last wraparound) comes
/// first, then the forward region, which is write order. A corruption error
/// is yielded once and ends the sequence; any other error only affects its
/// own entry.
///
/// # Examples
///
/// ```
/// # use chronicle::{log, Chronicle, DiscardMetadata, Epilog};
/// # use chronicle::string_registry::string_blocks;
/// let chronicle = Chronicle::in_memory(1024, DiscardMetadata).unwrap();
/// let logger = chronicle.logger("app").unwrap();
/// log!(logger, "Temperature: {} C", 25.5);
///
/// let epilog = Epilog::new(chronicle.snapshot(), &chronicle.metadata(), &string_blocks()).unwrap();
/// for entry in epilog.entries() {
///     match entry {
///         Ok(entry) => println!("{}", entry),
///         Err(err) => eprintln!("undecodable entry: {}", err),
///     }
/// }
/// ```
pub struct LogReader<'e> {
    epilog: &'e Epilog<'e>,
    pending: std::vec::IntoIter<Range<usize>>,
    current: Range<usize>,
    done: bool,
}

impl<'e> LogReader<'e> {
    pub fn new(epilog: &'e Epilog<'e>) -> Self {
        let regions: Vec<Range<usize>> = [epilog.backward_region(), epilog.forward_region()]
            .into_iter()
            .flatten()
            .collect();
        Self {
            epilog,
            pending: regions.into_iter(),
            current: 0..0,
            done: false,
        }
    }

    /// Payload span of the record whose progress byte is at `current.start`.
    fn next_record(&mut self) -> Option<Range<usize>> {
        loop {
            if self.current.start < self.current.end {
                let bytes = self.epilog.bytes();
                let header = self.current.start;
                let size_at = header + PROGRESS_BYTES;
                let mut size = [0u8; SIZE_BYTES];
                size.copy_from_slice(bytes.get(size_at..size_at + SIZE_BYTES)?);
                let size = u32::from_le_bytes(size) as usize;

                let next = header.checked_add(size)?.checked_add(FRAMING_BYTES)?;
                if next > self.current.end {
                    return None;
                }
                self.current.start = next;
                let start = size_at + SIZE_BYTES;
                return Some(start..start + size);
            }
            self.current = self.pending.next()?;
        }
    }
}

impl Iterator for LogReader<'_> {
    type Item = Result<Entry, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(payload) = self.next_record() else {
            self.done = true;
            return None;
        };

        let entry = Entry::decode(&self.epilog.bytes()[payload.clone()], self.epilog);
        if let Err(err) = &entry {
            if err.is_corruption() {
                warn!(error = %err, offset = payload.start, "stopping decode on corrupt record");
                self.done = true;
            }
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_registry::StringTable;

    fn section(tags: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![tags.len() as u8];
        bytes.extend_from_slice(tags);
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_decode_integers_and_floats() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(-5i16).to_le_bytes());
        payload.extend_from_slice(&7u64.to_le_bytes());
        payload.extend_from_slice(&1.5f32.to_le_bytes());
        let bytes = section(b"2*f", &payload);

        let fields = decode_fields(&bytes, 64, &StringTable::new()).unwrap();
        assert_eq!(fields, vec![Field::Int(-5), Field::UInt(7), Field::Float32(1.5)]);
    }

    #[test]
    fn test_native_width_follows_bit_width() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(-1i32).to_le_bytes());
        payload.extend_from_slice(&3u32.to_le_bytes());
        payload.extend_from_slice(b"abc");
        let bytes = section(b"is", &payload);

        let fields = decode_fields(&bytes, 32, &StringTable::new()).unwrap();
        assert_eq!(fields, vec![Field::Int(-1), Field::String("abc".to_string())]);
    }

    #[test]
    fn test_literal_resolution() {
        let mut table = StringTable::new();
        table.insert_block(0x1000, b"alpha\0beta\0");
        let bytes = section(b"S", &0x1006u64.to_le_bytes());
        let fields = decode_fields(&bytes, 64, &table).unwrap();
        assert_eq!(fields, vec![Field::Literal("beta".to_string())]);

        let missing = section(b"S", &0x2000u64.to_le_bytes());
        assert_eq!(
            decode_fields(&missing, 64, &table),
            Err(DecodeError::UnresolvedLiteral(0x2000))
        );
    }

    #[test]
    fn test_corruption_errors() {
        let table = StringTable::new();
        assert_eq!(
            decode_fields(&section(b"?", &[]), 64, &table),
            Err(DecodeError::UnknownTag(b'?'))
        );
        assert_eq!(
            decode_fields(&section(b"b", &[2]), 64, &table),
            Err(DecodeError::InvalidBool(2))
        );
        assert!(matches!(
            decode_fields(&section(b"8", &[1, 2]), 64, &table),
            Err(DecodeError::Truncated { needed: 8, remaining: 2 })
        ));
    }

    #[test]
    fn test_corruption_wins_over_unresolved_literal() {
        let mut payload = 0x2000u64.to_le_bytes().to_vec();
        payload.push(9);
        let bytes = section(b"Sb", &payload);
        assert_eq!(
            decode_fields(&bytes, 64, &StringTable::new()),
            Err(DecodeError::InvalidBool(9))
        );
    }

    #[test]
    fn test_invalid_utf8_is_localized() {
        let mut payload = 2u64.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0xff, 0xfe]);
        let err = decode_fields(&section(b"s", &payload), 64, &StringTable::new()).unwrap_err();
        assert_eq!(err, DecodeError::InvalidUtf8);
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_entry_rendering() {
        let entry = Entry {
            timestamp: UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000),
            logger: "net".to_string(),
            fields: vec![
                Field::Literal("took ".to_string()),
                Field::UInt(12),
                Field::Literal(" ms: ".to_string()),
                Field::Bool(true),
            ],
        };
        assert_eq!(entry.message(), "took 12 ms: true");
        assert_eq!(
            entry.to_string(),
            "2023-11-14T22:13:20.000000Z [net] took 12 ms: true"
        );
        assert!(entry.to_detailed_string().contains("Logger: net"));
    }

    #[test]
    fn test_rendering_out_of_chrono_range() {
        let far = UNIX_EPOCH + std::time::Duration::new(1 << 45, 7);
        assert_eq!(rfc3339(far), "35184372088832.000000007");

        let before_epoch = UNIX_EPOCH - std::time::Duration::from_millis(1500);
        assert_eq!(unix_parts(before_epoch), Some((-2, 500_000_000)));
        assert_eq!(rfc3339(before_epoch), "1969-12-31T23:59:58.500000Z");
    }
}
