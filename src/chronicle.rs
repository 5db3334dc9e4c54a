use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::ChronicleConfig;
use crate::efficient_clock::{capture_timing, get_timestamp};
use crate::epilog::Epilog;
use crate::error::{Error, Result};
use crate::log_format_registry::CallSite;
use crate::loggable::{section_size, FieldWriter, Loggable, MAX_FIELDS};
use crate::metadata::Metadata;
use crate::ring_buffer::RingBuffer;
use crate::store::DirectoryStore;
use crate::string_registry::{generation, string_blocks, StringBlock};

/// Bytes in front of every record's field section: timestamp then logger id.
pub const ENTRY_PREFIX_BYTES: usize = TIMESTAMP_BYTES + LOGGER_ID_BYTES;

const TIMESTAMP_BYTES: usize = std::mem::size_of::<u64>();
const LOGGER_ID_BYTES: usize = std::mem::size_of::<u16>();

/// Receiver for metadata snapshots.
///
/// The chronicle produces a snapshot whenever something a decoder needs
/// changes: at construction, when a logger is registered, and after a record
/// whose call site interned new strings. The handler decides where it goes.
///
/// Handlers run while the chronicle's lock is held and must not log through
/// the same chronicle.
///
/// # Usage
///
/// ```
/// # use chronicle::{Chronicle, Metadata, StringBlock};
/// let handler = |metadata: &Metadata, _: &[StringBlock]| -> chronicle::Result<()> {
///     println!("{} loggers", metadata.loggers.len());
///     Ok(())
/// };
/// let chronicle = Chronicle::in_memory(4096, handler).unwrap();
/// ```
pub trait MetadataHandler: Send + Sync {
    fn handle_metadata(&self, metadata: &Metadata, strings: &[StringBlock]) -> Result<()>;
}

impl<F> MetadataHandler for F
where
    F: Fn(&Metadata, &[StringBlock]) -> Result<()> + Send + Sync,
{
    fn handle_metadata(&self, metadata: &Metadata, strings: &[StringBlock]) -> Result<()> {
        self(metadata, strings)
    }
}

/// Handler that drops every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardMetadata;

impl MetadataHandler for DiscardMetadata {
    fn handle_metadata(&self, _: &Metadata, _: &[StringBlock]) -> Result<()> {
        Ok(())
    }
}

/// Everything guarded by the chronicle's lock.
struct State {
    ring: RingBuffer,
    loggers: Vec<String>,
}

struct Shared {
    state: Mutex<State>,
    handler: Box<dyn MetadataHandler>,
    compressed_strings: bool,
    /// String registry generation covered by the last delivered snapshot.
    last_generation: AtomicU64,
}

impl Shared {
    fn build_metadata(&self, state: &State) -> (Metadata, Vec<StringBlock>) {
        let blocks = string_blocks();
        let metadata = Metadata::new(
            self.compressed_strings,
            blocks.iter().map(StringBlock::descriptor).collect(),
            state.loggers.clone(),
            capture_timing(),
        );
        (metadata, blocks)
    }

    /// Builds a snapshot and hands it to the handler, both under the lock.
    fn publish(&self, state: &State) -> Result<()> {
        let generation = generation();
        let (metadata, blocks) = self.build_metadata(state);
        self.handler.handle_metadata(&metadata, &blocks)?;
        self.last_generation.store(generation, Ordering::Release);
        debug!(
            loggers = metadata.loggers.len(),
            string_tables = blocks.len(),
            "published metadata snapshot"
        );
        Ok(())
    }

    fn refresh_if_strings_changed(&self) {
        if generation() == self.last_generation.load(Ordering::Acquire) {
            return;
        }
        let state = self.state.lock();
        if let Err(err) = self.publish(&state) {
            warn!(error = %err, "metadata handler failed");
        }
    }
}

/// A ring buffer shared by any number of named loggers.
///
/// All loggers created from one chronicle write into the same buffer through
/// a single lock, so at most one record is in flight at a time. Cloning is
/// cheap and yields another handle to the same buffer.
///
/// # Examples
///
/// ```
/// use chronicle::{log, Chronicle, DiscardMetadata};
///
/// let chronicle = Chronicle::in_memory(4096, DiscardMetadata).unwrap();
/// let net = chronicle.logger("net").unwrap();
///
/// log!(net, "accepted connection from port {}", 8080u16);
/// log!(net, "closing after {} requests ({})", 3, "idle");
/// ```
#[derive(Clone)]
pub struct Chronicle {
    shared: Arc<Shared>,
}

impl Chronicle {
    /// Wraps `ring` and publishes the initial (empty) metadata snapshot.
    pub fn new(
        ring: RingBuffer,
        handler: impl MetadataHandler + 'static,
        compressed_strings: bool,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                ring,
                loggers: Vec::new(),
            }),
            handler: Box::new(handler),
            compressed_strings,
            last_generation: AtomicU64::new(0),
        });
        {
            let state = shared.state.lock();
            shared.publish(&state)?;
        }
        Ok(Self { shared })
    }

    /// Chronicle over a zeroed heap buffer of `capacity` bytes.
    pub fn in_memory(capacity: usize, handler: impl MetadataHandler + 'static) -> Result<Self> {
        Self::new(RingBuffer::in_memory(capacity)?, handler, false)
    }

    /// Creates a directory store as described by `config` and writes into it.
    ///
    /// Fails if the directory already exists.
    pub fn open(config: &ChronicleConfig) -> Result<Self> {
        config.validate()?;
        let store = DirectoryStore::create(&config.directory, config.compress_strings)?;
        let ring = store.map_buffer(config.buffer_size)?;
        Self::new(ring, store, config.compress_strings)
    }

    /// Registers a logger. Ids start at 1 and are never reused.
    ///
    /// If the handler rejects the snapshot announcing the logger, the logger
    /// is not registered and its id stays free.
    pub fn logger(&self, name: impl Into<String>) -> Result<Logger> {
        let mut state = self.shared.state.lock();
        if state.loggers.len() >= usize::from(u16::MAX) {
            return Err(Error::TooManyLoggers(state.loggers.len()));
        }
        state.loggers.push(name.into());
        let id = state.loggers.len() as u16;
        if let Err(err) = self.shared.publish(&state) {
            state.loggers.pop();
            return Err(err);
        }

        Ok(Logger {
            shared: Arc::clone(&self.shared),
            id,
            enabled: true,
        })
    }

    /// The snapshot a decoder would need right now, without delivering it.
    pub fn metadata(&self) -> Metadata {
        let state = self.shared.state.lock();
        self.shared.build_metadata(&state).0
    }

    /// Delivers a fresh snapshot to the handler.
    pub fn refresh_metadata(&self) -> Result<()> {
        let state = self.shared.state.lock();
        self.shared.publish(&state)
    }

    /// Copy of the buffer bytes, taken between records.
    pub fn snapshot(&self) -> Vec<u8> {
        self.shared.state.lock().ring.bytes().to_vec()
    }

    /// Decoder over a snapshot of this chronicle, with the live string tables.
    pub fn epilog(&self) -> Result<Epilog<'static>> {
        let state = self.shared.state.lock();
        let (metadata, blocks) = self.shared.build_metadata(&state);
        Epilog::new(state.ring.bytes().to_vec(), &metadata, &blocks)
    }

    /// Flushes a file-backed buffer to disk.
    pub fn flush(&self) -> Result<()> {
        self.shared.state.lock().ring.flush()
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().ring.capacity()
    }
}

/// A named source of records in a [`Chronicle`].
pub struct Logger {
    shared: Arc<Shared>,
    id: u16,
    enabled: bool,
}

impl Logger {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabled loggers write nothing; [`log!`](crate::log) does not even
    /// evaluate its arguments for them.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Opens a record with a `size`-byte field section.
    ///
    /// Takes the chronicle's lock, stamps the record with the current time
    /// and this logger's id, and returns a guard over the field section.
    /// Returns `None` when the record can never fit the buffer; nothing is
    /// written in that case.
    pub fn prepare(&self, size: usize) -> Option<Record<'_>> {
        let mut state = self.shared.state.lock();
        let timestamp = get_timestamp();
        let total = ENTRY_PREFIX_BYTES.checked_add(size)?;
        let span = state.ring.reserve_range(total)?;

        let prefix = state.ring.span_mut(span.start..span.start + ENTRY_PREFIX_BYTES);
        prefix[..TIMESTAMP_BYTES].copy_from_slice(&timestamp.to_le_bytes());
        prefix[TIMESTAMP_BYTES..].copy_from_slice(&self.id.to_le_bytes());

        Some(Record {
            state,
            payload: span.start + ENTRY_PREFIX_BYTES..span.end,
        })
    }

    /// Writes one record whose fields are `fields`, in order.
    ///
    /// Returns whether the record was written. Records with more than
    /// [`MAX_FIELDS`] fields, or too large for the buffer, are dropped.
    pub fn write_fields(&self, fields: &[&dyn Loggable]) -> bool {
        if !self.enabled {
            return false;
        }
        if fields.len() > MAX_FIELDS {
            debug!(fields = fields.len(), "dropping record with too many fields");
            return false;
        }

        let size = section_size(fields.iter().copied());
        let written = match self.prepare(size) {
            Some(mut record) => {
                let mut writer = FieldWriter::new(record.payload_mut(), fields.len() as u8);
                for field in fields {
                    writer.push(*field);
                }
                true
            }
            None => false,
        };

        self.shared.refresh_if_strings_changed();
        written
    }

    /// Writes one record for `site`, its literal text interleaved with `args`.
    pub fn log(&self, site: &CallSite, args: &[&dyn Loggable]) -> bool {
        if !self.enabled {
            return false;
        }
        self.write_fields(&site.interleave(args))
    }
}

/// An open record holding the chronicle's lock.
///
/// The record is committed when the guard is dropped, so an abandoned guard
/// still leaves a well-framed record behind.
pub struct Record<'a> {
    state: MutexGuard<'a, State>,
    payload: Range<usize>,
}

impl Record<'_> {
    /// The field section, exactly as many bytes as were prepared.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let span = self.payload.clone();
        self.state.ring.span_mut(span)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Commits the record and releases the lock.
    pub fn complete(self) {}
}

impl Drop for Record<'_> {
    fn drop(&mut self) {
        self.state.ring.complete();
    }
}

/// Logs one record through `logger` using a `{}` template.
///
/// The template is checked at compile time: braces must be well formed and
/// the number of `{}` placeholders must match the number of arguments. Every
/// argument must implement [`Loggable`](crate::loggable::Loggable). Literal
/// text between placeholders is interned once per call site and logged by
/// address.
///
/// Evaluates to `true` if the record was written.
///
/// # Examples
///
/// ```
/// # use chronicle::{log, Chronicle, DiscardMetadata};
/// # let chronicle = Chronicle::in_memory(1024, DiscardMetadata).unwrap();
/// let mut logger = chronicle.logger("demo").unwrap();
/// assert!(log!(logger, "Temperature: {} C", 25.5));
/// assert!(log!(logger, "Status: {}, Count: {}", true, 42));
///
/// logger.set_enabled(false);
/// assert!(!log!(logger, "never written"));
/// ```
#[macro_export]
macro_rules! log {
    ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        const _: () = assert!(
            $crate::log_format_registry::validate_format($fmt),
            "malformed log template"
        );
        const _: () = assert!(
            $crate::log_format_registry::count_placeholders($fmt) == 0usize $(+ $crate::__one!($arg))*,
            "placeholder count does not match argument count"
        );
        static CALL_SITE: $crate::log_format_registry::CallSite =
            $crate::log_format_registry::CallSite::new($fmt);

        let logger = &$logger;
        if logger.is_enabled() {
            logger.log(&CALL_SITE, &[$(&$arg as &dyn $crate::loggable::Loggable),*])
        } else {
            false
        }
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __one {
    ($arg:expr) => {
        1usize
    };
}
