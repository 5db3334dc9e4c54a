//! Interned string tables for literal log fields.
//!
//! Literal text is never copied into the ring buffer. The writer copies each
//! distinct literal once into a process-wide table, NUL-terminated, and logs
//! its address instead. The tables are described in every metadata snapshot
//! so a host can persist their bytes; the decoder rebuilds an address → string
//! map from those bytes with [`StringTable`].
//!
//! # Thread Safety
//!
//! All loggers in the process share the same registry. Registration takes a
//! mutex; the generation counter can be read without it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::metadata::StringDescriptor;

/// Size of a freshly allocated table block. Longer strings get a block of their own.
const BLOCK_CAPACITY: usize = 64 * 1024;

/// Append-only block store. A block's heap buffer is allocated once and never
/// grows past its capacity, so addresses handed out stay valid for the life
/// of the process.
struct Registry {
    blocks: Vec<Vec<u8>>,
    lookup: HashMap<String, u64>,
}

impl Registry {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    fn push(&mut self, s: &str) -> u64 {
        let needed = s.len() + 1;
        let fits = self
            .blocks
            .last()
            .is_some_and(|block| block.capacity() - block.len() >= needed);
        if !fits {
            self.blocks.push(Vec::with_capacity(needed.max(BLOCK_CAPACITY)));
        }

        let index = self.blocks.len() - 1;
        let block = &mut self.blocks[index];
        let address = block.as_ptr() as u64 + block.len() as u64;
        block.extend_from_slice(s.as_bytes());
        block.push(0);
        address
    }
}

lazy_static! {
    static ref STRING_REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

    /// Bumped each time a new string lands in the registry.
    static ref GENERATION: AtomicU64 = AtomicU64::new(0);
}

/// Interns `s` and returns its address in the string tables.
///
/// Registering the same text again returns the same address.
///
/// # Examples
///
/// ```
/// # use chronicle::string_registry::{register_string, get_string};
/// let first = register_string("request served");
/// let second = register_string("request served");
/// assert_eq!(first, second);
/// assert_eq!(get_string(first).as_deref(), Some("request served"));
/// ```
pub fn register_string(s: &str) -> u64 {
    let mut registry = STRING_REGISTRY.lock();
    if let Some(&address) = registry.lookup.get(s) {
        return address;
    }

    let address = registry.push(s);
    registry.lookup.insert(s.to_owned(), address);
    GENERATION.fetch_add(1, Ordering::Release);
    address
}

/// Looks up a registered string by address.
pub fn get_string(address: u64) -> Option<String> {
    let registry = STRING_REGISTRY.lock();
    registry
        .lookup
        .iter()
        .find(|(_, &stored)| stored == address)
        .map(|(s, _)| s.clone())
}

/// Number of registrations so far; changes whenever the tables grow.
pub fn generation() -> u64 {
    GENERATION.load(Ordering::Acquire)
}

/// A copy of one string table: its base address and the bytes written so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringBlock {
    pub address: u64,
    pub bytes: Vec<u8>,
}

impl StringBlock {
    pub fn descriptor(&self) -> StringDescriptor {
        StringDescriptor {
            start: self.address,
            size: self.bytes.len() as u64,
        }
    }
}

/// Copies every string table currently in the registry.
pub fn string_blocks() -> Vec<StringBlock> {
    let registry = STRING_REGISTRY.lock();
    registry
        .blocks
        .iter()
        .map(|block| StringBlock {
            address: block.as_ptr() as u64,
            bytes: block.clone(),
        })
        .collect()
}

/// Resolves literal addresses found in a buffer back to text.
pub trait StringResolver {
    fn resolve(&self, address: u64) -> Option<&str>;
}

/// Address → string map rebuilt from persisted string tables.
///
/// Each table is split on NUL bytes; the piece starting at byte `n` of a
/// table based at `base` resolves at address `base + n`. Pieces that are not
/// valid UTF-8 are left out.
#[derive(Debug, Default, Clone)]
pub struct StringTable {
    strings: HashMap<u64, String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(base address, bytes)` pairs.
    pub fn from_blocks<'a, I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = (u64, &'a [u8])>,
    {
        let mut table = Self::new();
        for (base, bytes) in blocks {
            table.insert_block(base, bytes);
        }
        table
    }

    pub fn insert_block(&mut self, base: u64, bytes: &[u8]) {
        let mut offset = 0u64;
        for piece in bytes.split(|&b| b == 0) {
            let Some(address) = base.checked_add(offset) else {
                break;
            };
            if let Ok(s) = std::str::from_utf8(piece) {
                self.strings.insert(address, s.to_owned());
            }
            offset += piece.len() as u64 + 1;
        }
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl StringResolver for StringTable {
    fn resolve(&self, address: u64) -> Option<&str> {
        self.strings.get(&address).map(String::as_str)
    }
}
