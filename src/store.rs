//! Directory persistence for a chronicle.
//!
//! ```text
//! {root}/
//!   ├── metadata.json   latest metadata snapshot
//!   ├── buffer          the ring buffer, memory-mapped while writing
//!   └── strings/        one file per string table, named by its address in hex
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};
use memmap2::MmapOptions;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::chronicle::MetadataHandler;
use crate::error::{Error, Result};
use crate::metadata::{parse_string_file_name, string_file_name, Metadata};
use crate::ring_buffer::{Backing, RingBuffer};
use crate::string_registry::StringBlock;

pub const METADATA_FILE: &str = "metadata.json";
pub const BUFFER_FILE: &str = "buffer";
pub const STRINGS_DIR: &str = "strings";

/// Writes metadata snapshots and string tables into a chronicle directory.
///
/// A string table file is rewritten only when the table has grown since it
/// was last persisted. String files are written before the metadata that
/// describes them.
pub struct DirectoryStore {
    root: PathBuf,
    compress: bool,
    /// Size of each string table as last written, by address.
    persisted: Mutex<HashMap<u64, usize>>,
}

impl DirectoryStore {
    /// Creates `root` and its `strings/` directory. Fails if `root` exists.
    pub fn create(root: impl AsRef<Path>, compress: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if root.exists() {
            return Err(Error::AlreadyExists(root));
        }
        fs::create_dir_all(root.join(STRINGS_DIR))?;
        debug!(path = %root.display(), compress, "created chronicle directory");

        Ok(Self {
            root,
            compress,
            persisted: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the buffer file with `size` zero bytes and maps it.
    pub fn map_buffer(&self, size: usize) -> Result<RingBuffer> {
        let path = self.root.join(BUFFER_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(size as u64)?;

        // The file was created above and nothing else maps it.
        let map = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        RingBuffer::new(Backing::Mapped(map))
    }

    fn write_strings(&self, strings: &[StringBlock]) -> Result<()> {
        let mut persisted = self.persisted.lock();
        for block in strings {
            if persisted.get(&block.address) == Some(&block.bytes.len()) {
                continue;
            }
            let contents: Cow<'_, [u8]> = if self.compress {
                Cow::Owned(compress_prepend_size(&block.bytes))
            } else {
                Cow::Borrowed(&block.bytes)
            };
            let path = self
                .root
                .join(STRINGS_DIR)
                .join(string_file_name(block.address));
            replace_file(&path, &contents)?;
            persisted.insert(block.address, block.bytes.len());
        }
        Ok(())
    }
}

impl MetadataHandler for DirectoryStore {
    fn handle_metadata(&self, metadata: &Metadata, strings: &[StringBlock]) -> Result<()> {
        self.write_strings(strings)?;
        replace_file(&self.root.join(METADATA_FILE), &metadata.to_json()?)
    }
}

/// Writes `contents` next to `path` and renames it into place.
fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads back the metadata, a copy of the buffer and the string tables of a
/// chronicle directory.
///
/// String tables the metadata lists but the directory lacks are skipped;
/// literals pointing into them fail to resolve at decode time.
pub fn load(root: &Path) -> Result<(Metadata, Vec<u8>, Vec<StringBlock>)> {
    let metadata = Metadata::from_json(&fs::read(root.join(METADATA_FILE))?)?;
    metadata.validate()?;
    let buffer = fs::read(root.join(BUFFER_FILE))?;

    let mut files = HashMap::new();
    for dir_entry in fs::read_dir(root.join(STRINGS_DIR))? {
        let path = dir_entry?.path();
        let address = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_string_file_name);
        if let Some(address) = address {
            files.insert(address, path);
        }
    }

    let mut strings = Vec::with_capacity(metadata.strings.len());
    for descriptor in &metadata.strings {
        let Some(path) = files.get(&descriptor.start) else {
            warn!(address = descriptor.start, "string table missing from directory");
            continue;
        };
        let raw = fs::read(path)?;
        let mut bytes = if metadata.compressed_strings {
            decompress_size_prepended(&raw).map_err(|e| Error::Decompress {
                path: path.clone(),
                cause: e.to_string(),
            })?
        } else {
            raw
        };
        bytes.truncate(usize::try_from(descriptor.size).unwrap_or(usize::MAX));
        strings.push(StringBlock {
            address: descriptor.start,
            bytes,
        });
    }

    Ok((metadata, buffer, strings))
}
