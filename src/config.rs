//! Configuration for a directory-backed chronicle.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::ring_buffer::MIN_CAPACITY;

/// Default ring buffer size: 1 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Settings used by [`Chronicle::open`](crate::Chronicle::open).
#[derive(Debug, Clone)]
pub struct ChronicleConfig {
    /// Directory holding everything the chronicle persists:
    ///   {directory}/
    ///     ├── metadata.json   (latest metadata snapshot)
    ///     ├── buffer          (memory-mapped ring buffer)
    ///     └── strings/        (interned string tables, keyed by address)
    pub directory: PathBuf,

    /// Size of the ring buffer file in bytes. Fixed for the chronicle's lifetime.
    pub buffer_size: usize,

    /// Compress persisted string tables with LZ4.
    pub compress_strings: bool,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./chronicle"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            compress_strings: true,
        }
    }
}

impl ChronicleConfig {
    /// Config rooted at `directory` with default settings otherwise.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::default().with_directory(directory)
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_compressed_strings(mut self, compress: bool) -> Self {
        self.compress_strings = compress;
        self
    }

    /// Checks that the settings describe a usable chronicle.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < MIN_CAPACITY {
            return Err(Error::BufferTooSmall {
                capacity: self.buffer_size,
                minimum: MIN_CAPACITY,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChronicleConfig::default();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.compress_strings);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validation() {
        let config = ChronicleConfig::new("/tmp/somewhere")
            .with_buffer_size(0)
            .with_compressed_strings(false);
        assert_eq!(config.directory, PathBuf::from("/tmp/somewhere"));
        assert!(!config.compress_strings);
        assert!(matches!(config.validate(), Err(Error::BufferTooSmall { capacity: 0, .. })));
    }
}
