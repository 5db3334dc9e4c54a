//! Error types for chronicle.
//!
//! `Error` covers setting up a chronicle and reading or writing its persisted
//! parts. `DecodeError` is scoped to a single entry while decoding a buffer.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while creating, persisting or opening a chronicle.
#[derive(Debug, Error)]
pub enum Error {
    // -------------------------------------------------------------------------
    // I/O and serialization
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to decompress string table {path}: {cause}")]
    Decompress { path: PathBuf, cause: String },

    #[error("chronicle directory already exists: {0}")]
    AlreadyExists(PathBuf),

    // -------------------------------------------------------------------------
    // Format errors
    // -------------------------------------------------------------------------
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("unsupported native bit width {0}")]
    UnsupportedBitWidth(u32),

    #[error("invalid clock calibration: {0}")]
    InvalidTiming(String),

    // -------------------------------------------------------------------------
    // Writer errors
    // -------------------------------------------------------------------------
    #[error("buffer of {capacity} bytes is too small, need at least {minimum}")]
    BufferTooSmall { capacity: usize, minimum: usize },

    #[error("logger table is full ({0} loggers)")]
    TooManyLoggers(usize),

    #[error("metadata handler failed: {0}")]
    Handler(String),
}

/// Failure to decode one entry out of a buffer.
///
/// Corruption errors mean the bytes cannot be trusted any further and the
/// entry sequence ends after reporting them. The rest only affect the entry
/// they were found in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("record truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("unknown field tag {0:#04x}")]
    UnknownTag(u8),

    #[error("malformed boolean byte {0:#04x}")]
    InvalidBool(u8),

    #[error("inline string is not valid UTF-8")]
    InvalidUtf8,

    #[error("no interned string at address {0:#x}")]
    UnresolvedLiteral(u64),

    #[error("unknown logger id {0}")]
    UnknownLogger(u16),
}

impl DecodeError {
    /// Whether this error means the buffer itself is corrupt (or written by an
    /// incompatible version), as opposed to a symbol that could not be resolved.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            DecodeError::Truncated { .. } | DecodeError::UnknownTag(_) | DecodeError::InvalidBool(_)
        )
    }
}
