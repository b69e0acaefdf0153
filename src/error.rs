//! Error types for LSVD
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using LsvdError
pub type Result<T> = std::result::Result<T, LsvdError>;

/// Unified error type for LSVD operations
#[derive(Debug, Error)]
pub enum LsvdError {
    // -------------------------------------------------------------------------
    // Device Errors
    // -------------------------------------------------------------------------
    #[error("device I/O error: {0}")]
    Device(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("bad magic in {structure}: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        structure: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("unsupported {structure} version: {version}")]
    UnsupportedVersion { structure: &'static str, version: u32 },

    #[error("invalid object type: {0}")]
    InvalidObjectType(u32),

    #[error("invalid journal block kind: expected {expected}, found {found}")]
    InvalidRecordKind { expected: u32, found: u32 },

    #[error("malformed table '{table}': length {len} is not a multiple of {record_size}")]
    MalformedTable {
        table: &'static str,
        len: u32,
        record_size: usize,
    },

    #[error("truncated '{table}': offset {offset} + length {len} exceeds {available} bytes")]
    Truncated {
        table: &'static str,
        offset: usize,
        len: usize,
        available: usize,
    },

    // -------------------------------------------------------------------------
    // Journal Errors
    // -------------------------------------------------------------------------
    #[error("journal record rejected during replay: {0}")]
    Recovery(String),

    #[error("journal full: need {needed} blocks, {free} free")]
    JournalFull { needed: u32, free: u32 },

    #[error("record too large: {0}")]
    RecordTooLarge(String),

    #[error("checkpoint of {entries} entries needs {needed} bytes, slot holds {capacity}")]
    CheckpointTooLarge {
        entries: usize,
        needed: usize,
        capacity: usize,
    },

    // -------------------------------------------------------------------------
    // Consistency Errors
    // -------------------------------------------------------------------------
    #[error("invariant violation: {0}")]
    Invariant(String),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("volume is closed")]
    Closed,
}

impl LsvdError {
    /// True for the format and truncation family: the bytes are not a valid
    /// encoding of the structure being decoded.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            LsvdError::BadMagic { .. }
                | LsvdError::UnsupportedVersion { .. }
                | LsvdError::InvalidObjectType(_)
                | LsvdError::InvalidRecordKind { .. }
                | LsvdError::MalformedTable { .. }
                | LsvdError::Truncated { .. }
        )
    }
}

impl From<bincode::Error> for LsvdError {
    fn from(e: bincode::Error) -> Self {
        LsvdError::Serialization(e.to_string())
    }
}
