//! Error types for the ring storage structures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`StorageError`].
///
/// Callers typically recreate the store on `Validation` or `Corruption`,
/// treat `NotFound` as a no-op and surface everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The stored header or a caller argument does not fit the requested shape.
    Validation,
    /// On-disk state could not be interpreted consistently.
    Corruption,
    /// No free slot is left for an insert.
    Capacity,
    /// The targeted record is not live.
    NotFound,
    /// The underlying file could not be opened, read, written or flushed.
    Io,
}

/// Errors that can occur when working with ring storage files.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The region does not start with a ringstore magic number.
    #[error("Invalid magic number at byte offset {offset}: expected 'RINGSTOR'")]
    InvalidMagic { offset: u64 },

    /// The file version is not supported by this version of ringstore.
    #[error("Unsupported file version: {0} (current: {1})")]
    UnsupportedVersion(u32, u32),

    /// The header checksum does not match.
    #[error("Header checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    HeaderChecksumMismatch { expected: u32, actual: u32 },

    /// The stored header was created with different dimensions.
    #[error("Header mismatch on {field}: stored {stored}, requested {requested}")]
    HeaderMismatch {
        field: &'static str,
        stored: u64,
        requested: u64,
    },

    /// Construction parameters are unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A key, value or record does not fit the fixed slot layout.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The slot tags do not describe a consistent ring.
    #[error("Ring corrupted at slot {slot}: {reason}")]
    RingCorrupted { slot: u64, reason: String },

    /// A slot's stored CRC does not match its contents.
    #[error("Slot checksum mismatch at slot {slot}")]
    SlotChecksumMismatch { slot: u64 },

    /// The file is shorter than its header claims.
    #[error("File is truncated: expected at least {expected} bytes, got {actual}")]
    FileTruncated { expected: u64, actual: u64 },

    /// The active block has no free slot, even after compaction.
    #[error("No free slot left in block {block}")]
    CapacityExhausted { block: u32 },

    /// The targeted index or key does not refer to a live record.
    #[error("Record not found")]
    NotFound,

    /// The store region does not exist and creation was not requested.
    #[error("Store not found: {}", path.display())]
    StoreMissing { path: PathBuf },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl StorageError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::InvalidMagic { .. }
            | StorageError::UnsupportedVersion(..)
            | StorageError::HeaderMismatch { .. }
            | StorageError::InvalidConfig(_)
            | StorageError::InvalidRecord(_)
            | StorageError::Serialization(_)
            | StorageError::Deserialization(_) => ErrorKind::Validation,
            StorageError::HeaderChecksumMismatch { .. }
            | StorageError::RingCorrupted { .. }
            | StorageError::SlotChecksumMismatch { .. }
            | StorageError::FileTruncated { .. } => ErrorKind::Corruption,
            StorageError::CapacityExhausted { .. } => ErrorKind::Capacity,
            StorageError::NotFound => ErrorKind::NotFound,
            StorageError::StoreMissing { .. } | StorageError::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true if the caller should discard and recreate the store.
    pub fn requires_recreate(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::Corruption)
            && !matches!(
                self,
                StorageError::InvalidRecord(_)
                    | StorageError::Serialization(_)
                    | StorageError::Deserialization(_)
            )
    }

    pub(crate) fn corrupted(slot: u64, reason: impl Into<String>) -> Self {
        StorageError::RingCorrupted {
            slot,
            reason: reason.into(),
        }
    }
}

/// Result type for ring storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
