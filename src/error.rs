//! Error types for lstore
//!
//! One error enum per store operation, plus a unified error for callers
//! (like the CLI) that just want to bubble everything up.

use thiserror::Error;

use crate::region::RecordId;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

// =============================================================================
// Medium Errors
// =============================================================================

/// Errors reported by the underlying flash medium
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("Flash access out of bounds: offset {offset}, len {len}, capacity {capacity}")]
    OutOfBounds { offset: u64, len: usize, capacity: u64 },

    /// Programming is only allowed over erased (0xFF) bytes
    #[error("Program over non-erased byte at offset {offset}")]
    NotErased { offset: u64 },

    #[error("Backing file size mismatch: expected {expected} bytes, found {found}")]
    SizeMismatch { expected: u64, found: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Operation Errors
// =============================================================================

/// Errors from `LogStore::open` / `LogStore::format`
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Bad geometry: {0}")]
    BadGeometry(String),

    #[error("Corrupt region at page {page}, offset {offset}: {reason}")]
    CorruptRegion {
        page: usize,
        offset: usize,
        reason: String,
    },

    #[error("Log store disabled by configuration")]
    Disabled,

    #[error("Flash error: {0}")]
    Flash(#[from] FlashError),
}

/// Errors from `LogStore::append`
#[derive(Debug, Error)]
pub enum AppendError {
    #[error("Store full: no erased page available")]
    StoreFull,

    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Medium failure; the caller may retry, the store never does
    #[error("Flash error: {0}")]
    Flash(#[from] FlashError),
}

/// Errors from `LogStore::read` and iteration
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Record {0} not found")]
    NotFound(RecordId),

    #[error("Checksum mismatch in record {0}")]
    ChecksumMismatch(RecordId),

    #[error("Record {0} was reclaimed")]
    Superseded(RecordId),

    #[error("Flash error: {0}")]
    Flash(#[from] FlashError),
}

/// Errors from `LogStore::reclaim`
#[derive(Debug, Error)]
pub enum ReclaimError {
    #[error("Nothing to reclaim")]
    NothingToReclaim,

    #[error("Flash error: {0}")]
    Flash(#[from] FlashError),
}

// =============================================================================
// Unified Error
// =============================================================================

/// Unified error type for lstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Append(#[from] AppendError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Reclaim(#[from] ReclaimError),

    #[error(transparent)]
    Flash(#[from] FlashError),
}
