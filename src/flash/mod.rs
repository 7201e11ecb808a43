//! Flash Medium Module
//!
//! The storage medium under a log store region.
//!
//! ## Medium Contract
//! - Erased bytes read back as `0xFF`
//! - `program` may only target erased bytes (no in-place overwrite)
//! - `erase` resets a byte range to `0xFF`; the store only ever erases whole pages
//! - Reads take `&self` so many readers can share the medium

mod file;
mod mem;

pub use file::FileFlash;
pub use mem::MemFlash;

use crate::error::FlashError;

/// Value of every byte in an erased range
pub const ERASED_BYTE: u8 = 0xFF;

/// A flash-like storage medium
pub trait Flash {
    /// Total addressable bytes
    fn capacity(&self) -> u64;

    /// Read `buf.len()` bytes starting at `offset`
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Program `data` at `offset`; every target byte must be erased
    fn program(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError>;

    /// Erase `len` bytes starting at `offset`
    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError>;

    /// Make previous programs and erases durable
    fn sync(&mut self) -> Result<(), FlashError> {
        Ok(())
    }
}

/// Reject accesses that run past the end of the medium
pub(crate) fn check_bounds(capacity: u64, offset: u64, len: usize) -> Result<(), FlashError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(FlashError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// Offset of the first non-erased byte in `bytes`, if any
pub(crate) fn first_programmed(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b != ERASED_BYTE)
}
