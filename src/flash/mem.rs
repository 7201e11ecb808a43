//! In-memory flash
//!
//! Volatile medium for tests, benchmarks and host-side tooling.

use crate::error::FlashError;

use super::{check_bounds, first_programmed, Flash, ERASED_BYTE};

/// RAM-backed flash with NOR-style program rules
#[derive(Debug, Clone)]
pub struct MemFlash {
    data: Vec<u8>,
}

impl MemFlash {
    /// Create a fully erased medium of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![ERASED_BYTE; capacity],
        }
    }

    /// Wrap an existing image (e.g. one captured with `as_bytes`)
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Raw contents of the medium
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw contents, bypassing program rules.
    ///
    /// Used to inject bit rot and torn writes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Flash for MemFlash {
    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError> {
        check_bounds(self.capacity(), offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn program(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError> {
        check_bounds(self.capacity(), offset, data.len())?;
        let start = offset as usize;
        let target = &mut self.data[start..start + data.len()];

        if let Some(pos) = first_programmed(target) {
            return Err(FlashError::NotErased {
                offset: offset + pos as u64,
            });
        }

        target.copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError> {
        check_bounds(self.capacity(), offset, len as usize)?;
        let start = offset as usize;
        self.data[start..start + len as usize].fill(ERASED_BYTE);
        Ok(())
    }
}
