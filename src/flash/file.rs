//! File-backed flash
//!
//! Emulates a flash partition with a fixed-size file on the host, the way
//! native builds back the log store with a region file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::FlashError;

use super::{check_bounds, first_programmed, Flash, ERASED_BYTE};

/// Chunk size used when filling ranges with erased bytes
const ERASE_CHUNK: usize = 64 * 1024;

/// Flash medium stored in a regular file
pub struct FileFlash {
    /// Path of the backing file
    path: PathBuf,
    /// File handle; reads seek, so they serialize on this lock
    file: Mutex<File>,
    /// Fixed size of the backing file
    capacity: u64,
}

impl FileFlash {
    /// Open a backing file, provisioning it fully erased on first use.
    ///
    /// An existing file must already have exactly `capacity` bytes.
    pub fn open(path: &Path, capacity: u64) -> Result<Self, FlashError> {
        let provision = !path.exists();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if provision {
            fill_erased(&mut file, 0, capacity)?;
            file.sync_all()?;
            tracing::info!(path = %path.display(), capacity, "Provisioned erased flash file");
        } else {
            let found = file.metadata()?.len();
            if found != capacity {
                tracing::error!(
                    path = %path.display(),
                    expected = capacity,
                    found,
                    "Flash file has the wrong size"
                );
                return Err(FlashError::SizeMismatch {
                    expected: capacity,
                    found,
                });
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            capacity,
        })
    }

    /// Get the backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Flash for FileFlash {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), FlashError> {
        check_bounds(self.capacity, offset, buf.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn program(&mut self, offset: u64, data: &[u8]) -> Result<(), FlashError> {
        check_bounds(self.capacity, offset, data.len())?;
        let file = self.file.get_mut();

        // Program rules: target bytes must still be erased
        let mut current = vec![0u8; data.len()];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut current)?;
        if let Some(pos) = first_programmed(&current) {
            return Err(FlashError::NotErased {
                offset: offset + pos as u64,
            });
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: u64) -> Result<(), FlashError> {
        check_bounds(self.capacity, offset, len as usize)?;
        fill_erased(self.file.get_mut(), offset, len)
    }

    fn sync(&mut self) -> Result<(), FlashError> {
        self.file.get_mut().sync_data()?;
        Ok(())
    }
}

/// Overwrite `[offset, offset + len)` with erased bytes
fn fill_erased(file: &mut File, offset: u64, len: u64) -> Result<(), FlashError> {
    let chunk = [ERASED_BYTE; ERASE_CHUNK];
    file.seek(SeekFrom::Start(offset))?;

    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(ERASE_CHUNK as u64) as usize;
        file.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }

    Ok(())
}
