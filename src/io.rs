//! Byte sources and the shared I/O context.
//!
//! The only I/O primitive the reader needs is a positioned read at an
//! absolute offset. [`ByteSource`] captures that; [`FileSource`] adapts a
//! regular file and [`BufferSource`] serves an in-memory image. The
//! [`IoHandle`] carries the volume geometry every decoder needs (block size,
//! inode size, format version) together with the abort flag.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::err::{CanFail, IoError, RuntimeError};
use crate::sb::{FormatVersion, Superblock};

/// A seekable byte source holding a filesystem image.
///
/// Reads are positioned and take `&self`; implementations must serialise
/// access internally if the underlying handle keeps a cursor.
pub trait ByteSource: Send + Sync {
    /// Reads exactly `buffer.len()` bytes at the given absolute offset.
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> CanFail<IoError>;

    /// Returns the total size of the source in bytes.
    fn size(&self) -> Result<u64, IoError>;
}

/// A [`ByteSource`] over a regular file.
///
/// The file handle keeps a cursor, so positioned reads seek under a lock.
pub struct FileSource {
    file: Mutex<File>,
}

impl FileSource {
    /// Opens the file at `path` for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        let file = File::open(path).map_err(|_| IoError::OpenFailed)?;

        Ok(Self { file: Mutex::new(file) })
    }
}

impl ByteSource for FileSource {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> CanFail<IoError> {
        let mut file = self.file.lock();

        file.seek(SeekFrom::Start(offset)).map_err(|_| IoError::SeekFailed)?;
        file.read_exact(buffer).map_err(|_| IoError::ReadFailed)
    }

    fn size(&self) -> Result<u64, IoError> {
        let file = self.file.lock();

        file.metadata().map(|m| m.len()).map_err(|_| IoError::SeekFailed)
    }
}

/// A [`ByteSource`] over an in-memory image.
#[derive(Debug)]
pub struct BufferSource {
    data: Vec<u8>,
}

impl BufferSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for BufferSource {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> CanFail<IoError> {
        let offset = usize::try_from(offset).map_err(|_| IoError::SeekFailed)?;
        let end = offset.checked_add(buffer.len()).ok_or(IoError::ReadFailed)?;

        if end > self.data.len() {
            return Err(IoError::ReadFailed);
        }
        buffer.copy_from_slice(&self.data[offset..end]);

        Ok(())
    }

    fn size(&self) -> Result<u64, IoError> {
        Ok(self.data.len() as u64)
    }
}

/// Shared decoding context for a single open volume.
///
/// Built once from the primary superblock and immutable afterwards, except
/// for the abort flag which may be raised from any thread.
#[derive(Debug)]
pub struct IoHandle {
    pub(crate) block_size: u64,
    pub(crate) inode_size: u16,
    pub(crate) format_version: FormatVersion,
    abort: AtomicBool,
}

impl IoHandle {
    pub(crate) fn new(superblock: &Superblock) -> Self {
        Self {
            block_size: superblock.block_size,
            inode_size: superblock.inode_size,
            format_version: superblock.format_version,
            abort: AtomicBool::new(false),
        }
    }

    /// Raises the abort flag; the next long-running operation fails with
    /// [`RuntimeError::AbortRequested`].
    pub(crate) fn signal_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    /// Polls the abort flag at a loop boundary.
    pub(crate) fn check_abort(&self) -> CanFail<RuntimeError> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(RuntimeError::AbortRequested);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_source_reads_in_bounds() {
        let source = BufferSource::new((0u8..64).collect());
        let mut buffer = [0u8; 4];

        source.read_at(10, &mut buffer).unwrap();
        assert_eq!(buffer, [10, 11, 12, 13]);
        assert_eq!(source.size().unwrap(), 64);
    }

    #[test]
    fn buffer_source_rejects_short_reads() {
        let source = BufferSource::new(vec![0u8; 16]);
        let mut buffer = [0u8; 8];

        assert_eq!(source.read_at(12, &mut buffer), Err(IoError::ReadFailed));
    }
}
