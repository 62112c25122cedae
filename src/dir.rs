//! Directory related structures.
//!
//! A directory's data stream is a sequence of blocks holding variable-length
//! entry records packed back to back. Records never straddle a block
//! boundary; a record with inode number 0 is a tombstone left by a deletion
//! and carries no entry.

use bytemuck::{Pod, Zeroable};

use crate::err::{ArgumentError, ExtResult, InputError};
use crate::inode::{Inode, InodeNumber};
use crate::io::{ByteSource, IoHandle};

/// File-type code carried in a directory entry.
///
/// Only meaningful when the filetype incompatible feature is set; zero
/// (unknown) otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct DirectoryEntryType(pub(crate) u8);

impl DirectoryEntryType {
    pub const UNKNOWN: Self = Self(0);
    pub const REGULAR: Self = Self(1);
    pub const DIRECTORY: Self = Self(2);
    pub const CHARACTER_DEVICE: Self = Self(3);
    pub const BLOCK_DEVICE: Self = Self(4);
    pub const FIFO: Self = Self(5);
    pub const SOCKET: Self = Self(6);
    pub const SYMBOLIC_LINK: Self = Self(7);
}

/// Minimum size of an on-disk directory entry record: the four fixed fields.
const MINIMUM_RECORD_SIZE: usize = 8;

/// A decoded directory entry.
///
/// The name is kept NUL-terminated internally; accessors expose it without
/// the terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub(crate) inode_number: InodeNumber,
    pub(crate) record_size: u16,
    pub(crate) file_type: DirectoryEntryType,
    pub(crate) name: Vec<u8>,
}

impl DirectoryEntry {
    pub fn inode_number(&self) -> InodeNumber {
        self.inode_number
    }

    pub fn file_type(&self) -> DirectoryEntryType {
        self.file_type
    }

    /// On-disk record size; always advances past the name to the next
    /// record.
    pub fn record_size(&self) -> u16 {
        self.record_size
    }

    /// Entry name bytes, without the internal NUL terminator.
    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.name.len() - 1]
    }

    /// Entry name as UTF-8.
    pub fn name_utf8(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    /// Entry name as UTF-16 code units.
    pub fn name_utf16(&self) -> Vec<u16> {
        self.name_utf8().encode_utf16().collect()
    }
}

/// A decoded directory: the ordered entries of one directory inode.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    /// Reads and decodes the full data stream of a directory inode.
    ///
    /// Entries come out in on-disk order. Sparse stretches of the stream
    /// contain no records and are skipped.
    pub(crate) fn read_from_inode<S: ByteSource>(
        source: &S,
        io_handle: &IoHandle,
        inode: &Inode,
    ) -> ExtResult<Self> {
        if !inode.is_directory() {
            return Err(ArgumentError::InvalidValue.into());
        }

        let block_size = usize::try_from(io_handle.block_size)
            .map_err(|_| ArgumentError::ValueOutOfBounds)?;
        let mut entries = Vec::new();
        let mut remaining_bytes = inode.data_size();

        for extent in inode.extents() {
            if remaining_bytes == 0 {
                break;
            }

            if extent.is_sparse() {
                let span_bytes = extent.number_of_blocks * io_handle.block_size;
                remaining_bytes = remaining_bytes.saturating_sub(span_bytes);
                continue;
            }

            let mut block_data = vec![0u8; block_size];
            for block_index in 0..extent.number_of_blocks {
                io_handle.check_abort()?;

                if remaining_bytes == 0 {
                    break;
                }

                let block_offset =
                    (extent.physical_block_number + block_index) * io_handle.block_size;
                source.read_at(block_offset, &mut block_data)?;

                let scan_length = usize::min(block_size, remaining_bytes as usize);
                decode_entries_block(&block_data[..scan_length], &mut entries)?;
                remaining_bytes -= scan_length as u64;
            }
        }

        Ok(Self { entries })
    }

    /// Ordered entries, tombstones excluded.
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Looks up an entry by its UTF-8 name. Linear scan, byte-exact match.
    pub fn find_by_utf8_name(&self, name: &[u8]) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|entry| entry.name_bytes() == name)
    }

    /// Looks up an entry by its UTF-16 name, transcoding the query to UTF-8
    /// before the byte-exact scan.
    pub fn find_by_utf16_name(&self, name: &[u16]) -> Option<&DirectoryEntry> {
        let utf8_name = String::from_utf16(name).ok()?;

        self.find_by_utf8_name(utf8_name.as_bytes())
    }
}

/// Decodes the records of one directory block.
///
/// Each record must fit inside the block it starts in. A record size of
/// zero terminates the block.
fn decode_entries_block(data: &[u8], entries: &mut Vec<DirectoryEntry>) -> ExtResult<()> {
    let mut offset = 0usize;

    while offset + MINIMUM_RECORD_SIZE <= data.len() {
        let record_size = u16::from_le_bytes([data[offset + 4], data[offset + 5]]);
        if record_size == 0 {
            break;
        }

        if usize::from(record_size) < MINIMUM_RECORD_SIZE
            || usize::from(record_size) > data.len() - offset
        {
            return Err(InputError::InvalidData.into());
        }

        let name_length = data[offset + 6];
        if usize::from(name_length) > usize::from(record_size) - MINIMUM_RECORD_SIZE {
            return Err(InputError::InvalidData.into());
        }

        let inode_number = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);

        // Inode number 0 marks a tombstone: skip the record, append nothing.
        if inode_number != 0 {
            let name_start = offset + MINIMUM_RECORD_SIZE;
            let mut name = data[name_start..name_start + usize::from(name_length)].to_vec();
            name.push(0);

            entries.push(DirectoryEntry {
                inode_number: InodeNumber::new(inode_number),
                record_size,
                file_type: DirectoryEntryType(data[offset + 7]),
                name,
            });
        }

        offset += usize::from(record_size);
    }

    Ok(())
}
