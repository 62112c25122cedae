//! Per-inode file entry view.
//!
//! A [`FileEntry`] bundles a cloned inode with the directory entry it was
//! reached through (which carries the name). Clones keep the entry valid
//! even after the cache evicts the underlying inode. Content reads walk the
//! resolved extents; sparse stretches read as zeroes.

use crate::dir::{Directory, DirectoryEntry};
use crate::err::{ArgumentError, ExtResult, InputError};
use crate::extent::Extent;
use crate::inode::{Inode, InodeFileMode, InodeNumber, InodeType};
use crate::io::ByteSource;
use crate::time::{UnixTimestamp32, UnixTimestampNs};
use crate::volume::Volume;

/// A single filesystem object: file, directory, symbolic link or special
/// node.
#[derive(Debug)]
pub struct FileEntry<'vol, S: ByteSource> {
    volume: &'vol Volume<S>,
    inode_number: InodeNumber,
    inode: Inode,
    directory_entry: Option<DirectoryEntry>,
}

impl<'vol, S: ByteSource> FileEntry<'vol, S> {
    pub(crate) fn new(
        volume: &'vol Volume<S>,
        inode_number: InodeNumber,
        inode: Inode,
        directory_entry: Option<DirectoryEntry>,
    ) -> Self {
        Self { volume, inode_number, inode, directory_entry }
    }

    pub fn inode_number(&self) -> InodeNumber {
        self.inode_number
    }

    /// The decoded inode backing this entry.
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// Name of the entry as UTF-8, when reached through a directory.
    ///
    /// The root directory and entries fetched by inode number have no name.
    pub fn name_utf8(&self) -> Option<String> {
        self.directory_entry.as_ref().map(DirectoryEntry::name_utf8)
    }

    /// Name of the entry as UTF-16 code units, when reached through a
    /// directory.
    pub fn name_utf16(&self) -> Option<Vec<u16>> {
        self.directory_entry.as_ref().map(DirectoryEntry::name_utf16)
    }

    pub fn file_mode(&self) -> InodeFileMode {
        self.inode.file_mode
    }

    pub fn inode_type(&self) -> InodeType {
        self.inode.inode_type()
    }

    pub fn owner_identifier(&self) -> u32 {
        self.inode.owner_identifier
    }

    pub fn group_identifier(&self) -> u32 {
        self.inode.group_identifier
    }

    pub fn number_of_links(&self) -> u16 {
        self.inode.number_of_links
    }

    pub fn data_size(&self) -> u64 {
        self.inode.data_size
    }

    pub fn access_time(&self) -> UnixTimestampNs {
        self.inode.access_time
    }

    pub fn inode_change_time(&self) -> UnixTimestampNs {
        self.inode.inode_change_time
    }

    pub fn modification_time(&self) -> UnixTimestampNs {
        self.inode.modification_time
    }

    /// Creation time, present only on ext4 volumes with the extended inode
    /// tail.
    pub fn creation_time(&self) -> Option<UnixTimestampNs> {
        self.inode.creation_time
    }

    /// Deletion time; zero when the inode was never deleted.
    pub fn deletion_time(&self) -> UnixTimestamp32 {
        self.inode.deletion_time
    }

    pub fn nfs_generation_number(&self) -> u32 {
        self.inode.nfs_generation_number
    }

    pub fn file_acl_block_number(&self) -> u64 {
        self.inode.file_acl_block_number
    }

    /// Encoded device identifier, for character and block device nodes.
    pub fn device_identifier(&self) -> Option<u32> {
        self.inode.is_device().then(|| self.inode.device_identifier())
    }

    /// `(major, minor)` device numbers, for character and block device
    /// nodes.
    pub fn device_number(&self) -> Option<(u8, u8)> {
        self.inode.is_device().then(|| self.inode.device_number())
    }

    pub fn number_of_extents(&self) -> usize {
        self.inode.data_extents.len()
    }

    pub fn extent(&self, index: usize) -> Option<&Extent> {
        self.inode.data_extents.get(index)
    }

    pub fn extents(&self) -> &[Extent] {
        &self.inode.data_extents
    }

    /// Reads file content at the given byte offset.
    ///
    /// Returns the number of bytes read, short only at end of data. Sparse
    /// ranges fill with zeroes; inline content comes straight from the inode
    /// record.
    pub fn read_at(&self, offset: u64, buffer: &mut [u8]) -> ExtResult<usize> {
        let data_size = self.inode.data_size;
        if offset >= data_size || buffer.is_empty() {
            return Ok(0);
        }

        let read_length =
            usize::try_from(u64::min(buffer.len() as u64, data_size - offset))
                .map_err(|_| ArgumentError::ValueOutOfBounds)?;
        let buffer = &mut buffer[..read_length];

        if self.inode.has_inline_data() || self.inode.has_inline_link_target() {
            let content = self.inode.inline_data();
            let start = usize::try_from(offset).map_err(|_| ArgumentError::ValueOutOfBounds)?;
            let available = content.len().saturating_sub(start);
            let copy_length = usize::min(read_length, available);

            buffer[..copy_length].copy_from_slice(&content[start..start + copy_length]);
            buffer[copy_length..].fill(0);

            return Ok(read_length);
        }

        buffer.fill(0);

        let block_size = self.volume.io_handle.block_size;
        let read_start = offset;
        let read_end = offset + read_length as u64;

        for extent in &self.inode.data_extents {
            let extent_start = u64::from(extent.logical_block_number) * block_size;
            let extent_end = extent_start + extent.number_of_blocks * block_size;

            if extent_end <= read_start || extent_start >= read_end {
                continue;
            }

            // Sparse ranges stay zero-filled.
            if extent.is_sparse() {
                continue;
            }

            let intersection_start = u64::max(extent_start, read_start);
            let intersection_end = u64::min(extent_end, read_end);

            let physical_offset = extent.physical_block_number * block_size
                + (intersection_start - extent_start);
            let buffer_start = (intersection_start - read_start) as usize;
            let buffer_end = (intersection_end - read_start) as usize;

            self.volume
                .source()
                .read_at(physical_offset, &mut buffer[buffer_start..buffer_end])?;
        }

        Ok(read_length)
    }

    /// Reads the whole file content.
    pub fn read_to_end(&self) -> ExtResult<Vec<u8>> {
        let data_size = usize::try_from(self.inode.data_size)
            .map_err(|_| ArgumentError::ValueOutOfBounds)?;
        let mut content = vec![0u8; data_size];
        self.read_at(0, &mut content)?;

        Ok(content)
    }

    /// Target path of a symbolic link, as UTF-8.
    ///
    /// Targets shorter than 60 bytes live inside the inode record; longer
    /// ones are read through the extents. Returns `None` for entries that
    /// are not symbolic links.
    pub fn symbolic_link_target_utf8(&self) -> ExtResult<Option<String>> {
        if !self.inode.is_symbolic_link() {
            return Ok(None);
        }

        let target_bytes = if self.inode.has_inline_link_target() {
            let target_length = usize::try_from(self.inode.data_size)
                .map_err(|_| ArgumentError::ValueOutOfBounds)?;

            self.inode.data_reference[..target_length].to_vec()
        } else {
            self.read_to_end()?
        };

        let target =
            String::from_utf8(target_bytes).map_err(|_| InputError::InvalidData)?;

        Ok(Some(target))
    }

    /// Target path of a symbolic link, as UTF-16 code units.
    pub fn symbolic_link_target_utf16(&self) -> ExtResult<Option<Vec<u16>>> {
        Ok(self
            .symbolic_link_target_utf8()?
            .map(|target| target.encode_utf16().collect()))
    }

    /// Lists the children of a directory entry, in on-disk order.
    pub fn entries(&self) -> ExtResult<Vec<DirectoryEntry>> {
        let directory = self.read_directory()?;

        Ok(directory.entries().to_vec())
    }

    /// Descends one level to the named child of a directory entry.
    ///
    /// Returns `Ok(None)` when no child carries the name.
    pub fn file_entry_by_utf8_name(&self, name: &str) -> ExtResult<Option<FileEntry<'vol, S>>> {
        let directory = self.read_directory()?;

        let Some(entry) = directory.find_by_utf8_name(name.as_bytes()) else {
            return Ok(None);
        };

        let inode = self.volume.get_inode(entry.inode_number())?;

        Ok(Some(FileEntry::new(
            self.volume,
            entry.inode_number(),
            inode,
            Some(entry.clone()),
        )))
    }

    fn read_directory(&self) -> ExtResult<Directory> {
        self.volume.read_directory(&self.inode)
    }
}
