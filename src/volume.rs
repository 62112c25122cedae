//! Volume façade.
//!
//! Owns the byte source and every structure derived from it: the primary
//! superblock, the group-descriptor array and the inode table. Opening a
//! volume walks superblock → block groups → inode table; every file-entry
//! request afterwards resolves lazily through the inode cache.

use crate::block_grp::{read_block_groups, GroupDescriptor};
use crate::dir::Directory;
use crate::err::{ExtResult, InputError};
use crate::file::FileEntry;
use crate::inode::{Inode, InodeNumber};
use crate::io::{ByteSource, IoHandle};
use crate::inode_table::InodeTable;
use crate::sb::{
    CompatibleFeatures, FormatVersion, IncompatibleFeatures, ReadOnlyCompatibleFeatures,
    Superblock,
};
use crate::time::UnixTimestamp32;

/// An open, read-only extended-filesystem volume.
///
/// Callers may hold concurrent references from multiple threads: the byte
/// source takes positioned reads through `&self` and the inode cache guards
/// itself with a read/write lock.
#[derive(Debug)]
pub struct Volume<S: ByteSource> {
    source: S,
    pub(crate) io_handle: IoHandle,
    superblock: Superblock,
    group_descriptors: Vec<GroupDescriptor>,
    inode_table: InodeTable,
}

impl<S: ByteSource> Volume<S> {
    /// Opens a volume: validates the primary superblock, enumerates the
    /// block groups (reading backup copies where present) and prepares the
    /// inode table.
    ///
    /// Fails with a signature mismatch when the source is not an ext
    /// volume, with an unsupported-value error when a feature flag or the
    /// format revision is outside what this build handles, or with an I/O
    /// error from the source.
    pub fn open(source: S) -> ExtResult<Self> {
        let superblock = Superblock::read(&source)?;
        let io_handle = IoHandle::new(&superblock);
        let group_descriptors = read_block_groups(&source, &io_handle, &superblock)?;

        Ok(Self {
            source,
            io_handle,
            superblock,
            group_descriptors,
            inode_table: InodeTable::new(),
        })
    }

    /// Closes the volume, releasing the byte source.
    pub fn close(self) -> S {
        self.source
    }

    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    /// Raises the abort flag: the next long-running operation on this
    /// volume fails with an abort-requested error.
    pub fn signal_abort(&self) {
        self.io_handle.signal_abort();
    }

    /// Derived format version of the volume (2, 3 or 4).
    pub fn format_version(&self) -> FormatVersion {
        self.superblock.format_version
    }

    /// The three feature-flag words of the superblock.
    pub fn features_flags(
        &self,
    ) -> (CompatibleFeatures, IncompatibleFeatures, ReadOnlyCompatibleFeatures) {
        (
            self.superblock.compatible_features,
            self.superblock.incompatible_features,
            self.superblock.read_only_compatible_features,
        )
    }

    /// 16-byte filesystem identifier.
    pub fn identifier(&self) -> [u8; 16] {
        self.superblock.identifier
    }

    /// Volume label as UTF-8.
    pub fn label_utf8(&self) -> String {
        self.superblock.label_utf8()
    }

    /// Volume label as UTF-16 code units.
    pub fn label_utf16(&self) -> Vec<u16> {
        self.superblock.label_utf16()
    }

    /// Path the volume was last mounted on, as UTF-8.
    pub fn last_mount_path_utf8(&self) -> String {
        self.superblock.last_mount_path_utf8()
    }

    /// Path the volume was last mounted on, as UTF-16 code units.
    pub fn last_mount_path_utf16(&self) -> Vec<u16> {
        self.superblock.last_mount_path_utf16()
    }

    pub fn last_mount_time(&self) -> UnixTimestamp32 {
        self.superblock.last_mount_time
    }

    pub fn last_written_time(&self) -> UnixTimestamp32 {
        self.superblock.last_written_time
    }

    /// Size of a block in bytes.
    pub fn block_size(&self) -> u64 {
        self.superblock.block_size
    }

    /// Total number of inode slots of the volume.
    pub fn number_of_file_entries(&self) -> u32 {
        self.superblock.number_of_inodes
    }

    pub(crate) fn get_inode(&self, inode_number: InodeNumber) -> ExtResult<Inode> {
        self.inode_table.get(
            &self.source,
            &self.io_handle,
            &self.superblock,
            &self.group_descriptors,
            inode_number,
        )
    }

    pub(crate) fn read_directory(&self, inode: &Inode) -> ExtResult<Directory> {
        Directory::read_from_inode(&self.source, &self.io_handle, inode)
    }

    /// Returns the root directory (inode 2).
    pub fn root_directory(&self) -> ExtResult<FileEntry<'_, S>> {
        self.file_entry_by_inode(InodeNumber::ROOT_DIRECTORY.index())
    }

    /// Returns the file entry with the given one-based inode number.
    pub fn file_entry_by_inode(&self, inode_number: u32) -> ExtResult<FileEntry<'_, S>> {
        let inode_number = InodeNumber::new(inode_number);
        let inode = self.get_inode(inode_number)?;

        Ok(FileEntry::new(self, inode_number, inode, None))
    }

    /// Resolves a `/`-separated UTF-8 path from the root directory.
    ///
    /// A leading separator is ignored; an empty path or `/` yields the
    /// root. Returns `Ok(None)` when a component does not exist or is
    /// zero-length: absence is not an error.
    pub fn file_entry_by_utf8_path(&self, path: &str) -> ExtResult<Option<FileEntry<'_, S>>> {
        let path = path.strip_prefix('/').unwrap_or(path);

        let mut inode_number = InodeNumber::ROOT_DIRECTORY;
        let mut inode = self.get_inode(inode_number)?;
        let mut directory_entry = None;

        if !path.is_empty() {
            let path = path.strip_suffix('/').unwrap_or(path);
            if path.is_empty() {
                return Ok(None);
            }

            for component in path.split('/') {
                if component.is_empty() {
                    return Ok(None);
                }
                if !inode.is_directory() {
                    return Ok(None);
                }

                let directory = self.read_directory(&inode)?;
                let Some(entry) = directory.find_by_utf8_name(component.as_bytes()) else {
                    return Ok(None);
                };

                inode_number = entry.inode_number();
                directory_entry = Some(entry.clone());
                inode = self.get_inode(inode_number)?;
            }
        }

        Ok(Some(FileEntry::new(self, inode_number, inode, directory_entry)))
    }

    /// Resolves a `/`-separated UTF-16 path from the root directory.
    ///
    /// The path is transcoded to UTF-8 up front; ill-formed UTF-16 is an
    /// input error, while a missing component is `Ok(None)` as for the
    /// UTF-8 variant.
    pub fn file_entry_by_utf16_path(
        &self,
        path: &[u16],
    ) -> ExtResult<Option<FileEntry<'_, S>>> {
        let path = String::from_utf16(path).map_err(|_| InputError::InvalidData)?;

        self.file_entry_by_utf8_path(&path)
    }
}
