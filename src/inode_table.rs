//! Random-access inode table with a bounded cache.
//!
//! Inode *n* (one-based) lives in block group `(n - 1) / inodes_per_group`;
//! within that group its record sits `((n - 1) % inodes_per_group) *
//! inode_size` bytes past the start of the group's inode table. A miss reads
//! exactly one record, decodes it, resolves its extents and inserts it into
//! a fixed-capacity LRU. The cache is the only owner of live inodes; callers
//! that retain one clone it.

use hashbrown::HashMap;
use spin::RwLock;

use crate::block_grp::GroupDescriptor;
use crate::err::{ArgumentError, ExtResult};
use crate::inode::{Inode, InodeNumber};
use crate::io::{ByteSource, IoHandle};
use crate::sb::Superblock;

/// Fixed capacity of the inode cache, independent of the volume size.
const INODE_CACHE_CAPACITY: usize = 32;

#[derive(Debug)]
struct InodeCache {
    entries: HashMap<u32, Inode>,
    usage_order: Vec<u32>,
}

impl InodeCache {
    fn new() -> Self {
        Self {
            entries: HashMap::with_capacity(INODE_CACHE_CAPACITY),
            usage_order: Vec::with_capacity(INODE_CACHE_CAPACITY),
        }
    }

    fn get(&mut self, inode_number: u32) -> Option<Inode> {
        let inode = self.entries.get(&inode_number)?.clone();
        self.touch(inode_number);

        Some(inode)
    }

    fn insert(&mut self, inode_number: u32, inode: Inode) {
        if self.entries.len() >= INODE_CACHE_CAPACITY && !self.entries.contains_key(&inode_number)
        {
            let evicted = self.usage_order.remove(0);
            self.entries.remove(&evicted);
        }

        self.entries.insert(inode_number, inode);
        self.touch(inode_number);
    }

    fn touch(&mut self, inode_number: u32) {
        if let Some(position) = self.usage_order.iter().position(|&n| n == inode_number) {
            self.usage_order.remove(position);
        }
        self.usage_order.push(inode_number);
    }
}

/// Cached random-access view over every inode of the volume.
#[derive(Debug)]
pub(crate) struct InodeTable {
    cache: RwLock<InodeCache>,
}

impl InodeTable {
    pub(crate) fn new() -> Self {
        Self { cache: RwLock::new(InodeCache::new()) }
    }

    /// Returns the inode with the given one-based number.
    ///
    /// The returned inode is a clone of the cache entry, so later evictions
    /// never invalidate it.
    pub(crate) fn get<S: ByteSource>(
        &self,
        source: &S,
        io_handle: &IoHandle,
        superblock: &Superblock,
        group_descriptors: &[GroupDescriptor],
        inode_number: InodeNumber,
    ) -> ExtResult<Inode> {
        if !superblock.contains_inode(inode_number.index()) {
            return Err(ArgumentError::ValueOutOfBounds.into());
        }

        if let Some(inode) = self.cache.write().get(inode_number.index()) {
            return Ok(inode);
        }

        let inode = self.read_inode(source, io_handle, superblock, group_descriptors, inode_number)?;
        self.cache.write().insert(inode_number.index(), inode.clone());

        Ok(inode)
    }

    /// Reads and materialises one inode record from disk.
    fn read_inode<S: ByteSource>(
        &self,
        source: &S,
        io_handle: &IoHandle,
        superblock: &Superblock,
        group_descriptors: &[GroupDescriptor],
        inode_number: InodeNumber,
    ) -> ExtResult<Inode> {
        let table_index = inode_number.index() - 1;
        let block_group = table_index / superblock.inodes_per_group;
        let group_index = table_index % superblock.inodes_per_group;

        let descriptor = group_descriptors
            .get(block_group as usize)
            .ok_or(ArgumentError::ValueOutOfBounds)?;

        let record_offset = descriptor.inode_table_block_number() * io_handle.block_size
            + u64::from(group_index) * u64::from(io_handle.inode_size);

        let mut record = vec![0u8; usize::from(io_handle.inode_size)];
        source.read_at(record_offset, &mut record)?;

        let mut inode = Inode::decode(&record, io_handle)?;
        if !inode.is_empty() {
            inode.read_data_reference(io_handle, source)?;
        }

        Ok(inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::tests::raw_inode;

    #[test]
    fn cache_evicts_the_least_recently_used_entry() {
        let mut cache = InodeCache::new();

        for number in 1..=INODE_CACHE_CAPACITY as u32 {
            cache.insert(number, Inode::default());
        }
        assert!(cache.get(1).is_some());

        // Inode 1 was just refreshed, so inserting one more evicts inode 2.
        cache.insert(INODE_CACHE_CAPACITY as u32 + 1, Inode::default());
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn materialised_inodes_come_back_from_the_cache() {
        use crate::io::BufferSource;
        use crate::sb::tests::raw_superblock;
        use crate::sb::Superblock;

        let superblock = Superblock::decode(&raw_superblock()).unwrap();
        let io_handle = IoHandle::new(&superblock);

        // Inode table at block 5; inode 2 is a directory record.
        let mut image = vec![0u8; 16 * 1024];
        let record = raw_inode(0x41ED, 0);
        image[5 * 1024 + 128..5 * 1024 + 256].copy_from_slice(&record[..128]);
        let source = BufferSource::new(image);

        let descriptors = vec![GroupDescriptor {
            group_number: crate::block_grp::BlockGroupNumber::INITIAL,
            block_bitmap_block_number: 3,
            inode_bitmap_block_number: 4,
            inode_table_block_number: 5,
            number_of_unallocated_blocks: 0,
            number_of_unallocated_inodes: 0,
            number_of_directories: 1,
            flags: 0,
            checksum: 0,
        }];

        let table = InodeTable::new();
        let inode = table
            .get(&source, &io_handle, &superblock, &descriptors, InodeNumber::ROOT_DIRECTORY)
            .unwrap();
        assert!(inode.is_directory());

        let cached = table
            .get(&source, &io_handle, &superblock, &descriptors, InodeNumber::ROOT_DIRECTORY)
            .unwrap();
        assert!(cached.is_directory());
    }
}
