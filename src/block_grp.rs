//! Block group related structures.
//!
//! Block groups partition the volume into contiguous runs of
//! `blocks_per_group` blocks, each with its own bitmaps and inode-table
//! slice. The per-group bookkeeping lives in group-descriptor records that
//! are enumerated once at open; only the primary table is kept.

use bytemuck::{Pod, Zeroable};
use log::{debug, warn};

use crate::err::{ExtResult, RuntimeError};
use crate::ext_uint_field_derive_display;
use crate::io::{ByteSource, IoHandle};
use crate::sb::{
    IncompatibleFeatures, ReadOnlyCompatibleFeatures, Superblock, SUPERBLOCK_OFFSET,
};

/// A number identifying a block group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct BlockGroupNumber(pub(crate) u32);

ext_uint_field_derive_display!(BlockGroupNumber);

impl BlockGroupNumber {
    /// First block group of a filesystem.
    pub const INITIAL: Self = Self(0);

    pub fn index(self) -> u32 {
        self.0
    }
}

/// On-disk group descriptor, classic 32-byte layout.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawGroupDescriptor32 {
    block_bitmap_block_number: u32,
    inode_bitmap_block_number: u32,
    inode_table_block_number: u32,
    number_of_unallocated_blocks: u16,
    number_of_unallocated_inodes: u16,
    number_of_directories: u16,
    padding: u16,
    reserved: [u8; 12],
}

/// On-disk group descriptor, 64-byte layout (64-bit feature).
///
/// The first 32 bytes carry the lower halves; the second 32 bytes carry the
/// upper halves of the block numbers and counts.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawGroupDescriptor64 {
    block_bitmap_block_number_lower: u32,
    inode_bitmap_block_number_lower: u32,
    inode_table_block_number_lower: u32,
    number_of_unallocated_blocks_lower: u16,
    number_of_unallocated_inodes_lower: u16,
    number_of_directories_lower: u16,
    block_group_flags: u16,
    exclude_bitmap_block_number_lower: u32,
    block_bitmap_checksum_lower: u16,
    inode_bitmap_checksum_lower: u16,
    number_of_unused_inodes_lower: u16,
    checksum: u16,
    block_bitmap_block_number_upper: u32,
    inode_bitmap_block_number_upper: u32,
    inode_table_block_number_upper: u32,
    number_of_unallocated_blocks_upper: u16,
    number_of_unallocated_inodes_upper: u16,
    number_of_directories_upper: u16,
    number_of_unused_inodes_upper: u16,
    exclude_bitmap_block_number_upper: u32,
    block_bitmap_checksum_upper: u16,
    inode_bitmap_checksum_upper: u16,
    reserved: u32,
}

const _: () = assert!(core::mem::size_of::<RawGroupDescriptor32>() == 32);
const _: () = assert!(core::mem::size_of::<RawGroupDescriptor64>() == 64);

/// Decoded group descriptor.
///
/// Read-only after open; the whole volume's descriptors live in one primary
/// array indexed by block-group number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupDescriptor {
    pub(crate) group_number: BlockGroupNumber,
    pub(crate) block_bitmap_block_number: u64,
    pub(crate) inode_bitmap_block_number: u64,
    pub(crate) inode_table_block_number: u64,
    pub(crate) number_of_unallocated_blocks: u32,
    pub(crate) number_of_unallocated_inodes: u32,
    pub(crate) number_of_directories: u32,
    pub(crate) flags: u16,
    pub(crate) checksum: u16,
}

impl GroupDescriptor {
    /// Decodes a descriptor record of the size the volume uses.
    fn decode(data: &[u8], descriptor_size: u64, group_number: BlockGroupNumber) -> Self {
        if descriptor_size == 64 {
            let raw: RawGroupDescriptor64 = bytemuck::pod_read_unaligned(&data[..64]);

            Self {
                group_number,
                block_bitmap_block_number: u64::from(u32::from_le(
                    raw.block_bitmap_block_number_lower,
                )) | u64::from(u32::from_le(raw.block_bitmap_block_number_upper)) << 32,
                inode_bitmap_block_number: u64::from(u32::from_le(
                    raw.inode_bitmap_block_number_lower,
                )) | u64::from(u32::from_le(raw.inode_bitmap_block_number_upper)) << 32,
                inode_table_block_number: u64::from(u32::from_le(
                    raw.inode_table_block_number_lower,
                )) | u64::from(u32::from_le(raw.inode_table_block_number_upper)) << 32,
                number_of_unallocated_blocks: u32::from(u16::from_le(
                    raw.number_of_unallocated_blocks_lower,
                )) | u32::from(u16::from_le(raw.number_of_unallocated_blocks_upper)) << 16,
                number_of_unallocated_inodes: u32::from(u16::from_le(
                    raw.number_of_unallocated_inodes_lower,
                )) | u32::from(u16::from_le(raw.number_of_unallocated_inodes_upper)) << 16,
                number_of_directories: u32::from(u16::from_le(raw.number_of_directories_lower))
                    | u32::from(u16::from_le(raw.number_of_directories_upper)) << 16,
                flags: u16::from_le(raw.block_group_flags),
                checksum: u16::from_le(raw.checksum),
            }
        } else {
            let raw: RawGroupDescriptor32 = bytemuck::pod_read_unaligned(&data[..32]);

            Self {
                group_number,
                block_bitmap_block_number: u64::from(u32::from_le(raw.block_bitmap_block_number)),
                inode_bitmap_block_number: u64::from(u32::from_le(raw.inode_bitmap_block_number)),
                inode_table_block_number: u64::from(u32::from_le(raw.inode_table_block_number)),
                number_of_unallocated_blocks: u32::from(u16::from_le(
                    raw.number_of_unallocated_blocks,
                )),
                number_of_unallocated_inodes: u32::from(u16::from_le(
                    raw.number_of_unallocated_inodes,
                )),
                number_of_directories: u32::from(u16::from_le(raw.number_of_directories)),
                flags: 0,
                checksum: 0,
            }
        }
    }

    /// Block number of the first inode-table block of this group.
    pub fn inode_table_block_number(&self) -> u64 {
        self.inode_table_block_number
    }
}

/// Walks every block group of the volume and builds the primary
/// group-descriptor array.
///
/// Backup superblocks are read and compared against the primary as they are
/// met; a mismatch is logged and processing continues with the primary
/// values. Secondary descriptor tables are read and discarded the same way.
pub(crate) fn read_block_groups<S: ByteSource>(
    source: &S,
    io_handle: &IoHandle,
    superblock: &Superblock,
) -> ExtResult<Vec<GroupDescriptor>> {
    let descriptor_size = superblock.descriptor_size();
    let sparse_superblock = superblock
        .read_only_compatible_features
        .includes(ReadOnlyCompatibleFeatures::SPARSE_SUPER);

    // Number of consecutive groups sharing one meta-group descriptor table,
    // 0 when the meta-bg feature is not in effect.
    let (groups_per_meta_group, metadata_start_group) = if superblock
        .incompatible_features
        .includes(IncompatibleFeatures::META_BG)
    {
        let per_meta = u32::try_from(superblock.block_size / descriptor_size)
            .map_err(|_| RuntimeError::ValueOutOfBounds)?;
        let start = superblock
            .first_metadata_block_group
            .checked_mul(per_meta)
            .ok_or(RuntimeError::ValueOutOfBounds)?;

        (per_meta, start)
    } else {
        (0, 0)
    };

    let mut descriptors: Vec<GroupDescriptor> = Vec::new();
    let mut block_group_offset = 0u64;
    let mut exponent3 = 3u32;
    let mut exponent5 = 5u32;
    let mut exponent7 = 7u32;

    for block_group_number in 0..superblock.number_of_block_groups {
        io_handle.check_abort()?;

        if exponent7 < block_group_number {
            exponent7 = exponent7.saturating_mul(7);
        }
        if exponent5 < block_group_number {
            exponent5 = exponent5.saturating_mul(5);
        }
        if exponent3 < block_group_number {
            exponent3 = exponent3.saturating_mul(3);
        }

        let mut has_superblock = block_group_number <= 1;
        if !has_superblock && sparse_superblock {
            has_superblock = block_group_number == exponent3
                || block_group_number == exponent5
                || block_group_number == exponent7;
        }

        if has_superblock && block_group_number > 0 {
            let mut superblock_offset = block_group_offset;
            if superblock.block_size == 1024 {
                superblock_offset += SUPERBLOCK_OFFSET;
            }

            debug!(
                "reading backup superblock of block group {block_group_number} at offset {superblock_offset}"
            );

            let backup = Superblock::read_at(source, superblock_offset)?;
            if !superblock.matches_backup(&backup) {
                warn!(
                    "backup superblock in block group {block_group_number} differs from the primary"
                );
            }
        }

        let has_group_descriptors = if groups_per_meta_group == 0
            || block_group_number < metadata_start_group
        {
            has_superblock
        } else {
            let meta_group_index = block_group_number % groups_per_meta_group;

            meta_group_index == 0
                || meta_group_index == 1
                || meta_group_index == groups_per_meta_group - 1
        };

        if has_group_descriptors {
            let mut table_offset = block_group_offset;
            if has_superblock {
                table_offset += superblock.block_size;
                if block_group_number == 0 && superblock.block_size == 1024 {
                    table_offset += SUPERBLOCK_OFFSET;
                }
            }

            // Classic layout replicates the whole table next to each
            // superblock copy; meta block groups keep one table per meta
            // group holding only that meta group's descriptors.
            let (table_length, is_primary, first_group_in_table) = if groups_per_meta_group == 0 {
                (
                    superblock.number_of_block_groups,
                    block_group_number == 0,
                    0u32,
                )
            } else if block_group_number < metadata_start_group {
                (
                    u32::min(metadata_start_group, superblock.number_of_block_groups),
                    block_group_number == 0,
                    0u32,
                )
            } else {
                let meta_group_index = block_group_number % groups_per_meta_group;

                (
                    groups_per_meta_group,
                    meta_group_index == 0,
                    block_group_number - meta_group_index,
                )
            };

            debug!(
                "reading {table_length} group descriptors of block group {block_group_number} at offset {table_offset}"
            );

            let table_bytes = usize::try_from(u64::from(table_length) * descriptor_size)
                .map_err(|_| RuntimeError::ValueOutOfBounds)?;
            let mut table_data = vec![0u8; table_bytes];
            source.read_at(table_offset, &mut table_data)?;

            for descriptor_index in 0..table_length {
                let record_start = descriptor_index as usize * descriptor_size as usize;
                let record = &table_data[record_start..record_start + descriptor_size as usize];
                let descriptor = GroupDescriptor::decode(
                    record,
                    descriptor_size,
                    BlockGroupNumber(first_group_in_table + descriptor_index),
                );

                if is_primary {
                    descriptors.push(descriptor);
                } else if let Some(primary) =
                    descriptors.get((first_group_in_table + descriptor_index) as usize)
                {
                    if *primary != descriptor {
                        warn!(
                            "secondary group descriptor {} in block group {block_group_number} differs from the primary",
                            first_group_in_table + descriptor_index
                        );
                    }
                }
            }
        }

        block_group_offset += superblock.block_group_size;
    }

    // The last meta group's table may describe slots past the end of the
    // volume.
    descriptors.truncate(superblock.number_of_block_groups as usize);

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_records_are_bit_exact() {
        assert_eq!(core::mem::size_of::<RawGroupDescriptor32>(), 32);
        assert_eq!(core::mem::size_of::<RawGroupDescriptor64>(), 64);
    }

    #[test]
    fn classic_descriptor_decodes() {
        let mut data = [0u8; 32];
        data[0..4].copy_from_slice(&3u32.to_le_bytes());
        data[4..8].copy_from_slice(&4u32.to_le_bytes());
        data[8..12].copy_from_slice(&5u32.to_le_bytes());
        data[12..14].copy_from_slice(&100u16.to_le_bytes());
        data[14..16].copy_from_slice(&200u16.to_le_bytes());
        data[16..18].copy_from_slice(&2u16.to_le_bytes());

        let descriptor = GroupDescriptor::decode(&data, 32, BlockGroupNumber(0));

        assert_eq!(descriptor.block_bitmap_block_number, 3);
        assert_eq!(descriptor.inode_bitmap_block_number, 4);
        assert_eq!(descriptor.inode_table_block_number, 5);
        assert_eq!(descriptor.number_of_unallocated_blocks, 100);
        assert_eq!(descriptor.number_of_unallocated_inodes, 200);
        assert_eq!(descriptor.number_of_directories, 2);
    }

    #[test]
    fn wide_descriptor_folds_upper_halves() {
        let mut data = [0u8; 64];
        data[8..12].copy_from_slice(&0x11u32.to_le_bytes()); // inode table lower
        data[40..44].copy_from_slice(&0x2u32.to_le_bytes()); // inode table upper
        data[12..14].copy_from_slice(&0x10u16.to_le_bytes()); // unalloc blocks lower
        data[44..46].copy_from_slice(&0x1u16.to_le_bytes()); // unalloc blocks upper

        let descriptor = GroupDescriptor::decode(&data, 64, BlockGroupNumber(1));

        assert_eq!(descriptor.inode_table_block_number, (0x2u64 << 32) | 0x11);
        assert_eq!(descriptor.number_of_unallocated_blocks, (1 << 16) | 0x10);
    }
}
