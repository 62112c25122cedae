//! Extent representation and the extent-tree resolver.
//!
//! An extent is the resolved form of a slice of file data: a run of
//! contiguous physical blocks mapped at a logical block number. The ext4
//! extent tree stores them natively; the classic indirect-block scheme
//! (see [`crate::data_blocks`]) is resolved into the same representation.
//!
//! An extent block begins with a 12-byte header followed by 12-byte entries:
//! leaves when the header depth is 0, index nodes otherwise. Every on-disk
//! extent block ends with a 4-byte checksum footer; the tree root embedded
//! in the inode's 60-byte data reference has none.

use bytemuck::{Pod, Zeroable};

use crate::err::{ExtResult, InputError, RuntimeError};
use crate::ext_flag_field;
use crate::io::{ByteSource, IoHandle};

ext_flag_field!(
    ExtentFlags,
    u32,
    "Range flags qualifying a resolved extent."
);

impl ExtentFlags {
    /// The extent has no physical backing; reads return zeroes.
    pub const IS_SPARSE: Self = Self(0x1);
}

/// A resolved run of file data.
///
/// Covers `number_of_blocks` logical blocks starting at
/// `logical_block_number`; backed by physical blocks starting at
/// `physical_block_number` unless sparse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Extent {
    pub logical_block_number: u32,
    pub physical_block_number: u64,
    pub number_of_blocks: u64,
    pub range_flags: ExtentFlags,
}

impl Extent {
    pub fn is_sparse(&self) -> bool {
        self.range_flags.includes(ExtentFlags::IS_SPARSE)
    }

    /// First logical block past this extent.
    pub(crate) fn logical_end(&self) -> u64 {
        u64::from(self.logical_block_number) + self.number_of_blocks
    }
}

/// Signature of an extents header: `0xF30A`.
const EXTENTS_HEADER_SIGNATURE: u16 = 0xF30A;

/// Maximum supported depth of an extent tree.
///
/// The root recursion starts one above it so that a root embedded at the
/// cap still decodes.
const MAX_TREE_DEPTH: u16 = 5;

/// Header of every node of the extent tree (12 bytes).
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawExtentsHeader {
    signature: u16,
    number_of_extents: u16,
    maximum_number_of_extents: u16,
    depth: u16,
    generation: u32,
}

/// A leaf entry of the extent tree (12 bytes).
///
/// A number-of-blocks value above 32768 marks an uninitialised extent of
/// `value - 32768` blocks, surfaced as sparse.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawExtent {
    logical_block_number: u32,
    number_of_blocks: u16,
    physical_block_number_upper: u16,
    physical_block_number_lower: u32,
}

/// An index entry of the extent tree (12 bytes), pointing one level down.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawExtentIndex {
    logical_block_number: u32,
    physical_block_number_lower: u32,
    physical_block_number_upper: u16,
    unused: u16,
}

const _: () = assert!(core::mem::size_of::<RawExtentsHeader>() == 12);
const _: () = assert!(core::mem::size_of::<RawExtent>() == 12);
const _: () = assert!(core::mem::size_of::<RawExtentIndex>() == 12);

/// Resolves an inode's 60-byte data reference holding an extent-tree root.
///
/// On return `extents` covers logical blocks `[0, number_of_blocks)` exactly,
/// with sparse extents synthesised for every gap including the trailing one.
pub(crate) fn read_inode_data_reference<S: ByteSource>(
    extents: &mut Vec<Extent>,
    io_handle: &IoHandle,
    source: &S,
    number_of_blocks: u64,
    data: &[u8],
) -> ExtResult<()> {
    read_data(extents, io_handle, source, number_of_blocks, data, MAX_TREE_DEPTH + 1)?;

    let logical_block_number = extents.last().map_or(0, Extent::logical_end);

    if logical_block_number < number_of_blocks {
        let tail_blocks = number_of_blocks - logical_block_number;

        match extents.last_mut() {
            Some(last) if last.is_sparse() => last.number_of_blocks += tail_blocks,
            _ => extents.push(Extent {
                logical_block_number: u32::try_from(logical_block_number)
                    .map_err(|_| RuntimeError::ValueOutOfBounds)?,
                physical_block_number: 0,
                number_of_blocks: tail_blocks,
                range_flags: ExtentFlags::IS_SPARSE,
            }),
        }
    }

    Ok(())
}

/// Decodes one node of the extent tree, recursing through index entries.
///
/// `parent_depth` enforces the strictly-decreasing-depth invariant: a node
/// whose header depth is not below its parent's is rejected, which also
/// bounds the recursion.
fn read_data<S: ByteSource>(
    extents: &mut Vec<Extent>,
    io_handle: &IoHandle,
    source: &S,
    number_of_blocks: u64,
    data: &[u8],
    parent_depth: u16,
) -> ExtResult<()> {
    io_handle.check_abort()?;

    if data.len() < core::mem::size_of::<RawExtentsHeader>() {
        return Err(InputError::InvalidData.into());
    }

    let header: RawExtentsHeader = bytemuck::pod_read_unaligned(&data[..12]);
    if u16::from_le(header.signature) != EXTENTS_HEADER_SIGNATURE {
        return Err(InputError::SignatureMismatch.into());
    }

    let depth = u16::from_le(header.depth);
    if depth >= parent_depth {
        return Err(RuntimeError::ValueOutOfBounds.into());
    }

    let number_of_extents = usize::from(u16::from_le(header.number_of_extents));
    if number_of_extents > (data.len() - 12) / 12 {
        return Err(RuntimeError::ValueOutOfBounds.into());
    }

    let mut data_offset = 12usize;
    let mut logical_block_number = extents.last().map_or(0, Extent::logical_end);

    for _ in 0..number_of_extents {
        if depth == 0 {
            let raw: RawExtent = bytemuck::pod_read_unaligned(&data[data_offset..data_offset + 12]);
            data_offset += 12;

            let raw_length = u16::from_le(raw.number_of_blocks);
            let (extent_blocks, range_flags) = if raw_length > 32768 {
                (u64::from(raw_length - 32768), ExtentFlags::IS_SPARSE)
            } else {
                (u64::from(raw_length), ExtentFlags(0))
            };

            if extent_blocks == 0 {
                continue;
            }

            let extent_logical = u32::from_le(raw.logical_block_number);
            if u64::from(extent_logical) > logical_block_number {
                extents.push(Extent {
                    logical_block_number: u32::try_from(logical_block_number)
                        .map_err(|_| RuntimeError::ValueOutOfBounds)?,
                    physical_block_number: 0,
                    number_of_blocks: u64::from(extent_logical) - logical_block_number,
                    range_flags: ExtentFlags::IS_SPARSE,
                });
            }

            let physical_block_number =
                u64::from(u16::from_le(raw.physical_block_number_upper)) << 32
                    | u64::from(u32::from_le(raw.physical_block_number_lower));

            logical_block_number = u64::from(extent_logical) + extent_blocks;

            extents.push(Extent {
                logical_block_number: extent_logical,
                physical_block_number,
                number_of_blocks: extent_blocks,
                range_flags,
            });
        } else {
            let raw: RawExtentIndex =
                bytemuck::pod_read_unaligned(&data[data_offset..data_offset + 12]);
            data_offset += 12;

            let physical_block_number =
                u64::from(u16::from_le(raw.physical_block_number_upper)) << 32
                    | u64::from(u32::from_le(raw.physical_block_number_lower));

            if physical_block_number > i64::MAX as u64 / io_handle.block_size {
                return Err(RuntimeError::ValueOutOfBounds.into());
            }

            let block_size = usize::try_from(io_handle.block_size)
                .map_err(|_| RuntimeError::ValueOutOfBounds)?;
            let mut block_data = vec![0u8; block_size];
            source.read_at(physical_block_number * io_handle.block_size, &mut block_data)?;

            read_data(extents, io_handle, source, number_of_blocks, &block_data, depth)?;

            logical_block_number = extents.last().map_or(0, Extent::logical_end);
        }
    }

    // The checksum footer closes every on-disk extent block. The tree root
    // embedded in the inode has no room for one (12 + 4 * 12 = 60). Read,
    // not verified.
    if data_offset + 4 <= data.len() {
        let _footer_checksum =
            u32::from_le_bytes([data[data_offset], data[data_offset + 1], data[data_offset + 2], data[data_offset + 3]]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::BufferSource;
    use crate::sb::tests::raw_superblock;
    use crate::sb::Superblock;

    fn test_io_handle() -> IoHandle {
        IoHandle::new(&Superblock::decode(&raw_superblock()).unwrap())
    }

    fn leaf_node(entries: &[(u32, u16, u64)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&EXTENTS_HEADER_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes()); // depth
        data.extend_from_slice(&0u32.to_le_bytes()); // generation

        for &(logical, count, physical) in entries {
            data.extend_from_slice(&logical.to_le_bytes());
            data.extend_from_slice(&count.to_le_bytes());
            data.extend_from_slice(&((physical >> 32) as u16).to_le_bytes());
            data.extend_from_slice(&(physical as u32).to_le_bytes());
        }
        data.resize(60, 0);

        data
    }

    #[test]
    fn single_leaf_resolves() {
        let io_handle = test_io_handle();
        let source = BufferSource::new(vec![]);
        let mut extents = Vec::new();

        read_inode_data_reference(&mut extents, &io_handle, &source, 1, &leaf_node(&[(0, 1, 42)]))
            .unwrap();

        assert_eq!(
            extents,
            vec![Extent {
                logical_block_number: 0,
                physical_block_number: 42,
                number_of_blocks: 1,
                range_flags: ExtentFlags(0),
            }]
        );
    }

    #[test]
    fn uninitialised_leaf_becomes_sparse() {
        let io_handle = test_io_handle();
        let source = BufferSource::new(vec![]);
        let mut extents = Vec::new();

        read_inode_data_reference(
            &mut extents,
            &io_handle,
            &source,
            3,
            &leaf_node(&[(0, 32771, 7)]),
        )
        .unwrap();

        assert_eq!(extents.len(), 1);
        assert!(extents[0].is_sparse());
        assert_eq!(extents[0].number_of_blocks, 3);
    }

    #[test]
    fn gap_between_leaves_is_filled() {
        let io_handle = test_io_handle();
        let source = BufferSource::new(vec![]);
        let mut extents = Vec::new();

        read_inode_data_reference(
            &mut extents,
            &io_handle,
            &source,
            6,
            &leaf_node(&[(0, 2, 10), (4, 2, 20)]),
        )
        .unwrap();

        assert_eq!(extents.len(), 3);
        assert!(extents[1].is_sparse());
        assert_eq!(extents[1].logical_block_number, 2);
        assert_eq!(extents[1].number_of_blocks, 2);
    }

    #[test]
    fn trailing_gap_is_padded_sparse() {
        let io_handle = test_io_handle();
        let source = BufferSource::new(vec![]);
        let mut extents = Vec::new();

        read_inode_data_reference(&mut extents, &io_handle, &source, 8, &leaf_node(&[(0, 2, 10)]))
            .unwrap();

        assert_eq!(extents.len(), 2);
        assert!(extents[1].is_sparse());
        assert_eq!(extents[1].logical_block_number, 2);
        assert_eq!(extents[1].number_of_blocks, 6);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let io_handle = test_io_handle();
        let source = BufferSource::new(vec![]);
        let mut extents = Vec::new();
        let mut data = leaf_node(&[(0, 1, 42)]);
        data[0] = 0;

        assert_eq!(
            read_inode_data_reference(&mut extents, &io_handle, &source, 1, &data).unwrap_err(),
            InputError::SignatureMismatch.into()
        );
    }

    #[test]
    fn depth_must_strictly_decrease() {
        let io_handle = test_io_handle();
        let source = BufferSource::new(vec![]);
        let mut extents = Vec::new();
        let mut data = leaf_node(&[(0, 1, 42)]);
        data[6..8].copy_from_slice(&6u16.to_le_bytes()); // depth beyond the cap

        assert_eq!(
            read_inode_data_reference(&mut extents, &io_handle, &source, 1, &data).unwrap_err(),
            RuntimeError::ValueOutOfBounds.into()
        );
    }

    #[test]
    fn two_level_trees_descend_through_index_nodes() {
        let io_handle = test_io_handle();

        // Root (depth 2) -> index block at 3 (depth 1) -> leaf block at 4.
        let mut image = vec![0u8; 8192];

        let mut index_block = Vec::new();
        index_block.extend_from_slice(&EXTENTS_HEADER_SIGNATURE.to_le_bytes());
        index_block.extend_from_slice(&1u16.to_le_bytes());
        index_block.extend_from_slice(&4u16.to_le_bytes());
        index_block.extend_from_slice(&1u16.to_le_bytes()); // depth 1
        index_block.extend_from_slice(&0u32.to_le_bytes());
        index_block.extend_from_slice(&0u32.to_le_bytes()); // logical
        index_block.extend_from_slice(&4u32.to_le_bytes()); // physical lower
        index_block.extend_from_slice(&0u16.to_le_bytes());
        index_block.extend_from_slice(&0u16.to_le_bytes());
        index_block.resize(1024, 0);
        image[3 * 1024..4 * 1024].copy_from_slice(&index_block);

        let mut leaf_block = leaf_node(&[(0, 3, 77)]);
        leaf_block.resize(1024, 0);
        image[4 * 1024..5 * 1024].copy_from_slice(&leaf_block);
        let source = BufferSource::new(image);

        let mut root = Vec::new();
        root.extend_from_slice(&EXTENTS_HEADER_SIGNATURE.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&4u16.to_le_bytes());
        root.extend_from_slice(&2u16.to_le_bytes()); // depth 2
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&3u32.to_le_bytes());
        root.extend_from_slice(&0u16.to_le_bytes());
        root.extend_from_slice(&0u16.to_le_bytes());
        root.resize(60, 0);

        let mut extents = Vec::new();
        read_inode_data_reference(&mut extents, &io_handle, &source, 3, &root).unwrap();

        assert_eq!(extents.len(), 1);
        assert_eq!(extents[0].physical_block_number, 77);
        assert_eq!(extents[0].number_of_blocks, 3);
    }

    #[test]
    fn a_child_as_deep_as_its_parent_is_rejected() {
        let io_handle = test_io_handle();

        // Root depth 1 pointing at a child that also claims depth 1.
        let mut image = vec![0u8; 4096];
        let mut child = Vec::new();
        child.extend_from_slice(&EXTENTS_HEADER_SIGNATURE.to_le_bytes());
        child.extend_from_slice(&0u16.to_le_bytes());
        child.extend_from_slice(&4u16.to_le_bytes());
        child.extend_from_slice(&1u16.to_le_bytes()); // depth equal to parent
        child.extend_from_slice(&0u32.to_le_bytes());
        child.resize(1024, 0);
        image[3 * 1024..4 * 1024].copy_from_slice(&child);
        let source = BufferSource::new(image);

        let mut root = Vec::new();
        root.extend_from_slice(&EXTENTS_HEADER_SIGNATURE.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&4u16.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes()); // depth 1
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&3u32.to_le_bytes());
        root.extend_from_slice(&0u16.to_le_bytes());
        root.extend_from_slice(&0u16.to_le_bytes());
        root.resize(60, 0);

        let mut extents = Vec::new();
        assert_eq!(
            read_inode_data_reference(&mut extents, &io_handle, &source, 1, &root).unwrap_err(),
            RuntimeError::ValueOutOfBounds.into()
        );
    }

    #[test]
    fn entry_count_is_bounded_by_the_node_size() {
        let io_handle = test_io_handle();
        let source = BufferSource::new(vec![]);
        let mut data = leaf_node(&[(0, 1, 42)]);
        data[2..4].copy_from_slice(&9u16.to_le_bytes()); // 9 entries in 48 bytes

        let mut extents = Vec::new();
        assert_eq!(
            read_inode_data_reference(&mut extents, &io_handle, &source, 1, &data).unwrap_err(),
            RuntimeError::ValueOutOfBounds.into()
        );
    }

    #[test]
    fn index_node_descends_into_child_block() {
        let io_handle = test_io_handle();

        // Child leaf block at physical block 3 of a 1024-byte-block image.
        let mut image = vec![0u8; 4096];
        let mut child = leaf_node(&[(0, 2, 99)]);
        child.resize(1024, 0);
        image[3 * 1024..4 * 1024].copy_from_slice(&child);
        let source = BufferSource::new(image);

        let mut root = Vec::new();
        root.extend_from_slice(&EXTENTS_HEADER_SIGNATURE.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&4u16.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes()); // depth 1
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&0u32.to_le_bytes()); // logical
        root.extend_from_slice(&3u32.to_le_bytes()); // physical lower
        root.extend_from_slice(&0u16.to_le_bytes()); // physical upper
        root.extend_from_slice(&0u16.to_le_bytes());
        root.resize(60, 0);

        let mut extents = Vec::new();
        read_inode_data_reference(&mut extents, &io_handle, &source, 2, &root).unwrap();

        assert_eq!(extents.len(), 1);
        assert_eq!(extents[0].physical_block_number, 99);
        assert_eq!(extents[0].number_of_blocks, 2);
    }
}
