//! Resolver for the classic block-pointer scheme (ext2/3).
//!
//! The inode's 60-byte data reference holds 12 direct block numbers followed
//! by one single-, one double- and one triple-indirect pointer. Indirect
//! blocks are arrays of `block_size / 4` block numbers. The walk flattens
//! the tree into the same [`Extent`] representation the extent-tree resolver
//! produces: contiguous physical runs are merged, zero block numbers become
//! sparse extents spanning the subtree they stand for.

use crate::err::{ExtResult, RuntimeError};
use crate::extent::{Extent, ExtentFlags};
use crate::io::{ByteSource, IoHandle};

/// Sentinel passed as the containing block number when walking the direct
/// pointers: one above the largest possible 32-bit block number, so the
/// self-reference check never fires on the inode itself.
const NO_PARENT_BLOCK: u64 = 0x1_0000_0000;

/// Number of direct block pointers in the data reference.
const DIRECT_POINTERS: usize = 12;

/// Resolves an inode's 60-byte data reference holding direct and indirect
/// block pointers.
pub(crate) fn read_inode_data_reference<S: ByteSource>(
    extents: &mut Vec<Extent>,
    io_handle: &IoHandle,
    source: &S,
    number_of_blocks: u64,
    data: &[u8],
) -> ExtResult<()> {
    let pointers_per_block = io_handle.block_size / 4;

    read_data(
        extents,
        io_handle,
        source,
        number_of_blocks,
        NO_PARENT_BLOCK,
        &data[..DIRECT_POINTERS * 4],
        0,
    )?;

    for (data_offset, depth) in [(48usize, 1u8), (52, 2), (56, 3)] {
        let block_number = u32::from_le_bytes([
            data[data_offset],
            data[data_offset + 1],
            data[data_offset + 2],
            data[data_offset + 3],
        ]);

        if block_number == 0 {
            let logical_block_number = extents
                .last()
                .map(Extent::logical_end)
                .ok_or(RuntimeError::ValueMissing)?;

            if logical_block_number < number_of_blocks {
                let span = u64::min(
                    pointers_per_block.pow(u32::from(depth)),
                    number_of_blocks - logical_block_number,
                );
                push_sparse(extents, io_handle, logical_block_number, span)?;
            }
        } else {
            read_indirect_block(extents, io_handle, source, number_of_blocks, block_number, depth)?;
        }
    }

    Ok(())
}

/// Walks one array of block numbers.
///
/// `depth` is the indirection level the entries point at: 0 means the
/// entries are data blocks, otherwise each entry names an indirect block
/// covering `(block_size / 4)^depth` logical blocks.
fn read_data<S: ByteSource>(
    extents: &mut Vec<Extent>,
    io_handle: &IoHandle,
    source: &S,
    number_of_blocks: u64,
    parent_block_number: u64,
    data: &[u8],
    depth: u8,
) -> ExtResult<()> {
    io_handle.check_abort()?;

    let pointers_per_block = io_handle.block_size / 4;
    let mut logical_block_number = extents.last().map_or(0, Extent::logical_end);

    for entry in data.chunks_exact(4) {
        if logical_block_number >= number_of_blocks {
            break;
        }

        let block_number = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);

        if u64::from(block_number) == parent_block_number {
            return Err(RuntimeError::ValueOutOfBounds.into());
        }

        if block_number == 0 {
            let span = u64::min(
                pointers_per_block.pow(u32::from(depth)),
                number_of_blocks - logical_block_number,
            );
            push_sparse(extents, io_handle, logical_block_number, span)?;
            logical_block_number += span;
        } else if depth > 0 {
            read_indirect_block(
                extents,
                io_handle,
                source,
                number_of_blocks,
                block_number,
                depth,
            )?;
            logical_block_number = extents.last().map_or(0, Extent::logical_end);
        } else {
            match extents.last_mut() {
                Some(last)
                    if !last.is_sparse()
                        && last.physical_block_number + last.number_of_blocks
                            == u64::from(block_number) =>
                {
                    check_extent_growth(io_handle, last.number_of_blocks, 1)?;
                    last.number_of_blocks += 1;
                }
                _ => extents.push(Extent {
                    logical_block_number: u32::try_from(logical_block_number)
                        .map_err(|_| RuntimeError::ValueOutOfBounds)?,
                    physical_block_number: u64::from(block_number),
                    number_of_blocks: 1,
                    range_flags: ExtentFlags(0),
                }),
            }
            logical_block_number += 1;
        }
    }

    Ok(())
}

/// Reads one indirect block and walks its entries one level down.
fn read_indirect_block<S: ByteSource>(
    extents: &mut Vec<Extent>,
    io_handle: &IoHandle,
    source: &S,
    number_of_blocks: u64,
    block_number: u32,
    depth: u8,
) -> ExtResult<()> {
    let block_offset = u64::from(block_number)
        .checked_mul(io_handle.block_size)
        .ok_or(RuntimeError::ValueOutOfBounds)?;

    let block_size =
        usize::try_from(io_handle.block_size).map_err(|_| RuntimeError::ValueOutOfBounds)?;
    let mut block_data = vec![0u8; block_size];
    source.read_at(block_offset, &mut block_data)?;

    read_data(
        extents,
        io_handle,
        source,
        number_of_blocks,
        u64::from(block_number),
        &block_data,
        depth - 1,
    )
}

/// Appends a sparse run, merging into a trailing sparse extent.
fn push_sparse(
    extents: &mut Vec<Extent>,
    io_handle: &IoHandle,
    logical_block_number: u64,
    span: u64,
) -> ExtResult<()> {
    match extents.last_mut() {
        Some(last) if last.is_sparse() => {
            check_extent_growth(io_handle, last.number_of_blocks, span)?;
            last.number_of_blocks += span;
        }
        _ => extents.push(Extent {
            logical_block_number: u32::try_from(logical_block_number)
                .map_err(|_| RuntimeError::ValueOutOfBounds)?,
            physical_block_number: 0,
            number_of_blocks: span,
            range_flags: ExtentFlags::IS_SPARSE,
        }),
    }

    Ok(())
}

/// Guards extent growth against byte-size overflow.
fn check_extent_growth(io_handle: &IoHandle, current: u64, growth: u64) -> ExtResult<()> {
    if current > (u64::MAX / io_handle.block_size) - growth {
        return Err(RuntimeError::ValueOutOfBounds.into());
    }

    Ok(())
}
