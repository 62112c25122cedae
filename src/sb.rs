//! Superblock related structures.
//!
//! The superblock stores various information about the filesystem (supported
//! features, block count, inode count, ...). It lives at absolute offset 1024
//! from the start of the volume.
//!
//! Copies of the superblock are kept in other block groups, unless the
//! `sparse_super` feature is set in which case they only exist in block
//! groups whose number is 0, 1, or a power of 3, 5 or 7.

use bytemuck::{Pod, Zeroable};

use crate::err::{ExtResult, InputError, RuntimeError};
use crate::io::ByteSource;
use crate::time::UnixTimestamp32;

/// Derives the [`core::fmt::Display`] trait for tuple structs containing a single field.
#[macro_export]
macro_rules! ext_uint_field_derive_display {
    ($struct_name: tt) => {
        impl core::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_fmt(format_args!("{}", self.0))
            }
        }
    };
}

/// Defines a standard structure for flag-related on-disk fields.
#[macro_export]
macro_rules! ext_flag_field {
    ($struct_name: tt, $size: ident, $desc: literal) => {
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
            bytemuck::Pod, bytemuck::Zeroable,
        )]
        #[repr(transparent)]
        #[doc=$desc]
        pub struct $struct_name(pub(crate) $size);

        impl core::ops::BitAnd for $struct_name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self::Output {
                Self(self.0 & rhs.0)
            }
        }

        impl core::ops::BitOr for $struct_name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self::Output {
                Self(self.0 | rhs.0)
            }
        }

        impl core::ops::BitXor for $struct_name {
            type Output = Self;

            fn bitxor(self, rhs: Self) -> Self::Output {
                Self(self.0 ^ rhs.0)
            }
        }

        impl $struct_name {
            /// Checks whether all flags of `flags` are set in this set.
            pub fn includes(self, flags: Self) -> bool {
                (flags | self) ^ self == Self(0)
            }

            /// Checks whether at least one flag of `flags` is set in this set.
            pub fn intersects(self, flags: Self) -> bool {
                self & flags != Self(0)
            }

            /// Returns the raw flag word.
            pub fn bits(self) -> $size {
                self.0
            }
        }
    };
}

ext_flag_field!(
    CompatibleFeatures,
    u32,
    "Compatible feature set flags. \
The reader may process the filesystem even if it does not implement all of \
these features."
);

impl CompatibleFeatures {
    /// Directory pre-allocation hints.
    pub const DIR_PREALLOC: Self = Self(0x0001);

    /// Create a journal file to ensure filesystem consistency.
    pub const HAS_JOURNAL: Self = Self(0x0004);

    /// Extended attributes.
    pub const EXT_ATTR: Self = Self(0x0008);

    /// Space reserved for the group-descriptor table to grow on resize.
    pub const RESIZE_INODE: Self = Self(0x0010);

    /// Hashed B-tree directory indexes.
    pub const DIR_INDEX: Self = Self(0x0020);

    /// At most two backup superblocks; implies format version 4.
    pub const SPARSE_SUPER2: Self = Self(0x0200);

    /// Every compatible flag this build accepts.
    pub(crate) const SUPPORTED: Self = Self(0x0000_023D);

    /// Flag combination that implies format version 4.
    pub(crate) const EXT4_VERSION_FLAGS: Self = Self(0x0000_0200);

    /// Flag combination that implies format version 3.
    pub(crate) const EXT3_VERSION_FLAGS: Self = Self(0x0000_0004);
}

ext_flag_field!(
    IncompatibleFeatures,
    u32,
    "Incompatible feature set flags. The reader refuses the filesystem if it \
does not implement one of these features."
);

impl IncompatibleFeatures {
    /// Compression (never supported).
    pub const COMPRESSION: Self = Self(0x0001);

    /// The file-type byte in directory entries is valid.
    pub const FILETYPE: Self = Self(0x0002);

    /// The filesystem needs journal recovery.
    pub const RECOVER: Self = Self(0x0004);

    /// Superblock of an external journal device.
    pub const JOURNAL_DEV: Self = Self(0x0008);

    /// Group descriptors are spread over meta block groups.
    pub const META_BG: Self = Self(0x0010);

    /// Inodes may map their data through extent trees.
    pub const EXTENTS: Self = Self(0x0040);

    /// Filesystem may be larger than 2^32 blocks.
    pub const BIT64: Self = Self(0x0080);

    /// Multiple-mount protection.
    pub const MULTI_MOUNT_PROTECTION: Self = Self(0x0100);

    /// Flexible block groups.
    pub const FLEX_BG: Self = Self(0x0200);

    /// Extended attribute values may live in their own inode.
    pub const EA_INODE: Self = Self(0x0400);

    /// Directory entry data.
    pub const DIRDATA: Self = Self(0x1000);

    /// Filesystem-level encryption.
    pub const ENCRYPT: Self = Self(0x10000);

    /// Case-insensitive directories.
    pub const CASEFOLD: Self = Self(0x20000);

    /// Every incompatible flag this build accepts.
    pub(crate) const SUPPORTED: Self = Self(0x0003_07DE);

    /// Flag combination that implies format version 4.
    pub(crate) const EXT4_VERSION_FLAGS: Self = Self(0x0001_F7C0);

    /// Flag combination that implies format version 3.
    pub(crate) const EXT3_VERSION_FLAGS: Self = Self(0x0000_000C);
}

ext_flag_field!(
    ReadOnlyCompatibleFeatures,
    u32,
    "Read-only compatible feature set flags. Never rejected by a read-only \
reader."
);

impl ReadOnlyCompatibleFeatures {
    /// Backup superblocks only in a subset of block groups.
    pub const SPARSE_SUPER: Self = Self(0x0001);

    /// A file larger than 2 GiB exists.
    pub const LARGE_FILE: Self = Self(0x0002);

    /// Files may be larger than 2 TiB.
    pub const HUGE_FILE: Self = Self(0x0008);

    /// Group descriptors carry checksums.
    pub const GDT_CSUM: Self = Self(0x0010);

    /// Extra space reserved in each inode for extended metadata.
    pub const EXTRA_ISIZE: Self = Self(0x0040);

    /// Metadata checksumming.
    pub const METADATA_CSUM: Self = Self(0x0400);

    /// Flag combination that implies format version 4.
    pub(crate) const EXT4_VERSION_FLAGS: Self = Self(0x0000_0378);
}

/// Derived format version of the volume (2, 3 or 4).
///
/// The version is not stored on disk; it follows from the feature-flag
/// combinations present in the superblock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FormatVersion(u8);

impl FormatVersion {
    pub const EXT2: Self = Self(2);
    pub const EXT3: Self = Self(3);
    pub const EXT4: Self = Self(4);

    pub fn major(self) -> u8 {
        self.0
    }
}

ext_uint_field_derive_display!(FormatVersion);

/// On-disk superblock record (1024 bytes, little-endian).
///
/// The layout is the ext4 variant; an ext2/3 volume leaves the trailing
/// fields zeroed. Fields beyond the ones this reader decodes are kept in
/// place so the record is bit-exact.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct RawSuperblock {
    pub(crate) number_of_inodes: u32,
    pub(crate) number_of_blocks_lower: u32,
    pub(crate) number_of_reserved_blocks_lower: u32,
    pub(crate) number_of_unallocated_blocks_lower: u32,
    pub(crate) number_of_unallocated_inodes: u32,
    pub(crate) first_data_block_number: u32,
    pub(crate) block_size_exponent: u32,
    pub(crate) fragment_size: u32,
    pub(crate) blocks_per_block_group: u32,
    pub(crate) fragments_per_block_group: u32,
    pub(crate) inodes_per_block_group: u32,
    pub(crate) last_mount_time: UnixTimestamp32,
    pub(crate) last_written_time: UnixTimestamp32,
    pub(crate) mount_count: u16,
    pub(crate) maximum_mount_count: u16,
    pub(crate) signature: u16,
    pub(crate) file_system_state_flags: u16,
    pub(crate) error_handling_status: u16,
    pub(crate) minor_format_revision: u16,
    pub(crate) last_consistency_check_time: UnixTimestamp32,
    pub(crate) consistency_check_interval: u32,
    pub(crate) creator_operating_system: u32,
    pub(crate) format_revision: u32,
    pub(crate) reserved_block_uid: u16,
    pub(crate) reserved_block_gid: u16,
    pub(crate) first_non_reserved_inode: u32,
    pub(crate) inode_size: u16,
    pub(crate) block_group: u16,
    pub(crate) compatible_features_flags: u32,
    pub(crate) incompatible_features_flags: u32,
    pub(crate) read_only_compatible_features_flags: u32,
    pub(crate) file_system_identifier: [u8; 16],
    pub(crate) volume_label: [u8; 16],
    pub(crate) last_mount_path: [u8; 64],
    pub(crate) algorithm_usage_bitmap: u32,
    pub(crate) pre_allocated_blocks_per_file: u8,
    pub(crate) pre_allocated_blocks_per_directory: u8,
    pub(crate) reserved_gdt_blocks: u16,
    pub(crate) journal_identifier: [u8; 16],
    pub(crate) journal_inode_number: u32,
    pub(crate) journal_device: u32,
    pub(crate) orphan_inode_list_head: u32,
    pub(crate) htree_hash_seed: [u8; 16],
    pub(crate) default_hash_version: u8,
    pub(crate) journal_backup_type: u8,
    pub(crate) group_descriptor_size: u16,
    pub(crate) default_mount_options: u32,
    pub(crate) first_metadata_block_group: u32,
    pub(crate) file_system_creation_time: UnixTimestamp32,
    pub(crate) backup_journal_inodes: [u8; 68],
    pub(crate) number_of_blocks_upper: u32,
    pub(crate) number_of_reserved_blocks_upper: u32,
    pub(crate) number_of_unallocated_blocks_upper: u32,
    pub(crate) minimum_inode_size: u16,
    pub(crate) reserved_inode_size: u16,
    pub(crate) flags: u32,
    pub(crate) read_stride: u16,
    pub(crate) multi_mount_protection_interval: u16,
    pub(crate) multi_mount_protection_block: u64,
    pub(crate) raid_stripe_width: u32,
    pub(crate) block_groups_per_flex_group_exponent: u8,
    pub(crate) checksum_type: u8,
    pub(crate) encryption_level: u8,
    pub(crate) padding2: u8,
    pub(crate) write_count: u64,
    pub(crate) snapshot_inode_number: u32,
    pub(crate) snapshot_sequential_identifier: u32,
    pub(crate) snapshot_reserved_blocks: u64,
    pub(crate) snapshot_inode_list: u32,
    pub(crate) number_of_errors: u32,
    pub(crate) first_error_time: UnixTimestamp32,
    pub(crate) first_error_inode_number: u32,
    pub(crate) first_error_block_number: u64,
    pub(crate) first_error_function: [u8; 32],
    pub(crate) first_error_line_number: u32,
    pub(crate) last_error_time: UnixTimestamp32,
    pub(crate) last_error_inode_number: u32,
    pub(crate) last_error_line_number: u32,
    pub(crate) last_error_block_number: u64,
    pub(crate) last_error_function: [u8; 32],
    pub(crate) mount_options: [u8; 64],
    pub(crate) user_quota_inode_number: u32,
    pub(crate) group_quota_inode_number: u32,
    pub(crate) overhead_clusters: u32,
    pub(crate) backup_block_group1: u32,
    pub(crate) backup_block_group2: u32,
    pub(crate) encryption_algorithms: [u8; 4],
    pub(crate) encryption_password_salt: [u8; 16],
    pub(crate) lost_and_found_inode_number: u32,
    pub(crate) project_quota_inode_number: u32,
    pub(crate) checksum_seed: u32,
    pub(crate) reserved: [u8; 392],
    pub(crate) checksum: u32,
}

/// Size in bytes of the on-disk superblock record.
pub(crate) const SUPERBLOCK_SIZE: usize = 1024;

/// Absolute offset of the primary superblock within the volume.
pub(crate) const SUPERBLOCK_OFFSET: u64 = 1024;

/// The `0xEF53` signature at record offset 56.
pub(crate) const SUPERBLOCK_SIGNATURE: u16 = 0xEF53;

const _: () = assert!(core::mem::size_of::<RawSuperblock>() == SUPERBLOCK_SIZE);

/// Decoded superblock of an extended filesystem volume.
///
/// Holds the decoded essentials plus the geometry derived from them. Created
/// at open and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub(crate) number_of_inodes: u32,
    pub(crate) number_of_blocks: u64,
    pub(crate) blocks_per_group: u32,
    pub(crate) inodes_per_group: u32,
    pub(crate) block_size: u64,
    pub(crate) inode_size: u16,
    pub(crate) format_revision: u32,
    pub(crate) format_version: FormatVersion,
    pub(crate) compatible_features: CompatibleFeatures,
    pub(crate) incompatible_features: IncompatibleFeatures,
    pub(crate) read_only_compatible_features: ReadOnlyCompatibleFeatures,
    pub(crate) identifier: [u8; 16],
    pub(crate) volume_label: [u8; 16],
    pub(crate) last_mount_path: [u8; 64],
    pub(crate) last_mount_time: UnixTimestamp32,
    pub(crate) last_written_time: UnixTimestamp32,
    pub(crate) creation_time: UnixTimestamp32,
    pub(crate) group_descriptor_size: u16,
    pub(crate) first_metadata_block_group: u32,
    pub(crate) number_of_block_groups: u32,
    pub(crate) block_group_size: u64,
    pub(crate) blocks_per_flex_group: u64,
    pub(crate) flex_group_size: u64,
}

impl Superblock {
    /// Reads and validates the primary superblock at offset 1024.
    pub(crate) fn read<S: ByteSource>(source: &S) -> ExtResult<Self> {
        Self::read_at(source, SUPERBLOCK_OFFSET)
    }

    /// Reads and validates a superblock record at an arbitrary offset.
    ///
    /// Used both for the primary copy and for the backups found in later
    /// block groups.
    pub(crate) fn read_at<S: ByteSource>(source: &S, offset: u64) -> ExtResult<Self> {
        let mut data = [0u8; SUPERBLOCK_SIZE];
        source.read_at(offset, &mut data)?;

        Self::decode(&data)
    }

    /// Decodes a 1024-byte superblock record.
    pub(crate) fn decode(data: &[u8; SUPERBLOCK_SIZE]) -> ExtResult<Self> {
        let raw: RawSuperblock = bytemuck::pod_read_unaligned(data);

        if u16::from_le(raw.signature) != SUPERBLOCK_SIGNATURE {
            return Err(InputError::SignatureMismatch.into());
        }

        let block_size_exponent = u32::from_le(raw.block_size_exponent);
        if block_size_exponent > 21 {
            return Err(RuntimeError::ValueOutOfBounds.into());
        }
        let block_size = 1024u64 << block_size_exponent;

        let format_revision = u32::from_le(raw.format_revision);
        if format_revision > 1 {
            return Err(RuntimeError::UnsupportedValue.into());
        }

        let inode_size = if format_revision == 1 { u16::from_le(raw.inode_size) } else { 128 };
        if !matches!(inode_size, 128 | 256 | 512 | 1024) {
            return Err(InputError::InvalidData.into());
        }

        let compatible_features = CompatibleFeatures(u32::from_le(raw.compatible_features_flags));
        let incompatible_features =
            IncompatibleFeatures(u32::from_le(raw.incompatible_features_flags));
        let read_only_compatible_features =
            ReadOnlyCompatibleFeatures(u32::from_le(raw.read_only_compatible_features_flags));

        if !CompatibleFeatures::SUPPORTED.includes(compatible_features) {
            return Err(RuntimeError::UnsupportedValue.into());
        }
        if !IncompatibleFeatures::SUPPORTED.includes(incompatible_features) {
            return Err(RuntimeError::UnsupportedValue.into());
        }

        let format_version = if compatible_features
            .intersects(CompatibleFeatures::EXT4_VERSION_FLAGS)
            || incompatible_features.intersects(IncompatibleFeatures::EXT4_VERSION_FLAGS)
            || read_only_compatible_features
                .intersects(ReadOnlyCompatibleFeatures::EXT4_VERSION_FLAGS)
        {
            FormatVersion::EXT4
        } else if compatible_features.intersects(CompatibleFeatures::EXT3_VERSION_FLAGS)
            || incompatible_features.intersects(IncompatibleFeatures::EXT3_VERSION_FLAGS)
        {
            FormatVersion::EXT3
        } else {
            FormatVersion::EXT2
        };

        let mut number_of_blocks = u64::from(u32::from_le(raw.number_of_blocks_lower));
        if format_version == FormatVersion::EXT4
            && incompatible_features.includes(IncompatibleFeatures::BIT64)
        {
            number_of_blocks |= u64::from(u32::from_le(raw.number_of_blocks_upper)) << 32;
        }

        let blocks_per_group = u32::from_le(raw.blocks_per_block_group);
        let inodes_per_group = u32::from_le(raw.inodes_per_block_group);

        if number_of_blocks == 0 {
            return Err(RuntimeError::ValueOutOfBounds.into());
        }
        if blocks_per_group == 0 {
            return Err(RuntimeError::ValueOutOfBounds.into());
        }

        let mut number_of_block_groups =
            u32::try_from(number_of_blocks / u64::from(blocks_per_group))
                .map_err(|_| RuntimeError::ValueOutOfBounds)?;
        if number_of_blocks % u64::from(blocks_per_group) != 0 {
            number_of_block_groups += 1;
        }

        let block_group_size = u64::from(blocks_per_group)
            .checked_mul(block_size)
            .ok_or(RuntimeError::ValueOutOfBounds)?;

        let group_descriptor_size = if format_version == FormatVersion::EXT4 {
            u16::from_le(raw.group_descriptor_size)
        } else {
            0
        };

        let mut blocks_per_flex_group = 0u64;
        let mut flex_group_size = 0u64;
        if format_version == FormatVersion::EXT4 {
            let flex_exponent = raw.block_groups_per_flex_group_exponent;
            if flex_exponent > 0 {
                if flex_exponent >= 16 {
                    return Err(RuntimeError::ValueOutOfBounds.into());
                }
                blocks_per_flex_group = (1u64 << flex_exponent)
                    .checked_mul(u64::from(blocks_per_group))
                    .ok_or(RuntimeError::ValueOutOfBounds)?;
                flex_group_size = blocks_per_flex_group
                    .checked_mul(block_size)
                    .ok_or(RuntimeError::ValueOutOfBounds)?;
            }
        }

        Ok(Self {
            number_of_inodes: u32::from_le(raw.number_of_inodes),
            number_of_blocks,
            blocks_per_group,
            inodes_per_group,
            block_size,
            inode_size,
            format_revision,
            format_version,
            compatible_features,
            incompatible_features,
            read_only_compatible_features,
            identifier: raw.file_system_identifier,
            volume_label: raw.volume_label,
            last_mount_path: raw.last_mount_path,
            last_mount_time: UnixTimestamp32(u32::from_le(raw.last_mount_time.0)),
            last_written_time: UnixTimestamp32(u32::from_le(raw.last_written_time.0)),
            creation_time: if format_version == FormatVersion::EXT4 {
                UnixTimestamp32(u32::from_le(raw.file_system_creation_time.0))
            } else {
                UnixTimestamp32(0)
            },
            group_descriptor_size,
            first_metadata_block_group: u32::from_le(raw.first_metadata_block_group),
            number_of_block_groups,
            block_group_size,
            blocks_per_flex_group,
            flex_group_size,
        })
    }

    /// Effective size in bytes of a group-descriptor record on this volume.
    pub(crate) fn descriptor_size(&self) -> u64 {
        if self.incompatible_features.includes(IncompatibleFeatures::BIT64)
            && self.group_descriptor_size > 32
        {
            64
        } else {
            32
        }
    }

    /// Checks whether the given inode number addresses a slot of this volume.
    pub(crate) fn contains_inode(&self, inode_number: u32) -> bool {
        inode_number >= 1 && inode_number <= self.number_of_inodes
    }

    /// Stored format revision (0 or 1).
    pub fn format_revision(&self) -> u32 {
        self.format_revision
    }

    /// Filesystem creation time (ext4 only; zero otherwise).
    pub fn creation_time(&self) -> UnixTimestamp32 {
        self.creation_time
    }

    /// Size in bytes of a flex group, zero when the feature is not in
    /// effect.
    pub fn flex_group_size(&self) -> u64 {
        self.flex_group_size
    }

    /// Number of blocks per flex group, zero when the feature is not in
    /// effect.
    pub fn blocks_per_flex_group(&self) -> u64 {
        self.blocks_per_flex_group
    }

    /// Returns the volume label as UTF-8.
    pub fn label_utf8(&self) -> String {
        nul_trimmed_utf8(&self.volume_label)
    }

    /// Returns the volume label as UTF-16 code units.
    pub fn label_utf16(&self) -> Vec<u16> {
        self.label_utf8().encode_utf16().collect()
    }

    /// Returns the path the volume was last mounted on, as UTF-8.
    pub fn last_mount_path_utf8(&self) -> String {
        nul_trimmed_utf8(&self.last_mount_path)
    }

    /// Returns the path the volume was last mounted on, as UTF-16 code units.
    pub fn last_mount_path_utf16(&self) -> Vec<u16> {
        self.last_mount_path_utf8().encode_utf16().collect()
    }

    /// Compares this (primary) superblock against a backup copy.
    ///
    /// Only identity fields are compared; accounting counters legitimately
    /// drift between copies.
    pub(crate) fn matches_backup(&self, backup: &Superblock) -> bool {
        self.block_size == backup.block_size
            && self.inode_size == backup.inode_size
            && self.compatible_features == backup.compatible_features
            && self.incompatible_features == backup.incompatible_features
            && self.read_only_compatible_features == backup.read_only_compatible_features
            && self.identifier == backup.identifier
            && self.volume_label == backup.volume_label
    }
}

fn nul_trimmed_utf8(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());

    String::from_utf8_lossy(&data[..end]).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Fabricates a minimal valid raw superblock record.
    pub(crate) fn raw_superblock() -> [u8; SUPERBLOCK_SIZE] {
        let mut data = [0u8; SUPERBLOCK_SIZE];

        data[0..4].copy_from_slice(&2048u32.to_le_bytes()); // inodes
        data[4..8].copy_from_slice(&64u32.to_le_bytes()); // blocks
        data[24..28].copy_from_slice(&0u32.to_le_bytes()); // 1024-byte blocks
        data[32..36].copy_from_slice(&8192u32.to_le_bytes()); // blocks per group
        data[40..44].copy_from_slice(&2048u32.to_le_bytes()); // inodes per group
        data[56..58].copy_from_slice(&SUPERBLOCK_SIGNATURE.to_le_bytes());
        data[76..80].copy_from_slice(&1u32.to_le_bytes()); // revision
        data[88..90].copy_from_slice(&128u16.to_le_bytes()); // inode size

        data
    }

    #[test]
    fn raw_record_is_bit_exact() {
        assert_eq!(core::mem::size_of::<RawSuperblock>(), SUPERBLOCK_SIZE);
    }

    #[test]
    fn minimal_superblock_decodes_as_ext2() {
        let sb = Superblock::decode(&raw_superblock()).unwrap();

        assert_eq!(sb.format_version, FormatVersion::EXT2);
        assert_eq!(sb.block_size, 1024);
        assert_eq!(sb.inode_size, 128);
        assert_eq!(sb.number_of_blocks, 64);
        assert_eq!(sb.number_of_block_groups, 1);
        assert_eq!(sb.block_group_size, 8192 * 1024);
    }

    #[test]
    fn signature_mismatch_is_rejected() {
        let mut data = raw_superblock();
        data[56] = 0x00;

        assert_eq!(
            Superblock::decode(&data).unwrap_err(),
            InputError::SignatureMismatch.into()
        );
    }

    #[test]
    fn format_revision_above_one_is_rejected() {
        let mut data = raw_superblock();
        data[76..80].copy_from_slice(&2u32.to_le_bytes());

        assert_eq!(
            Superblock::decode(&data).unwrap_err(),
            RuntimeError::UnsupportedValue.into()
        );
    }

    #[test]
    fn zero_block_count_is_rejected() {
        let mut data = raw_superblock();
        data[4..8].copy_from_slice(&0u32.to_le_bytes());

        assert_eq!(
            Superblock::decode(&data).unwrap_err(),
            RuntimeError::ValueOutOfBounds.into()
        );
    }

    #[test]
    fn zero_blocks_per_group_is_rejected() {
        let mut data = raw_superblock();
        data[32..36].copy_from_slice(&0u32.to_le_bytes());

        assert_eq!(
            Superblock::decode(&data).unwrap_err(),
            RuntimeError::ValueOutOfBounds.into()
        );
    }

    #[test]
    fn block_size_exponent_is_bounded() {
        let mut data = raw_superblock();
        data[24..28].copy_from_slice(&22u32.to_le_bytes());

        assert_eq!(
            Superblock::decode(&data).unwrap_err(),
            RuntimeError::ValueOutOfBounds.into()
        );
    }

    #[test]
    fn journal_flag_implies_ext3() {
        let mut data = raw_superblock();
        data[92..96].copy_from_slice(&CompatibleFeatures::HAS_JOURNAL.bits().to_le_bytes());

        let sb = Superblock::decode(&data).unwrap();
        assert_eq!(sb.format_version, FormatVersion::EXT3);
    }

    #[test]
    fn extents_flag_implies_ext4() {
        let mut data = raw_superblock();
        data[96..100].copy_from_slice(
            &(IncompatibleFeatures::FILETYPE | IncompatibleFeatures::EXTENTS)
                .bits()
                .to_le_bytes(),
        );

        let sb = Superblock::decode(&data).unwrap();
        assert_eq!(sb.format_version, FormatVersion::EXT4);
    }

    #[test]
    fn unsupported_incompatible_flag_is_rejected() {
        let mut data = raw_superblock();
        data[96..100].copy_from_slice(&0x8000u32.to_le_bytes());

        assert_eq!(
            Superblock::decode(&data).unwrap_err(),
            RuntimeError::UnsupportedValue.into()
        );
    }

    #[test]
    fn unsupported_compatible_flag_is_rejected() {
        let mut data = raw_superblock();
        data[92..96].copy_from_slice(&0x4000u32.to_le_bytes());

        assert_eq!(
            Superblock::decode(&data).unwrap_err(),
            RuntimeError::UnsupportedValue.into()
        );
    }

    #[test]
    fn read_only_compatible_flags_are_never_rejected() {
        let mut data = raw_superblock();
        data[100..104].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        let sb = Superblock::decode(&data).unwrap();
        assert_eq!(sb.format_version, FormatVersion::EXT4);
    }

    #[test]
    fn sixty_four_bit_volumes_fold_the_upper_block_count() {
        let mut data = raw_superblock();
        data[96..100].copy_from_slice(
            &(IncompatibleFeatures::FILETYPE | IncompatibleFeatures::BIT64)
                .bits()
                .to_le_bytes(),
        );
        data[336..340].copy_from_slice(&0x1u32.to_le_bytes()); // blocks upper

        let sb = Superblock::decode(&data).unwrap();
        assert_eq!(sb.format_version, FormatVersion::EXT4);
        assert_eq!(sb.number_of_blocks, (1u64 << 32) | 64);
    }

    #[test]
    fn flex_group_geometry_is_derived() {
        let mut data = raw_superblock();
        data[96..100].copy_from_slice(
            &(IncompatibleFeatures::FILETYPE | IncompatibleFeatures::FLEX_BG)
                .bits()
                .to_le_bytes(),
        );
        data[372] = 4; // log2 of block groups per flex group

        let sb = Superblock::decode(&data).unwrap();
        assert_eq!(sb.blocks_per_flex_group(), 16 * 8192);
        assert_eq!(sb.flex_group_size(), 16 * 8192 * 1024);
    }

    #[test]
    fn labels_trim_at_nul() {
        let mut data = raw_superblock();
        data[120..126].copy_from_slice(b"backup");

        let sb = Superblock::decode(&data).unwrap();
        assert_eq!(sb.label_utf8(), "backup");
        assert_eq!(sb.label_utf16(), "backup".encode_utf16().collect::<Vec<u16>>());
    }
}
