//! Inode related structures.
//!
//! Inodes (index nodes) are the base records that hold metadata about
//! filesystem objects, such as files or directories. Three on-disk layout
//! variants exist: the classic 128-byte ext2 record, the ext3 record which
//! adds the extended-inode-size field, and the 256-byte-and-up ext4 record
//! whose tail carries 64-bit sizes, nanosecond timestamps and inline
//! extended attributes.

use bytemuck::{Pod, Zeroable};
use core::fmt::{Display, Formatter};
use log::warn;

use crate::err::{ArgumentError, ExtResult, RuntimeError};
use crate::extent::Extent;
use crate::io::{ByteSource, IoHandle};
use crate::sb::FormatVersion;
use crate::time::{UnixTimestamp32, UnixTimestampNs};
use crate::{ext_flag_field, ext_uint_field_derive_display};

/// A number identifying an inode. Inode numbers are one-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct InodeNumber(pub(crate) u32);

ext_uint_field_derive_display!(InodeNumber);

impl InodeNumber {
    /// Inode 0 marks an unused directory entry.
    pub const UNUSED_DIR_ENTRY: Self = Self(0);

    /// Inode 2 is reserved for the root directory of the filesystem.
    pub const ROOT_DIRECTORY: Self = Self(2);

    /// Inode 8 is the journal.
    pub const JOURNAL: Self = Self(8);

    pub fn new(number: u32) -> Self {
        Self(number)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl From<InodeNumber> for u32 {
    fn from(value: InodeNumber) -> Self {
        value.0
    }
}

/// File mode of an inode.
///
/// The low 12 bits carry the permissions, the high 4 bits select the file
/// type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct InodeFileMode(pub(crate) u16);

impl InodeFileMode {
    /// Others may execute.
    pub const S_IXOTH: Self = Self(0x0001);

    /// Others may write.
    pub const S_IWOTH: Self = Self(0x0002);

    /// Others may read.
    pub const S_IROTH: Self = Self(0x0004);

    /// Group may execute.
    pub const S_IXGRP: Self = Self(0x0008);

    /// Group may write.
    pub const S_IWGRP: Self = Self(0x0010);

    /// Group may read.
    pub const S_IRGRP: Self = Self(0x0020);

    /// User may execute.
    pub const S_IXUSR: Self = Self(0x0040);

    /// User may write.
    pub const S_IWUSR: Self = Self(0x0080);

    /// User may read.
    pub const S_IRUSR: Self = Self(0x0100);

    /// Sticky bit.
    pub const S_ISVTX: Self = Self(0x0200);

    /// Set GID.
    pub const S_ISGID: Self = Self(0x0400);

    /// Set UID.
    pub const S_ISUID: Self = Self(0x0800);

    /// FIFO
    pub const S_IFIFO: Self = Self(0x1000);

    /// Character device
    pub const S_IFCHR: Self = Self(0x2000);

    /// Directory
    pub const S_IFDIR: Self = Self(0x4000);

    /// Block device
    pub const S_IFBLK: Self = Self(0x6000);

    /// Regular file
    pub const S_IFREG: Self = Self(0x8000);

    /// Symbolic link
    pub const S_IFLNK: Self = Self(0xA000);

    /// Socket
    pub const S_IFSOCK: Self = Self(0xC000);

    /// Returns the raw mode word, permissions included.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Returns the permission bits only.
    pub fn permissions(self) -> u16 {
        self.0 & 0x0FFF
    }

    /// Returns the file-type selector bits.
    pub fn file_type_bits(self) -> u16 {
        self.0 & 0xF000
    }

    /// Checks whether all bits of `mode` are set.
    pub fn contains(self, mode: InodeFileMode) -> bool {
        self.0 & mode.0 == mode.0
    }
}

macro_rules! symbolic_permission {
    ($self: ident, $str: tt, $symbol: literal, $flag: expr) => {
        if $self.contains($flag) {
            $str.push($symbol);
        } else {
            $str.push('-');
        }
    };
}

impl Display for InodeFileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let mut symbolic_str = String::new();

        symbolic_permission!(self, symbolic_str, 'r', InodeFileMode::S_IRUSR);
        symbolic_permission!(self, symbolic_str, 'w', InodeFileMode::S_IWUSR);
        symbolic_permission!(self, symbolic_str, 'x', InodeFileMode::S_IXUSR);
        symbolic_permission!(self, symbolic_str, 'r', InodeFileMode::S_IRGRP);
        symbolic_permission!(self, symbolic_str, 'w', InodeFileMode::S_IWGRP);
        symbolic_permission!(self, symbolic_str, 'x', InodeFileMode::S_IXGRP);
        symbolic_permission!(self, symbolic_str, 'r', InodeFileMode::S_IROTH);
        symbolic_permission!(self, symbolic_str, 'w', InodeFileMode::S_IWOTH);
        symbolic_permission!(self, symbolic_str, 'x', InodeFileMode::S_IXOTH);

        f.write_str(&symbolic_str)
    }
}

/// Type of the object an inode describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InodeType {
    Regular,
    Directory,
    SymbolicLink,
    CharacterDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

impl From<InodeFileMode> for InodeType {
    fn from(value: InodeFileMode) -> Self {
        match InodeFileMode(value.file_type_bits()) {
            InodeFileMode::S_IFREG => Self::Regular,
            InodeFileMode::S_IFDIR => Self::Directory,
            InodeFileMode::S_IFLNK => Self::SymbolicLink,
            InodeFileMode::S_IFCHR => Self::CharacterDevice,
            InodeFileMode::S_IFBLK => Self::BlockDevice,
            InodeFileMode::S_IFIFO => Self::Fifo,
            InodeFileMode::S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }
}

impl Display for InodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let type_str = match self {
            Self::Regular => "regular file",
            Self::Directory => "directory",
            Self::SymbolicLink => "symbolic link",
            Self::CharacterDevice => "character device",
            Self::BlockDevice => "block device",
            Self::Fifo => "FIFO",
            Self::Socket => "socket",
            Self::Unknown => "unknown",
        };

        f.write_str(type_str)
    }
}

ext_flag_field!(InodeFlags, u32, "Per-inode flags word.");

impl InodeFlags {
    /// Secure deletion requested.
    pub const SECURE_DELETION: Self = Self(0x1);

    /// Keep a copy of the data on deletion.
    pub const UNDELETE: Self = Self(0x2);

    /// Synchronous updates.
    pub const SYNCHRONOUS: Self = Self(0x8);

    /// Immutable file.
    pub const IMMUTABLE: Self = Self(0x10);

    /// Append-only writes.
    pub const APPEND_ONLY: Self = Self(0x20);

    /// Excluded from dumps.
    pub const NO_DUMP: Self = Self(0x40);

    /// Access time is not updated.
    pub const NO_ATIME: Self = Self(0x80);

    /// Directory uses hashed indexes.
    pub const HASHED_INDEX: Self = Self(0x1000);

    /// File data is journalled.
    pub const JOURNAL_DATA: Self = Self(0x4000);

    /// The file tail is never merged.
    pub const NO_TAIL_MERGE: Self = Self(0x8000);

    /// Directory entries are written synchronously.
    pub const SYNCHRONOUS_DIRECTORY: Self = Self(0x10000);

    /// Data is mapped through an extent tree.
    pub const HAS_EXTENTS: Self = Self(0x80000);

    /// The inode stores a large extended attribute value; its timestamp
    /// slots are repurposed as checksum and reference fields.
    pub const EXTENDED_ATTRIBUTE_VALUE: Self = Self(0x200000);

    /// File data lives inside the inode record.
    pub const INLINE_DATA: Self = Self(0x10000000);

    /// Every inode flag this build accepts.
    pub(crate) const SUPPORTED: Self = Self(
        0x1 | 0x2 | 0x8 | 0x10 | 0x20 | 0x40 | 0x80 | 0x1000 | 0x4000 | 0x8000 | 0x10000
            | 0x80000
            | 0x200000
            | 0x10000000,
    );
}

/// On-disk inode record, ext4 layout (156 bytes).
///
/// The ext2 record is a 128-byte prefix of this layout with the
/// `data_size_upper` slot holding the directory ACL; the ext3 record extends
/// it to 132 bytes with the extended-inode-size field. Records are
/// zero-extended before decoding so one raw view serves all three variants.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawInode {
    file_mode: u16,
    owner_identifier: u16,
    data_size_lower: u32,
    access_time: u32,
    inode_change_time: u32,
    modification_time: u32,
    deletion_time: u32,
    group_identifier: u16,
    number_of_links: u16,
    number_of_blocks_lower: u32,
    flags: u32,
    version_lower: u32,
    data_reference: [u8; 60],
    nfs_generation_number: u32,
    file_acl_block_number_lower: u32,
    data_size_upper: u32,
    fragment_block_address: u32,
    number_of_blocks_upper: u16,
    file_acl_block_number_upper: u16,
    owner_identifier_upper: u16,
    group_identifier_upper: u16,
    checksum_lower: u16,
    reserved: u16,
    extended_inode_size: u16,
    checksum_upper: u16,
    inode_change_time_extra: u32,
    modification_time_extra: u32,
    access_time_extra: u32,
    creation_time: u32,
    creation_time_extra: u32,
    version_upper: u32,
}

/// Size in bytes of the full ext4 raw record.
const RAW_INODE_SIZE: usize = 156;

/// Record length from which the extended-inode-size field is defined.
const EXT3_INODE_SIZE: usize = 132;

/// Classic record length.
const EXT2_INODE_SIZE: usize = 128;

/// Extended-inode-size value from which the ext4 tail is defined.
const EXT4_TAIL_MINIMUM: u16 = 28;

/// Signature opening the inline extended-attribute region.
const EXTENDED_ATTRIBUTES_SIGNATURE: u32 = 0xEA02_0000;

const _: () = assert!(core::mem::size_of::<RawInode>() == RAW_INODE_SIZE);

/// One entry of the inline extended-attribute region.
///
/// Only the name and the value location are decoded; values themselves are
/// outside the scope of this reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedAttributeEntry {
    pub(crate) name_index: u8,
    pub(crate) name: Vec<u8>,
    pub(crate) value_offset: u16,
    pub(crate) value_size: u32,
    pub(crate) value_inode_number: u32,
}

impl ExtendedAttributeEntry {
    /// Well-known prefix selected by the name index.
    pub fn name_prefix(&self) -> &'static str {
        match self.name_index {
            1 => "user.",
            2 => "system.posix_acl_access",
            3 => "system.posix_acl_default",
            4 => "trusted.",
            6 => "security.",
            7 => "system.",
            _ => "",
        }
    }

    /// Full attribute name, prefix included.
    pub fn name(&self) -> String {
        let mut name = String::from(self.name_prefix());
        name.push_str(&String::from_utf8_lossy(&self.name));

        name
    }

    /// Offset of the value within the attribute region.
    pub fn value_offset(&self) -> u16 {
        self.value_offset
    }

    /// Size of the value in bytes.
    pub fn value_size(&self) -> u32 {
        self.value_size
    }

    /// Inode holding the value, when stored out of line; zero otherwise.
    pub fn value_inode_number(&self) -> u32 {
        self.value_inode_number
    }
}

/// Decoded inode.
///
/// Materialised on demand by the inode table, which resolves the data
/// extents exactly once before the inode enters the cache. Clones are cheap:
/// every field is plain data except the owned extent vector.
#[derive(Clone, Debug)]
pub struct Inode {
    pub(crate) is_empty: bool,
    pub(crate) file_mode: InodeFileMode,
    pub(crate) owner_identifier: u32,
    pub(crate) group_identifier: u32,
    pub(crate) data_size: u64,
    pub(crate) directory_acl: u32,
    pub(crate) number_of_links: u16,
    pub(crate) number_of_blocks: u64,
    pub(crate) flags: InodeFlags,
    pub(crate) access_time: UnixTimestampNs,
    pub(crate) inode_change_time: UnixTimestampNs,
    pub(crate) modification_time: UnixTimestampNs,
    pub(crate) deletion_time: UnixTimestamp32,
    pub(crate) creation_time: Option<UnixTimestampNs>,
    pub(crate) data_reference: [u8; 60],
    pub(crate) nfs_generation_number: u32,
    pub(crate) file_acl_block_number: u64,
    pub(crate) extended_inode_size: u16,
    pub(crate) extended_attributes: Vec<ExtendedAttributeEntry>,
    pub(crate) inline_tail: Vec<u8>,
    pub(crate) data_extents: Vec<Extent>,
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            is_empty: false,
            file_mode: InodeFileMode(0),
            owner_identifier: 0,
            group_identifier: 0,
            data_size: 0,
            directory_acl: 0,
            number_of_links: 0,
            number_of_blocks: 0,
            flags: InodeFlags(0),
            access_time: UnixTimestampNs(0),
            inode_change_time: UnixTimestampNs(0),
            modification_time: UnixTimestampNs(0),
            deletion_time: UnixTimestamp32(0),
            creation_time: None,
            data_reference: [0u8; 60],
            nfs_generation_number: 0,
            file_acl_block_number: 0,
            extended_inode_size: 0,
            extended_attributes: Vec::new(),
            inline_tail: Vec::new(),
            data_extents: Vec::new(),
        }
    }
}

impl Inode {
    /// Decodes an inode record.
    ///
    /// The record must be at least 128 bytes; the variant is selected by the
    /// record length and the extended-inode-size field, never guessed.
    pub(crate) fn decode(data: &[u8], io_handle: &IoHandle) -> ExtResult<Self> {
        if data.len() < EXT2_INODE_SIZE {
            return Err(ArgumentError::ValueOutOfBounds.into());
        }

        // Unused slots are entirely zero; comparing the record against
        // itself shifted by one byte detects that with a single pass.
        if data[0] == 0 && data[..data.len() - 1] == data[1..] {
            return Ok(Self { is_empty: true, ..Self::default() });
        }

        let mut record = [0u8; RAW_INODE_SIZE];
        let prefix_len = data.len().min(RAW_INODE_SIZE);
        record[..prefix_len].copy_from_slice(&data[..prefix_len]);
        let raw: RawInode = bytemuck::pod_read_unaligned(&record);

        // Flags and the extended inode size come first: they decide what the
        // remaining slots mean.
        let flags = InodeFlags(u32::from_le(raw.flags));
        if !InodeFlags::SUPPORTED.includes(flags) {
            return Err(RuntimeError::UnsupportedValue.into());
        }

        let extended_inode_size = if data.len() >= EXT3_INODE_SIZE {
            let extended_inode_size = u16::from_le(raw.extended_inode_size);
            if usize::from(extended_inode_size) > data.len() - EXT2_INODE_SIZE {
                return Err(RuntimeError::ValueOutOfBounds.into());
            }

            extended_inode_size
        } else {
            0
        };
        let has_ext4_tail =
            data.len() >= RAW_INODE_SIZE && extended_inode_size >= EXT4_TAIL_MINIMUM;

        let timestamps_repurposed = flags.includes(InodeFlags::EXTENDED_ATTRIBUTE_VALUE);

        let base_access_time = u32::from_le(raw.access_time) as i32;
        let base_change_time = u32::from_le(raw.inode_change_time) as i32;
        let base_modification_time = u32::from_le(raw.modification_time) as i32;

        let (access_time, inode_change_time, modification_time) = if timestamps_repurposed {
            (UnixTimestampNs(0), UnixTimestampNs(0), UnixTimestampNs(0))
        } else if has_ext4_tail {
            (
                extended_timestamp(base_access_time, u32::from_le(raw.access_time_extra))?,
                extended_timestamp(base_change_time, u32::from_le(raw.inode_change_time_extra))?,
                extended_timestamp(
                    base_modification_time,
                    u32::from_le(raw.modification_time_extra),
                )?,
            )
        } else {
            (
                UnixTimestampNs::from(UnixTimestamp32(base_access_time as u32)),
                UnixTimestampNs::from(UnixTimestamp32(base_change_time as u32)),
                UnixTimestampNs::from(UnixTimestamp32(base_modification_time as u32)),
            )
        };

        let creation_time = if has_ext4_tail {
            Some(extended_timestamp(
                u32::from_le(raw.creation_time) as i32,
                u32::from_le(raw.creation_time_extra),
            )?)
        } else {
            None
        };

        let mut data_size = u64::from(u32::from_le(raw.data_size_lower));
        let mut directory_acl = 0u32;
        if has_ext4_tail {
            data_size |= u64::from(u32::from_le(raw.data_size_upper)) << 32;
        } else {
            directory_acl = u32::from_le(raw.data_size_upper);
        }

        let owner_identifier = u32::from(u16::from_le(raw.owner_identifier))
            | u32::from(u16::from_le(raw.owner_identifier_upper)) << 16;
        let group_identifier = u32::from(u16::from_le(raw.group_identifier))
            | u32::from(u16::from_le(raw.group_identifier_upper)) << 16;

        let mut number_of_blocks = u64::from(u32::from_le(raw.number_of_blocks_lower));
        let mut file_acl_block_number = u64::from(u32::from_le(raw.file_acl_block_number_lower));
        if has_ext4_tail {
            number_of_blocks |= u64::from(u16::from_le(raw.number_of_blocks_upper)) << 32;
            file_acl_block_number |=
                u64::from(u16::from_le(raw.file_acl_block_number_upper)) << 32;
        }

        let mut inode = Self {
            is_empty: false,
            file_mode: InodeFileMode(u16::from_le(raw.file_mode)),
            owner_identifier,
            group_identifier,
            data_size,
            directory_acl,
            number_of_links: u16::from_le(raw.number_of_links),
            number_of_blocks,
            flags,
            access_time,
            inode_change_time,
            modification_time,
            deletion_time: UnixTimestamp32(u32::from_le(raw.deletion_time)),
            creation_time,
            data_reference: raw.data_reference,
            nfs_generation_number: u32::from_le(raw.nfs_generation_number),
            file_acl_block_number,
            extended_inode_size,
            extended_attributes: Vec::new(),
            inline_tail: Vec::new(),
            data_extents: Vec::new(),
        };

        if io_handle.format_version == FormatVersion::EXT4 {
            inode.read_inline_extended_attributes(data);
        }

        Ok(inode)
    }

    /// Scans the inline extended-attribute region after the fixed fields.
    ///
    /// Failures here are soft: the region is auxiliary and a malformed one
    /// must not invalidate the inode.
    fn read_inline_extended_attributes(&mut self, data: &[u8]) {
        let region_start = EXT2_INODE_SIZE + usize::from(self.extended_inode_size);
        if region_start + 4 > data.len() {
            return;
        }

        let region = &data[region_start..];
        let signature = u32::from_le_bytes([region[0], region[1], region[2], region[3]]);
        if signature != EXTENDED_ATTRIBUTES_SIGNATURE {
            return;
        }

        match decode_extended_attributes(region) {
            Ok(entries) => {
                if self.flags.includes(InodeFlags::INLINE_DATA) && self.data_size > 60 {
                    if let Some(entry) =
                        entries.iter().find(|entry| entry.name_index == 7 && entry.name == *b"data")
                    {
                        let start = usize::from(entry.value_offset);
                        let end = start.saturating_add(entry.value_size as usize);
                        if end <= region.len() {
                            self.inline_tail = region[start..end].to_vec();
                        }
                    }
                }
                self.extended_attributes = entries;
            }
            Err(_) => {
                warn!("discarding malformed inline extended-attribute region");
            }
        }
    }

    /// Resolves the data reference into the extent list.
    ///
    /// Must be called exactly once, during materialisation, before the inode
    /// enters the cache.
    pub(crate) fn read_data_reference<S: ByteSource>(
        &mut self,
        io_handle: &IoHandle,
        source: &S,
    ) -> ExtResult<()> {
        if self.data_size == 0 {
            return Ok(());
        }

        if self.data_size / io_handle.block_size > u64::from(u32::MAX - 1) {
            return Err(RuntimeError::ValueOutOfBounds.into());
        }
        let mut number_of_blocks = self.data_size / io_handle.block_size;
        if self.data_size % io_handle.block_size != 0 {
            number_of_blocks += 1;
        }

        let is_ext4 = io_handle.format_version == FormatVersion::EXT4;

        if is_ext4 && self.flags.includes(InodeFlags::INLINE_DATA) {
            // Content lives in the data reference, spilling into the inline
            // extended-attribute region when larger than 60 bytes.
        } else if matches!(
            self.inode_type(),
            InodeType::CharacterDevice | InodeType::BlockDevice
        ) {
            // The data reference holds the minor and major device numbers.
        } else if self.inode_type() == InodeType::SymbolicLink && self.data_size < 60 {
            // The data reference holds the link target path.
        } else if is_ext4 && self.flags.includes(InodeFlags::HAS_EXTENTS) {
            let mut extents = Vec::new();
            crate::extent::read_inode_data_reference(
                &mut extents,
                io_handle,
                source,
                number_of_blocks,
                &self.data_reference,
            )?;
            self.data_extents = extents;
        } else {
            let mut extents = Vec::new();
            crate::data_blocks::read_inode_data_reference(
                &mut extents,
                io_handle,
                source,
                number_of_blocks,
                &self.data_reference,
            )?;
            self.data_extents = extents;
        }

        Ok(())
    }

    /// Checks whether the on-disk slot was entirely zero.
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    pub fn inode_type(&self) -> InodeType {
        InodeType::from(self.file_mode)
    }

    pub fn is_directory(&self) -> bool {
        self.inode_type() == InodeType::Directory
    }

    pub fn is_regular_file(&self) -> bool {
        self.inode_type() == InodeType::Regular
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.inode_type() == InodeType::SymbolicLink
    }

    pub fn is_device(&self) -> bool {
        matches!(
            self.inode_type(),
            InodeType::CharacterDevice | InodeType::BlockDevice
        )
    }

    /// Checks whether the link target is stored inside the data reference.
    pub fn has_inline_link_target(&self) -> bool {
        self.is_symbolic_link() && self.data_size < 60
    }

    /// Checks whether file content is stored inside the inode record.
    pub fn has_inline_data(&self) -> bool {
        self.flags.includes(InodeFlags::INLINE_DATA)
    }

    /// Device identifier, decoded from the first four data-reference bytes.
    ///
    /// Only meaningful for device nodes.
    pub fn device_identifier(&self) -> u32 {
        u32::from_le_bytes([
            self.data_reference[0],
            self.data_reference[1],
            self.data_reference[2],
            self.data_reference[3],
        ])
    }

    /// Major and minor device numbers for device nodes.
    pub fn device_number(&self) -> (u8, u8) {
        (self.data_reference[1], self.data_reference[0])
    }

    /// Bytes of the inline file content, data reference first, inline
    /// extended-attribute tail after.
    pub(crate) fn inline_data(&self) -> Vec<u8> {
        let direct_len = usize::min(self.data_size as usize, 60);
        let mut content = self.data_reference[..direct_len].to_vec();

        if self.data_size as usize > 60 {
            let tail_len =
                usize::min(self.inline_tail.len(), self.data_size as usize - 60);
            content.extend_from_slice(&self.inline_tail[..tail_len]);
        }

        content
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn flags(&self) -> InodeFlags {
        self.flags
    }

    /// Directory ACL slot (the reuse of the upper-size field on ext2/3).
    pub fn directory_acl(&self) -> u32 {
        self.directory_acl
    }

    /// Recognised inline extended-attribute entries.
    pub fn extended_attributes(&self) -> &[ExtendedAttributeEntry] {
        &self.extended_attributes
    }

    pub fn extents(&self) -> &[Extent] {
        &self.data_extents
    }
}

/// Decodes an ext4 extended timestamp.
///
/// The extra word contributes its low 2 bits as seconds bits 32..33
/// (an unsigned bias above the 32-bit range) and its high 30 bits as
/// nanoseconds. Any step that would leave the signed 64-bit range fails.
fn extended_timestamp(base_seconds: i32, extra: u32) -> Result<UnixTimestampNs, RuntimeError> {
    let epoch_bits = extra & 0x3;

    let mut timestamp = if epoch_bits != 0 {
        let seconds = 0x1_0000_0000i64 * i64::from(epoch_bits) + i64::from(base_seconds);

        seconds
            .checked_mul(1_000_000_000)
            .ok_or(RuntimeError::ValueOutOfBounds)?
    } else {
        i64::from(base_seconds) * 1_000_000_000
    };

    timestamp = timestamp
        .checked_add(i64::from(extra >> 2))
        .ok_or(RuntimeError::ValueOutOfBounds)?;

    Ok(UnixTimestampNs(timestamp))
}

/// Parses the entries of an inline extended-attribute region.
///
/// `region` starts at the four signature bytes. Entries follow, 16 bytes of
/// fixed fields plus the name, aligned to four bytes; four zero bytes close
/// the list.
fn decode_extended_attributes(region: &[u8]) -> Result<Vec<ExtendedAttributeEntry>, RuntimeError> {
    let mut entries = Vec::new();
    let mut offset = 4usize;

    loop {
        if offset + 4 > region.len() {
            break;
        }
        let name_length = region[offset];
        let name_index = region[offset + 1];
        if name_length == 0 && name_index == 0 {
            break;
        }

        if offset + 16 > region.len() {
            return Err(RuntimeError::ValueOutOfBounds);
        }

        let value_offset = u16::from_le_bytes([region[offset + 2], region[offset + 3]]);
        let value_inode_number = u32::from_le_bytes([
            region[offset + 4],
            region[offset + 5],
            region[offset + 6],
            region[offset + 7],
        ]);
        let value_size = u32::from_le_bytes([
            region[offset + 8],
            region[offset + 9],
            region[offset + 10],
            region[offset + 11],
        ]);

        let name_start = offset + 16;
        let name_end = name_start + usize::from(name_length);
        if name_end > region.len() {
            return Err(RuntimeError::ValueOutOfBounds);
        }

        entries.push(ExtendedAttributeEntry {
            name_index,
            name: region[name_start..name_end].to_vec(),
            value_offset,
            value_size,
            value_inode_number,
        });

        offset = name_end + (4 - name_end % 4) % 4;
    }

    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sb::tests::raw_superblock;
    use crate::sb::Superblock;

    pub(crate) fn test_io_handle() -> IoHandle {
        IoHandle::new(&Superblock::decode(&raw_superblock()).unwrap())
    }

    fn ext4_io_handle() -> IoHandle {
        let mut data = raw_superblock();
        data[96..100].copy_from_slice(&0x242u32.to_le_bytes()); // filetype + extents
        data[88..90].copy_from_slice(&256u16.to_le_bytes());

        IoHandle::new(&Superblock::decode(&data).unwrap())
    }

    /// Builds a 256-byte inode record with the given mode and size.
    pub(crate) fn raw_inode(file_mode: u16, data_size: u32) -> Vec<u8> {
        let mut data = vec![0u8; 256];
        data[0..2].copy_from_slice(&file_mode.to_le_bytes());
        data[4..8].copy_from_slice(&data_size.to_le_bytes());
        data[26..28].copy_from_slice(&1u16.to_le_bytes()); // links

        data
    }

    #[test]
    fn raw_record_is_bit_exact() {
        assert_eq!(core::mem::size_of::<RawInode>(), RAW_INODE_SIZE);
    }

    #[test]
    fn all_zero_record_is_empty() {
        let io_handle = test_io_handle();
        let inode = Inode::decode(&[0u8; 256], &io_handle).unwrap();

        assert!(inode.is_empty());
    }

    #[test]
    fn a_record_with_any_content_is_not_empty() {
        let io_handle = test_io_handle();
        let mut data = vec![0u8; 256];
        data[0] = 0xED;
        data[1] = 0x41;

        let inode = Inode::decode(&data, &io_handle).unwrap();
        assert!(!inode.is_empty());
        assert!(inode.is_directory());
    }

    #[test]
    fn mode_selects_the_file_type() {
        let io_handle = test_io_handle();

        let inode = Inode::decode(&raw_inode(0x81A4, 0), &io_handle).unwrap();
        assert!(inode.is_regular_file());
        assert_eq!(inode.file_mode.permissions(), 0o644);

        let inode = Inode::decode(&raw_inode(0xA1FF, 0), &io_handle).unwrap();
        assert!(inode.is_symbolic_link());

        let inode = Inode::decode(&raw_inode(0x21A4, 0), &io_handle).unwrap();
        assert_eq!(inode.inode_type(), InodeType::CharacterDevice);
    }

    #[test]
    fn file_mode_displays_symbolic_permissions() {
        assert_eq!(InodeFileMode(0o644).to_string(), "rw-r--r--");
        assert_eq!(InodeFileMode(0o755).to_string(), "rwxr-xr-x");
        assert_eq!(InodeFileMode(0x8000).to_string(), "---------");
    }

    #[test]
    fn unsupported_flag_is_rejected() {
        let io_handle = test_io_handle();
        let mut data = raw_inode(0x81A4, 0);
        data[32..36].copy_from_slice(&0x4u32.to_le_bytes()); // compression

        assert_eq!(
            Inode::decode(&data, &io_handle).unwrap_err(),
            RuntimeError::UnsupportedValue.into()
        );
    }

    #[test]
    fn identifiers_fold_their_upper_halves() {
        let io_handle = test_io_handle();
        let mut data = raw_inode(0x81A4, 0);
        data[2..4].copy_from_slice(&0x1234u16.to_le_bytes()); // owner lower
        data[120..122].copy_from_slice(&0x1u16.to_le_bytes()); // owner upper
        data[24..26].copy_from_slice(&0x4321u16.to_le_bytes()); // group lower
        data[122..124].copy_from_slice(&0x2u16.to_le_bytes()); // group upper

        let inode = Inode::decode(&data, &io_handle).unwrap();
        assert_eq!(inode.owner_identifier, 0x11234);
        assert_eq!(inode.group_identifier, 0x24321);
    }

    #[test]
    fn ext4_tail_folds_the_upper_size() {
        let io_handle = ext4_io_handle();
        let mut data = raw_inode(0x81A4, 0x100);
        data[128..130].copy_from_slice(&32u16.to_le_bytes()); // extended inode size
        data[108..112].copy_from_slice(&0x2u32.to_le_bytes()); // size upper

        let inode = Inode::decode(&data, &io_handle).unwrap();
        assert_eq!(inode.data_size, (0x2u64 << 32) | 0x100);
    }

    #[test]
    fn classic_record_keeps_the_directory_acl() {
        let io_handle = test_io_handle();
        let mut data = raw_inode(0x41ED, 1024);
        data.truncate(128);
        data[108..112].copy_from_slice(&77u32.to_le_bytes());

        let inode = Inode::decode(&data, &io_handle).unwrap();
        assert_eq!(inode.directory_acl, 77);
        assert_eq!(inode.data_size, 1024);
    }

    #[test]
    fn extended_inode_size_is_bounded_by_the_record() {
        let io_handle = ext4_io_handle();
        let mut data = raw_inode(0x81A4, 0);
        data[128..130].copy_from_slice(&200u16.to_le_bytes());

        assert_eq!(
            Inode::decode(&data, &io_handle).unwrap_err(),
            RuntimeError::ValueOutOfBounds.into()
        );
    }

    #[test]
    fn extended_timestamp_extends_the_epoch() {
        // Modification time 0 with extra 0x5: epoch bits 01, one nanosecond.
        let decoded = extended_timestamp(0, 0x5).unwrap();
        assert_eq!(decoded.nanoseconds(), (1i64 << 32) * 1_000_000_000 + 1);
    }

    #[test]
    fn extended_timestamp_rejects_the_unrepresentable() {
        assert_eq!(
            extended_timestamp(i32::MAX, 0x3),
            Err(RuntimeError::ValueOutOfBounds)
        );
    }

    #[test]
    fn extended_timestamps_decode_from_the_tail() {
        let io_handle = ext4_io_handle();
        let mut data = raw_inode(0x81A4, 0);
        data[128..130].copy_from_slice(&32u16.to_le_bytes());
        data[16..20].copy_from_slice(&100u32.to_le_bytes()); // modification seconds
        data[136..140].copy_from_slice(&((7u32 << 2) | 0).to_le_bytes()); // 7 ns

        let inode = Inode::decode(&data, &io_handle).unwrap();
        assert_eq!(
            inode.modification_time.nanoseconds(),
            100 * 1_000_000_000 + 7
        );
    }

    #[test]
    fn repurposed_timestamp_slots_are_not_decoded() {
        let io_handle = ext4_io_handle();
        let mut data = raw_inode(0x81A4, 0);
        data[8..12].copy_from_slice(&12345u32.to_le_bytes());
        data[32..36].copy_from_slice(
            &InodeFlags::EXTENDED_ATTRIBUTE_VALUE.bits().to_le_bytes(),
        );

        let inode = Inode::decode(&data, &io_handle).unwrap();
        assert_eq!(inode.access_time.nanoseconds(), 0);
    }

    #[test]
    fn device_numbers_come_from_the_data_reference() {
        let io_handle = test_io_handle();
        let mut data = raw_inode(0x21A4, 0);
        data[40] = 3; // minor
        data[41] = 8; // major

        let inode = Inode::decode(&data, &io_handle).unwrap();
        assert_eq!(inode.device_number(), (8, 3));
        assert_eq!(inode.device_identifier(), 0x0803);
    }

    #[test]
    fn inline_attribute_entries_are_recognised() {
        let io_handle = ext4_io_handle();
        let mut data = raw_inode(0x81A4, 0);
        data[128..130].copy_from_slice(&32u16.to_le_bytes());

        let region_start = 128 + 32;
        data[region_start..region_start + 4]
            .copy_from_slice(&EXTENDED_ATTRIBUTES_SIGNATURE.to_le_bytes());
        let entry = region_start + 4;
        data[entry] = 4; // name length
        data[entry + 1] = 7; // "system." prefix
        data[entry + 16..entry + 20].copy_from_slice(b"data");

        let inode = Inode::decode(&data, &io_handle).unwrap();
        assert_eq!(inode.extended_attributes.len(), 1);
        assert_eq!(inode.extended_attributes[0].name(), "system.data");
    }
}
