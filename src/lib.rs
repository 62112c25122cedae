//! Read-only reader for ext2/ext3/ext4 volume images.
//!
//! Given a seekable byte source holding a filesystem image, the crate
//! exposes the volume's files, directories, symbolic links and special
//! nodes, their metadata and their data streams, without mounting or
//! writing. The format version (2, 3 or 4) is derived from the superblock's
//! feature flags; both the classic indirect-block scheme and the ext4
//! extent tree are resolved into one extent representation.
//!
//! ```no_run
//! use extfs::{FileSource, Volume};
//!
//! let source = FileSource::open("image.raw")?;
//! let volume = Volume::open(source)?;
//!
//! if let Some(entry) = volume.file_entry_by_utf8_path("/etc/hostname")? {
//!     let content = entry.read_to_end()?;
//!     println!("{}", String::from_utf8_lossy(&content));
//! }
//! # Ok::<(), extfs::ExtError>(())
//! ```

pub mod block_grp;
pub mod data_blocks;
pub mod dir;
pub mod err;
pub mod extent;
pub mod file;
pub mod inode;
pub mod inode_table;
pub mod io;
pub mod sb;
pub mod time;
pub mod volume;

pub use dir::{Directory, DirectoryEntry, DirectoryEntryType};
pub use err::{
    ArgumentError, BaseError, CanFail, ExtError, ExtResult, InputError, IoError, MemoryError,
    RuntimeError,
};
pub use extent::{Extent, ExtentFlags};
pub use file::FileEntry;
pub use inode::{Inode, InodeFileMode, InodeFlags, InodeNumber, InodeType};
pub use io::{BufferSource, ByteSource, FileSource};
pub use sb::{
    CompatibleFeatures, FormatVersion, IncompatibleFeatures, ReadOnlyCompatibleFeatures,
    Superblock,
};
pub use time::{UnixTimestamp32, UnixTimestampNs};
pub use volume::Volume;
