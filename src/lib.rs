//! flatfs: a single-volume file system living in a 128 KiB image.
//!
//! Block 0 holds the superblock (free-block bitmap + 126 inode slots), blocks
//! 1..=127 hold file data. Files are contiguous runs of blocks; directories
//! exist only as inodes.

mod bitmap;
mod dir;
mod disk;
mod fs;
pub mod fsck;
pub mod layout;
pub mod script;

pub use crate::dir::{DirError, DirTree};
pub use crate::disk::Disk;
pub use crate::fs::{EntryKind, FlatFs, FsError, ListEntry};
pub use crate::fsck::{run_fsck, verify, FsckReport, Inconsistency, ValidatedVolume};
pub use crate::layout::{
    FreeBitmap,
    Inode,
    InodeName,
    Superblock,
    FLATFS_BLOCK_SIZE,
    FLATFS_NAME_LEN,
    FLATFS_NUM_BLOCKS,
    FLATFS_NUM_INODES,
    ROOT_INO,
};
