use std::fmt;

use crate::dir::DirError;

// -----------------------------------------------------------------------------
// Volume constants
// -----------------------------------------------------------------------------

pub const FLATFS_BLOCK_SIZE: usize = 1024;
pub const FLATFS_NUM_BLOCKS: usize = 128;
pub const FLATFS_NUM_INODES: usize = 126;
pub const FLATFS_NAME_LEN: usize = 5;
pub const FLATFS_MAX_FILE_BLOCKS: u8 = 127;

/// Parent value meaning "this entry lives in the root directory".
pub const ROOT_INO: u8 = 127;

pub const BITMAP_BYTES: usize = FLATFS_NUM_BLOCKS / 8;
pub const INODE_SIZE: usize = 8;

const FLAG_BIT: u8 = 0x80;
const VALUE_MASK: u8 = 0x7F;

pub type Block = [u8; FLATFS_BLOCK_SIZE];

// -----------------------------------------------------------------------------
// Names
// -----------------------------------------------------------------------------

/// Raw inode name: up to five bytes, zero padded, not necessarily terminated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InodeName([u8; FLATFS_NAME_LEN]);

impl InodeName {
    /// Validates a user supplied name. `.` and `..` pass here; the directory
    /// tree is what refuses to store them.
    pub fn new(name: &str) -> Result<Self, DirError> {
        let bytes = name.as_bytes();
        if bytes.len() > FLATFS_NAME_LEN {
            return Err(DirError::NameTooLong(name.to_string()));
        }
        if bytes.is_empty() || bytes.contains(&0) {
            return Err(DirError::InvalidName(name.to_string()));
        }
        let mut raw = [0u8; FLATFS_NAME_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    pub fn from_raw(raw: [u8; FLATFS_NAME_LEN]) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> [u8; FLATFS_NAME_LEN] {
        self.0
    }

    /// Bytes up to the first zero.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(FLATFS_NAME_LEN);
        &self.0[..len]
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self.as_bytes(), b"." | b"..")
    }
}

impl fmt::Display for InodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for InodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

// -------------------- On-disk structures --------------------

/// One 8-byte slot of the inode table.
///
/// `used_size` and `dir_parent` each pack a flag in bit 7 and a 7-bit value;
/// every read and write of those goes through the accessors below.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Inode {
    pub name: InodeName,
    pub used_size: u8,
    pub start_block: u8,
    pub dir_parent: u8,
}

impl Inode {
    pub fn file(name: InodeName, size: u8, start_block: u8, parent: u8) -> Self {
        let mut inode = Self { name, start_block, ..Self::default() };
        inode.set_used_size(true, size);
        inode.set_dir_parent(false, parent);
        inode
    }

    pub fn dir(name: InodeName, parent: u8) -> Self {
        let mut inode = Self { name, ..Self::default() };
        inode.set_used_size(true, 0);
        inode.set_dir_parent(true, parent);
        inode
    }

    pub fn is_used(&self) -> bool {
        self.used_size & FLAG_BIT != 0
    }

    /// Size in blocks; always 0 for directories.
    pub fn size(&self) -> u8 {
        self.used_size & VALUE_MASK
    }

    pub fn is_dir(&self) -> bool {
        self.dir_parent & FLAG_BIT != 0
    }

    pub fn parent(&self) -> u8 {
        self.dir_parent & VALUE_MASK
    }

    pub fn set_used_size(&mut self, used: bool, size: u8) {
        self.used_size = (size & VALUE_MASK) | if used { FLAG_BIT } else { 0 };
    }

    pub fn set_size(&mut self, size: u8) {
        self.set_used_size(self.is_used(), size);
    }

    pub fn set_dir_parent(&mut self, is_dir: bool, parent: u8) {
        self.dir_parent = (parent & VALUE_MASK) | if is_dir { FLAG_BIT } else { 0 };
    }

    pub fn is_zeroed(&self) -> bool {
        self.name.is_zero() && self.used_size == 0 && self.start_block == 0 && self.dir_parent == 0
    }

    /// `[start, end)` of the data blocks a file owns.
    pub fn block_range(&self) -> std::ops::Range<usize> {
        let start = self.start_block as usize;
        start..start + self.size() as usize
    }

    fn decode(raw: &[u8]) -> Self {
        let mut name = [0u8; FLATFS_NAME_LEN];
        name.copy_from_slice(&raw[..FLATFS_NAME_LEN]);
        Self {
            name: InodeName::from_raw(name),
            used_size: raw[5],
            start_block: raw[6],
            dir_parent: raw[7],
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[..FLATFS_NAME_LEN].copy_from_slice(&self.name.raw());
        out[5] = self.used_size;
        out[6] = self.start_block;
        out[7] = self.dir_parent;
    }
}

/// Free-space bitmap, MSB first: block 0 is the top bit of byte 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeBitmap(pub [u8; BITMAP_BYTES]);

impl FreeBitmap {
    pub fn is_used(&self, block: usize) -> bool {
        self.0[block / 8] & (0x80 >> (block % 8)) != 0
    }

    pub fn is_free(&self, block: usize) -> bool {
        !self.is_used(block)
    }

    pub fn set_used(&mut self, block: usize, used: bool) {
        let mask = 0x80 >> (block % 8);
        if used {
            self.0[block / 8] |= mask;
        } else {
            self.0[block / 8] &= !mask;
        }
    }
}

/// Block 0 of the volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub free_block_list: FreeBitmap,
    pub inodes: [Inode; FLATFS_NUM_INODES],
}

impl Superblock {
    /// Superblock of a freshly initialised volume.
    pub fn empty() -> Self {
        let mut free_block_list = FreeBitmap([0u8; BITMAP_BYTES]);
        free_block_list.set_used(0, true);
        Self {
            free_block_list,
            inodes: [Inode::default(); FLATFS_NUM_INODES],
        }
    }

    pub fn from_bytes(raw: &Block) -> Self {
        let mut bitmap = [0u8; BITMAP_BYTES];
        bitmap.copy_from_slice(&raw[..BITMAP_BYTES]);

        let mut inodes = [Inode::default(); FLATFS_NUM_INODES];
        for (i, inode) in inodes.iter_mut().enumerate() {
            let off = BITMAP_BYTES + i * INODE_SIZE;
            *inode = Inode::decode(&raw[off..off + INODE_SIZE]);
        }

        Self { free_block_list: FreeBitmap(bitmap), inodes }
    }

    pub fn to_bytes(&self) -> Block {
        let mut raw = [0u8; FLATFS_BLOCK_SIZE];
        raw[..BITMAP_BYTES].copy_from_slice(&self.free_block_list.0);
        for (i, inode) in self.inodes.iter().enumerate() {
            let off = BITMAP_BYTES + i * INODE_SIZE;
            inode.encode(&mut raw[off..off + INODE_SIZE]);
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_fills_exactly_one_block() {
        assert_eq!(BITMAP_BYTES + FLATFS_NUM_INODES * INODE_SIZE, FLATFS_BLOCK_SIZE);
    }

    #[test]
    fn bitmap_is_msb_first() {
        let mut bm = FreeBitmap([0u8; BITMAP_BYTES]);
        bm.set_used(0, true);
        bm.set_used(9, true);
        assert_eq!(bm.0[0], 0x80);
        assert_eq!(bm.0[1], 0x40);
        assert!(bm.is_used(9));
        bm.set_used(9, false);
        assert!(bm.is_free(9));
    }

    #[test]
    fn packed_fields_split_flag_and_value() {
        let name = InodeName::new("abc").unwrap();
        let f = Inode::file(name, 3, 10, ROOT_INO);
        assert_eq!(f.used_size, 0x83);
        assert_eq!(f.dir_parent, 0x7F);
        assert!(f.is_used() && !f.is_dir());
        assert_eq!(f.block_range(), 10..13);

        let d = Inode::dir(name, 4);
        assert_eq!(d.used_size, 0x80);
        assert_eq!(d.dir_parent, 0x84);
        assert_eq!(d.parent(), 4);
        assert_eq!(d.size(), 0);
    }

    #[test]
    fn inode_table_offsets_are_fixed() {
        let mut sb = Superblock::empty();
        sb.inodes[1] = Inode::file(InodeName::new("hello").unwrap(), 2, 5, ROOT_INO);
        let raw = sb.to_bytes();
        assert_eq!(&raw[24..29], b"hello");
        assert_eq!(raw[29..32], [0x82, 5, 0x7F]);
        assert_eq!(Superblock::from_bytes(&raw), sb);
    }

    #[test]
    fn names_are_validated() {
        assert!(matches!(InodeName::new("toolong"), Err(DirError::NameTooLong(_))));
        assert!(matches!(InodeName::new(""), Err(DirError::InvalidName(_))));
        assert!(InodeName::new("..").unwrap().is_reserved());
        let full = InodeName::from_raw(*b"abcde");
        assert_eq!(full.to_string(), "abcde");
        assert_eq!(format!("{:<5}|", InodeName::new("ab").unwrap()), "ab   |");
    }
}
