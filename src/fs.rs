use std::fmt;
use std::io;
use std::path::Path;

use libc::{EEXIST, EINVAL, EIO, EISDIR, ENAMETOOLONG, ENODEV, ENOENT, ENOSPC, ENOTDIR};
use log::{debug, info, warn};
use thiserror::Error;

use crate::dir::{DirError, DirTree};
use crate::disk::Disk;
use crate::fsck::{self, Inconsistency};
use crate::layout::{
    Block, Inode, InodeName, Superblock, FLATFS_BLOCK_SIZE, FLATFS_MAX_FILE_BLOCKS, ROOT_INO,
};

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File system in {disk} is inconsistent (error code: {})", .code.code())]
    MountInconsistent { disk: String, code: Inconsistency },
    #[error("Cannot find disk {0}")]
    VolumeNotFound(String),
    #[error("No file system is mounted")]
    NotMounted,
    #[error("Name {0} is longer than 5 bytes")]
    NameTooLong(String),
    #[error("Invalid name {0:?}")]
    InvalidName(String),
    #[error("File or directory {0} already exists")]
    DuplicateName(String),
    #[error("{0} is a reserved name")]
    ReservedName(String),
    #[error("File or directory {0} does not exist")]
    NotFound(String),
    #[error("File {0} does not exist")]
    NotAFile(String),
    #[error("Directory {0} does not exist")]
    NotADirectory(String),
    #[error("Invalid size {0}")]
    InvalidSize(i64),
    #[error("Superblock in disk {disk} is full, cannot create {name}")]
    SuperblockFull { disk: String, name: String },
    #[error("Cannot allocate {blocks} blocks on {disk}")]
    NoSpace { disk: String, blocks: u8 },
    /// Resize could neither extend in place nor relocate.
    #[error("File {name} cannot expand to size {size}")]
    CannotExpand { name: String, size: u8 },
    #[error("{block} does not exist in {name}")]
    BlockOutOfRange { name: String, block: i64 },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    pub fn as_errno(&self) -> i32 {
        match self {
            FsError::MountInconsistent { .. } => EIO,
            FsError::VolumeNotFound(_) => ENOENT,
            FsError::NotMounted => ENODEV,
            FsError::NameTooLong(_) => ENAMETOOLONG,
            FsError::InvalidName(_) | FsError::ReservedName(_) | FsError::InvalidSize(_) => EINVAL,
            FsError::DuplicateName(_) => EEXIST,
            FsError::NotFound(_) => ENOENT,
            FsError::NotAFile(_) => EISDIR,
            FsError::NotADirectory(_) => ENOTDIR,
            FsError::SuperblockFull { .. }
            | FsError::NoSpace { .. }
            | FsError::CannotExpand { .. } => ENOSPC,
            FsError::BlockOutOfRange { .. } => EINVAL,
            FsError::Io(_) => EIO,
        }
    }
}

impl From<DirError> for FsError {
    fn from(e: DirError) -> Self {
        match e {
            DirError::NotFound(n) => FsError::NotFound(n),
            DirError::DuplicateName(n) => FsError::DuplicateName(n),
            DirError::ReservedName(n) => FsError::ReservedName(n),
            DirError::NotADirectory(n) => FsError::NotADirectory(n),
            DirError::NameTooLong(n) => FsError::NameTooLong(n),
            DirError::InvalidName(n) => FsError::InvalidName(n),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

// -----------------------------------------------------------------------------
// Listing
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Entry count, `.` and `..` included.
    Directory { entries: usize },
    File { blocks: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntryKind::Directory { entries } => write!(f, "{:<5} {:>3}", self.name, entries),
            EntryKind::File { blocks } => write!(f, "{:<5} {:>3} KB", self.name, blocks),
        }
    }
}

// -------------------- In-memory state of the mounted volume --------------------

/// Everything that exists only while a volume is mounted.
#[derive(Debug)]
pub(crate) struct MountedVolume {
    disk: Disk,
    disk_name: String,
    superblock: Superblock,
    tree: DirTree,
    free_inodes: Vec<u8>,
    cwd: u8,
}

impl MountedVolume {
    fn flush(&mut self) -> Result<()> {
        self.disk.write_superblock(&self.superblock)?;
        Ok(())
    }

    /// Stored child of the working directory that must be a regular file.
    fn resolve_file(&self, name: &str) -> Result<(u8, Inode)> {
        let key = InodeName::new(name)?;
        let slot = self
            .tree
            .child(self.cwd, &key)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        let inode = self.superblock.inodes[slot as usize];
        if inode.is_dir() {
            return Err(FsError::NotAFile(name.to_string()));
        }
        Ok((slot, inode))
    }

    /// Returns one slot to the pool: data zeroed, bits cleared, record wiped.
    fn release_inode(&mut self, slot: u8) -> Result<()> {
        let inode = self.superblock.inodes[slot as usize];
        if !inode.is_dir() {
            for block in inode.block_range() {
                self.disk.zero_block(block)?;
            }
            self.superblock.free_block_list.release(inode.block_range());
        }
        self.superblock.inodes[slot as usize] = Inode::default();

        let pos = self.free_inodes.binary_search(&slot).unwrap_or_else(|p| p);
        self.free_inodes.insert(pos, slot);
        debug!("released inode {} ({})", slot, inode.name);
        Ok(())
    }

    fn move_blocks(&mut self, from: usize, to: usize, len: usize) -> Result<()> {
        // destination below source: ascending copy never clobbers unread data
        for i in 0..len {
            self.disk.copy_block(from + i, to + i)?;
        }
        let vacated_from = from.max(to + len);
        for block in vacated_from..from + len {
            self.disk.zero_block(block)?;
        }
        Ok(())
    }

    fn entry_for(&self, name: String, slot: u8) -> ListEntry {
        let inode = &self.superblock.inodes[slot as usize];
        let kind = if inode.is_dir() {
            EntryKind::Directory { entries: self.tree.child_count(slot) + 2 }
        } else {
            EntryKind::File { blocks: inode.size() }
        };
        ListEntry { name, kind }
    }
}

// -----------------------------------------------------------------------------
// Session
// -----------------------------------------------------------------------------

/// One process-wide session: at most one mounted volume plus the shared
/// one-block I/O buffer.
pub struct FlatFs {
    volume: Option<MountedVolume>,
    buffer: Block,
}

impl Default for FlatFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatFs {
    pub fn new() -> Self {
        Self {
            volume: None,
            buffer: [0u8; FLATFS_BLOCK_SIZE],
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    pub fn disk_name(&self) -> Option<&str> {
        self.volume.as_ref().map(|v| v.disk_name.as_str())
    }

    pub fn superblock(&self) -> Option<&Superblock> {
        self.volume.as_ref().map(|v| &v.superblock)
    }

    pub fn free_inodes(&self) -> Option<&[u8]> {
        self.volume.as_ref().map(|v| v.free_inodes.as_slice())
    }

    pub fn cwd(&self) -> Option<u8> {
        self.volume.as_ref().map(|v| v.cwd)
    }

    pub fn buffer(&self) -> &Block {
        &self.buffer
    }

    fn volume(&self) -> Result<&MountedVolume> {
        self.volume.as_ref().ok_or(FsError::NotMounted)
    }

    fn volume_mut(&mut self) -> Result<&mut MountedVolume> {
        self.volume.as_mut().ok_or(FsError::NotMounted)
    }

    /// Loads and verifies `path`. On success it replaces the mounted volume;
    /// on failure the mounted volume (if any) stays as it was.
    pub fn mount(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let disk_name = path.display().to_string();

        if !path.is_file() {
            return Err(FsError::VolumeNotFound(disk_name));
        }

        // Remounting the same image must see the current metadata.
        if let Some(current) = self.volume.as_mut() {
            current.flush()?;
        }

        let mut disk = Disk::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FsError::VolumeNotFound(disk_name.clone()),
            _ => FsError::Io(e),
        })?;
        let mut raw = [0u8; FLATFS_BLOCK_SIZE];
        disk.read_block(0, &mut raw)?;

        let validated = match fsck::verify(&raw) {
            Ok(v) => v,
            Err(code) => {
                warn!("refusing to mount {}: check {} failed ({})", disk_name, code.code(), code);
                return Err(FsError::MountInconsistent { disk: disk_name, code });
            }
        };

        let mounted = MountedVolume {
            disk,
            disk_name,
            superblock: validated.superblock,
            tree: validated.tree,
            free_inodes: validated.free_inodes,
            cwd: ROOT_INO,
        };
        info!("mounted {}", mounted.disk_name);

        // drops the previous descriptor; its superblock was flushed above
        self.volume = Some(mounted);
        Ok(())
    }

    /// Flushes the superblock and closes the backing store.
    pub fn unmount(&mut self) -> Result<()> {
        let mut volume = self.volume.take().ok_or(FsError::NotMounted)?;
        volume.flush()?;
        info!("unmounted {}", volume.disk_name);
        Ok(())
    }

    /// `size` 0 creates a directory, otherwise a file of `size` blocks.
    pub fn create(&mut self, name: &str, size: i64) -> Result<()> {
        let vol = self.volume_mut()?;
        let key = InodeName::new(name)?;
        if key.is_reserved() {
            return Err(FsError::ReservedName(name.to_string()));
        }
        if !(0..=FLATFS_MAX_FILE_BLOCKS as i64).contains(&size) {
            return Err(FsError::InvalidSize(size));
        }
        let size = size as u8;

        if vol.tree.child(vol.cwd, &key).is_some() {
            return Err(FsError::DuplicateName(name.to_string()));
        }
        let slot = *vol.free_inodes.first().ok_or_else(|| FsError::SuperblockFull {
            disk: vol.disk_name.clone(),
            name: name.to_string(),
        })?;

        let inode = if size == 0 {
            Inode::dir(key, vol.cwd)
        } else {
            let start = vol
                .superblock
                .free_block_list
                .find_run(size as usize)
                .ok_or_else(|| FsError::NoSpace {
                    disk: vol.disk_name.clone(),
                    blocks: size,
                })?;
            Inode::file(key, size, start as u8, vol.cwd)
        };

        vol.tree.insert(vol.cwd, key, slot, inode.is_dir())?;
        if !inode.is_dir() {
            vol.superblock.free_block_list.mark(inode.block_range(), true);
        }
        vol.superblock.inodes[slot as usize] = inode;
        vol.free_inodes.remove(0);

        debug!(
            "created {} in inode {} (size {}, start {})",
            name, slot, size, inode.start_block
        );
        Ok(())
    }

    /// Removes a file, or a directory and everything below it.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let vol = self.volume_mut()?;
        let key = InodeName::new(name)?;
        if vol.tree.child(vol.cwd, &key).is_none() {
            return Err(FsError::NotFound(name.to_string()));
        }

        // one slot at a time, so a failed release leaves the tree and the
        // table describing the same set of live inodes
        for slot in vol.tree.subtree(vol.cwd, &key)? {
            let parent = vol.superblock.inodes[slot as usize].parent();
            vol.release_inode(slot)?;
            vol.tree.detach(parent, slot);
        }
        Ok(())
    }

    /// Copies block `block` of `name` into the shared buffer.
    pub fn read(&mut self, name: &str, block: i64) -> Result<()> {
        let FlatFs { volume, buffer } = self;
        let vol = volume.as_mut().ok_or(FsError::NotMounted)?;
        let (_, inode) = vol.resolve_file(name)?;
        let disk_block = file_block(&inode, name, block)?;
        vol.disk.read_block(disk_block, buffer)?;
        Ok(())
    }

    /// Copies the shared buffer into block `block` of `name`.
    pub fn write(&mut self, name: &str, block: i64) -> Result<()> {
        let FlatFs { volume, buffer } = self;
        let vol = volume.as_mut().ok_or(FsError::NotMounted)?;
        let (_, inode) = vol.resolve_file(name)?;
        let disk_block = file_block(&inode, name, block)?;
        vol.disk.write_block(disk_block, buffer)?;
        Ok(())
    }

    /// Clears the buffer, then copies `bytes` up to the first zero byte.
    pub fn set_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        self.volume()?;
        self.buffer = [0u8; FLATFS_BLOCK_SIZE];
        let len = bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(bytes.len())
            .min(FLATFS_BLOCK_SIZE);
        self.buffer[..len].copy_from_slice(&bytes[..len]);
        Ok(())
    }

    /// `.`, `..`, then the working directory's children by inode slot.
    pub fn list(&self) -> Result<Vec<ListEntry>> {
        let vol = self.volume()?;
        let parent = vol.tree.parent_of(vol.cwd).unwrap_or(ROOT_INO);

        let mut out = vec![
            ListEntry {
                name: ".".into(),
                kind: EntryKind::Directory { entries: vol.tree.child_count(vol.cwd) + 2 },
            },
            ListEntry {
                name: "..".into(),
                kind: EntryKind::Directory { entries: vol.tree.child_count(parent) + 2 },
            },
        ];
        out.extend(
            vol.tree
                .children(vol.cwd)
                .map(|(slot, name)| vol.entry_for(name.to_string(), slot)),
        );
        Ok(out)
    }

    pub fn resize(&mut self, name: &str, new_size: i64) -> Result<()> {
        let vol = self.volume_mut()?;
        let (slot, inode) = vol.resolve_file(name)?;
        if !(1..=FLATFS_MAX_FILE_BLOCKS as i64).contains(&new_size) {
            return Err(FsError::InvalidSize(new_size));
        }
        let new_size = new_size as u8;
        let old_size = inode.size();
        let start = inode.start_block as usize;
        let (old_len, new_len) = (old_size as usize, new_size as usize);

        if new_size == old_size {
            return Ok(());
        }

        if new_size < old_size {
            let tail = start + new_len..start + old_len;
            for block in tail.clone() {
                vol.disk.zero_block(block)?;
            }
            vol.superblock.free_block_list.release(tail);
            vol.superblock.inodes[slot as usize].set_size(new_size);
            debug!("shrunk {} to {} blocks", name, new_size);
            return Ok(());
        }

        let tail = start + old_len..start + new_len;
        if vol.superblock.free_block_list.run_is_free(tail.clone()) {
            vol.superblock.free_block_list.mark(tail, true);
            vol.superblock.inodes[slot as usize].set_size(new_size);
            debug!("extended {} in place to {} blocks", name, new_size);
            return Ok(());
        }

        // the old run is still marked used, so the new one cannot overlap it
        let dest = vol
            .superblock
            .free_block_list
            .allocate(new_len)
            .ok_or_else(|| FsError::CannotExpand {
                name: name.to_string(),
                size: new_size,
            })?;

        for i in 0..old_len {
            vol.disk.copy_block(start + i, dest + i)?;
        }
        for block in start..start + old_len {
            vol.disk.zero_block(block)?;
        }
        vol.superblock.free_block_list.release(start..start + old_len);

        let record = &mut vol.superblock.inodes[slot as usize];
        record.start_block = dest as u8;
        record.set_size(new_size);
        debug!("relocated {} from block {} to {} ({} blocks)", name, start, dest, new_size);
        Ok(())
    }

    /// Slides every file down toward block 1, keeping their order by start block.
    pub fn defragment(&mut self) -> Result<()> {
        let vol = self.volume_mut()?;

        let mut files: Vec<u8> = (0..vol.superblock.inodes.len() as u8)
            .filter(|&i| {
                let inode = &vol.superblock.inodes[i as usize];
                inode.is_used() && !inode.is_dir()
            })
            .collect();
        files.sort_by_key(|&i| vol.superblock.inodes[i as usize].start_block);

        let mut boundary = 1usize;
        for slot in files {
            let inode = vol.superblock.inodes[slot as usize];
            let start = inode.start_block as usize;
            let len = inode.size() as usize;

            let target = match vol.superblock.free_block_list.first_free_from(boundary) {
                Some(free) if free < start => free,
                _ => start,
            };

            if target != start {
                vol.move_blocks(start, target, len)?;
                let bitmap = &mut vol.superblock.free_block_list;
                bitmap.release(start..start + len);
                bitmap.mark(target..target + len, true);
                vol.superblock.inodes[slot as usize].start_block = target as u8;
                debug!("defragment: {} moved {} -> {}", inode.name, start, target);
            }
            boundary = target + len;
        }
        Ok(())
    }

    pub fn change_directory(&mut self, name: &str) -> Result<()> {
        let vol = self.volume_mut()?;
        let key = InodeName::new(name)?;
        let target = vol.tree.lookup(vol.cwd, &key)?;
        if !vol.tree.is_directory(target) {
            return Err(FsError::NotADirectory(name.to_string()));
        }
        vol.cwd = target;
        Ok(())
    }
}

fn file_block(inode: &Inode, name: &str, block: i64) -> Result<usize> {
    if block < 0 || block >= inode.size() as i64 {
        return Err(FsError::BlockOutOfRange {
            name: name.to_string(),
            block,
        });
    }
    Ok(inode.start_block as usize + block as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mounted() -> (TempDir, FlatFs) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk0");
        Disk::format(&path).unwrap();
        let mut fs = FlatFs::new();
        fs.mount(&path).unwrap();
        (dir, fs)
    }

    #[test]
    fn everything_needs_a_mount() {
        let mut fs = FlatFs::new();
        assert!(matches!(fs.create("a", 1), Err(FsError::NotMounted)));
        assert!(matches!(fs.set_buffer(b"x"), Err(FsError::NotMounted)));
        assert!(matches!(fs.list(), Err(FsError::NotMounted)));
        assert!(matches!(fs.defragment(), Err(FsError::NotMounted)));
        assert!(matches!(fs.unmount(), Err(FsError::NotMounted)));
    }

    #[test]
    fn create_validates_arguments() {
        let (_d, mut fs) = mounted();
        assert!(matches!(fs.create("abcdef", 1), Err(FsError::NameTooLong(_))));
        assert!(matches!(fs.create(".", 0), Err(FsError::ReservedName(_))));
        assert!(matches!(fs.create("a", 128), Err(FsError::InvalidSize(128))));
        assert!(matches!(fs.create("a", -1), Err(FsError::InvalidSize(-1))));
        fs.create("a", 127).unwrap();
        assert!(matches!(fs.create("b", 1), Err(FsError::NoSpace { blocks: 1, .. })));
        // the failed create took no inode
        assert_eq!(fs.free_inodes().unwrap()[0], 1);
    }

    #[test]
    fn failed_delete_keeps_tree_and_table_aligned() {
        let (_d, mut fs) = mounted();
        fs.create("d", 0).unwrap();
        fs.change_directory("d").unwrap();
        fs.create("ok", 2).unwrap();
        fs.create("bad", 1).unwrap();
        fs.change_directory("..").unwrap();

        // push "bad" off the end of the volume so zeroing its data fails
        let vol = fs.volume.as_mut().unwrap();
        let good = vol.superblock.inodes[2];
        vol.superblock.inodes[2].start_block = 127;
        vol.superblock.inodes[2].set_size(2);

        assert!(matches!(fs.delete("d"), Err(FsError::Io(_))));

        let vol = fs.volume.as_mut().unwrap();
        assert_eq!(vol.tree.child(0, &InodeName::new("ok").unwrap()), None);
        assert_eq!(vol.tree.child(0, &InodeName::new("bad").unwrap()), Some(2));
        assert_eq!(vol.free_inodes[0], 1);

        vol.superblock.inodes[2] = good;
        assert!(fsck::verify(&vol.superblock).is_ok());
        fs.delete("d").unwrap();
        assert_eq!(fs.list().unwrap().len(), 2);
    }

    #[test]
    fn buffer_stops_at_first_zero() {
        let (_d, mut fs) = mounted();
        fs.set_buffer(b"hello").unwrap();
        fs.set_buffer(b"ab\0cd").unwrap();
        assert_eq!(&fs.buffer()[..5], b"ab\0\0\0");
        let long = vec![b'z'; 2000];
        fs.set_buffer(&long).unwrap();
        assert!(fs.buffer().iter().all(|&b| b == b'z'));
    }

    #[test]
    fn listing_format() {
        let f = ListEntry { name: "ab".into(), kind: EntryKind::File { blocks: 3 } };
        let d = ListEntry { name: "..".into(), kind: EntryKind::Directory { entries: 12 } };
        assert_eq!(f.to_string(), "ab      3 KB");
        assert_eq!(d.to_string(), "..     12");
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotMounted.as_errno(), ENODEV);
        assert_eq!(FsError::from(DirError::DuplicateName("a".into())).as_errno(), EEXIST);
        assert_eq!(FsError::NotAFile("d".into()).as_errno(), EISDIR);
    }
}
