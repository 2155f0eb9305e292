#![allow(dead_code)]

use std::path::PathBuf;

use flatfs::{Disk, FlatFs, Inode, InodeName, Superblock, FLATFS_BLOCK_SIZE, ROOT_INO};
use tempfile::TempDir;

pub fn name(s: &str) -> InodeName {
    InodeName::new(s).unwrap()
}

/// Writes a fresh image whose superblock is replaced by `sb`.
pub fn image_with(dir: &TempDir, file: &str, sb: &Superblock) -> PathBuf {
    let path = dir.path().join(file);
    let mut disk = Disk::format(&path).unwrap();
    disk.write_superblock(sb).unwrap();
    path
}

pub fn blank_image(dir: &TempDir, file: &str) -> PathBuf {
    image_with(dir, file, &Superblock::empty())
}

/// Root holding file "A": 3 blocks starting at block 1.
pub fn volume_with_a() -> Superblock {
    let mut sb = Superblock::empty();
    sb.inodes[0] = Inode::file(name("A"), 3, 1, ROOT_INO);
    sb.free_block_list.mark(1..4, true);
    sb
}

pub fn mount(path: &PathBuf) -> FlatFs {
    let mut fs = FlatFs::new();
    fs.mount(path).unwrap();
    fs
}

pub fn inode(fs: &FlatFs, slot: usize) -> Inode {
    fs.superblock().unwrap().inodes[slot]
}

pub fn read_raw_block(path: &PathBuf, block: usize) -> Vec<u8> {
    let bytes = std::fs::read(path).unwrap();
    bytes[block * FLATFS_BLOCK_SIZE..(block + 1) * FLATFS_BLOCK_SIZE].to_vec()
}

/// Fills the shared buffer with `tag` repeated and writes it to `block` of `file`.
pub fn stamp(fs: &mut FlatFs, file: &str, block: i64, tag: u8) {
    fs.set_buffer(&[tag; FLATFS_BLOCK_SIZE]).unwrap();
    fs.write(file, block).unwrap();
}
