use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::info;

use crate::layout::{Block, Superblock, FLATFS_BLOCK_SIZE, FLATFS_NUM_BLOCKS};

/// Open backing store of a volume: a plain file of 128 one-KiB blocks.
#[derive(Debug)]
pub struct Disk {
    file: File,
}

impl Disk {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Writes a blank volume: superblock with only block 0 reserved, zeroed data.
    pub fn format(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        file.write_all(&Superblock::empty().to_bytes())?;
        let zero = [0u8; FLATFS_BLOCK_SIZE];
        for _ in 1..FLATFS_NUM_BLOCKS {
            file.write_all(&zero)?;
        }
        file.sync_all()?;
        info!("formatted {:?}", path);

        Ok(Self { file })
    }

    pub fn read_block(&mut self, block: usize, buf: &mut Block) -> io::Result<()> {
        self.seek_to(block)?;
        self.file.read_exact(buf)
    }

    pub fn write_block(&mut self, block: usize, buf: &Block) -> io::Result<()> {
        self.seek_to(block)?;
        self.file.write_all(buf)
    }

    pub fn zero_block(&mut self, block: usize) -> io::Result<()> {
        self.write_block(block, &[0u8; FLATFS_BLOCK_SIZE])
    }

    pub fn copy_block(&mut self, from: usize, to: usize) -> io::Result<()> {
        let mut buf = [0u8; FLATFS_BLOCK_SIZE];
        self.read_block(from, &mut buf)?;
        self.write_block(to, &buf)
    }

    pub fn read_superblock(&mut self) -> io::Result<Superblock> {
        let mut raw = [0u8; FLATFS_BLOCK_SIZE];
        self.read_block(0, &mut raw)?;
        Ok(Superblock::from_bytes(&raw))
    }

    pub fn write_superblock(&mut self, sb: &Superblock) -> io::Result<()> {
        self.write_block(0, &sb.to_bytes())?;
        self.file.sync_all()
    }

    fn seek_to(&mut self, block: usize) -> io::Result<()> {
        if block >= FLATFS_NUM_BLOCKS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block {} outside the volume", block),
            ));
        }
        self.file.seek(SeekFrom::Start((block * FLATFS_BLOCK_SIZE) as u64))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn format_writes_a_full_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk0");
        let mut disk = Disk::format(&path).unwrap();
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            (FLATFS_BLOCK_SIZE * FLATFS_NUM_BLOCKS) as u64
        );
        assert_eq!(disk.read_superblock().unwrap(), Superblock::empty());
    }

    #[test]
    fn block_copy_and_zero() {
        let dir = TempDir::new().unwrap();
        let mut disk = Disk::format(&dir.path().join("disk0")).unwrap();
        let mut data = [0u8; FLATFS_BLOCK_SIZE];
        data[..3].copy_from_slice(b"xyz");
        disk.write_block(5, &data).unwrap();
        disk.copy_block(5, 127).unwrap();
        disk.zero_block(5).unwrap();

        let mut out = [0u8; FLATFS_BLOCK_SIZE];
        disk.read_block(127, &mut out).unwrap();
        assert_eq!(&out[..3], b"xyz");
        disk.read_block(5, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
        assert!(disk.read_block(128, &mut out).is_err());
    }
}
