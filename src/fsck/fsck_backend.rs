/* Where the checker reads volume metadata from. The mounted path hands it a
decoded superblock; the standalone tool and the tests hand it raw block 0. */

use crate::layout::{Block, FreeBitmap, Inode, Superblock, FLATFS_NUM_INODES};

pub trait FsckBackend {
    fn load_block_bitmap(&self) -> FreeBitmap;
    fn load_all_inodes(&self) -> [Inode; FLATFS_NUM_INODES];

    fn load_superblock(&self) -> Superblock {
        Superblock {
            free_block_list: self.load_block_bitmap(),
            inodes: self.load_all_inodes(),
        }
    }
}

impl FsckBackend for Superblock {
    fn load_block_bitmap(&self) -> FreeBitmap {
        self.free_block_list
    }

    fn load_all_inodes(&self) -> [Inode; FLATFS_NUM_INODES] {
        self.inodes
    }

    fn load_superblock(&self) -> Superblock {
        self.clone()
    }
}

impl FsckBackend for Block {
    fn load_block_bitmap(&self) -> FreeBitmap {
        Superblock::from_bytes(self).free_block_list
    }

    fn load_all_inodes(&self) -> [Inode; FLATFS_NUM_INODES] {
        Superblock::from_bytes(self).inodes
    }

    fn load_superblock(&self) -> Superblock {
        Superblock::from_bytes(self)
    }
}
