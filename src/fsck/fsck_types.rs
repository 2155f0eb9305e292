/* Result types of the volume checker: the six inconsistency codes and the
full report that `fsck.flatfs` prints. */

use std::fmt;

use thiserror::Error;

/// One of the six consistency checks, numbered in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Inconsistency {
    #[error("block 0 is not reserved in the free-block bitmap")]
    SuperblockBitFree = 1,
    #[error("free-block bitmap disagrees with the blocks files own")]
    BlockAccounting = 2,
    #[error("duplicate or reserved name inside a directory")]
    DuplicateName = 3,
    #[error("inode slot state is inconsistent")]
    InodeState = 4,
    #[error("invalid start block or directory fields")]
    BlockPlacement = 5,
    #[error("invalid parent reference")]
    ParentLink = 6,
}

impl Inconsistency {
    pub const ALL: [Inconsistency; 6] = [
        Inconsistency::SuperblockBitFree,
        Inconsistency::BlockAccounting,
        Inconsistency::DuplicateName,
        Inconsistency::InodeState,
        Inconsistency::BlockPlacement,
        Inconsistency::ParentLink,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub check: Inconsistency,
    pub detail: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check.code(), self.detail)
    }
}

#[derive(Debug)]
pub struct FsckReport {
    pub blocks_ok: bool,
    pub inodes_ok: bool,
    pub errors: Vec<Finding>,
}

impl FsckReport {
    pub fn new() -> Self {
        Self {
            blocks_ok: true,
            inodes_ok: true,
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, check: Inconsistency, detail: String) {
        match check {
            Inconsistency::SuperblockBitFree | Inconsistency::BlockAccounting => {
                self.blocks_ok = false
            }
            _ => self.inodes_ok = false,
        }
        self.errors.push(Finding { check, detail });
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Lowest failing check, i.e. the code a mount would report.
    pub fn first_failure(&self) -> Option<Inconsistency> {
        self.errors.iter().map(|f| f.check).min_by_key(|c| c.code())
    }
}

impl Default for FsckReport {
    fn default() -> Self {
        Self::new()
    }
}
