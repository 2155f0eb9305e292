/* The six consistency checks. `verify` is what mount uses: it stops at the first
failing check and otherwise hands back everything a session needs. `run_fsck`
runs every check and keeps all findings for the standalone tool. */

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use super::{fsck_backend::FsckBackend, fsck_types::*};
use crate::dir::DirTree;
use crate::layout::{InodeName, Superblock, FLATFS_NUM_BLOCKS, FLATFS_NUM_INODES, ROOT_INO};

/// A superblock that passed every check, plus the state derived from it.
#[derive(Debug, Clone)]
pub struct ValidatedVolume {
    pub superblock: Superblock,
    pub tree: DirTree,
    /// Free inode slots, ascending.
    pub free_inodes: Vec<u8>,
}

type Check = fn(&Superblock, &mut FsckReport);

const CHECKS: [Check; 6] = [
    check_superblock_bit,
    check_block_accounting,
    check_names,
    check_inode_state,
    check_block_placement,
    check_parents,
];

// 1. Block 0 must be reserved
fn check_superblock_bit(sb: &Superblock, report: &mut FsckReport) {
    if sb.free_block_list.is_free(0) {
        report.push(
            Inconsistency::SuperblockBitFree,
            "Bitmap marks block 0 (superblock) as free".into(),
        );
    }
}

// 2. Bitmap <-> blocks actually owned by files
fn check_block_accounting(sb: &Superblock, report: &mut FsckReport) {
    let mut owners = [0u32; FLATFS_NUM_BLOCKS];

    for inode in sb.inodes.iter().filter(|i| i.is_used() && !i.is_dir()) {
        for block in inode.block_range() {
            // out-of-volume ranges and block 0 are check 5's business
            if (1..FLATFS_NUM_BLOCKS).contains(&block) {
                owners[block] += 1;
            }
        }
    }

    for block in 1..FLATFS_NUM_BLOCKS {
        let marked = sb.free_block_list.is_used(block);
        match (marked, owners[block]) {
            (true, 0) => report.push(
                Inconsistency::BlockAccounting,
                format!("Bitmap marks block {} used, but no file owns it", block),
            ),
            (false, n) if n > 0 => report.push(
                Inconsistency::BlockAccounting,
                format!("Bitmap marks block {} free, but a file owns it", block),
            ),
            (_, n) if n > 1 => report.push(
                Inconsistency::BlockAccounting,
                format!("Block {} is owned by {} files", block, n),
            ),
            _ => {}
        }
    }
}

// 3. Names unique per directory, never `.` or `..`
fn check_names(sb: &Superblock, report: &mut FsckReport) {
    let mut seen: HashMap<u8, HashSet<InodeName>> = HashMap::new();

    for (idx, inode) in sb.inodes.iter().enumerate().filter(|(_, i)| i.is_used()) {
        if inode.name.is_reserved() {
            report.push(
                Inconsistency::DuplicateName,
                format!("Inode {}: reserved name {:?}", idx, inode.name),
            );
        }
        if !seen.entry(inode.parent()).or_default().insert(inode.name) {
            report.push(
                Inconsistency::DuplicateName,
                format!(
                    "Inode {}: name {:?} repeated inside directory {}",
                    idx,
                    inode.name,
                    inode.parent()
                ),
            );
        }
    }
}

// 4. Free slots fully zero, used slots named
fn check_inode_state(sb: &Superblock, report: &mut FsckReport) {
    for (idx, inode) in sb.inodes.iter().enumerate() {
        if !inode.is_used() && !inode.is_zeroed() {
            report.push(
                Inconsistency::InodeState,
                format!("Inode {} is free but not zeroed", idx),
            );
        }
        if inode.is_used() && inode.name.is_zero() {
            report.push(
                Inconsistency::InodeState,
                format!("Inode {} is in use but has no name", idx),
            );
        }
    }
}

// 5. Files start inside the volume, directories own nothing
fn check_block_placement(sb: &Superblock, report: &mut FsckReport) {
    for (idx, inode) in sb.inodes.iter().enumerate().filter(|(_, i)| i.is_used()) {
        if inode.is_dir() {
            if inode.size() != 0 || inode.start_block != 0 {
                report.push(
                    Inconsistency::BlockPlacement,
                    format!(
                        "Directory inode {}: size {} start {} (both must be 0)",
                        idx,
                        inode.size(),
                        inode.start_block
                    ),
                );
            }
            continue;
        }

        let range = inode.block_range();
        if !(1..FLATFS_NUM_BLOCKS).contains(&range.start) || range.end > FLATFS_NUM_BLOCKS {
            report.push(
                Inconsistency::BlockPlacement,
                format!(
                    "File inode {}: blocks {}..{} outside the data region",
                    idx, range.start, range.end
                ),
            );
        }
    }
}

// 6. Parent is the root or another used directory, and everything hangs off root
fn check_parents(sb: &Superblock, report: &mut FsckReport) {
    for (idx, inode) in sb.inodes.iter().enumerate().filter(|(_, i)| i.is_used()) {
        let parent = inode.parent();
        if parent == ROOT_INO {
            continue;
        }
        let valid = (parent as usize) < FLATFS_NUM_INODES
            && parent as usize != idx
            && sb.inodes[parent as usize].is_used()
            && sb.inodes[parent as usize].is_dir();
        if !valid {
            report.push(
                Inconsistency::ParentLink,
                format!("Inode {}: parent {} is not a directory in use", idx, parent),
            );
        }
    }

    let (_, unreachable) = build_tree(sb);
    for idx in unreachable {
        report.push(
            Inconsistency::ParentLink,
            format!("Inode {} is not reachable from the root directory", idx),
        );
    }
}

/// Breadth-first from root. Returns the tree and the used slots it could not place.
fn build_tree(sb: &Superblock) -> (DirTree, Vec<usize>) {
    let mut tree = DirTree::new();
    let mut placed = [false; FLATFS_NUM_INODES];
    let mut queue = VecDeque::from([ROOT_INO]);

    while let Some(dir) = queue.pop_front() {
        for (idx, inode) in sb.inodes.iter().enumerate() {
            if placed[idx] || !inode.is_used() || inode.parent() != dir {
                continue;
            }
            if tree.insert(dir, inode.name, idx as u8, inode.is_dir()).is_err() {
                continue;
            }
            placed[idx] = true;
            if inode.is_dir() {
                queue.push_back(idx as u8);
            }
        }
    }

    let unreachable = (0..FLATFS_NUM_INODES)
        .filter(|&i| sb.inodes[i].is_used() && !placed[i])
        .collect();
    (tree, unreachable)
}

pub fn run_fsck<B: FsckBackend>(backend: &B) -> FsckReport {
    let sb = backend.load_superblock();
    let mut report = FsckReport::new();
    for check in CHECKS {
        check(&sb, &mut report);
    }
    report
}

/// Runs the checks in order and stops at the first that fails.
pub fn verify<B: FsckBackend>(backend: &B) -> Result<ValidatedVolume, Inconsistency> {
    let superblock = backend.load_superblock();
    let mut report = FsckReport::new();

    for check in CHECKS {
        check(&superblock, &mut report);
        if let Some(failed) = report.first_failure() {
            debug!("verify: {}", report.errors[0]);
            return Err(failed);
        }
    }

    let (tree, _) = build_tree(&superblock);
    let free_inodes = (0..FLATFS_NUM_INODES as u8)
        .filter(|&i| !superblock.inodes[i as usize].is_used())
        .collect();

    Ok(ValidatedVolume {
        superblock,
        tree,
        free_inodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Inode;

    fn name(s: &str) -> InodeName {
        InodeName::new(s).unwrap()
    }

    /// root: file "a" (3 blocks at 1), dir "d" holding file "b" (1 block at 10)
    fn healthy() -> Superblock {
        let mut sb = Superblock::empty();
        sb.inodes[0] = Inode::file(name("a"), 3, 1, ROOT_INO);
        sb.inodes[1] = Inode::dir(name("d"), ROOT_INO);
        sb.inodes[2] = Inode::file(name("b"), 1, 10, 1);
        sb.free_block_list.mark(1..4, true);
        sb.free_block_list.set_used(10, true);
        sb
    }

    fn code_of(sb: &Superblock) -> Option<u8> {
        verify(sb).err().map(Inconsistency::code)
    }

    #[test]
    fn healthy_volume_builds_state() {
        let v = verify(&healthy()).unwrap();
        assert_eq!(v.free_inodes.first(), Some(&3));
        assert_eq!(v.free_inodes.len(), FLATFS_NUM_INODES - 3);
        assert_eq!(v.tree.lookup(1, &name("b")), Ok(2));
        assert_eq!(v.tree.child_count(ROOT_INO), 2);
        assert!(run_fsck(&healthy()).is_clean());
    }

    #[test]
    fn each_violation_reports_its_own_code() {
        let mut sb = healthy();
        sb.free_block_list.set_used(0, false);
        assert_eq!(code_of(&sb), Some(1));

        let mut sb = healthy();
        sb.free_block_list.set_used(50, true);
        assert_eq!(code_of(&sb), Some(2));

        let mut sb = healthy();
        sb.free_block_list.set_used(2, false);
        assert_eq!(code_of(&sb), Some(2));

        let mut sb = healthy();
        sb.inodes[3] = Inode::file(name("c"), 2, 3, ROOT_INO); // overlaps "a"
        sb.free_block_list.set_used(4, true);
        assert_eq!(code_of(&sb), Some(2));

        let mut sb = healthy();
        sb.inodes[3] = Inode::dir(name("a"), ROOT_INO);
        assert_eq!(code_of(&sb), Some(3));

        let mut sb = healthy();
        sb.inodes[3] = Inode::dir(name(".."), 1);
        assert_eq!(code_of(&sb), Some(3));

        let mut sb = healthy();
        sb.inodes[3].start_block = 9;
        assert_eq!(code_of(&sb), Some(4));

        let mut sb = healthy();
        sb.inodes[3] = Inode::dir(InodeName::default(), ROOT_INO);
        assert_eq!(code_of(&sb), Some(4));

        let mut sb = healthy();
        sb.inodes[1].start_block = 20;
        assert_eq!(code_of(&sb), Some(5));

        let mut sb = healthy();
        sb.inodes[3] = Inode::file(name("z"), 0, 0, ROOT_INO);
        assert_eq!(code_of(&sb), Some(5));

        let mut sb = healthy();
        sb.inodes[2].set_dir_parent(false, 0); // parent is a file
        assert_eq!(code_of(&sb), Some(6));

        let mut sb = healthy();
        sb.inodes[2].set_dir_parent(false, 126);
        assert_eq!(code_of(&sb), Some(6));

        let mut sb = healthy();
        sb.inodes[2].set_dir_parent(false, 40); // free slot
        assert_eq!(code_of(&sb), Some(6));
    }

    #[test]
    fn file_running_off_the_volume_is_misplaced() {
        let mut sb = Superblock::empty();
        sb.inodes[0] = Inode::file(name("end"), 3, 126, ROOT_INO);
        sb.free_block_list.mark(126..128, true);
        assert_eq!(code_of(&sb), Some(5));
    }

    #[test]
    fn directory_cycles_are_unreachable() {
        let mut sb = healthy();
        sb.inodes[3] = Inode::dir(name("x"), 4);
        sb.inodes[4] = Inode::dir(name("y"), 3);
        assert_eq!(code_of(&sb), Some(6));

        let mut sb = healthy();
        sb.inodes[3] = Inode::dir(name("me"), 3);
        assert_eq!(code_of(&sb), Some(6));
    }

    #[test]
    fn full_report_collects_every_check() {
        let mut sb = healthy();
        sb.free_block_list.set_used(0, false);
        sb.inodes[3] = Inode::dir(name("a"), ROOT_INO);
        sb.inodes[4].start_block = 1;
        let report = run_fsck(&sb);
        let checks: HashSet<_> = report.errors.iter().map(|f| f.check).collect();
        assert!(checks.contains(&Inconsistency::SuperblockBitFree));
        assert!(checks.contains(&Inconsistency::DuplicateName));
        assert!(checks.contains(&Inconsistency::InodeState));
        assert!(!report.blocks_ok && !report.inodes_ok);
        assert_eq!(report.first_failure(), Some(Inconsistency::SuperblockBitFree));
    }

    #[test]
    fn raw_block_backend_matches_decoded() {
        let raw = healthy().to_bytes();
        assert!(verify(&raw).is_ok());
    }
}
