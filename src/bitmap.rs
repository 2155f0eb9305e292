//! Contiguous block allocation over the superblock's free bitmap.
//! Block 0 holds the superblock and is never handed out.

use std::ops::Range;

use log::debug;

use crate::layout::{FreeBitmap, FLATFS_NUM_BLOCKS};

pub(crate) const FIRST_DATA_BLOCK: usize = 1;

impl FreeBitmap {
    /// First-fit: start of the lowest run of `n` free blocks, if any.
    pub fn find_run(&self, n: usize) -> Option<usize> {
        if n == 0 {
            return None;
        }
        let mut run_start = FIRST_DATA_BLOCK;
        let mut run_len = 0;
        for block in FIRST_DATA_BLOCK..FLATFS_NUM_BLOCKS {
            if self.is_used(block) {
                run_len = 0;
                run_start = block + 1;
                continue;
            }
            run_len += 1;
            if run_len == n {
                return Some(run_start);
            }
        }
        None
    }

    /// Reserves the first-fit run of `n` blocks and returns its start.
    pub fn allocate(&mut self, n: usize) -> Option<usize> {
        let start = self.find_run(n)?;
        self.mark(start..start + n, true);
        debug!("allocated blocks {}..{}", start, start + n);
        Some(start)
    }

    pub fn release(&mut self, range: Range<usize>) {
        debug!("released blocks {}..{}", range.start, range.end);
        self.mark(range, false);
    }

    pub fn mark(&mut self, range: Range<usize>, used: bool) {
        for block in range {
            self.set_used(block, used);
        }
    }

    /// True when every block of `range` exists and is free.
    pub fn run_is_free(&self, range: Range<usize>) -> bool {
        range.end <= FLATFS_NUM_BLOCKS && range.clone().all(|b| self.is_free(b))
    }

    /// Lowest free data block at or above `from`.
    pub fn first_free_from(&self, from: usize) -> Option<usize> {
        (from.max(FIRST_DATA_BLOCK)..FLATFS_NUM_BLOCKS).find(|&b| self.is_free(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Superblock, BITMAP_BYTES, FLATFS_MAX_FILE_BLOCKS};
    use proptest::prelude::*;

    fn bitmap_with(used: &[Range<usize>]) -> FreeBitmap {
        let mut bm = Superblock::empty().free_block_list;
        for r in used {
            bm.mark(r.clone(), true);
        }
        bm
    }

    #[test]
    fn never_hands_out_block_zero() {
        let mut bm = FreeBitmap([0u8; BITMAP_BYTES]);
        assert_eq!(bm.allocate(1), Some(1));
    }

    #[test]
    fn first_fit_skips_short_gaps() {
        let mut bm = bitmap_with(&[1..3, 4..6]);
        // gap of one at 3, then a long run from 6
        assert_eq!(bm.find_run(1), Some(3));
        assert_eq!(bm.allocate(2), Some(6));
        assert!(bm.is_used(6) && bm.is_used(7));
        assert!(bm.is_free(8));
    }

    #[test]
    fn exact_fit_at_end_of_volume() {
        let mut bm = bitmap_with(&[1..120]);
        assert_eq!(bm.find_run(8), Some(120));
        assert_eq!(bm.find_run(9), None);
        assert_eq!(bm.allocate(127 - 119 + 1), None);
    }

    #[test]
    fn whole_volume_fits_once() {
        let mut bm = bitmap_with(&[]);
        assert_eq!(bm.allocate(127), Some(1));
        assert_eq!(bm.allocate(1), None);
        bm.release(1..128);
        assert_eq!(bm, bitmap_with(&[]));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn first_fit_matches_a_linear_scan(
            used in proptest::collection::vec(any::<bool>(), FLATFS_NUM_BLOCKS - 1),
            n in 1..=FLATFS_MAX_FILE_BLOCKS as usize,
        ) {
            let mut bm = bitmap_with(&[]);
            for (i, &u) in used.iter().enumerate() {
                bm.set_used(FIRST_DATA_BLOCK + i, u);
            }
            let expected = (FIRST_DATA_BLOCK..=FLATFS_NUM_BLOCKS - n)
                .find(|&s| bm.run_is_free(s..s + n));
            prop_assert_eq!(bm.find_run(n), expected);

            let before = bm;
            match bm.allocate(n) {
                Some(start) => {
                    let run = start..start + n;
                    for b in 0..FLATFS_NUM_BLOCKS {
                        let want = run.contains(&b) || before.is_used(b);
                        prop_assert_eq!(bm.is_used(b), want, "block {}", b);
                    }
                }
                None => {
                    prop_assert_eq!(bm, before);
                }
            }
        }
    }

    #[test]
    fn run_checks_respect_volume_end() {
        let bm = bitmap_with(&[]);
        assert!(bm.run_is_free(120..128));
        assert!(!bm.run_is_free(120..129));
        assert_eq!(bitmap_with(&[1..4]).first_free_from(0), Some(4));
    }
}
