//! Recent-block index used to find the reorg cut point on join.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One block of the recent-block window: its hash, the cumulative weave size
/// at its end, and the root of its transaction tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub hash: B256,
    pub weave_size: u64,
    pub tx_root: B256,
}

/// Ordered oldest-to-newest window of recent blocks.
pub type BlockIndex = Vec<BlockEntry>;

/// Finds the weave offset where two block windows diverge: the end offset of
/// the highest block present in both (which is the start offset of the first
/// divergent block). `None` means the windows share no block.
pub fn intersection(current: &[BlockEntry], incoming: &[BlockEntry]) -> Option<u64> {
    let known: HashSet<B256> = current.iter().map(|entry| entry.hash).collect();
    incoming
        .iter()
        .rev()
        .find(|entry| known.contains(&entry.hash))
        .map(|entry| entry.weave_size)
}

/// Walks a window yielding each block's start offset alongside the entry,
/// anchored at `base` (zero for a window reaching back to genesis, the cut
/// point when reseeding the divergent tail after a reorg).
pub fn blocks_with_bounds(
    index: &[BlockEntry],
    base: u64,
) -> impl Iterator<Item = (u64, &BlockEntry)> {
    let mut prev_end = base;
    index.iter().map(move |entry| {
        let start = prev_end;
        prev_end = entry.weave_size;
        (start, entry)
    })
}

/// Keeps only the newest `depth` entries of a window.
pub fn truncate_window(mut index: BlockIndex, depth: usize) -> BlockIndex {
    if index.len() > depth {
        index.drain(..index.len() - depth);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: u8, weave_size: u64) -> BlockEntry {
        BlockEntry {
            hash: B256::from([tag; 32]),
            weave_size,
            tx_root: B256::from([tag.wrapping_add(100); 32]),
        }
    }

    #[test]
    fn intersection_picks_the_highest_common_block() {
        let current = vec![entry(1, 10), entry(2, 30), entry(3, 50)];
        let incoming = vec![entry(1, 10), entry(2, 30), entry(4, 45)];
        assert_eq!(intersection(&current, &incoming), Some(30));
    }

    #[test]
    fn disjoint_windows_have_no_intersection() {
        let current = vec![entry(1, 10), entry(2, 30)];
        let incoming = vec![entry(7, 10), entry(8, 30)];
        assert_eq!(intersection(&current, &incoming), None);
    }

    #[test]
    fn bounds_walk_is_cumulative() {
        let index = vec![entry(1, 10), entry(2, 30), entry(3, 50)];
        let bounds: Vec<(u64, u64)> = blocks_with_bounds(&index, 0)
            .map(|(start, e)| (start, e.weave_size))
            .collect();
        assert_eq!(bounds, vec![(0, 10), (10, 30), (30, 50)]);

        let tail: Vec<(u64, u64)> = blocks_with_bounds(&index[1..], 10)
            .map(|(start, e)| (start, e.weave_size))
            .collect();
        assert_eq!(tail, vec![(10, 30), (30, 50)]);
    }

    #[test]
    fn window_truncation_keeps_the_newest() {
        let index = vec![entry(1, 10), entry(2, 30), entry(3, 50)];
        let kept = truncate_window(index, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].weave_size, 30);
    }
}
