//! Merkle proof validation for fetched and submitted chunks.
//!
//! Tree construction and path verification belong to the host; the engine
//! consumes them through [`MerkleProvider`] and layers the chunk-level checks
//! on top: a transaction path places a data root inside the block, a data
//! path places the chunk inside the transaction, and the chunk bytes must
//! hash to the proven leaf.

use alloy_primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A transaction as weighted in its block's tx tree: id, data root, and the
/// tx's end offset relative to the block start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeTaggedTx {
    pub id: B256,
    pub data_root: B256,
    pub end_offset: u64,
}

impl SizeTaggedTx {
    pub fn size(&self, prev_end: u64) -> u64 {
        self.end_offset - prev_end
    }
}

/// Outcome of verifying one Merkle inclusion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathCheck {
    /// The proven leaf hash (a data root for tx paths, a chunk id for data
    /// paths).
    pub leaf: B256,
    /// Start of the leaf's range within the proof space.
    pub start: u64,
    /// End of the leaf's range within the proof space.
    pub end: u64,
}

/// Host-supplied Merkle routines.
pub trait MerkleProvider: Send + Sync {
    /// Verifies that `path` proves a leaf covering `target` within
    /// `[0, space)` under `root`.
    fn validate_path(&self, root: B256, target: u64, space: u64, path: &[u8])
        -> Option<PathCheck>;

    /// Root of the tx tree over a block's size-tagged transactions.
    fn tx_root(&self, txs: &[SizeTaggedTx]) -> B256;

    /// Inclusion path for the `index`-th transaction of the tree.
    fn tx_path(&self, txs: &[SizeTaggedTx], index: usize) -> Option<Bytes>;
}

/// Everything recovered by a full chunk proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProofInfo {
    pub data_root: B256,
    /// Transaction start offset relative to the block start.
    pub tx_start: u64,
    /// Chunk end offset relative to the transaction start.
    pub chunk_end: u64,
    pub tx_size: u64,
}

/// Content address of a chunk payload.
pub fn chunk_id(chunk: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(chunk))
}

/// Content address of a data path, keying the blob store.
pub fn data_path_hash(data_path: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(data_path))
}

/// Validates a full chunk proof: tx path within the block, data path within
/// the transaction, chunk bytes against the proven leaf.
#[allow(clippy::too_many_arguments)]
pub fn validate_chunk_proof(
    merkle: &dyn MerkleProvider,
    tx_root: B256,
    tx_path: &[u8],
    data_path: &[u8],
    offset_in_block: u64,
    chunk: &[u8],
    block_size: u64,
    max_chunk_size: u64,
) -> Option<ChunkProofInfo> {
    let tx = merkle.validate_path(tx_root, offset_in_block, block_size, tx_path)?;
    if offset_in_block < tx.start {
        return None;
    }
    let offset_in_tx = offset_in_block - tx.start;
    let tx_size = tx.end - tx.start;
    let chunk_end = validate_data_path(
        merkle,
        tx.leaf,
        offset_in_tx,
        tx_size,
        data_path,
        chunk,
        max_chunk_size,
    )?;
    Some(ChunkProofInfo {
        data_root: tx.leaf,
        tx_start: tx.start,
        chunk_end,
        tx_size,
    })
}

/// Validates a data path within a single transaction; returns the chunk's
/// end offset relative to the transaction start.
pub fn validate_data_path(
    merkle: &dyn MerkleProvider,
    data_root: B256,
    offset_in_tx: u64,
    tx_size: u64,
    data_path: &[u8],
    chunk: &[u8],
    max_chunk_size: u64,
) -> Option<u64> {
    if chunk.is_empty() {
        return None;
    }
    let check = merkle.validate_path(data_root, offset_in_tx, tx_size, data_path)?;
    if check.end - check.start != chunk.len() as u64 {
        return None;
    }
    if check.leaf != chunk_id(chunk) {
        return None;
    }
    if chunk.len() as u64 > max_chunk_size {
        return None;
    }
    Some(check.end)
}
