//! Shared test scaffolding: a toy Merkle scheme, scripted peers, and a
//! manual clock.

use crate::chain::BlockEntry;
use crate::config::Clock;
use crate::intervals::IntervalSet;
use crate::p2p::{ChunkData, PeerId, PeerTransport, TransportError};
use crate::proof::{chunk_id, MerkleProvider, PathCheck, SizeTaggedTx};
use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A scratch directory unique per test invocation and per run: a process-wide
/// sequence number disambiguates within the run, a microsecond stamp keeps
/// leftovers from crashed runs out of the way.
pub fn temp_dir(kind: &str) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros())
        .unwrap_or_default();
    std::env::temp_dir().join(format!(
        "weave-sync.{kind}.{}.{stamp}.{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::SeqCst)
    ))
}

pub fn b(value: u8) -> B256 {
    B256::from([value; 32])
}

/// Toy Merkle scheme with self-authenticating paths.
///
/// A path is `leaf || start_be || end_be || tag` where the tag commits to the
/// root and range; forging one means finding a SHA-256 collision, which is
/// enough fidelity for exercising the validation pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeMerkle;

impl TreeMerkle {
    pub fn make_path(root: B256, leaf: B256, start: u64, end: u64) -> Bytes {
        let mut out = Vec::with_capacity(80);
        out.extend_from_slice(leaf.as_slice());
        out.extend_from_slice(&start.to_be_bytes());
        out.extend_from_slice(&end.to_be_bytes());
        out.extend_from_slice(&Self::tag(root, leaf, start, end));
        Bytes::from(out)
    }

    fn tag(root: B256, leaf: B256, start: u64, end: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"path");
        hasher.update(root);
        hasher.update(leaf);
        hasher.update(start.to_be_bytes());
        hasher.update(end.to_be_bytes());
        hasher.finalize().into()
    }
}

impl MerkleProvider for TreeMerkle {
    fn validate_path(
        &self,
        root: B256,
        target: u64,
        space: u64,
        path: &[u8],
    ) -> Option<PathCheck> {
        if path.len() != 80 {
            return None;
        }
        let leaf = B256::from_slice(&path[..32]);
        let start = u64::from_be_bytes(path[32..40].try_into().ok()?);
        let end = u64::from_be_bytes(path[40..48].try_into().ok()?);
        if path[48..] != Self::tag(root, leaf, start, end) {
            return None;
        }
        if start >= end || end > space {
            return None;
        }
        if target < start || target >= end {
            return None;
        }
        Some(PathCheck { leaf, start, end })
    }

    fn tx_root(&self, txs: &[SizeTaggedTx]) -> B256 {
        let mut hasher = Sha256::new();
        hasher.update(b"txroot");
        for tx in txs {
            hasher.update(tx.id);
            hasher.update(tx.data_root);
            hasher.update(tx.end_offset.to_be_bytes());
        }
        B256::from_slice(&hasher.finalize())
    }

    fn tx_path(&self, txs: &[SizeTaggedTx], index: usize) -> Option<Bytes> {
        let tx = txs.get(index)?;
        let start = if index == 0 {
            0
        } else {
            txs[index - 1].end_offset
        };
        Some(Self::make_path(
            self.tx_root(txs),
            tx.data_root,
            start,
            tx.end_offset,
        ))
    }
}

/// One transaction's chunk layout: payloads plus their in-tx bounds.
#[derive(Debug, Clone)]
pub struct TxDescriptor {
    chunks: Vec<Vec<u8>>,
    bounds: Vec<(u64, u64)>,
}

impl TxDescriptor {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        let mut bounds = Vec::with_capacity(chunks.len());
        let mut offset = 0u64;
        for chunk in &chunks {
            let end = offset + chunk.len() as u64;
            bounds.push((offset, end));
            offset = end;
        }
        Self { chunks, bounds }
    }

    pub fn size(&self) -> u64 {
        self.bounds.last().map(|&(_, end)| end).unwrap_or(0)
    }

    pub fn chunk(&self, index: usize) -> &[u8] {
        &self.chunks[index]
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_bounds(&self, index: usize) -> (u64, u64) {
        self.bounds[index]
    }

    pub fn data_root(&self) -> B256 {
        let mut hasher = Sha256::new();
        hasher.update(b"dataroot");
        for (chunk, &(_, end)) in self.chunks.iter().zip(&self.bounds) {
            hasher.update(chunk_id(chunk));
            hasher.update(end.to_be_bytes());
        }
        B256::from_slice(&hasher.finalize())
    }

    pub fn data_path(&self, index: usize) -> Bytes {
        let (start, end) = self.bounds[index];
        TreeMerkle::make_path(self.data_root(), chunk_id(&self.chunks[index]), start, end)
    }

    /// This transaction as weighted in a block, starting at `base` within it.
    pub fn size_tagged(&self, id: B256, base: u64) -> SizeTaggedTx {
        SizeTaggedTx {
            id,
            data_root: self.data_root(),
            end_offset: base + self.size(),
        }
    }
}

/// A fully materialised block: index entry, size-tagged txs, and payloads.
#[derive(Debug, Clone)]
pub struct TestBlock {
    pub entry: BlockEntry,
    pub txs: Vec<SizeTaggedTx>,
    pub descriptors: Vec<TxDescriptor>,
    pub start: u64,
}

pub fn tx_id(block_tag: u8, index: usize) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = block_tag;
    bytes[1] = index as u8;
    bytes[31] = 0x7a;
    B256::from(bytes)
}

/// Builds a block starting at weave offset `start`, one `TxDescriptor` per
/// transaction.
pub fn build_block(start: u64, tag: u8, tx_chunks: Vec<Vec<Vec<u8>>>) -> TestBlock {
    let descriptors: Vec<TxDescriptor> = tx_chunks.into_iter().map(TxDescriptor::new).collect();
    let mut txs = Vec::with_capacity(descriptors.len());
    let mut offset = 0u64;
    for (index, descriptor) in descriptors.iter().enumerate() {
        txs.push(descriptor.size_tagged(tx_id(tag, index), offset));
        offset += descriptor.size();
    }
    let tx_root = TreeMerkle.tx_root(&txs);
    TestBlock {
        entry: BlockEntry {
            hash: b(tag),
            weave_size: start + offset,
            tx_root,
        },
        txs,
        descriptors,
        start,
    }
}

impl TestBlock {
    pub fn size(&self) -> u64 {
        self.entry.weave_size - self.start
    }

    /// The block's weave range as an interval set.
    pub fn record(&self) -> IntervalSet {
        if self.size() == 0 {
            IntervalSet::new()
        } else {
            IntervalSet::from_pairs([(self.entry.weave_size, self.start)])
        }
    }

    /// Registers every chunk of the block on the transport at its absolute
    /// weave offset.
    pub fn serve_chunks(&self, transport: &ScriptedTransport) {
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let tx_start = if index == 0 {
                0
            } else {
                self.txs[index - 1].end_offset
            };
            let tx_path = TreeMerkle
                .tx_path(&self.txs, index)
                .expect("tx path for own tx");
            for chunk_index in 0..descriptor.chunk_count() {
                let (chunk_start, chunk_end) = descriptor.chunk_bounds(chunk_index);
                let abs_end = self.start + tx_start + chunk_end;
                transport.add_chunk(
                    abs_end,
                    chunk_end - chunk_start,
                    ChunkData {
                        chunk: Bytes::copy_from_slice(descriptor.chunk(chunk_index)),
                        tx_path: tx_path.clone(),
                        data_path: descriptor.data_path(chunk_index),
                    },
                );
            }
        }
    }
}

/// Transport double serving canned records and chunks.
#[derive(Default)]
pub struct ScriptedTransport {
    peers: RwLock<Vec<PeerId>>,
    records: RwLock<HashMap<PeerId, IntervalSet>>,
    chunks: RwLock<BTreeMap<u64, (u64, ChunkData)>>,
    failing: RwLock<HashSet<PeerId>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&self, peer: &str, record: IntervalSet) {
        self.peers.write().push(peer.to_string());
        self.records.write().insert(peer.to_string(), record);
    }

    pub fn add_chunk(&self, abs_end: u64, size: u64, data: ChunkData) {
        self.chunks.write().insert(abs_end, (size, data));
    }

    pub fn set_failing(&self, peer: &str, failing: bool) {
        if failing {
            self.failing.write().insert(peer.to_string());
        } else {
            self.failing.write().remove(peer);
        }
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn get_chunk(&self, peer: &PeerId, offset: u64) -> Result<ChunkData, TransportError> {
        if self.failing.read().contains(peer) {
            return Err(TransportError::Unreachable(peer.clone()));
        }
        let chunks = self.chunks.read();
        let found = chunks.range(offset..).next().and_then(|(end, entry)| {
            let (size, data) = entry;
            if *end - *size < offset {
                Some(data.clone())
            } else {
                None
            }
        });
        found.ok_or_else(|| TransportError::BadResponse(format!("no chunk at {offset}")))
    }

    async fn get_sync_record(&self, peer: &PeerId) -> Result<IntervalSet, TransportError> {
        if self.failing.read().contains(peer) {
            return Err(TransportError::Unreachable(peer.clone()));
        }
        self.records
            .read()
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(peer.clone()))
    }

    fn peer_sample(&self, n: usize) -> Vec<PeerId> {
        let peers = self.peers.read();
        peers.iter().take(n).cloned().collect()
    }
}

/// Test clock advanced by hand.
#[derive(Default)]
pub struct ManualClock {
    us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            us: AtomicU64::new(start_us),
        }
    }

    pub fn advance_us(&self, delta: u64) {
        self.us.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.us.load(Ordering::SeqCst)
    }
}
