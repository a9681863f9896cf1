//! Peer transport contract and advertised sync-record bookkeeping.

use crate::intervals::IntervalSet;
use alloy_primitives::Bytes;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Identifier for a peer in the transport's pool.
pub type PeerId = String;

/// A chunk with its two inclusion proofs, as served between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    pub chunk: Bytes,
    pub tx_path: Bytes,
    pub data_path: Bytes,
}

/// Transport-level failures; any of them costs the peer its attempt for the
/// current cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    #[error("bad response: {0}")]
    BadResponse(String),
}

/// Host-supplied peer transport.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fetches the chunk covering `offset` (left-exclusive) from `peer`.
    async fn get_chunk(&self, peer: &PeerId, offset: u64) -> Result<ChunkData, TransportError>;

    /// Fetches and decodes the peer's advertised sync record.
    async fn get_sync_record(&self, peer: &PeerId) -> Result<IntervalSet, TransportError>;

    /// A random sample of up to `n` peers from the transport's larger pool.
    fn peer_sample(&self, n: usize) -> Vec<PeerId>;
}

/// Snapshot of peer sync records for the current cycle.
///
/// A transport failure sidelines the peer for the rest of the cycle; an
/// invalid proof removes it outright. Both marks clear when the next refresh
/// replaces the snapshot.
#[derive(Debug, Default)]
pub struct PeerRecords {
    records: HashMap<PeerId, IntervalSet>,
    failed: HashSet<PeerId>,
}

impl PeerRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the snapshot, clearing all per-cycle marks.
    pub fn replace(&mut self, records: HashMap<PeerId, IntervalSet>) {
        self.records = records;
        self.failed.clear();
    }

    /// Sidelines the peer for this cycle (one failed attempt).
    pub fn mark_failed(&mut self, peer: &PeerId) {
        self.failed.insert(peer.clone());
    }

    /// Removes the peer from the snapshot entirely.
    pub fn remove(&mut self, peer: &PeerId) {
        self.records.remove(peer);
    }

    /// Active peers and their records, skipping sidelined ones.
    pub fn iter_active(&self) -> impl Iterator<Item = (&PeerId, &IntervalSet)> {
        self.records
            .iter()
            .filter(|(peer, _)| !self.failed.contains(*peer))
    }

    /// Any active peer whose record covers `byte`.
    pub fn find_covering(&self, byte: u64) -> Option<&PeerId> {
        self.iter_active()
            .find(|(_, record)| record.is_inside(byte))
            .map(|(peer, _)| peer)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(entries: &[(&str, &[(u64, u64)])]) -> PeerRecords {
        let mut map = HashMap::new();
        for (peer, pairs) in entries {
            map.insert(
                peer.to_string(),
                IntervalSet::from_pairs(pairs.iter().copied()),
            );
        }
        let mut out = PeerRecords::new();
        out.replace(map);
        out
    }

    #[test]
    fn failed_peers_sit_out_the_cycle() {
        let mut peers = records(&[("a", &[(10, 0)]), ("b", &[(20, 10)])]);
        peers.mark_failed(&"a".to_string());
        let active: Vec<&PeerId> = peers.iter_active().map(|(p, _)| p).collect();
        assert_eq!(active, vec![&"b".to_string()]);
        assert_eq!(peers.len(), 2);

        // A refresh clears the mark.
        peers.replace(HashMap::from([(
            "a".to_string(),
            IntervalSet::from_pairs([(10, 0)]),
        )]));
        assert_eq!(peers.iter_active().count(), 1);
    }

    #[test]
    fn removal_is_permanent_for_the_snapshot() {
        let mut peers = records(&[("a", &[(10, 0)])]);
        peers.remove(&"a".to_string());
        assert!(peers.is_empty());
    }

    #[test]
    fn covering_lookup_respects_membership_rule() {
        let peers = records(&[("a", &[(10, 5)])]);
        assert_eq!(peers.find_covering(6), Some(&"a".to_string()));
        assert_eq!(peers.find_covering(5), None);
        assert_eq!(peers.find_covering(11), None);
    }
}
