//! In-memory admission table for unconfirmed data roots.
//!
//! Tracks, per `(data_root, tx_size)`, the bytes admitted so far, the
//! admission timestamp, and the mempool tx ids still referencing the root.
//! The table's derived total and the per-entry sizes move in lockstep; the
//! engine's buffer caps are enforced against both.

use crate::error::SyncError;
use crate::storage::DataRootKey;
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One pending (or chain-confirmed) data root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPoolEntry {
    /// Bytes admitted against this root while unconfirmed.
    pub size: u64,
    /// Admission (or refresh) time in microseconds.
    pub timestamp_us: u64,
    /// Mempool tx ids referencing the root; `None` once the root is
    /// confirmed on chain, after which mempool drops are ignored.
    pub tx_ids: Option<BTreeSet<B256>>,
}

/// The disk-pool data-root table plus its derived byte total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPool {
    #[serde(with = "roots_serde")]
    roots: BTreeMap<DataRootKey, DiskPoolEntry>,
    size: u64,
}

impl DiskPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total unconfirmed bytes across all entries.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn get(&self, key: &DataRootKey) -> Option<&DiskPoolEntry> {
        self.roots.get(key)
    }

    pub fn contains(&self, key: &DataRootKey) -> bool {
        self.roots.contains_key(key)
    }

    /// Registers a mempool transaction for the root, creating the entry on
    /// first sight. A confirmed entry is left untouched.
    pub fn add_tx(&mut self, key: DataRootKey, tx_id: B256, now_us: u64) {
        let entry = self.roots.entry(key).or_insert_with(|| DiskPoolEntry {
            size: 0,
            timestamp_us: now_us,
            tx_ids: Some(BTreeSet::new()),
        });
        if let Some(ids) = entry.tx_ids.as_mut() {
            ids.insert(tx_id);
        }
    }

    /// Unregisters a dropped mempool transaction; the entry (and its admitted
    /// bytes) go away once no tx references it. Confirmed entries ignore
    /// drops.
    pub fn maybe_drop_tx(&mut self, key: &DataRootKey, tx_id: &B256) {
        let Some(entry) = self.roots.get_mut(key) else {
            return;
        };
        let Some(ids) = entry.tx_ids.as_mut() else {
            return;
        };
        ids.remove(tx_id);
        if ids.is_empty() {
            if let Some(removed) = self.roots.remove(key) {
                self.size -= removed.size;
            }
        }
    }

    /// Checks the per-root and global buffers for one more chunk.
    pub fn check_admission(
        &self,
        key: &DataRootKey,
        chunk_size: u64,
        max_root_buffer: u64,
        max_pool_buffer: u64,
    ) -> Result<(), SyncError> {
        let entry_size = self.roots.get(key).map(|e| e.size).unwrap_or(0);
        if entry_size + chunk_size > max_root_buffer {
            return Err(SyncError::ExceedsDataRootSizeLimit);
        }
        if self.size + chunk_size > max_pool_buffer {
            return Err(SyncError::ExceedsDiskPoolSizeLimit);
        }
        Ok(())
    }

    /// Accounts an admitted chunk against the entry and the pool total.
    pub fn record_admitted(&mut self, key: &DataRootKey, chunk_size: u64) {
        if let Some(entry) = self.roots.get_mut(key) {
            entry.size += chunk_size;
            self.size += chunk_size;
        }
    }

    /// Marks the root confirmed on chain: its admitted bytes leave the buffer
    /// accounting and mempool drops stop mattering.
    pub fn confirm(&mut self, key: &DataRootKey) {
        if let Some(entry) = self.roots.get_mut(key) {
            self.size -= entry.size;
            entry.size = 0;
            entry.tx_ids = None;
        }
    }

    /// Gives an orphaned root a fresh expiry window after a reorg, creating a
    /// placeholder entry if the root was never in the pool.
    pub fn refresh_orphaned(&mut self, key: DataRootKey, now_us: u64) {
        self.roots
            .entry(key)
            .and_modify(|entry| entry.timestamp_us = now_us)
            .or_insert_with(|| DiskPoolEntry {
                size: 0,
                timestamp_us: now_us,
                tx_ids: None,
            });
    }

    /// Sweeps entries whose window has passed; returns how many were removed.
    pub fn expire(&mut self, now_us: u64, expiration_us: u64) -> usize {
        let doomed: Vec<DataRootKey> = self
            .roots
            .iter()
            .filter(|(_, entry)| entry.timestamp_us.saturating_add(expiration_us) < now_us)
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            if let Some(removed) = self.roots.remove(key) {
                self.size -= removed.size;
            }
        }
        doomed.len()
    }

    /// Sum of entry sizes; equals `size()` at every quiescent state.
    #[cfg(test)]
    pub fn recomputed_size(&self) -> u64 {
        self.roots.values().map(|entry| entry.size).sum()
    }
}

mod roots_serde {
    use super::{DataRootKey, DiskPoolEntry};
    use serde::de::Deserializer;
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<DataRootKey, DiskPoolEntry>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&DataRootKey, &DiskPoolEntry)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<DataRootKey, DiskPoolEntry>, D::Error> {
        let pairs = Vec::<(DataRootKey, DiskPoolEntry)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u8, tx_size: u64) -> DataRootKey {
        DataRootKey {
            data_root: B256::from([tag; 32]),
            tx_size,
        }
    }

    fn tx(tag: u8) -> B256 {
        B256::from([tag; 32])
    }

    #[test]
    fn admission_accounting_stays_in_lockstep() {
        let mut pool = DiskPool::new();
        pool.add_tx(key(1, 100), tx(1), 1_000);
        pool.add_tx(key(2, 200), tx(2), 1_000);
        pool.record_admitted(&key(1, 100), 40);
        pool.record_admitted(&key(2, 200), 60);
        assert_eq!(pool.size(), 100);
        assert_eq!(pool.recomputed_size(), pool.size());

        pool.confirm(&key(1, 100));
        assert_eq!(pool.size(), 60);
        assert_eq!(pool.recomputed_size(), pool.size());

        pool.maybe_drop_tx(&key(2, 200), &tx(2));
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.recomputed_size(), pool.size());
    }

    #[test]
    fn caps_reject_before_state_changes() {
        let mut pool = DiskPool::new();
        pool.add_tx(key(1, 100), tx(1), 0);
        pool.record_admitted(&key(1, 100), 90);

        assert_eq!(
            pool.check_admission(&key(1, 100), 20, 100, 1_000),
            Err(SyncError::ExceedsDataRootSizeLimit)
        );
        assert_eq!(
            pool.check_admission(&key(1, 100), 5, 100, 92),
            Err(SyncError::ExceedsDiskPoolSizeLimit)
        );
        assert_eq!(pool.check_admission(&key(1, 100), 5, 100, 1_000), Ok(()));
    }

    #[test]
    fn confirmed_roots_ignore_mempool_churn() {
        let mut pool = DiskPool::new();
        pool.add_tx(key(1, 100), tx(1), 0);
        pool.record_admitted(&key(1, 100), 10);
        pool.confirm(&key(1, 100));

        pool.maybe_drop_tx(&key(1, 100), &tx(1));
        assert!(pool.contains(&key(1, 100)));
        pool.add_tx(key(1, 100), tx(9), 5);
        assert!(pool.get(&key(1, 100)).unwrap().tx_ids.is_none());
    }

    #[test]
    fn expiry_sweeps_stale_entries() {
        let mut pool = DiskPool::new();
        pool.add_tx(key(1, 100), tx(1), 0);
        pool.record_admitted(&key(1, 100), 10);
        pool.add_tx(key(2, 100), tx(2), 5_000);

        assert_eq!(pool.expire(10_001, 10_000), 1);
        assert!(!pool.contains(&key(1, 100)));
        assert!(pool.contains(&key(2, 100)));
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn orphan_refresh_extends_the_window() {
        let mut pool = DiskPool::new();
        pool.add_tx(key(1, 100), tx(1), 0);
        pool.refresh_orphaned(key(1, 100), 9_000);
        assert_eq!(pool.get(&key(1, 100)).unwrap().timestamp_us, 9_000);

        // Never-seen roots get a placeholder so their chunks survive until
        // expiry.
        pool.refresh_orphaned(key(3, 100), 9_000);
        assert!(pool.contains(&key(3, 100)));
        assert_eq!(pool.expire(9_000 + 10_001, 10_000), 2);
    }
}
