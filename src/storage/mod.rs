//! Ordered key-value storage: host contract, column bundle, key codecs.
//!
//! All offset keys are fixed-width big-endian so lexicographic order equals
//! numeric order; the engine leans on `get_next`/`get_prev` to recover the
//! chunk or block covering an arbitrary weave offset in one probe.

pub mod blobs;

use crate::error::StoreError;
use alloy_primitives::{Bytes, B256};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::Arc;

/// Byte width of an offset key.
pub const NOTE_SIZE: usize = 32;

pub const CF_CHUNKS_INDEX: &str = "chunks_index";
pub const CF_MISSING_CHUNKS_INDEX: &str = "missing_chunks_index";
pub const CF_DATA_ROOT_INDEX: &str = "data_root_index";
pub const CF_DATA_ROOT_OFFSET_INDEX: &str = "data_root_offset_index";
pub const CF_TX_INDEX: &str = "tx_index";
pub const CF_TX_OFFSET_INDEX: &str = "tx_offset_index";
pub const CF_DISK_POOL_CHUNKS_INDEX: &str = "disk_pool_chunks_index";

/// Ordered key-value column contract required from the host.
///
/// Every call is atomic with respect to concurrent readers; `get_next` /
/// `get_prev` are the snapshot primitives the lock-free read paths rely on.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;
    /// Smallest key >= `key` with its value.
    fn get_next(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError>;
    /// Greatest key <= `key` with its value.
    fn get_prev(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError>;
    /// Ordered entries with keys in `[lo, hi)`.
    fn get_range(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
    /// Deletes every key in `[lo, hi)`.
    fn delete_range(&self, lo: &[u8], hi: &[u8]) -> Result<(), StoreError>;
}

/// Opens named columns of one database.
pub trait KvDatabase: Send + Sync {
    fn column(&self, name: &str) -> Result<Arc<dyn KvStore>, StoreError>;
}

/// Advances a wrapping cursor over a column.
///
/// `None` starts at the smallest key. The returned flag is true when the
/// cursor wrapped past the last key. Returns `Ok(None)` on an empty column
/// rather than spinning.
pub fn cyclic_next(
    store: &dyn KvStore,
    cursor: Option<&[u8]>,
) -> Result<Option<(Vec<u8>, Vec<u8>, bool)>, StoreError> {
    let from = match cursor {
        None => return Ok(store.get_next(&[])?.map(|(k, v)| (k, v, false))),
        Some(c) => {
            // The smallest key strictly greater than the cursor.
            let mut succ = Vec::with_capacity(c.len() + 1);
            succ.extend_from_slice(c);
            succ.push(0);
            succ
        }
    };
    match store.get_next(&from)? {
        Some((k, v)) => Ok(Some((k, v, false))),
        None => Ok(store.get_next(&[])?.map(|(k, v)| (k, v, true))),
    }
}

/// The seven engine columns.
#[derive(Clone)]
pub struct DataDb {
    pub chunks_index: Arc<dyn KvStore>,
    pub missing_chunks_index: Arc<dyn KvStore>,
    pub data_root_index: Arc<dyn KvStore>,
    pub data_root_offset_index: Arc<dyn KvStore>,
    pub tx_index: Arc<dyn KvStore>,
    pub tx_offset_index: Arc<dyn KvStore>,
    pub disk_pool_chunks_index: Arc<dyn KvStore>,
}

impl DataDb {
    pub fn open(db: &dyn KvDatabase) -> Result<Self, StoreError> {
        Ok(Self {
            chunks_index: db.column(CF_CHUNKS_INDEX)?,
            missing_chunks_index: db.column(CF_MISSING_CHUNKS_INDEX)?,
            data_root_index: db.column(CF_DATA_ROOT_INDEX)?,
            data_root_offset_index: db.column(CF_DATA_ROOT_OFFSET_INDEX)?,
            tx_index: db.column(CF_TX_INDEX)?,
            tx_offset_index: db.column(CF_TX_OFFSET_INDEX)?,
            disk_pool_chunks_index: db.column(CF_DISK_POOL_CHUNKS_INDEX)?,
        })
    }
}

/// Fixed-width big-endian offset key.
pub fn offset_key(offset: u64) -> [u8; NOTE_SIZE] {
    let mut key = [0u8; NOTE_SIZE];
    key[NOTE_SIZE - 8..].copy_from_slice(&offset.to_be_bytes());
    key
}

/// Parses an offset key written by [`offset_key`].
pub fn offset_from_key(key: &[u8]) -> Option<u64> {
    if key.len() != NOTE_SIZE || key[..NOTE_SIZE - 8].iter().any(|&b| b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&key[NOTE_SIZE - 8..]);
    Some(u64::from_be_bytes(tail))
}

/// `(data_root, tx_size)` pair identifying one logical upload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DataRootKey {
    pub data_root: B256,
    pub tx_size: u64,
}

impl DataRootKey {
    /// `data_root || 32-byte big-endian tx_size`.
    pub fn encode(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(NOTE_SIZE * 2);
        key.extend_from_slice(self.data_root.as_slice());
        key.extend_from_slice(&offset_key(self.tx_size));
        key
    }
}

/// `32-byte big-endian timestamp_us || data_path_hash`, ordered so the oldest
/// pending chunks come first.
pub fn disk_pool_chunk_key(timestamp_us: u64, data_path_hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(NOTE_SIZE * 2);
    key.extend_from_slice(&offset_key(timestamp_us));
    key.extend_from_slice(data_path_hash.as_slice());
    key
}

/// Splits a disk-pool chunk key back into `(timestamp_us, data_path_hash)`.
pub fn split_disk_pool_chunk_key(key: &[u8]) -> Option<(u64, B256)> {
    if key.len() != NOTE_SIZE * 2 {
        return None;
    }
    let ts = offset_from_key(&key[..NOTE_SIZE])?;
    Some((ts, B256::from_slice(&key[NOTE_SIZE..])))
}

/// Value under `chunks_index`, keyed by the chunk's absolute end offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub data_path_hash: B256,
    pub tx_root: B256,
    pub data_root: B256,
    pub tx_path: Bytes,
    /// End offset of the chunk relative to its transaction.
    pub chunk_rel_end: u64,
    pub chunk_size: u64,
}

/// Value under `data_root_offset_index`, keyed by the block's start offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStartEntry {
    pub tx_root: B256,
    pub block_size: u64,
    pub data_root_keys: BTreeSet<DataRootKey>,
}

/// Confirmed placements of one `(data_root, tx_size)`:
/// tx_root -> absolute tx start offset -> tx path.
pub type DataRootPlacements = BTreeMap<B256, BTreeMap<u64, Bytes>>;

/// Value under `tx_index`, keyed by tx id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEntry {
    pub tx_end: u64,
    pub tx_size: u64,
}

/// Value under `disk_pool_chunks_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPoolChunkEntry {
    pub chunk_rel_end: u64,
    pub chunk_size: u64,
    pub data_root: B256,
    pub tx_size: u64,
}

/// Reads and decodes a JSON-encoded value.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|_| StoreError::CorruptValue(alloy_primitives::hex::encode(key))),
    }
}

/// Encodes and writes a JSON value.
pub fn put_json<T: Serialize>(
    store: &dyn KvStore,
    key: &[u8],
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_vec(value).map_err(StoreError::backend)?;
    store.put(key, &raw)
}

/// Decodes a JSON value fetched through `get_next`/`get_prev`/`get_range`.
pub fn decode_json<T: DeserializeOwned>(key: &[u8], raw: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(raw)
        .map_err(|_| StoreError::CorruptValue(alloy_primitives::hex::encode(key)))
}

/// In-memory database: one `BTreeMap` per column behind a `RwLock`.
#[derive(Default)]
pub struct MemDb {
    columns: RwLock<HashMap<String, Arc<MemColumn>>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvDatabase for MemDb {
    fn column(&self, name: &str) -> Result<Arc<dyn KvStore>, StoreError> {
        let mut columns = self.columns.write();
        let column = columns
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemColumn::default()))
            .clone();
        Ok(column)
    }
}

/// One ordered in-memory column.
#[derive(Default)]
pub struct MemColumn {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl KvStore for MemColumn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn get_next(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .map
            .read()
            .range::<[u8], _>((Included(key), Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn get_prev(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .map
            .read()
            .range::<[u8], _>((Unbounded, Included(key)))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn get_range(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .map
            .read()
            .range::<[u8], _>((Included(lo), Excluded(hi)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn delete_range(&self, lo: &[u8], hi: &[u8]) -> Result<(), StoreError> {
        let mut map = self.map.write();
        let doomed: Vec<Vec<u8>> = map
            .range::<[u8], _>((Included(lo), Excluded(hi)))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            map.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_with(entries: &[(u64, &str)]) -> Arc<dyn KvStore> {
        let db = MemDb::new();
        let column = db.column("test").unwrap();
        for (offset, value) in entries {
            column.put(&offset_key(*offset), value.as_bytes()).unwrap();
        }
        column
    }

    #[test]
    fn offset_keys_preserve_numeric_order() {
        let offsets = [0u64, 1, 255, 256, 1 << 20, u64::MAX];
        let mut keys: Vec<_> = offsets.iter().map(|&o| offset_key(o)).collect();
        keys.sort();
        let decoded: Vec<u64> = keys
            .iter()
            .map(|k| offset_from_key(k).unwrap())
            .collect();
        assert_eq!(decoded, vec![0, 1, 255, 256, 1 << 20, u64::MAX]);
    }

    #[test]
    fn get_next_and_prev_bracket_an_offset() {
        let column = column_with(&[(10, "a"), (20, "b"), (30, "c")]);
        let (key, value) = column.get_next(&offset_key(15)).unwrap().unwrap();
        assert_eq!(offset_from_key(&key), Some(20));
        assert_eq!(value, b"b");

        let (key, _) = column.get_prev(&offset_key(15)).unwrap().unwrap();
        assert_eq!(offset_from_key(&key), Some(10));

        assert!(column.get_next(&offset_key(31)).unwrap().is_none());
        assert!(column.get_prev(&offset_key(9)).unwrap().is_none());

        // Inclusive on exact hits in both directions.
        let (key, _) = column.get_next(&offset_key(20)).unwrap().unwrap();
        assert_eq!(offset_from_key(&key), Some(20));
        let (key, _) = column.get_prev(&offset_key(20)).unwrap().unwrap();
        assert_eq!(offset_from_key(&key), Some(20));
    }

    #[test]
    fn range_ops_are_half_open() {
        let column = column_with(&[(10, "a"), (20, "b"), (30, "c")]);
        let range = column
            .get_range(&offset_key(10), &offset_key(30))
            .unwrap();
        assert_eq!(range.len(), 2);

        column
            .delete_range(&offset_key(10), &offset_key(30))
            .unwrap();
        assert!(column.get(&offset_key(10)).unwrap().is_none());
        assert!(column.get(&offset_key(20)).unwrap().is_none());
        assert!(column.get(&offset_key(30)).unwrap().is_some());
    }

    #[test]
    fn cyclic_cursor_wraps_and_survives_empty_columns() {
        let column = column_with(&[(1, "a"), (2, "b")]);
        let (k1, _, wrapped) = cyclic_next(column.as_ref(), None).unwrap().unwrap();
        assert!(!wrapped);
        assert_eq!(offset_from_key(&k1), Some(1));

        let (k2, _, wrapped) = cyclic_next(column.as_ref(), Some(&k1)).unwrap().unwrap();
        assert!(!wrapped);
        assert_eq!(offset_from_key(&k2), Some(2));

        let (k3, _, wrapped) = cyclic_next(column.as_ref(), Some(&k2)).unwrap().unwrap();
        assert!(wrapped);
        assert_eq!(offset_from_key(&k3), Some(1));

        let empty = MemDb::new().column("empty").unwrap();
        assert!(cyclic_next(empty.as_ref(), None).unwrap().is_none());
        assert!(cyclic_next(empty.as_ref(), Some(&k1)).unwrap().is_none());
    }

    #[test]
    fn data_root_key_orders_by_root_then_size() {
        let low = DataRootKey {
            data_root: B256::from([1u8; 32]),
            tx_size: 500,
        };
        let high = DataRootKey {
            data_root: B256::from([1u8; 32]),
            tx_size: 501,
        };
        assert!(low.encode() < high.encode());
        assert_eq!(low.encode().len(), 64);
    }

    #[test]
    fn disk_pool_key_roundtrip() {
        let hash = B256::from([7u8; 32]);
        let key = disk_pool_chunk_key(123_456, hash);
        assert_eq!(split_disk_pool_chunk_key(&key), Some((123_456, hash)));
        assert!(split_disk_pool_chunk_key(&key[1..]).is_none());
    }

    #[test]
    fn json_values_roundtrip() {
        let column = column_with(&[]);
        let entry = ChunkEntry {
            data_path_hash: B256::from([1u8; 32]),
            tx_root: B256::from([2u8; 32]),
            data_root: B256::from([3u8; 32]),
            tx_path: Bytes::from(vec![9, 9, 9]),
            chunk_rel_end: 42,
            chunk_size: 42,
        };
        put_json(column.as_ref(), &offset_key(42), &entry).unwrap();
        let loaded: ChunkEntry = get_json(column.as_ref(), &offset_key(42))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, entry);
    }
}
