//! Persisted engine state.

use crate::chain::BlockIndex;
use crate::error::StoreError;
use crate::intervals::IntervalSet;
use crate::sync::disk_pool::DiskPool;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// The state blob rewritten on every join, tip block, and shutdown:
/// the sync record, the recent-block window, and the disk-pool table with its
/// byte total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub sync_record: IntervalSet,
    pub block_index: BlockIndex,
    pub disk_pool: DiskPool,
}

/// Host-supplied persistence for the state blob.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Option<SyncState>, StoreError>;
    fn save(&self, state: &SyncState) -> Result<(), StoreError>;
}

/// JSON file persistence with a tmp-rename write.
pub struct FsStateStore {
    path: PathBuf,
}

impl FsStateStore {
    /// Keeps the blob at `<data_dir>/data_sync_state.json`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = data_dir.into();
        fs::create_dir_all(&dir).map_err(StoreError::blob_io)?;
        Ok(Self {
            path: dir.join("data_sync_state.json"),
        })
    }
}

impl StateStore for FsStateStore {
    fn load(&self) -> Result<Option<SyncState>, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::blob_io(err)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|_| StoreError::CorruptValue(self.path.display().to_string()))
    }

    fn save(&self, state: &SyncState) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(state).map_err(StoreError::backend)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &raw).map_err(StoreError::blob_io)?;
        fs::rename(&tmp, &self.path).map_err(StoreError::blob_io)
    }
}

/// In-memory persistence for tests.
#[derive(Default)]
pub struct MemStateStore {
    state: RwLock<Option<SyncState>>,
}

impl MemStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemStateStore {
    fn load(&self) -> Result<Option<SyncState>, StoreError> {
        Ok(self.state.read().clone())
    }

    fn save(&self, state: &SyncState) -> Result<(), StoreError> {
        *self.state.write() = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BlockEntry;
    use crate::test_utils::temp_dir;
    use alloy_primitives::B256;

    #[test]
    fn state_blob_roundtrips_through_the_filesystem() {
        let dir = temp_dir("state");
        let store = FsStateStore::open(&dir).expect("open");
        assert!(store.load().unwrap().is_none());

        let mut state = SyncState::default();
        state.sync_record.add(10, 4);
        state.block_index.push(BlockEntry {
            hash: B256::from([1u8; 32]),
            weave_size: 10,
            tx_root: B256::from([2u8; 32]),
        });

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));

        let _ = fs::remove_dir_all(&dir);
    }
}
