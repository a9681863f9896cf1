//! Content-addressed chunk blob storage.

use crate::error::StoreError;
use alloy_primitives::{hex, Bytes, B256};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Blob store contract: `(chunk, data_path)` pairs keyed by the data-path
/// hash, deduplicated by key.
pub trait ChunkBlobStore: Send + Sync {
    /// Persists the pair unless the key already exists.
    fn write(&self, hash: B256, chunk: &[u8], data_path: &[u8]) -> Result<(), StoreError>;
    fn read(&self, hash: B256) -> Result<Option<(Bytes, Bytes)>, StoreError>;
    fn has(&self, hash: B256) -> Result<bool, StoreError>;
    fn delete(&self, hash: B256) -> Result<(), StoreError>;
    /// Free space left for chunk data, in bytes.
    fn free_space(&self) -> u64;
}

/// Filesystem blob store: one file per hash under a two-level hex fan-out,
/// chunk and data path length-prefixed in a single file.
pub struct FsChunkStore {
    root: PathBuf,
    capacity: u64,
    used: AtomicU64,
}

impl FsChunkStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_capacity(root, u64::MAX)
    }

    /// Opens the store with a byte capacity that `free_space` reports against.
    pub fn with_capacity(root: impl Into<PathBuf>, capacity: u64) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(StoreError::blob_io)?;
        let used = dir_size(&root).map_err(StoreError::blob_io)?;
        Ok(Self {
            root,
            capacity,
            used: AtomicU64::new(used),
        })
    }

    fn blob_path(&self, hash: B256) -> PathBuf {
        let hex = hex::encode(hash);
        self.root.join(&hex[..2]).join(&hex[2..4]).join(hex)
    }
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

fn encode_pair(chunk: &[u8], data_path: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + chunk.len() + data_path.len());
    out.extend_from_slice(&(chunk.len() as u64).to_be_bytes());
    out.extend_from_slice(chunk);
    out.extend_from_slice(&(data_path.len() as u64).to_be_bytes());
    out.extend_from_slice(data_path);
    out
}

fn decode_pair(raw: &[u8]) -> Option<(Bytes, Bytes)> {
    let chunk_len = u64::from_be_bytes(raw.get(..8)?.try_into().ok()?) as usize;
    let chunk = raw.get(8..8 + chunk_len)?;
    let rest = &raw[8 + chunk_len..];
    let path_len = u64::from_be_bytes(rest.get(..8)?.try_into().ok()?) as usize;
    let data_path = rest.get(8..8 + path_len)?;
    Some((
        Bytes::copy_from_slice(chunk),
        Bytes::copy_from_slice(data_path),
    ))
}

impl ChunkBlobStore for FsChunkStore {
    fn write(&self, hash: B256, chunk: &[u8], data_path: &[u8]) -> Result<(), StoreError> {
        let path = self.blob_path(hash);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(StoreError::blob_io)?;
        }
        let raw = encode_pair(chunk, data_path);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &raw).map_err(StoreError::blob_io)?;
        fs::rename(&tmp, &path).map_err(StoreError::blob_io)?;
        self.used.fetch_add(raw.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn read(&self, hash: B256) -> Result<Option<(Bytes, Bytes)>, StoreError> {
        let path = self.blob_path(hash);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::blob_io(err)),
        };
        decode_pair(&raw)
            .map(Some)
            .ok_or_else(|| StoreError::CorruptValue(hex::encode(hash)))
    }

    fn has(&self, hash: B256) -> Result<bool, StoreError> {
        Ok(self.blob_path(hash).exists())
    }

    fn delete(&self, hash: B256) -> Result<(), StoreError> {
        let path = self.blob_path(hash);
        match fs::metadata(&path) {
            Ok(meta) => {
                fs::remove_file(&path).map_err(StoreError::blob_io)?;
                self.used.fetch_sub(meta.len().min(self.used.load(Ordering::Relaxed)), Ordering::Relaxed);
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::blob_io(err)),
        }
    }

    fn free_space(&self) -> u64 {
        self.capacity
            .saturating_sub(self.used.load(Ordering::Relaxed))
    }
}

/// In-memory blob store for tests and embedded hosts.
#[derive(Default)]
pub struct MemChunkStore {
    blobs: RwLock<HashMap<B256, (Bytes, Bytes)>>,
    capacity: Option<u64>,
}

impl MemChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl ChunkBlobStore for MemChunkStore {
    fn write(&self, hash: B256, chunk: &[u8], data_path: &[u8]) -> Result<(), StoreError> {
        self.blobs.write().entry(hash).or_insert_with(|| {
            (
                Bytes::copy_from_slice(chunk),
                Bytes::copy_from_slice(data_path),
            )
        });
        Ok(())
    }

    fn read(&self, hash: B256) -> Result<Option<(Bytes, Bytes)>, StoreError> {
        Ok(self.blobs.read().get(&hash).cloned())
    }

    fn has(&self, hash: B256) -> Result<bool, StoreError> {
        Ok(self.blobs.read().contains_key(&hash))
    }

    fn delete(&self, hash: B256) -> Result<(), StoreError> {
        self.blobs.write().remove(&hash);
        Ok(())
    }

    fn free_space(&self) -> u64 {
        match self.capacity {
            None => u64::MAX,
            Some(cap) => {
                let used: u64 = self
                    .blobs
                    .read()
                    .values()
                    .map(|(chunk, path)| (chunk.len() + path.len()) as u64)
                    .sum();
                cap.saturating_sub(used)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_dir;

    #[test]
    fn fs_store_roundtrips_and_dedups() {
        let dir = temp_dir("blobs");
        let store = FsChunkStore::open(&dir).expect("open");
        let hash = B256::from([5u8; 32]);

        store.write(hash, b"chunk-bytes", b"path-bytes").unwrap();
        // A second write under the same key is a no-op.
        store.write(hash, b"other", b"other").unwrap();

        let (chunk, data_path) = store.read(hash).unwrap().expect("blob");
        assert_eq!(chunk.as_ref(), b"chunk-bytes");
        assert_eq!(data_path.as_ref(), b"path-bytes");
        assert!(store.has(hash).unwrap());

        store.delete(hash).unwrap();
        assert!(!store.has(hash).unwrap());
        assert!(store.read(hash).unwrap().is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn fs_store_tracks_free_space() {
        let dir = temp_dir("blobs-cap");
        let store = FsChunkStore::with_capacity(&dir, 1024).expect("open");
        assert_eq!(store.free_space(), 1024);
        store
            .write(B256::from([1u8; 32]), &[0u8; 100], &[0u8; 10])
            .unwrap();
        assert!(store.free_space() < 1024);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn mem_store_respects_capacity() {
        let store = MemChunkStore::with_capacity(64);
        store.write(B256::from([1u8; 32]), &[0u8; 40], &[0u8; 8]).unwrap();
        assert_eq!(store.free_space(), 16);
    }
}
