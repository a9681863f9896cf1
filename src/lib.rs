//! Peer-to-peer chunk synchronization engine for a content-addressed,
//! append-only weave.
//!
//! The weave is a single logical byte sequence built by an ever-growing chain
//! of blocks; each block contributes a contiguous range partitioned into
//! transactions, each transaction into Merkle-provable chunks. The engine
//! progressively downloads chunks from peers, validates their inclusion
//! proofs, persists them, and advertises the byte ranges it holds so peers
//! can do the same.
//!
//! The host supplies the ordered key-value store, the blob store, the Merkle
//! routines, the peer transport, and a clock through the traits in
//! [`storage`], [`proof`], [`p2p`], and [`config`]; [`sync::DataSync::spawn`]
//! wires them into a single actor that owns all mutable state.

pub mod chain;
pub mod config;
pub mod error;
pub mod intervals;
pub mod metrics;
pub mod p2p;
pub mod proof;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub mod test_utils;

pub use chain::{BlockEntry, BlockIndex};
pub use config::{Clock, SyncConfig, SystemClock};
pub use error::{StoreError, SyncError};
pub use intervals::IntervalSet;
pub use p2p::{ChunkData, PeerId, PeerTransport, TransportError};
pub use proof::{MerkleProvider, PathCheck, SizeTaggedTx};
pub use storage::blobs::{ChunkBlobStore, FsChunkStore, MemChunkStore};
pub use storage::{DataDb, KvDatabase, KvStore, MemDb};
pub use sync::state::{FsStateStore, MemStateStore, StateStore};
pub use sync::{ChunkSubmission, DataSync, DataSyncHandle, SyncDeps, SyncReader};
