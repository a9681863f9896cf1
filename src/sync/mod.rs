//! The sync engine: a single actor owning the sync record and every index,
//! plus the host-facing handle.
//!
//! All state mutation flows through the actor's mailbox. Casts are
//! fire-and-forget enqueues; calls enqueue a `oneshot` reply and await it.
//! Network fetches run on short-lived workers that post their results back as
//! messages, so the actor itself never blocks on I/O.

pub mod disk_pool;
pub mod engine;
pub mod reorg;
pub mod state;

pub use engine::{DataSync, SyncReader};

use crate::chain::BlockIndex;
use crate::config::Clock;
use crate::error::SyncError;
use crate::intervals::IntervalSet;
use crate::p2p::{ChunkData, PeerId, PeerTransport};
use crate::proof::{MerkleProvider, SizeTaggedTx};
use crate::storage::blobs::ChunkBlobStore;
use crate::storage::{DataDb, TxEntry};
use alloy_primitives::{Bytes, B256};
use state::StateStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Host collaborators wired into the engine at spawn.
#[derive(Clone)]
pub struct SyncDeps {
    pub db: DataDb,
    pub blobs: Arc<dyn ChunkBlobStore>,
    pub merkle: Arc<dyn MerkleProvider>,
    pub transport: Arc<dyn PeerTransport>,
    pub clock: Arc<dyn Clock>,
    pub state_store: Arc<dyn StateStore>,
}

/// A user-submitted chunk with its data path.
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub data_root: B256,
    pub data_path: Bytes,
    pub chunk: Bytes,
    /// The offset within the transaction that the data path proves.
    pub offset: u64,
    pub tx_size: u64,
}

/// Mailbox protocol of the engine actor.
pub(crate) enum Message {
    Join {
        block_index: BlockIndex,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    AddTipBlock {
        block_txs: Vec<(B256, Vec<SizeTaggedTx>)>,
        block_index: BlockIndex,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    AddBlock {
        block: crate::chain::BlockEntry,
        txs: Vec<SizeTaggedTx>,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    AddChunk {
        submission: ChunkSubmission,
        /// Admission is skipped entirely if the actor dequeues the message
        /// after this instant.
        valid_until: std::time::Instant,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    AddDataRootToDiskPool {
        data_root: B256,
        tx_size: u64,
        tx_id: B256,
    },
    MaybeDropDataRootFromDiskPool {
        data_root: B256,
        tx_size: u64,
        tx_id: B256,
    },
    GetTxData {
        tx_id: B256,
        reply: oneshot::Sender<Result<Bytes, SyncError>>,
    },
    GetTxOffset {
        tx_id: B256,
        reply: oneshot::Sender<Result<TxEntry, SyncError>>,
    },
    GetSyncRecordBin {
        reply: oneshot::Sender<Vec<u8>>,
    },
    GetSyncRecordJson {
        reply: oneshot::Sender<serde_json::Value>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    // Periodic self-scheduled ticks.
    SyncTick,
    PeerRefreshTick,
    DiskPoolTick,
    ExpireTick,
    Compact,
    // Worker results.
    PeerRecordsFetched {
        records: HashMap<PeerId, IntervalSet>,
    },
    ChunkFetched {
        peer: PeerId,
        left: u64,
        right: u64,
        data: ChunkData,
    },
    FetchFailed {
        peer: PeerId,
    },
}

/// Cloneable host-facing handle to a running engine.
#[derive(Clone)]
pub struct DataSyncHandle {
    pub(crate) tx: mpsc::Sender<Message>,
    reader: SyncReader,
    call_timeout: Duration,
}

impl DataSyncHandle {
    pub(crate) fn new(tx: mpsc::Sender<Message>, reader: SyncReader, call_timeout: Duration) -> Self {
        Self {
            tx,
            reader,
            call_timeout,
        }
    }

    async fn call<T>(&self, message: Message, reply: oneshot::Receiver<T>) -> Result<T, SyncError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| SyncError::NotJoined)?;
        reply.await.map_err(|_| SyncError::NotJoined)
    }

    async fn cast(&self, message: Message) {
        let _ = self.tx.send(message).await;
    }

    /// Joins the engine to a block index, seeding or reorganising the
    /// offset indices.
    pub async fn join(&self, block_index: BlockIndex) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.call(
            Message::Join {
                block_index,
                reply: tx,
            },
            rx,
        )
        .await?
    }

    /// Applies a newly announced tip block: reorganises if needed and indexes
    /// the new transactions.
    pub async fn add_tip_block(
        &self,
        block_txs: Vec<(B256, Vec<SizeTaggedTx>)>,
        block_index: BlockIndex,
    ) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.call(
            Message::AddTipBlock {
                block_txs,
                block_index,
                reply: tx,
            },
            rx,
        )
        .await?
    }

    /// Indexes a historical block's transactions so its weave range becomes
    /// syncable.
    pub async fn add_block(
        &self,
        block: crate::chain::BlockEntry,
        txs: Vec<SizeTaggedTx>,
    ) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.call(Message::AddBlock { block, txs, reply: tx }, rx).await?
    }

    /// Submits a chunk for admission with the default deadline.
    pub async fn add_chunk(&self, submission: ChunkSubmission) -> Result<(), SyncError> {
        self.add_chunk_with_timeout(submission, self.call_timeout)
            .await
    }

    /// Submits a chunk for admission; exceeding `deadline` returns
    /// [`SyncError::TimedOut`] without affecting engine state.
    pub async fn add_chunk_with_timeout(
        &self,
        submission: ChunkSubmission,
        deadline: Duration,
    ) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        let call = self.call(
            Message::AddChunk {
                submission,
                valid_until: std::time::Instant::now() + deadline,
                reply: tx,
            },
            rx,
        );
        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result?,
            Err(_) => Err(SyncError::TimedOut),
        }
    }

    /// Registers a mempool data root so its chunks can be admitted ahead of
    /// confirmation.
    pub async fn add_data_root_to_disk_pool(&self, data_root: B256, tx_size: u64, tx_id: B256) {
        self.cast(Message::AddDataRootToDiskPool {
            data_root,
            tx_size,
            tx_id,
        })
        .await;
    }

    /// Unregisters a dropped mempool transaction from its data root.
    pub async fn maybe_drop_data_root_from_disk_pool(
        &self,
        data_root: B256,
        tx_size: u64,
        tx_id: B256,
    ) {
        self.cast(Message::MaybeDropDataRootFromDiskPool {
            data_root,
            tx_size,
            tx_id,
        })
        .await;
    }

    /// Reassembles a transaction's data from its chunks.
    pub async fn get_tx_data(&self, tx_id: B256) -> Result<Bytes, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.call(Message::GetTxData { tx_id, reply: tx }, rx).await?
    }

    /// End offset and size of a transaction.
    pub async fn get_tx_offset(&self, tx_id: B256) -> Result<TxEntry, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.call(Message::GetTxOffset { tx_id, reply: tx }, rx)
            .await?
    }

    /// Binary sync record, capped at the shared-interval limit.
    pub async fn get_sync_record_bin(&self) -> Result<Vec<u8>, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.call(Message::GetSyncRecordBin { reply: tx }, rx).await
    }

    /// JSON sync record, capped at the shared-interval limit.
    pub async fn get_sync_record_json(&self) -> Result<serde_json::Value, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.call(Message::GetSyncRecordJson { reply: tx }, rx).await
    }

    /// Lock-free read path: the chunk covering `offset` with its proofs.
    pub fn get_chunk(&self, offset: u64) -> Result<ChunkData, SyncError> {
        self.reader.get_chunk(offset)
    }

    /// Lock-free read path: `(tx_root, block_start, block_size)` at `offset`.
    pub fn get_tx_root(&self, offset: u64) -> Result<(B256, u64, u64), SyncError> {
        self.reader.get_tx_root(offset)
    }

    /// A clone of the shared read paths, usable from any thread.
    pub fn reader(&self) -> SyncReader {
        self.reader.clone()
    }

    /// Flushes state and stops the actor. In-flight workers are abandoned;
    /// their results become no-ops.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Message::Shutdown { reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }
}
