//! The engine actor and the lock-free read paths.

use crate::chain::BlockIndex;
use crate::config::{Clock, SyncConfig};
use crate::error::SyncError;
use crate::intervals::IntervalSet;
use crate::metrics::{coverage_ratio, lag_bytes};
use crate::p2p::{ChunkData, PeerId, PeerRecords, PeerTransport};
use crate::proof::{data_path_hash, validate_chunk_proof, validate_data_path, MerkleProvider};
use crate::storage::blobs::ChunkBlobStore;
use crate::storage::{
    cyclic_next, decode_json, disk_pool_chunk_key, get_json, offset_from_key, offset_key, put_json,
    split_disk_pool_chunk_key, BlockStartEntry, ChunkEntry, DataDb, DataRootKey,
    DataRootPlacements, DiskPoolChunkEntry, TxEntry,
};
use crate::sync::disk_pool::DiskPool;
use crate::sync::state::{StateStore, SyncState};
use crate::sync::{ChunkSubmission, DataSyncHandle, Message, SyncDeps};
use alloy_primitives::{Bytes, B256};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared, actor-free read paths over the chunk and block-offset columns.
///
/// Safe to call from any thread; relies only on the atomicity of the
/// store's `get_next`/`get_prev`.
#[derive(Clone)]
pub struct SyncReader {
    chunks_index: Arc<dyn crate::storage::KvStore>,
    data_root_offset_index: Arc<dyn crate::storage::KvStore>,
    blobs: Arc<dyn ChunkBlobStore>,
}

impl SyncReader {
    /// Returns the chunk covering `offset` (left-exclusive) with its proofs.
    pub fn get_chunk(&self, offset: u64) -> Result<ChunkData, SyncError> {
        let (key, raw) = self
            .chunks_index
            .get_next(&offset_key(offset))?
            .ok_or(SyncError::ChunkNotFound)?;
        let end = offset_from_key(&key).ok_or(SyncError::ChunkNotFound)?;
        let entry: ChunkEntry = decode_json(&key, &raw)?;
        if end - entry.chunk_size >= offset {
            return Err(SyncError::ChunkNotFound);
        }
        let (chunk, data_path) = self
            .blobs
            .read(entry.data_path_hash)?
            .ok_or(SyncError::FailedToReadChunk)?;
        Ok(ChunkData {
            chunk,
            tx_path: entry.tx_path,
            data_path,
        })
    }

    /// Returns `(tx_root, block_start, block_size)` for the block containing
    /// `offset`.
    pub fn get_tx_root(&self, offset: u64) -> Result<(B256, u64, u64), SyncError> {
        let (key, raw) = self
            .data_root_offset_index
            .get_prev(&offset_key(offset))?
            .ok_or(SyncError::NotFound)?;
        let block_start = offset_from_key(&key).ok_or(SyncError::NotFound)?;
        let entry: BlockStartEntry = decode_json(&key, &raw)?;
        Ok((entry.tx_root, block_start, entry.block_size))
    }
}

/// Spawns the engine actor.
pub struct DataSync;

impl DataSync {
    /// Restores persisted state, spawns the actor task, and returns the
    /// host handle.
    pub fn spawn(config: SyncConfig, deps: SyncDeps) -> Result<DataSyncHandle, SyncError> {
        let state = deps.state_store.load()?.unwrap_or_default();
        let (tx, rx) = mpsc::channel(config.mailbox_capacity);
        let reader = SyncReader {
            chunks_index: deps.db.chunks_index.clone(),
            data_root_offset_index: deps.db.data_root_offset_index.clone(),
            blobs: deps.blobs.clone(),
        };
        let handle = DataSyncHandle::new(tx.clone(), reader, config.call_timeout);
        let engine = SyncEngine::new(config, deps, state, tx);
        tokio::spawn(engine.run(rx));
        Ok(handle)
    }
}

enum Flow {
    Continue,
    Stop,
}

pub(super) struct SyncEngine {
    pub(super) config: SyncConfig,
    pub(super) db: DataDb,
    pub(super) blobs: Arc<dyn ChunkBlobStore>,
    pub(super) merkle: Arc<dyn MerkleProvider>,
    pub(super) transport: Arc<dyn PeerTransport>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) state_store: Arc<dyn StateStore>,
    pub(super) tx: mpsc::Sender<Message>,
    pub(super) rng: StdRng,
    pub(super) joined: bool,
    pub(super) weave_size: u64,
    pub(super) sync_record: IntervalSet,
    pub(super) block_index: BlockIndex,
    pub(super) disk_pool: DiskPool,
    pub(super) peers: PeerRecords,
    pub(super) fetch_in_flight: bool,
    pub(super) sync_scheduled: bool,
    pub(super) missing_cursor: u64,
    pub(super) disk_pool_cursor: Option<Vec<u8>>,
}

/// Parameters of one chunks-index update.
pub(super) struct ChunkIndexUpdate {
    pub absolute_end: u64,
    pub chunk_rel_end: u64,
    pub data_path_hash: B256,
    pub tx_root: B256,
    pub data_root: B256,
    pub tx_path: Bytes,
    pub chunk_size: u64,
    pub tx_size: u64,
}

impl SyncEngine {
    pub(super) fn new(
        config: SyncConfig,
        deps: SyncDeps,
        state: crate::sync::state::SyncState,
        tx: mpsc::Sender<Message>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let weave_size = state.block_index.last().map(|e| e.weave_size).unwrap_or(0);
        let joined = !state.block_index.is_empty();
        SyncEngine {
            config,
            db: deps.db,
            blobs: deps.blobs,
            merkle: deps.merkle,
            transport: deps.transport,
            clock: deps.clock,
            state_store: deps.state_store,
            tx,
            rng,
            joined,
            weave_size,
            sync_record: state.sync_record,
            block_index: state.block_index,
            disk_pool: state.disk_pool,
            peers: PeerRecords::new(),
            fetch_in_flight: false,
            sync_scheduled: false,
            missing_cursor: 0,
            disk_pool_cursor: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Message>) {
        self.schedule(Message::PeerRefreshTick, Duration::ZERO);
        self.schedule(Message::DiskPoolTick, self.config.disk_pool_scan_frequency);
        self.schedule(
            Message::ExpireTick,
            self.config.remove_expired_data_roots_frequency,
        );
        self.schedule_sync(Duration::ZERO);
        while let Some(message) = rx.recv().await {
            match self.handle(message) {
                Flow::Continue => {}
                Flow::Stop => break,
            }
        }
        info!("sync engine stopped");
    }

    fn handle(&mut self, message: Message) -> Flow {
        match message {
            Message::Join { block_index, reply } => {
                let result = self.join(block_index);
                let fatal = matches!(result, Err(SyncError::FatalJoinNoIntersection));
                let _ = reply.send(result);
                if fatal {
                    warn!("no intersection with joined block index, aborting");
                    return Flow::Stop;
                }
            }
            Message::AddTipBlock {
                block_txs,
                block_index,
                reply,
            } => {
                let result = self.add_tip_block(block_txs, block_index);
                let fatal = matches!(result, Err(SyncError::FatalJoinNoIntersection));
                let _ = reply.send(result);
                if fatal {
                    warn!("tip block shares no ancestor with local index, aborting");
                    return Flow::Stop;
                }
            }
            Message::AddBlock { block, txs, reply } => {
                let _ = reply.send(self.add_block(block, txs));
            }
            Message::AddChunk {
                submission,
                valid_until,
                reply,
            } => {
                if std::time::Instant::now() >= valid_until {
                    let _ = reply.send(Err(SyncError::TimedOut));
                } else {
                    let _ = reply.send(self.add_chunk(submission));
                }
            }
            Message::AddDataRootToDiskPool {
                data_root,
                tx_size,
                tx_id,
            } => {
                let key = DataRootKey { data_root, tx_size };
                self.disk_pool.add_tx(key, tx_id, self.clock.now_us());
            }
            Message::MaybeDropDataRootFromDiskPool {
                data_root,
                tx_size,
                tx_id,
            } => {
                let key = DataRootKey { data_root, tx_size };
                self.disk_pool.maybe_drop_tx(&key, &tx_id);
            }
            Message::GetTxData { tx_id, reply } => {
                let _ = reply.send(self.get_tx_data(tx_id));
            }
            Message::GetTxOffset { tx_id, reply } => {
                let _ = reply.send(self.get_tx_offset(tx_id));
            }
            Message::GetSyncRecordBin { reply } => {
                let limit = self.config.max_shared_intervals;
                let _ = reply.send(self.sync_record.serialize_bin(limit, &mut self.rng));
            }
            Message::GetSyncRecordJson { reply } => {
                let limit = self.config.max_shared_intervals;
                let _ = reply.send(self.sync_record.serialize_json(limit, &mut self.rng));
            }
            Message::Shutdown { reply } => {
                if let Err(err) = self.save_state() {
                    warn!(error = %err, "failed to flush state on shutdown");
                }
                let _ = reply.send(());
                return Flow::Stop;
            }
            Message::SyncTick => self.sync_tick(),
            Message::PeerRefreshTick => self.peer_refresh_tick(),
            Message::DiskPoolTick => self.disk_pool_tick(),
            Message::ExpireTick => self.expire_tick(),
            Message::Compact => self.compact_sync_record(),
            Message::PeerRecordsFetched { records } => {
                debug!(peers = records.len(), "peer sync records refreshed");
                self.peers.replace(records);
                self.schedule_sync(Duration::ZERO);
            }
            Message::ChunkFetched {
                peer,
                left,
                right,
                data,
            } => {
                self.fetch_in_flight = false;
                match self.store_fetched_chunk(&peer, left, &data) {
                    Ok(Some(next_left)) if next_left < right => {
                        self.spawn_fetch(peer, next_left, right);
                    }
                    Ok(_) => self.schedule_sync(Duration::ZERO),
                    Err(err) => {
                        debug!(peer = %peer, error = %err, "failed to store fetched chunk");
                        self.schedule_sync(Duration::ZERO);
                    }
                }
            }
            Message::FetchFailed { peer } => {
                self.fetch_in_flight = false;
                self.peers.mark_failed(&peer);
                self.schedule_sync(Duration::ZERO);
            }
        }
        Flow::Continue
    }

    pub(super) fn schedule(&self, message: Message, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(message).await;
        });
    }

    pub(super) fn schedule_sync(&mut self, delay: Duration) {
        if self.sync_scheduled {
            return;
        }
        self.sync_scheduled = true;
        self.schedule(Message::SyncTick, delay);
    }

    // Periodic task: pick a target interval and fetch it chunk by chunk.
    fn sync_tick(&mut self) {
        self.sync_scheduled = false;
        if !self.joined || self.fetch_in_flight {
            return;
        }
        if self.blobs.free_space() <= self.config.disk_data_buffer {
            self.schedule_sync(self.config.disk_space_check_frequency);
            return;
        }
        if let Some((peer, left, right)) = self.pick_sync_target() {
            self.spawn_fetch(peer, left, right);
            return;
        }
        match self.pick_missing_target() {
            Ok(Some((peer, byte))) => {
                self.spawn_fetch(peer, byte - 1, byte);
            }
            Ok(None) => self.schedule_sync(self.config.scan_missing_chunks_frequency),
            Err(err) => {
                warn!(error = %err, "missing-chunk scan failed");
                self.schedule_sync(self.config.scan_missing_chunks_frequency);
            }
        }
    }

    /// Picks the first peer advertising bytes this node is missing and a
    /// random sub-interval of what it offers.
    fn pick_sync_target(&mut self) -> Option<(PeerId, u64, u64)> {
        let window = (self.weave_size / self.config.max_shared_intervals.max(1)).max(1);
        for (peer, record) in self.peers.iter_active() {
            let mut clipped = record.clone();
            clipped.cut(self.weave_size);
            let candidates = self.sync_record.outerjoin(&clipped);
            let total = candidates.sum();
            if total == 0 {
                continue;
            }
            let r = self.rng.gen_range(0..total);
            let Ok((l, byte, rr)) = candidates.nth_inner_point(r) else {
                continue;
            };
            let left = l.max(byte.saturating_sub(window / 2));
            let right = rr.min(left + window);
            return Some((peer.clone(), left, right));
        }
        None
    }

    /// Advances the missing-chunks cursor by one byte and finds a peer that
    /// claims to hold it.
    fn pick_missing_target(&mut self) -> Result<Option<(PeerId, u64)>, SyncError> {
        let cursor_key = offset_key(self.missing_cursor);
        let Some((key, raw, wrapped)) =
            cyclic_next(self.db.missing_chunks_index.as_ref(), Some(&cursor_key))?
        else {
            return Ok(None);
        };
        let Some(end) = offset_from_key(&key) else {
            return Ok(None);
        };
        let start: u64 = decode_json(&key, &raw)?;
        let byte = if wrapped {
            start + 1
        } else {
            (start + 1).max(self.missing_cursor + 1)
        };
        let byte = byte.min(end);
        self.missing_cursor = byte;
        Ok(self.peers.find_covering(byte).cloned().map(|p| (p, byte)))
    }

    fn spawn_fetch(&mut self, peer: PeerId, left: u64, right: u64) {
        self.fetch_in_flight = true;
        let transport = self.transport.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            match transport.get_chunk(&peer, left + 1).await {
                Ok(data) => {
                    let _ = tx
                        .send(Message::ChunkFetched {
                            peer,
                            left,
                            right,
                            data,
                        })
                        .await;
                }
                Err(err) => {
                    debug!(peer = %peer, offset = left + 1, error = %err, "chunk fetch failed");
                    let _ = tx.send(Message::FetchFailed { peer }).await;
                }
            }
        });
    }

    /// Validates and persists a fetched chunk; returns the absolute end
    /// offset to continue the interval from, or `None` to stop.
    fn store_fetched_chunk(
        &mut self,
        peer: &PeerId,
        left: u64,
        data: &ChunkData,
    ) -> Result<Option<u64>, SyncError> {
        if !self.joined {
            return Ok(None);
        }
        if data.data_path.is_empty() || data.data_path.len() > data.chunk.len() {
            debug!(peer = %peer, "unattractive chunk proof ratio, dropping peer");
            self.peers.remove(peer);
            return Ok(None);
        }
        let Some((key, raw)) = self.db.data_root_offset_index.get_prev(&offset_key(left))? else {
            return Ok(None);
        };
        let Some(block_start) = offset_from_key(&key) else {
            return Ok(None);
        };
        let mut block_entry: BlockStartEntry = decode_json(&key, &raw)?;
        if left >= block_start + block_entry.block_size {
            // Stale result from before a reorg.
            return Ok(None);
        }
        let offset_in_block = left - block_start;
        let Some(info) = validate_chunk_proof(
            self.merkle.as_ref(),
            block_entry.tx_root,
            &data.tx_path,
            &data.data_path,
            offset_in_block,
            &data.chunk,
            block_entry.block_size,
            self.config.data_chunk_size,
        ) else {
            warn!(peer = %peer, offset = left, "invalid chunk proof, dropping peer");
            self.peers.remove(peer);
            return Ok(None);
        };
        let root_key = DataRootKey {
            data_root: info.data_root,
            tx_size: info.tx_size,
        };
        if !block_entry.data_root_keys.contains(&root_key) {
            block_entry.data_root_keys.insert(root_key);
            put_json(
                self.db.data_root_offset_index.as_ref(),
                &key,
                &block_entry,
            )?;
        }
        let absolute_tx_start = block_start + info.tx_start;
        let encoded = root_key.encode();
        let mut placements: DataRootPlacements =
            get_json(self.db.data_root_index.as_ref(), &encoded)?.unwrap_or_default();
        placements
            .entry(block_entry.tx_root)
            .or_default()
            .insert(absolute_tx_start, data.tx_path.clone());
        put_json(self.db.data_root_index.as_ref(), &encoded, &placements)?;

        let absolute_end = absolute_tx_start + info.chunk_end;
        let updated = self.update_chunks_index(ChunkIndexUpdate {
            absolute_end,
            chunk_rel_end: info.chunk_end,
            data_path_hash: data_path_hash(&data.data_path),
            tx_root: block_entry.tx_root,
            data_root: info.data_root,
            tx_path: data.tx_path.clone(),
            chunk_size: data.chunk.len() as u64,
            tx_size: info.tx_size,
        })?;
        if updated {
            self.blobs
                .write(data_path_hash(&data.data_path), &data.chunk, &data.data_path)?;
        }
        Ok(Some(absolute_end))
    }

    /// Records a chunk under the chunks index and the sync record.
    /// Returns false when the chunk is already present.
    pub(super) fn update_chunks_index(
        &mut self,
        update: ChunkIndexUpdate,
    ) -> Result<bool, SyncError> {
        let end_key = offset_key(update.absolute_end);
        let chunk_is_new = !self.sync_record.is_inside(update.absolute_end)
            || self.db.chunks_index.get(&end_key)?.is_none();
        if !chunk_is_new {
            return Ok(false);
        }
        put_json(
            self.db.chunks_index.as_ref(),
            &end_key,
            &ChunkEntry {
                data_path_hash: update.data_path_hash,
                tx_root: update.tx_root,
                data_root: update.data_root,
                tx_path: update.tx_path,
                chunk_rel_end: update.chunk_rel_end,
                chunk_size: update.chunk_size,
            },
        )?;
        let root_key = DataRootKey {
            data_root: update.data_root,
            tx_size: update.tx_size,
        };
        if let Some(entry) = self.disk_pool.get(&root_key) {
            let pool_key = disk_pool_chunk_key(entry.timestamp_us, update.data_path_hash);
            if self.db.disk_pool_chunks_index.get(&pool_key)?.is_none() {
                put_json(
                    self.db.disk_pool_chunks_index.as_ref(),
                    &pool_key,
                    &DiskPoolChunkEntry {
                        chunk_rel_end: update.chunk_rel_end,
                        chunk_size: update.chunk_size,
                        data_root: update.data_root,
                        tx_size: update.tx_size,
                    },
                )?;
            }
        }
        self.sync_record
            .add(update.absolute_end, update.absolute_end - update.chunk_size);
        if self.sync_record.count()
            > self.config.max_shared_intervals + self.config.extra_before_compaction
        {
            self.schedule(Message::Compact, Duration::ZERO);
        }
        Ok(true)
    }

    /// Admission of a user-submitted chunk.
    fn add_chunk(&mut self, sub: ChunkSubmission) -> Result<(), SyncError> {
        if self.blobs.free_space() <= self.config.disk_data_buffer {
            return Err(SyncError::DiskFull);
        }
        let chunk_size = sub.chunk.len() as u64;
        let root_key = DataRootKey {
            data_root: sub.data_root,
            tx_size: sub.tx_size,
        };
        let encoded = root_key.encode();
        let placements: Option<DataRootPlacements> =
            get_json(self.db.data_root_index.as_ref(), &encoded)?;
        if let Some(placements) = placements {
            let chunk_end = validate_data_path(
                self.merkle.as_ref(),
                sub.data_root,
                sub.offset,
                sub.tx_size,
                &sub.data_path,
                &sub.chunk,
                self.config.data_chunk_size,
            )
            .ok_or(SyncError::InvalidProof)?;
            let hash = data_path_hash(&sub.data_path);
            let mut updated_any = false;
            for (tx_root, starts) in &placements {
                for (abs_tx_start, tx_path) in starts {
                    let updated = self.update_chunks_index(ChunkIndexUpdate {
                        absolute_end: abs_tx_start + chunk_end,
                        chunk_rel_end: chunk_end,
                        data_path_hash: hash,
                        tx_root: *tx_root,
                        data_root: sub.data_root,
                        tx_path: tx_path.clone(),
                        chunk_size,
                        tx_size: sub.tx_size,
                    })?;
                    updated_any |= updated;
                }
            }
            if updated_any {
                self.blobs.write(hash, &sub.chunk, &sub.data_path)?;
            }
            Ok(())
        } else if self.disk_pool.contains(&root_key) {
            self.disk_pool.check_admission(
                &root_key,
                chunk_size,
                self.config.max_disk_pool_data_root_buffer,
                self.config.max_disk_pool_buffer,
            )?;
            let chunk_end = validate_data_path(
                self.merkle.as_ref(),
                sub.data_root,
                sub.offset,
                sub.tx_size,
                &sub.data_path,
                &sub.chunk,
                self.config.data_chunk_size,
            )
            .ok_or(SyncError::InvalidProof)?;
            let hash = data_path_hash(&sub.data_path);
            let timestamp_us = self
                .disk_pool
                .get(&root_key)
                .map(|e| e.timestamp_us)
                .unwrap_or(0);
            let pool_key = disk_pool_chunk_key(timestamp_us, hash);
            if self.db.disk_pool_chunks_index.get(&pool_key)?.is_none() {
                put_json(
                    self.db.disk_pool_chunks_index.as_ref(),
                    &pool_key,
                    &DiskPoolChunkEntry {
                        chunk_rel_end: chunk_end,
                        chunk_size,
                        data_root: sub.data_root,
                        tx_size: sub.tx_size,
                    },
                )?;
                self.blobs.write(hash, &sub.chunk, &sub.data_path)?;
                self.disk_pool.record_admitted(&root_key, chunk_size);
            }
            Ok(())
        } else {
            Err(SyncError::DataRootNotFound)
        }
    }

    // Periodic task: refresh peer sync records from a shuffled sample.
    fn peer_refresh_tick(&mut self) {
        let mut sample = self
            .transport
            .peer_sample(self.config.pick_peers_out_of_random_n);
        sample.shuffle(&mut self.rng);
        sample.truncate(self.config.consult_peer_records_count);
        let transport = self.transport.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut records = HashMap::new();
            for peer in sample {
                match transport.get_sync_record(&peer).await {
                    Ok(record) => {
                        records.insert(peer, record);
                    }
                    Err(err) => {
                        debug!(peer = %peer, error = %err, "sync record fetch failed");
                    }
                }
            }
            let _ = tx.send(Message::PeerRecordsFetched { records }).await;
        });
        self.schedule(
            Message::PeerRefreshTick,
            self.config.peer_sync_records_frequency,
        );
    }

    // Periodic task: process one pending disk-pool chunk.
    fn disk_pool_tick(&mut self) {
        if self.blobs.free_space() <= self.config.disk_data_buffer {
            self.schedule(Message::DiskPoolTick, self.config.disk_space_check_frequency);
            return;
        }
        match self.disk_pool_step() {
            Ok(more) => {
                let delay = if more {
                    Duration::ZERO
                } else {
                    self.config.disk_pool_scan_frequency
                };
                self.schedule(Message::DiskPoolTick, delay);
            }
            Err(err) => {
                warn!(error = %err, "disk pool scan failed");
                self.schedule(
                    Message::DiskPoolTick,
                    self.config.disk_pool_scan_frequency,
                );
            }
        }
    }

    /// One disk-pool cursor step; returns whether the scan should continue
    /// promptly (false once the cursor wrapped or the column is empty).
    fn disk_pool_step(&mut self) -> Result<bool, SyncError> {
        let Some((key, raw, wrapped)) = cyclic_next(
            self.db.disk_pool_chunks_index.as_ref(),
            self.disk_pool_cursor.as_deref(),
        )?
        else {
            return Ok(false);
        };
        let Some((timestamp_us, hash)) = split_disk_pool_chunk_key(&key) else {
            self.disk_pool_cursor = Some(key);
            return Ok(!wrapped);
        };
        let entry: DiskPoolChunkEntry = decode_json(&key, &raw)?;
        let root_key = DataRootKey {
            data_root: entry.data_root,
            tx_size: entry.tx_size,
        };
        let placements: Option<DataRootPlacements> =
            get_json(self.db.data_root_index.as_ref(), &root_key.encode())?;
        let in_pool = self.disk_pool.contains(&root_key);
        match (placements, in_pool) {
            (None, true) => {
                // Still unconfirmed: skip the rest of this data root's chunks
                // by jumping to the next timestamp.
                self.disk_pool_cursor = Some(disk_pool_chunk_key(timestamp_us + 1, B256::ZERO));
            }
            (None, false) => {
                self.db.disk_pool_chunks_index.delete(&key)?;
                self.blobs.delete(hash)?;
                debug!(data_root = %entry.data_root, "expired disk-pool chunk removed");
                self.disk_pool_cursor = Some(key);
            }
            (Some(placements), _) => {
                for (tx_root, starts) in &placements {
                    for (abs_tx_start, tx_path) in starts {
                        self.update_chunks_index(ChunkIndexUpdate {
                            absolute_end: abs_tx_start + entry.chunk_rel_end,
                            chunk_rel_end: entry.chunk_rel_end,
                            data_path_hash: hash,
                            tx_root: *tx_root,
                            data_root: entry.data_root,
                            tx_path: tx_path.clone(),
                            chunk_size: entry.chunk_size,
                            tx_size: entry.tx_size,
                        })?;
                    }
                }
                if !in_pool {
                    self.db.disk_pool_chunks_index.delete(&key)?;
                }
                self.disk_pool_cursor = Some(key);
            }
        }
        Ok(!wrapped)
    }

    // Periodic task: sweep expired disk-pool data roots.
    fn expire_tick(&mut self) {
        let expiration_us = self.config.disk_pool_data_root_expiration.as_micros() as u64;
        let removed = self.disk_pool.expire(self.clock.now_us(), expiration_us);
        if removed > 0 {
            info!(removed, pool_size = self.disk_pool.size(), "expired disk-pool data roots");
        }
        self.schedule(
            Message::ExpireTick,
            self.config.remove_expired_data_roots_frequency,
        );
    }

    /// Fuses the sync record down to the shared-interval cap, remembering the
    /// absorbed gaps as known false positives.
    fn compact_sync_record(&mut self) {
        let gaps = self.sync_record.compact(self.config.max_shared_intervals);
        if gaps.is_empty() {
            return;
        }
        for &(end, start) in &gaps {
            if let Err(err) = put_json(
                self.db.missing_chunks_index.as_ref(),
                &offset_key(end),
                &start,
            ) {
                warn!(error = %err, "failed to record compacted gap");
            }
        }
        if let Some(&(_, start)) = gaps.first() {
            self.missing_cursor = start;
        }
        debug!(
            gaps = gaps.len(),
            intervals = self.sync_record.count(),
            "sync record compacted"
        );
    }

    fn get_tx_offset(&self, tx_id: B256) -> Result<TxEntry, SyncError> {
        get_json(self.db.tx_index.as_ref(), tx_id.as_slice())?.ok_or(SyncError::NotFound)
    }

    /// Reassembles a transaction's bytes from its chunks.
    fn get_tx_data(&self, tx_id: B256) -> Result<Bytes, SyncError> {
        let entry = self.get_tx_offset(tx_id)?;
        if entry.tx_size > self.config.max_served_tx_data_size {
            return Err(SyncError::TxDataTooBig);
        }
        if entry.tx_size == 0 {
            return Ok(Bytes::new());
        }
        let tx_start = entry.tx_end - entry.tx_size;
        let mut data = Vec::with_capacity(entry.tx_size as usize);
        let mut cursor = tx_start;
        while cursor < entry.tx_end {
            let (key, raw) = self
                .db
                .chunks_index
                .get_next(&offset_key(cursor + 1))?
                .ok_or(SyncError::ChunkNotFound)?;
            let end = offset_from_key(&key).ok_or(SyncError::ChunkNotFound)?;
            let chunk_entry: ChunkEntry = decode_json(&key, &raw)?;
            let start = end - chunk_entry.chunk_size;
            if start > cursor {
                return Err(SyncError::ChunkNotFound);
            }
            let (chunk, _) = self
                .blobs
                .read(chunk_entry.data_path_hash)?
                .ok_or(SyncError::FailedToReadChunk)?;
            let from = (cursor - start) as usize;
            let to = (end.min(entry.tx_end) - start) as usize;
            if to > chunk.len() {
                return Err(SyncError::FailedToReadChunk);
            }
            data.extend_from_slice(&chunk[from..to]);
            cursor = end;
        }
        Ok(Bytes::from(data))
    }

    pub(super) fn save_state(&self) -> Result<(), SyncError> {
        self.state_store.save(&SyncState {
            sync_record: self.sync_record.clone(),
            block_index: self.block_index.clone(),
            disk_pool: self.disk_pool.clone(),
        })?;
        Ok(())
    }

    pub(super) fn log_coverage(&self, context: &'static str) {
        let synced = self.sync_record.sum();
        info!(
            weave_size = self.weave_size,
            synced,
            coverage = ?coverage_ratio(synced, self.weave_size),
            lag_bytes = lag_bytes(self.weave_size, synced),
            context,
            "sync record updated"
        );
    }
}
