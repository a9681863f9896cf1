//! Join and chain-reorganisation handling.
//!
//! A join (or tip-block announcement) finds the offset where the local and
//! incoming block windows diverge, removes every orphaned offset above it
//! from every index, truncates the sync record, and reseeds the block-offset
//! index from the incoming tail. Data the new chain still references below
//! the cut survives untouched.

use crate::chain::{blocks_with_bounds, intersection, truncate_window, BlockEntry, BlockIndex};
use crate::error::SyncError;
use crate::proof::SizeTaggedTx;
use crate::storage::{
    decode_json, get_json, offset_key, put_json, BlockStartEntry, DataRootKey,
    DataRootPlacements, TxEntry,
};
use crate::sync::engine::SyncEngine;
use alloy_primitives::B256;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

impl SyncEngine {
    /// Joins the engine to a block index: seeds the offset indices on first
    /// join, reorganises against the current window otherwise.
    pub(super) fn join(&mut self, block_index: BlockIndex) -> Result<(), SyncError> {
        let incoming = truncate_window(block_index, self.config.track_confirmations() as usize);
        if incoming.is_empty() {
            return Err(SyncError::Invalid);
        }
        if self.block_index.is_empty() {
            for (start, entry) in blocks_with_bounds(&incoming, 0) {
                self.seed_block_entry(start, entry)?;
            }
            self.weave_size = incoming.last().map(|e| e.weave_size).unwrap_or(0);
            self.block_index = incoming;
            self.joined = true;
            self.save_state()?;
            self.log_coverage("join");
            self.schedule_sync(Duration::ZERO);
            return Ok(());
        }
        self.rejoin(incoming)?;
        self.save_state()?;
        Ok(())
    }

    /// Applies a tip-block announcement: reorganises like a join, then
    /// indexes the announced blocks' transactions.
    pub(super) fn add_tip_block(
        &mut self,
        block_txs: Vec<(B256, Vec<SizeTaggedTx>)>,
        block_index: BlockIndex,
    ) -> Result<(), SyncError> {
        if self.block_index.is_empty() {
            return Err(SyncError::NotJoined);
        }
        let incoming = truncate_window(block_index, self.config.track_confirmations() as usize);
        if incoming.is_empty() {
            return Err(SyncError::Invalid);
        }
        self.rejoin(incoming)?;
        for (hash, txs) in &block_txs {
            let Some(entry) = self.block_index.iter().find(|e| e.hash == *hash).copied() else {
                debug!(block = %hash, "announced block not in index, skipping");
                continue;
            };
            self.index_block_txs(entry, txs)?;
        }
        self.save_state()?;
        Ok(())
    }

    /// Indexes a historical block's transactions so its weave range becomes
    /// syncable and servable.
    pub(super) fn add_block(
        &mut self,
        block: BlockEntry,
        txs: Vec<SizeTaggedTx>,
    ) -> Result<(), SyncError> {
        self.index_block_txs(block, &txs)
    }

    fn rejoin(&mut self, incoming: BlockIndex) -> Result<(), SyncError> {
        let cut = intersection(&self.block_index, &incoming)
            .ok_or(SyncError::FatalJoinNoIntersection)?;
        let prev = self.weave_size;
        if cut < prev {
            self.remove_orphans(cut, prev)?;
        }
        self.sync_record.cut(cut);
        let tail: Vec<BlockEntry> = incoming
            .iter()
            .filter(|e| e.weave_size > cut)
            .copied()
            .collect();
        for (start, entry) in blocks_with_bounds(&tail, cut) {
            self.seed_block_entry(start, entry)?;
        }
        self.weave_size = incoming.last().map(|e| e.weave_size).unwrap_or(cut);
        self.block_index = incoming;
        self.joined = true;
        self.log_coverage("rejoin");
        self.schedule_sync(Duration::ZERO);
        Ok(())
    }

    fn seed_block_entry(&self, start: u64, entry: &BlockEntry) -> Result<(), SyncError> {
        put_json(
            self.db.data_root_offset_index.as_ref(),
            &offset_key(start),
            &BlockStartEntry {
                tx_root: entry.tx_root,
                block_size: entry.weave_size - start,
                data_root_keys: BTreeSet::new(),
            },
        )?;
        Ok(())
    }

    /// Writes a block's transactions into the tx, tx-offset, data-root, and
    /// block-offset indices, confirming any matching disk-pool roots.
    fn index_block_txs(&mut self, block: BlockEntry, txs: &[SizeTaggedTx]) -> Result<(), SyncError> {
        let block_size = txs.last().map(|t| t.end_offset).unwrap_or(0);
        let block_start = block
            .weave_size
            .checked_sub(block_size)
            .ok_or(SyncError::Invalid)?;
        if !txs.is_empty() && self.merkle.tx_root(txs) != block.tx_root {
            return Err(SyncError::Invalid);
        }
        let start_key = offset_key(block_start);
        let mut block_entry: BlockStartEntry =
            get_json(self.db.data_root_offset_index.as_ref(), &start_key)?.unwrap_or(
                BlockStartEntry {
                    tx_root: block.tx_root,
                    block_size,
                    data_root_keys: BTreeSet::new(),
                },
            );
        let mut prev_end = 0u64;
        for (index, tx) in txs.iter().enumerate() {
            let tx_size = tx.end_offset - prev_end;
            let abs_start = block_start + prev_end;
            let abs_end = block_start + tx.end_offset;
            put_json(
                self.db.tx_index.as_ref(),
                tx.id.as_slice(),
                &TxEntry {
                    tx_end: abs_end,
                    tx_size,
                },
            )?;
            put_json(
                self.db.tx_offset_index.as_ref(),
                &offset_key(abs_start),
                &tx.id,
            )?;
            if tx_size > 0 && tx.data_root != B256::ZERO {
                let root_key = DataRootKey {
                    data_root: tx.data_root,
                    tx_size,
                };
                block_entry.data_root_keys.insert(root_key);
                let tx_path = self.merkle.tx_path(txs, index).ok_or(SyncError::Invalid)?;
                let encoded = root_key.encode();
                let mut placements: DataRootPlacements =
                    get_json(self.db.data_root_index.as_ref(), &encoded)?.unwrap_or_default();
                placements
                    .entry(block.tx_root)
                    .or_default()
                    .insert(abs_start, tx_path);
                put_json(self.db.data_root_index.as_ref(), &encoded, &placements)?;
                self.disk_pool.confirm(&root_key);
            }
            prev_end = tx.end_offset;
        }
        put_json(self.db.data_root_offset_index.as_ref(), &start_key, &block_entry)?;
        Ok(())
    }

    /// Deletes every index entry above the cut point while keeping data-root
    /// placements the surviving chain still references.
    fn remove_orphans(&mut self, cut: u64, prev: u64) -> Result<(), SyncError> {
        let hi = offset_key(prev.saturating_add(2));

        // Chunk and missing-gap keys are end offsets: orphans live in
        // (cut, prev].
        self.db
            .chunks_index
            .delete_range(&offset_key(cut + 1), &hi)?;
        let mut straddler: Option<u64> = None;
        for (key, raw) in self
            .db
            .missing_chunks_index
            .get_range(&offset_key(cut + 1), &hi)?
        {
            let start: u64 = decode_json(&key, &raw)?;
            if start < cut {
                straddler = Some(start);
            }
        }
        self.db
            .missing_chunks_index
            .delete_range(&offset_key(cut + 1), &hi)?;
        if let Some(start) = straddler {
            put_json(self.db.missing_chunks_index.as_ref(), &offset_key(cut), &start)?;
        }

        let lo = offset_key(cut);
        for (key, raw) in self.db.tx_offset_index.get_range(&lo, &hi)? {
            let tx_id: B256 = decode_json(&key, &raw)?;
            self.db.tx_index.delete(tx_id.as_slice())?;
        }
        self.db.tx_offset_index.delete_range(&lo, &hi)?;

        let mut orphaned: BTreeSet<DataRootKey> = BTreeSet::new();
        let mut seen: BTreeSet<DataRootKey> = BTreeSet::new();
        for (key, raw) in self.db.data_root_offset_index.get_range(&lo, &hi)? {
            let entry: BlockStartEntry = decode_json(&key, &raw)?;
            for root_key in entry.data_root_keys {
                if !seen.insert(root_key) {
                    continue;
                }
                let encoded = root_key.encode();
                let Some(mut placements) =
                    get_json::<DataRootPlacements>(self.db.data_root_index.as_ref(), &encoded)?
                else {
                    continue;
                };
                for starts in placements.values_mut() {
                    starts.retain(|start, _| *start < cut);
                }
                placements.retain(|_, starts| !starts.is_empty());
                if placements.is_empty() {
                    self.db.data_root_index.delete(&encoded)?;
                    orphaned.insert(root_key);
                } else {
                    put_json(self.db.data_root_index.as_ref(), &encoded, &placements)?;
                }
            }
        }
        self.db.data_root_offset_index.delete_range(&lo, &hi)?;

        let now_us = self.clock.now_us();
        for root_key in orphaned {
            self.disk_pool.refresh_orphaned(root_key, now_us);
        }
        debug!(cut, prev, "orphaned offsets removed");
        Ok(())
    }
}
