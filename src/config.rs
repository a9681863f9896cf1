//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Peers whose sync records are consulted each refresh cycle.
pub const DEFAULT_CONSULT_PEER_RECORDS_COUNT: usize = 5;
/// Size of the random pool the consulted peers are drawn from.
pub const DEFAULT_PICK_PEERS_OUT_OF_RANDOM_N: usize = 20;
/// How often peer sync records are refreshed.
pub const DEFAULT_PEER_SYNC_RECORDS_FREQUENCY: Duration = Duration::from_secs(120);
/// Blocks the node keeps behind the current tip for reorg recovery.
pub const DEFAULT_STORE_BLOCKS_BEHIND_CURRENT: u64 = 50;
/// Hard cap on intervals kept in (and advertised from) the sync record.
pub const DEFAULT_MAX_SHARED_INTERVALS: u64 = 10_000;
/// Intervals allowed above the cap before a compaction is posted.
pub const DEFAULT_EXTRA_BEFORE_COMPACTION: u64 = 100;
/// Backoff between unproductive sync scans.
pub const DEFAULT_SCAN_MISSING_CHUNKS_FREQUENCY: Duration = Duration::from_secs(2);
/// Delay between full disk-pool promotion scans.
pub const DEFAULT_DISK_POOL_SCAN_FREQUENCY: Duration = Duration::from_secs(120);
/// How often expired disk-pool data roots are swept.
pub const DEFAULT_REMOVE_EXPIRED_DATA_ROOTS_FREQUENCY: Duration = Duration::from_secs(60);
/// Lifetime of an unconfirmed data root in the disk pool.
pub const DEFAULT_DISK_POOL_DATA_ROOT_EXPIRATION: Duration = Duration::from_secs(2 * 60 * 60);
/// Per-data-root admission buffer.
pub const DEFAULT_MAX_DISK_POOL_DATA_ROOT_BUFFER: u64 = 50 * 1024 * 1024;
/// Global disk-pool admission buffer.
pub const DEFAULT_MAX_DISK_POOL_BUFFER: u64 = 2_000 * 1024 * 1024;
/// Largest transaction served whole through `get_tx_data`.
pub const DEFAULT_MAX_SERVED_TX_DATA_SIZE: u64 = 12 * 1024 * 1024;
/// Free space that must remain before any periodic task writes.
pub const DEFAULT_DISK_DATA_BUFFER: u64 = 2 * 1024 * 1024 * 1024;
/// Recheck delay once free space drops below the buffer.
pub const DEFAULT_DISK_SPACE_CHECK_FREQUENCY: Duration = Duration::from_secs(30);
/// Maximum chunk payload size.
pub const DEFAULT_DATA_CHUNK_SIZE: u64 = 256 * 1024;
/// Engine mailbox depth.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;
/// Default deadline for `add_chunk` calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Peers whose sync records are consulted each refresh cycle.
    pub consult_peer_records_count: usize,
    /// Size of the random pool the consulted peers are drawn from.
    pub pick_peers_out_of_random_n: usize,
    /// How often peer sync records are refreshed.
    pub peer_sync_records_frequency: Duration,
    /// Blocks kept behind the tip; the block index tracks twice this many.
    pub store_blocks_behind_current: u64,
    /// Hard cap on intervals in the sync record.
    pub max_shared_intervals: u64,
    /// Intervals allowed above the cap before compaction.
    pub extra_before_compaction: u64,
    /// Backoff between unproductive sync scans.
    pub scan_missing_chunks_frequency: Duration,
    /// Delay between full disk-pool promotion scans.
    pub disk_pool_scan_frequency: Duration,
    /// How often expired disk-pool data roots are swept.
    pub remove_expired_data_roots_frequency: Duration,
    /// Lifetime of an unconfirmed data root in the disk pool.
    pub disk_pool_data_root_expiration: Duration,
    /// Per-data-root admission buffer.
    pub max_disk_pool_data_root_buffer: u64,
    /// Global disk-pool admission buffer.
    pub max_disk_pool_buffer: u64,
    /// Largest transaction served whole through `get_tx_data`.
    pub max_served_tx_data_size: u64,
    /// Free space that must remain before any periodic task writes.
    pub disk_data_buffer: u64,
    /// Recheck delay once free space drops below the buffer.
    pub disk_space_check_frequency: Duration,
    /// Maximum chunk payload size.
    pub data_chunk_size: u64,
    /// Engine mailbox depth.
    pub mailbox_capacity: usize,
    /// Default deadline for `add_chunk` calls.
    pub call_timeout: Duration,
    /// Seed for the engine RNG; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl SyncConfig {
    /// Blocks the block index tracks for reorg intersection on join.
    pub fn track_confirmations(&self) -> u64 {
        2 * self.store_blocks_behind_current
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            consult_peer_records_count: DEFAULT_CONSULT_PEER_RECORDS_COUNT,
            pick_peers_out_of_random_n: DEFAULT_PICK_PEERS_OUT_OF_RANDOM_N,
            peer_sync_records_frequency: DEFAULT_PEER_SYNC_RECORDS_FREQUENCY,
            store_blocks_behind_current: DEFAULT_STORE_BLOCKS_BEHIND_CURRENT,
            max_shared_intervals: DEFAULT_MAX_SHARED_INTERVALS,
            extra_before_compaction: DEFAULT_EXTRA_BEFORE_COMPACTION,
            scan_missing_chunks_frequency: DEFAULT_SCAN_MISSING_CHUNKS_FREQUENCY,
            disk_pool_scan_frequency: DEFAULT_DISK_POOL_SCAN_FREQUENCY,
            remove_expired_data_roots_frequency: DEFAULT_REMOVE_EXPIRED_DATA_ROOTS_FREQUENCY,
            disk_pool_data_root_expiration: DEFAULT_DISK_POOL_DATA_ROOT_EXPIRATION,
            max_disk_pool_data_root_buffer: DEFAULT_MAX_DISK_POOL_DATA_ROOT_BUFFER,
            max_disk_pool_buffer: DEFAULT_MAX_DISK_POOL_BUFFER,
            max_served_tx_data_size: DEFAULT_MAX_SERVED_TX_DATA_SIZE,
            disk_data_buffer: DEFAULT_DISK_DATA_BUFFER,
            disk_space_check_frequency: DEFAULT_DISK_SPACE_CHECK_FREQUENCY,
            data_chunk_size: DEFAULT_DATA_CHUNK_SIZE,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            rng_seed: None,
        }
    }
}

/// Microsecond clock abstraction supplied by the host.
pub trait Clock: Send + Sync {
    /// Current time in microseconds since the Unix epoch.
    fn now_us(&self) -> u64;
}

/// System clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = SyncConfig::default();

        assert_eq!(config.consult_peer_records_count, 5);
        assert_eq!(config.pick_peers_out_of_random_n, 20);
        assert_eq!(config.peer_sync_records_frequency, Duration::from_secs(120));
        assert_eq!(config.track_confirmations(), 100);
        assert_eq!(config.max_shared_intervals, 10_000);
        assert_eq!(config.extra_before_compaction, 100);
        assert_eq!(config.scan_missing_chunks_frequency, Duration::from_secs(2));
        assert_eq!(config.disk_pool_scan_frequency, Duration::from_secs(120));
        assert_eq!(
            config.remove_expired_data_roots_frequency,
            Duration::from_secs(60)
        );
        assert_eq!(
            config.disk_pool_data_root_expiration,
            Duration::from_secs(7200)
        );
        assert_eq!(config.max_disk_pool_data_root_buffer, 50 * 1024 * 1024);
        assert_eq!(config.max_disk_pool_buffer, 2000 * 1024 * 1024);
        assert_eq!(config.max_served_tx_data_size, 12 * 1024 * 1024);
        assert_eq!(config.data_chunk_size, 256 * 1024);
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert!(config.rng_seed.is_none());
    }
}
