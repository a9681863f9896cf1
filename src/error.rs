//! Error taxonomy for the sync engine.

use thiserror::Error;

/// Errors surfaced by the sync engine and its read paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The engine has not been joined to a block index yet.
    #[error("engine not joined")]
    NotJoined,

    /// No chunk covers the requested offset.
    #[error("chunk not found")]
    ChunkNotFound,

    /// Generic lookup miss (tx id, offset, disk-pool entry).
    #[error("not found")]
    NotFound,

    /// The chunk blob exists in the index but could not be read back.
    #[error("failed to read chunk blob")]
    FailedToReadChunk,

    /// Malformed input (binary sync record, proof shape).
    #[error("invalid input")]
    Invalid,

    /// Free disk space is below the configured buffer.
    #[error("disk full")]
    DiskFull,

    /// Admitting the chunk would exceed the global disk-pool buffer.
    #[error("disk pool size limit exceeded")]
    ExceedsDiskPoolSizeLimit,

    /// Admitting the chunk would exceed the per-data-root buffer.
    #[error("data root size limit exceeded")]
    ExceedsDataRootSizeLimit,

    /// The submitted chunk's data root is neither indexed nor pending.
    #[error("data root not found")]
    DataRootNotFound,

    /// Merkle path verification failed.
    #[error("invalid proof")]
    InvalidProof,

    /// Transaction data exceeds the serving cap.
    #[error("tx data too big")]
    TxDataTooBig,

    /// A call did not complete within the caller's deadline.
    #[error("timed out")]
    TimedOut,

    /// The new block index shares no block with the current one.
    #[error("no intersection with joined block index")]
    FatalJoinNoIntersection,

    /// Underlying key-value store failure.
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Failures of the underlying ordered key-value store or blob store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("kv backend: {0}")]
    Backend(String),

    #[error("blob io: {0}")]
    BlobIo(String),

    #[error("corrupt value under {0}")]
    CorruptValue(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }

    pub fn blob_io(err: impl std::fmt::Display) -> Self {
        StoreError::BlobIo(err.to_string())
    }
}
