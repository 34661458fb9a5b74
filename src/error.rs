//! Error types for cellstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CellStoreError
pub type Result<T> = std::result::Result<T, CellStoreError>;

/// Unified error type for cellstore operations
#[derive(Debug, Error)]
pub enum CellStoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Sorted File Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Unsupported sorted file version: found {found}, expected {expected}")]
    UnsupportedVersion { found: i32, expected: i32 },

    #[error("Key out of order: {0}")]
    OutOfOrderKey(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Block Cache Errors
    // -------------------------------------------------------------------------
    #[error("Block already cached: {0}")]
    AlreadyCached(String),

    // -------------------------------------------------------------------------
    // Store Errors
    // -------------------------------------------------------------------------
    /// A flush failed after the memtable was snapshotted. The snapshot only
    /// lives in the write-ahead log now; the process must restart and replay.
    #[error("Dropped memtable snapshot: {0}")]
    DroppedSnapshot(String),

    #[error("Store aborted after a failed flush")]
    StoreAborted,

    #[error("Compaction failed: {0}")]
    Compaction(String),

    #[error("Store is closed")]
    Closed,

    /// A flush handed back a memtable snapshot that is not the current one
    #[error("Memtable snapshot handle does not match the current snapshot")]
    SnapshotMismatch,

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("No such column family: {0}")]
    NoSuchFamily(String),

    #[error("Invalid time range: min {min} > max {max}")]
    InvalidTimeRange { min: i64, max: i64 },

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Store too busy: memtable size {size} above blocking limit {limit}")]
    TooBusy { size: usize, limit: usize },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for CellStoreError {
    fn from(e: bincode::Error) -> Self {
        CellStoreError::Serialization(e.to_string())
    }
}
