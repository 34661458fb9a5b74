//! Write-Ahead Log Module
//!
//! The store depends on a write-ahead log for durability but does not own
//! one. This module defines the contract the store consumes and ships an
//! in-memory implementation used by tests, benches and tools.
//!
//! ## Contract
//! - `append` makes a batch durable and returns its sequence number
//! - `start_flush_checkpoint` returns a token covering every batch appended
//!   so far; the flush tags its file with it
//! - `complete_flush_checkpoint` reports the token's batches as persisted in
//!   a store file, so the log may reclaim them
//! - `abort_flush_checkpoint` reports a failed flush; nothing is reclaimed

mod memory;

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::Result;

pub use memory::MemoryLog;

/// Durability provider consumed by the store
pub trait WriteAheadLog: Send + Sync {
    /// Durably record a batch of cells; returns the batch sequence number
    fn append(&self, cells: &[Cell]) -> Result<u64>;

    /// Begin a flush; the token covers every batch appended so far
    fn start_flush_checkpoint(&self) -> Result<u64>;

    /// The flush tagged `token` is durably on disk
    fn complete_flush_checkpoint(&self, token: u64) -> Result<()>;

    /// The current flush failed
    fn abort_flush_checkpoint(&self);
}

/// One logged batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    /// Encoded `(key, value)` pairs of the batch
    pub cells: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WalEntry {
    pub fn new(seq: u64, cells: &[Cell]) -> Self {
        Self {
            seq,
            cells: cells
                .iter()
                .map(|c| (c.key().to_vec(), c.value().to_vec()))
                .collect(),
        }
    }

    /// Rebuild the batch's cells, stamped with the batch sequence number
    pub fn to_cells(&self) -> Result<Vec<Cell>> {
        self.cells
            .iter()
            .map(|(k, v)| {
                Cell::from_parts(bytes::Bytes::from(k.clone()), bytes::Bytes::from(v.clone()))
                    .map(|c| c.with_seq(self.seq))
            })
            .collect()
    }
}
