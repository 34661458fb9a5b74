//! In-memory write-ahead log
//!
//! Keeps bincode-encoded batches in a vector. Durable only for the life of
//! the process, which is enough to exercise flush checkpoints and replay.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cell::Cell;
use crate::error::Result;

use super::{WalEntry, WriteAheadLog};

#[derive(Debug, Default)]
struct LogState {
    last_seq: u64,
    /// `(seq, encoded entry)` in append order
    records: Vec<(u64, Vec<u8>)>,
    /// Token of the flush in progress
    flushing: Option<u64>,
    /// Highest sequence number persisted by a completed flush
    flushed_through: u64,
}

/// Process-local log
#[derive(Debug, Default)]
pub struct MemoryLog {
    state: Mutex<LogState>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches logged after `seq`, oldest first, for replay
    pub fn entries_after(&self, seq: u64) -> Result<Vec<(u64, Vec<Cell>)>> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for (entry_seq, record) in state.records.iter().filter(|(s, _)| *s > seq) {
            let entry: WalEntry = bincode::deserialize(record)?;
            out.push((*entry_seq, entry.to_cells()?));
        }
        Ok(out)
    }

    pub fn last_seq(&self) -> u64 {
        self.state.lock().last_seq
    }

    pub fn flushed_through(&self) -> u64 {
        self.state.lock().flushed_through
    }

    /// Batches not yet reclaimed
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_flushing(&self) -> bool {
        self.state.lock().flushing.is_some()
    }
}

impl WriteAheadLog for MemoryLog {
    fn append(&self, cells: &[Cell]) -> Result<u64> {
        let mut state = self.state.lock();
        let seq = state.last_seq + 1;
        let record = bincode::serialize(&WalEntry::new(seq, cells))?;
        state.records.push((seq, record));
        state.last_seq = seq;
        Ok(seq)
    }

    fn start_flush_checkpoint(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let token = state.last_seq;
        state.flushing = Some(token);
        Ok(token)
    }

    fn complete_flush_checkpoint(&self, token: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.flushing != Some(token) {
            warn!(token, expected = ?state.flushing, "Completing a flush that was not started");
        }
        state.flushing = None;
        state.flushed_through = state.flushed_through.max(token);
        let before = state.records.len();
        state.records.retain(|(seq, _)| *seq > token);
        debug!(token, reclaimed = before - state.records.len(), "Flush checkpoint completed");
        Ok(())
    }

    fn abort_flush_checkpoint(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.flushing.take() {
            warn!(token, "Flush checkpoint aborted");
        }
    }
}
