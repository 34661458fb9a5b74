//! Memtable flush
//!
//! A flush that fails after the memtable was snapshotted cannot put the
//! snapshot back: its cells now only live in the write-ahead log. The store
//! is marked aborted and every later operation fails until the process
//! restarts and replays the log.

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info};

use crate::cell::Cell;
use crate::error::{CellStoreError, Result};
use crate::memtable::MemTableSnapshot;
use crate::storefile::{unique_file_name, StoreFile, StoreFileWriter};

use super::{now_millis, oldest_timestamp, Store};

impl Store {
    /// Write the memtable out as a new store file
    ///
    /// Returns `false` when there was nothing to flush.
    pub fn flush(&self) -> Result<bool> {
        let _flush = self.flush_lock.lock();
        self.check_open()?;

        let (token, snapshot) = {
            let _updates = self.update_lock.write();
            if self.memtable.active_len() == 0 && self.memtable.snapshot_len() == 0 {
                return Ok(false);
            }
            let token = self.wal.start_flush_checkpoint()?;
            self.memtable.snapshot();
            (token, self.memtable.get_snapshot())
        };

        if snapshot.is_empty() {
            self.wal.abort_flush_checkpoint();
            return Ok(false);
        }

        let file = match self.flush_snapshot(&snapshot, token) {
            Ok(file) => file,
            Err(e) => {
                self.wal.abort_flush_checkpoint();
                self.aborted.store(true, Ordering::SeqCst);
                error!(
                    dir = %self.dir.display(),
                    cells = snapshot.len(),
                    error = %e,
                    "Flush failed; memtable snapshot dropped, replay the log on restart"
                );
                return Err(CellStoreError::DroppedSnapshot(e.to_string()));
            }
        };

        // The file is durable and published; the log may reclaim through token
        self.wal.complete_flush_checkpoint(token)?;

        info!(
            file = %file.name(),
            cells = snapshot.len(),
            memtable_bytes = snapshot.size(),
            file_bytes = file.len(),
            seq_id = token,
            "Flushed memtable"
        );
        Ok(true)
    }

    fn flush_snapshot(&self, snapshot: &MemTableSnapshot, token: u64) -> Result<Arc<StoreFile>> {
        let tmp_path = self.tmp_dir.join(unique_file_name());
        let oldest = oldest_timestamp(self.family.ttl_millis(), now_millis());

        let written = (|| {
            let mut writer =
                StoreFileWriter::create(&tmp_path, &self.family, snapshot.len(), self.cache.clone())?;
            let mut last: Option<Cell> = None;
            for cell in snapshot.cells() {
                if cell.timestamp() < oldest {
                    continue;
                }
                // Newest write of an overwritten key comes first; keep only it
                if last.as_ref().is_some_and(|prev| prev.compare_key(&cell).is_eq()) {
                    continue;
                }
                writer.append(&cell)?;
                last = Some(cell);
            }
            writer.append_metadata(i64::try_from(token).unwrap_or(i64::MAX), false)?;
            writer.close()
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        let file = self.commit_file(&tmp_path)?;
        self.replace_files(&[], Some(file.clone()), || self.memtable.clear_snapshot(snapshot))?;
        Ok(file)
    }
}
