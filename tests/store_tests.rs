//! Tests for Store
//!
//! These tests verify:
//! - Writes, gets and scans across the memtable and store files
//! - Version limits, delete markers, TTL and time ranges
//! - Flush atomicity, failure handling and log replay
//! - Minor/major compaction selection and results
//! - Split references, split point selection and bulk load
//! - Admission control and lifecycle

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cellstore::config::{FamilyConfig, StoreConfig};
use cellstore::store::{FilterDecision, Scan};
use cellstore::storefile::StoreFileWriter;
use cellstore::wal::{MemoryLog, WriteAheadLog};
use cellstore::{Cell, CellStoreError, CellType, Store};
use tempfile::TempDir;

const FAMILY: &[u8] = b"f";

// =============================================================================
// Helper Functions
// =============================================================================

fn family(max_versions: usize) -> FamilyConfig {
    FamilyConfig::builder(FAMILY).max_versions(max_versions).build()
}

fn store_config() -> StoreConfig {
    StoreConfig::builder().major_compaction_period(None).build()
}

fn open_store(dir: &Path, log: &Arc<MemoryLog>) -> Store {
    open_with(dir, log, family(3), store_config())
}

fn open_with(dir: &Path, log: &Arc<MemoryLog>, family: FamilyConfig, config: StoreConfig) -> Store {
    Store::open(dir, family, config, None, log.clone()).unwrap()
}

fn put(store: &Store, row: &[u8], qualifier: &[u8], ts: i64, value: &[u8]) {
    store
        .put(&[Cell::put(row, FAMILY, qualifier, ts, value)])
        .unwrap();
}

fn scan_rows(store: &Store, scan: Scan) -> Vec<Vec<Cell>> {
    store.scan(scan).unwrap().map(|row| row.unwrap()).collect()
}

fn row_keys(rows: &[Vec<Cell>]) -> Vec<Vec<u8>> {
    rows.iter().map(|cells| cells[0].row().to_vec()).collect()
}

fn values(cells: &[Cell]) -> Vec<Vec<u8>> {
    cells.iter().map(|c| c.value().to_vec()).collect()
}

fn timestamps(cells: &[Cell]) -> Vec<i64> {
    cells.iter().map(|c| c.timestamp()).collect()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

// =============================================================================
// Basic Read/Write Tests
// =============================================================================

#[test]
fn test_put_then_get_from_memtable() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"r1", b"c", 100, b"a");

    let cells = store.get(Scan::get(FAMILY, b"r1")).unwrap();
    assert_eq!(values(&cells), vec![b"a".to_vec()]);
    assert_eq!(log.len(), 1);
    assert!(store.get(Scan::get(FAMILY, b"r2")).unwrap().is_empty());
}

#[test]
fn test_latest_timestamp_is_stamped_on_write() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    let before = now_millis();
    put(&store, b"r", b"c", i64::MAX, b"v");

    let cells = store.get(Scan::get(FAMILY, b"r")).unwrap();
    assert_eq!(cells.len(), 1);
    assert!(cells[0].timestamp() >= before);
    assert!(cells[0].timestamp() <= now_millis());
}

#[test]
fn test_end_to_end_flush_and_major_compaction() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_with(temp.path(), &log, family(1), store_config());

    put(&store, b"r1", b"c", 100, b"a");
    assert!(store.flush().unwrap());
    put(&store, b"r1", b"c", 200, b"b");
    assert!(store.flush().unwrap());

    assert_eq!(store.storefile_count(), 2);
    assert!(store.memtable().is_empty());
    assert_eq!(values(&store.get(Scan::get(FAMILY, b"r1")).unwrap()), vec![b"b".to_vec()]);

    assert_eq!(store.compact(true).unwrap(), None);

    let files = store.store_files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].reader().entry_count(), 1);
    assert!(files[0].is_major_compaction());
    assert_eq!(values(&store.get(Scan::get(FAMILY, b"r1")).unwrap()), vec![b"b".to_vec()]);
    assert!(store.last_compaction_size() > 0);
}

#[test]
fn test_scan_merges_memtable_and_files() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    for row in [b"a", b"c", b"e"] {
        put(&store, row, b"q", 1, b"file");
    }
    store.flush().unwrap();
    for row in [b"b", b"d", b"f"] {
        put(&store, row, b"q", 1, b"mem");
    }

    let rows = scan_rows(&store, Scan::new(FAMILY));
    assert_eq!(
        row_keys(&rows),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec(), b"f".to_vec()]
    );

    let rows = scan_rows(&store, Scan::new(FAMILY).with_start_row(b"b").with_stop_row(b"e"));
    assert_eq!(row_keys(&rows), vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
}

#[test]
fn test_scan_does_not_see_later_writes() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"a", b"q", 1, b"v");
    let scanner = store.scan(Scan::new(FAMILY)).unwrap();
    put(&store, b"b", b"q", 1, b"v");

    let rows: Vec<Vec<Cell>> = scanner.map(|r| r.unwrap()).collect();
    assert_eq!(row_keys(&rows), vec![b"a".to_vec()]);
    assert_eq!(scan_rows(&store, Scan::new(FAMILY)).len(), 2);
}

#[test]
fn test_explicit_columns_and_filter() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    for qualifier in [b"a", b"b", b"c"] {
        put(&store, b"r", qualifier, 1, qualifier);
    }

    let cells = store.get(Scan::get(FAMILY, b"r").add_column(b"b")).unwrap();
    assert_eq!(values(&cells), vec![b"b".to_vec()]);

    let skip_b = |cell: &Cell| {
        if cell.qualifier() == b"b" {
            FilterDecision::Skip
        } else {
            FilterDecision::Include
        }
    };
    let cells = store
        .get(Scan::get(FAMILY, b"r").with_filter(Arc::new(skip_b)))
        .unwrap();
    assert_eq!(values(&cells), vec![b"a".to_vec(), b"c".to_vec()]);
}

// =============================================================================
// Versions, Deletes, TTL and Time Ranges
// =============================================================================

#[test]
fn test_versions_newest_first_and_limited() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_with(temp.path(), &log, family(2), store_config());

    put(&store, b"r", b"c", 10, b"v1");
    store.flush().unwrap();
    put(&store, b"r", b"c", 30, b"v3");
    put(&store, b"r", b"c", 20, b"v2");

    // The family limit caps what a scan may ask for
    let cells = store.get(Scan::get(FAMILY, b"r").with_max_versions(5)).unwrap();
    assert_eq!(timestamps(&cells), vec![30, 20]);

    let cells = store.get(Scan::get(FAMILY, b"r")).unwrap();
    assert_eq!(values(&cells), vec![b"v3".to_vec()]);
}

#[test]
fn test_major_compaction_keeps_newest_versions() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_with(temp.path(), &log, family(2), store_config());

    for (ts, value) in [(1, b"v1"), (2, b"v2"), (3, b"v3")] {
        put(&store, b"r", b"c", ts, value);
        store.flush().unwrap();
    }
    assert_eq!(store.storefile_count(), 3);

    store.compact(true).unwrap();

    let files = store.store_files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].reader().entry_count(), 2);
    let cells = store.get(Scan::get(FAMILY, b"r").with_max_versions(3)).unwrap();
    assert_eq!(values(&cells), vec![b"v3".to_vec(), b"v2".to_vec()]);
}

#[test]
fn test_delete_column_hides_older_versions() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    for ts in [10, 20, 30] {
        put(&store, b"r", b"c", ts, b"v");
    }
    store.flush().unwrap();
    store
        .delete(&[Cell::delete(b"r", FAMILY, b"c", 20, CellType::DeleteColumn)])
        .unwrap();

    let cells = store.get(Scan::get(FAMILY, b"r").with_max_versions(3)).unwrap();
    assert_eq!(timestamps(&cells), vec![30]);

    store.flush().unwrap();
    store.compact(true).unwrap();

    // The marker and the versions it covers are gone
    let files = store.store_files();
    assert_eq!(files[0].reader().entry_count(), 1);
    let cells = store.get(Scan::get(FAMILY, b"r").with_max_versions(3)).unwrap();
    assert_eq!(timestamps(&cells), vec![30]);
}

#[test]
fn test_version_delete_hides_one_version() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    for ts in [10, 20, 30] {
        put(&store, b"r", b"c", ts, b"v");
    }
    store
        .delete(&[Cell::delete(b"r", FAMILY, b"c", 20, CellType::Delete)])
        .unwrap();

    let cells = store.get(Scan::get(FAMILY, b"r").with_max_versions(3)).unwrap();
    assert_eq!(timestamps(&cells), vec![30, 10]);
}

#[test]
fn test_delete_family_hides_row() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"a", b"c", 100, b"v");
    put(&store, b"b", b"c1", 100, b"v");
    put(&store, b"b", b"c2", 300, b"v");
    store.flush().unwrap();
    store
        .delete(&[Cell::delete(b"b", FAMILY, b"", 200, CellType::DeleteFamily)])
        .unwrap();

    let cells = store.get(Scan::get(FAMILY, b"b")).unwrap();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].qualifier(), b"c2");
    assert_eq!(scan_rows(&store, Scan::new(FAMILY)).len(), 2);
}

#[test]
fn test_delete_rejects_put_cells() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    let result = store.delete(&[Cell::put(b"r", FAMILY, b"c", 1, b"v")]);
    assert!(matches!(result, Err(CellStoreError::Config(_))));
    assert!(log.is_empty());
}

#[test]
fn test_ttl_hides_and_drops_expired_cells() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let family = FamilyConfig::builder(FAMILY).ttl(Duration::from_secs(60)).build();
    let store = open_with(temp.path(), &log, family, store_config());

    let now = now_millis();
    put(&store, b"r", b"old", now - 3_600_000, b"expired");
    put(&store, b"r", b"new", now, b"live");

    let cells = store.get(Scan::get(FAMILY, b"r")).unwrap();
    assert_eq!(values(&cells), vec![b"live".to_vec()]);

    store.flush().unwrap();
    assert_eq!(store.store_files()[0].reader().entry_count(), 1);
}

#[test]
fn test_time_range_scan() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    for ts in [10, 20, 30] {
        put(&store, b"r", b"c", ts, b"v");
    }
    store.flush().unwrap();

    let scan = Scan::get(FAMILY, b"r")
        .with_max_versions(3)
        .with_time_range(15, 30)
        .unwrap();
    assert_eq!(timestamps(&store.get(scan).unwrap()), vec![20]);

    let scan = Scan::get(FAMILY, b"r").with_timestamp(10);
    assert_eq!(timestamps(&store.get(scan).unwrap()), vec![10]);

    assert!(matches!(
        Scan::new(FAMILY).with_time_range(5, 1),
        Err(CellStoreError::InvalidTimeRange { .. })
    ));
}

// =============================================================================
// Flush and Recovery Tests
// =============================================================================

#[test]
fn test_flush_empty_memtable_is_noop() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    assert!(!store.flush().unwrap());
    assert_eq!(store.storefile_count(), 0);
    assert!(!log.is_flushing());
}

#[test]
fn test_flush_records_sequence_id_and_reclaims_log() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"a", b"q", 1, b"v");
    put(&store, b"b", b"q", 1, b"v");
    assert_eq!(store.max_sequence_id(), -1);

    store.flush().unwrap();

    assert_eq!(store.max_sequence_id(), 2);
    assert_eq!(log.flushed_through(), 2);
    assert!(log.is_empty());
    assert!(store.storefiles_size() > 0);
    assert!(store.storefile_index_size() > 0);
}

#[test]
fn test_restart_replays_unflushed_batches() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());

    {
        let store = open_store(temp.path(), &log);
        put(&store, b"a", b"q", 1, b"flushed");
        store.flush().unwrap();
        put(&store, b"b", b"q", 1, b"unflushed");
        // A file written but never published
        fs::write(store.dir().join(".tmp").join("0000000000000001"), b"partial").unwrap();
    }

    let store = open_store(temp.path(), &log);
    assert_eq!(store.storefile_count(), 1);
    assert!(!temp.path().join(".tmp").join("0000000000000001").exists());

    let from = store.max_sequence_id().max(0) as u64;
    for (_, cells) in log.entries_after(from).unwrap() {
        store.replay(&cells).unwrap();
    }

    let rows = scan_rows(&store, Scan::new(FAMILY).with_max_versions(3));
    assert_eq!(row_keys(&rows), vec![b"a".to_vec(), b"b".to_vec()]);
    assert!(rows.iter().all(|cells| cells.len() == 1));
}

#[test]
fn test_flush_on_disk_but_unrecorded_in_log_replays_once() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());

    let batches = {
        let store = open_store(temp.path(), &log);
        put(&store, b"a", b"q", 1, b"v");
        put(&store, b"b", b"q", 1, b"v");
        let batches = log.entries_after(0).unwrap();
        store.flush().unwrap();
        batches
    };

    // A crash after the rename into the store but before the log heard
    // about the flush: the file is on disk and the log still holds every
    // batch it covers, plus one written after it
    let crashed_log = Arc::new(MemoryLog::new());
    for (_, cells) in &batches {
        crashed_log.append(cells).unwrap();
    }
    crashed_log
        .append(&[Cell::put(b"c", FAMILY, b"q", 1, b"v")])
        .unwrap();

    let store = open_store(temp.path(), &crashed_log);
    assert_eq!(store.storefile_count(), 1);
    assert_eq!(store.max_sequence_id(), 2);

    let from = store.max_sequence_id().max(0) as u64;
    for (_, cells) in crashed_log.entries_after(from).unwrap() {
        store.replay(&cells).unwrap();
    }

    // Only the batch past the file's sequence id went back into the memtable
    assert_eq!(store.memtable().active_len(), 1);
    let rows = scan_rows(&store, Scan::new(FAMILY).with_max_versions(3));
    assert_eq!(row_keys(&rows), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert!(rows.iter().all(|cells| cells.len() == 1));
}

#[test]
fn test_flush_failure_drops_snapshot_and_aborts() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"a", b"q", 1, b"v");
    fs::remove_dir_all(store.dir().join(".tmp")).unwrap();

    assert!(matches!(store.flush(), Err(CellStoreError::DroppedSnapshot(_))));
    assert!(store.is_aborted());
    assert!(!log.is_flushing());
    assert_eq!(log.len(), 1);

    let result = store.put(&[Cell::put(b"b", FAMILY, b"q", 1, b"v")]);
    assert!(matches!(result, Err(CellStoreError::StoreAborted)));
    assert!(matches!(store.flush(), Err(CellStoreError::StoreAborted)));
    assert!(matches!(
        store.scan(Scan::new(FAMILY)),
        Err(CellStoreError::StoreAborted)
    ));

    // The log still holds the batch; a restart recovers it
    drop(store);
    let store = open_store(temp.path(), &log);
    for (_, cells) in log.entries_after(0).unwrap() {
        store.replay(&cells).unwrap();
    }
    assert_eq!(store.get(Scan::get(FAMILY, b"a")).unwrap().len(), 1);
}

#[test]
fn test_scanner_survives_flush_and_compaction() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    for row in [b"a", b"b", b"c", b"d"] {
        put(&store, row, b"q", 1, row);
    }

    let mut scanner = store.scan(Scan::new(FAMILY)).unwrap();
    assert_eq!(scanner.next_row().unwrap().unwrap()[0].row(), b"a");

    store.flush().unwrap();
    assert_eq!(scanner.next_row().unwrap().unwrap()[0].row(), b"b");

    store.compact(true).unwrap();
    assert_eq!(scanner.next_row().unwrap().unwrap()[0].row(), b"c");
    assert_eq!(scanner.next_row().unwrap().unwrap()[0].row(), b"d");
    assert!(scanner.next_row().unwrap().is_none());
}

#[test]
fn test_scanner_hides_writes_flushed_after_open() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"a", b"q", 1, b"v");
    put(&store, b"b", b"q", 1, b"v");

    let mut scanner = store.scan(Scan::new(FAMILY)).unwrap();
    assert_eq!(scanner.next_row().unwrap().unwrap()[0].row(), b"a");

    put(&store, b"c", b"q", 1, b"v");
    store.flush().unwrap();

    let rest: Vec<Vec<Cell>> = scanner.map(|row| row.unwrap()).collect();
    assert_eq!(row_keys(&rest), vec![b"b".to_vec()]);

    // A scan opened now sees the flushed write
    assert_eq!(scan_rows(&store, Scan::new(FAMILY)).len(), 3);
}

#[test]
fn test_scanner_reopened_after_flush_returns_versions_once() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"a", b"q", 1, b"v");
    put(&store, b"b", b"q", 1, b"old");
    put(&store, b"b", b"q", 2, b"new");

    let mut scanner = store.scan(Scan::new(FAMILY).with_max_versions(3)).unwrap();
    assert_eq!(scanner.next_row().unwrap().unwrap()[0].row(), b"a");

    // The new file holds the same cells as the memtable the scanner reads
    store.flush().unwrap();
    assert_eq!(store.store_files()[0].max_write_number(), store.mvcc().read_point());

    let row = scanner.next_row().unwrap().unwrap();
    assert_eq!(timestamps(&row), vec![2, 1]);
    assert!(scanner.next_row().unwrap().is_none());
}

#[test]
fn test_scanner_isolation_after_restart() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());

    {
        let store = open_store(temp.path(), &log);
        put(&store, b"a", b"q", 1, b"v");
        put(&store, b"b", b"q", 1, b"v");
        store.flush().unwrap();
    }

    let store = open_store(temp.path(), &log);
    // Write numbers continue above the ones already in files
    assert_eq!(store.mvcc().read_point(), store.store_files()[0].max_write_number());
    put(&store, b"c", b"q", 1, b"v");

    let mut scanner = store.scan(Scan::new(FAMILY)).unwrap();
    assert_eq!(scanner.next_row().unwrap().unwrap()[0].row(), b"a");

    put(&store, b"d", b"q", 1, b"v");
    store.flush().unwrap();

    let rest: Vec<Vec<Cell>> = scanner.map(|row| row.unwrap()).collect();
    assert_eq!(row_keys(&rest), vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_concurrent_writers_and_flushes() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    std::thread::scope(|s| {
        for writer in 0..4u8 {
            let store = &store;
            s.spawn(move || {
                for i in 0..50u8 {
                    let row = [writer, i];
                    put(store, &row, b"q", 1, b"v");
                }
            });
        }
        let store = &store;
        s.spawn(move || {
            for _ in 0..5 {
                store.flush().unwrap();
            }
        });
    });
    store.flush().unwrap();

    let rows = scan_rows(&store, Scan::new(FAMILY).with_max_versions(3));
    assert_eq!(rows.len(), 200);
    assert!(rows.iter().all(|cells| cells.len() == 1));
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_minor_compaction_below_threshold_does_nothing() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    for row in [b"a", b"b"] {
        put(&store, row, b"q", 1, b"v");
        store.flush().unwrap();
    }

    let files = store.store_files();
    assert!(store.select_compaction(&files, false).is_none());
    store.compact(false).unwrap();
    assert_eq!(store.storefile_count(), 2);
}

#[test]
fn test_minor_compaction_keeps_delete_markers() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"r", b"c", 10, b"v");
    store.flush().unwrap();
    store
        .delete(&[Cell::delete(b"r", FAMILY, b"c", 20, CellType::DeleteColumn)])
        .unwrap();
    store.flush().unwrap();
    put(&store, b"s", b"c", 10, b"v");
    store.flush().unwrap();

    let selection = store.select_compaction(&store.store_files(), false).unwrap();
    assert!(!selection.major);
    assert_eq!(selection.files.len(), 3);

    store.compact(false).unwrap();

    let files = store.store_files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].reader().entry_count(), 3);
    assert!(!files[0].is_major_compaction());
    assert_eq!(files[0].max_sequence_id(), 3);
    assert!(store.get(Scan::get(FAMILY, b"r")).unwrap().is_empty());
}

#[test]
fn test_minor_compaction_skips_large_old_file() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    let value = vec![b'x'; 100];
    let batch: Vec<Cell> = (0..200u32)
        .map(|i| Cell::put(&i.to_be_bytes(), FAMILY, b"q", 1, &value))
        .collect();
    store.put(&batch).unwrap();
    store.flush().unwrap();
    for row in [b"x", b"y", b"z"] {
        put(&store, row, b"q", 1, b"v");
        store.flush().unwrap();
    }
    let big = store.store_files()[0].clone();

    let selection = store.select_compaction(&store.store_files(), false).unwrap();
    assert_eq!(selection.files.len(), 3);
    assert!(selection.files.iter().all(|f| f.path() != big.path()));

    store.compact(false).unwrap();

    let files = store.store_files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].path(), big.path());
    assert_eq!(scan_rows(&store, Scan::new(FAMILY)).len(), 203);
}

#[test]
fn test_major_compaction_due_by_age() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let config = StoreConfig::builder()
        .major_compaction_period(Some(Duration::from_millis(1)))
        .build();
    let store = open_with(temp.path(), &log, family(3), config);

    put(&store, b"a", b"q", 1, b"v");
    store.flush().unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let files = store.store_files();
    assert!(store.is_major_compaction_due(&files));
    assert!(store.select_compaction(&files, false).unwrap().major);

    store.compact(false).unwrap();

    // A lone major-compacted file is left alone
    let files = store.store_files();
    assert!(files[0].is_major_compaction());
    std::thread::sleep(Duration::from_millis(20));
    assert!(!store.is_major_compaction_due(&files));
}

#[test]
fn test_major_compaction_of_only_deletes_leaves_no_file() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"r", b"c", 10, b"v");
    store
        .delete(&[Cell::delete(b"r", FAMILY, b"c", 10, CellType::DeleteColumn)])
        .unwrap();
    store.flush().unwrap();

    store.compact(true).unwrap();

    assert_eq!(store.storefile_count(), 0);
    assert!(scan_rows(&store, Scan::new(FAMILY)).is_empty());
}

// =============================================================================
// Split Tests
// =============================================================================

#[test]
fn test_check_split_returns_middle_row() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let family = FamilyConfig::builder(FAMILY).block_size(256).build();
    let config = StoreConfig::builder()
        .major_compaction_period(None)
        .max_file_size(1024)
        .build();
    let store = open_with(temp.path(), &log, family, config);

    let batch: Vec<Cell> = (0..500u32)
        .map(|i| Cell::put(format!("row{:05}", i).as_bytes(), FAMILY, b"q", 1, b"value"))
        .collect();
    store.put(&batch).unwrap();
    store.flush().unwrap();

    let split = store.check_split().unwrap();
    assert!(split.as_slice() > b"row00000".as_slice());
    assert!(split.as_slice() < b"row00499".as_slice());
}

#[test]
fn test_check_split_none_below_max_size() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"a", b"q", 1, b"v");
    store.flush().unwrap();

    assert!(store.check_split().is_none());
    assert_eq!(store.compact(false).unwrap(), None);
}

#[test]
fn test_split_references_serve_each_half() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let parent_dir = temp.path().join("parent");
    let top_dir = temp.path().join("top");
    let bottom_dir = temp.path().join("bottom");

    let parent = open_store(&parent_dir, &log);
    for row in [b"a", b"b", b"c", b"d", b"e", b"f"] {
        put(&parent, row, b"q", 1, row);
    }
    parent.flush().unwrap();

    let written = parent.split_references(b"d", &top_dir, &bottom_dir).unwrap();
    assert_eq!(written.len(), 2);

    let top = open_store(&top_dir, &log);
    let bottom = open_store(&bottom_dir, &log);
    assert!(top.store_files()[0].is_reference());

    let top_rows = row_keys(&scan_rows(&top, Scan::new(FAMILY)));
    let bottom_rows = row_keys(&scan_rows(&bottom, Scan::new(FAMILY)));
    assert_eq!(top_rows, vec![b"d".to_vec(), b"e".to_vec(), b"f".to_vec()]);
    assert_eq!(bottom_rows, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    assert!(bottom.get(Scan::get(FAMILY, b"e")).unwrap().is_empty());
    assert_eq!(
        bottom.closest_row_before(b"z").unwrap().unwrap()[0].row(),
        b"c"
    );
    assert!(top.check_split().is_none());

    // References make compaction major; the result owns its data
    let selection = top.select_compaction(&top.store_files(), false).unwrap();
    assert!(selection.major);
    top.compact(false).unwrap();
    let files = top.store_files();
    assert_eq!(files.len(), 1);
    assert!(!files[0].is_reference());
    assert_eq!(row_keys(&scan_rows(&top, Scan::new(FAMILY))), top_rows);

    assert!(matches!(
        top.split_references(b"e", &temp.path().join("t2"), &temp.path().join("b2")),
        Ok(_)
    ));
    assert!(matches!(
        bottom.split_references(b"b", &temp.path().join("t3"), &temp.path().join("b3")),
        Err(CellStoreError::Config(_))
    ));
}

// =============================================================================
// Closest Row Before Tests
// =============================================================================

#[test]
fn test_closest_row_before() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"b", b"q", 100, b"vb");
    put(&store, b"d", b"q", 100, b"vd");
    store.flush().unwrap();
    put(&store, b"f", b"q", 100, b"vf");

    let row = |r: &[u8]| {
        store
            .closest_row_before(r)
            .unwrap()
            .map(|cells| cells[0].row().to_vec())
    };

    assert_eq!(row(b"e"), Some(b"d".to_vec()));
    assert_eq!(row(b"d"), Some(b"d".to_vec()));
    assert_eq!(row(b"z"), Some(b"f".to_vec()));
    assert_eq!(row(b"a"), None);

    store
        .delete(&[Cell::delete(b"d", FAMILY, b"", 200, CellType::DeleteFamily)])
        .unwrap();
    assert_eq!(row(b"e"), Some(b"b".to_vec()));
}

// =============================================================================
// Increment Tests
// =============================================================================

#[test]
fn test_increment_column_value() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    assert_eq!(store.increment_column_value(b"r", b"n", 5).unwrap(), 5);
    assert_eq!(store.increment_column_value(b"r", b"n", 3).unwrap(), 8);
    assert_eq!(log.len(), 2);

    store.flush().unwrap();
    assert_eq!(store.increment_column_value(b"r", b"n", -10).unwrap(), -2);

    let cells = store.get(Scan::get(FAMILY, b"r")).unwrap();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].value().as_ref(), &(-2i64).to_be_bytes());
}

#[test]
fn test_increment_hidden_from_open_scanner() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"a", b"q", 1, b"v");
    put(&store, b"c", b"q", 1, b"v");

    let mut scanner = store.scan(Scan::new(FAMILY)).unwrap();
    assert_eq!(scanner.next_row().unwrap().unwrap()[0].row(), b"a");

    assert_eq!(store.increment_column_value(b"z", b"n", 1).unwrap(), 1);

    let rest: Vec<Vec<Cell>> = scanner.map(|row| row.unwrap()).collect();
    assert_eq!(row_keys(&rest), vec![b"c".to_vec()]);

    let cells = store.get(Scan::get(FAMILY, b"z")).unwrap();
    assert_eq!(cells.len(), 1);
    assert!(cells[0].seq() > 0);
}

#[test]
fn test_increment_rejects_non_counter_value() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"r", b"n", 1, b"abc");
    assert!(matches!(
        store.increment_column_value(b"r", b"n", 1),
        Err(CellStoreError::Config(_))
    ));
}

// =============================================================================
// Bulk Load Tests
// =============================================================================

#[test]
fn test_bulk_load_file() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(&temp.path().join("store"), &log);
    put(&store, b"a", b"q", 1, b"native");
    store.flush().unwrap();

    let source = temp.path().join("import");
    let mut writer = StoreFileWriter::create(&source, store.family(), 2, None).unwrap();
    writer.append(&Cell::put(b"m", FAMILY, b"q", 1, b"bulk")).unwrap();
    writer.append(&Cell::put(b"n", FAMILY, b"q", 1, b"bulk")).unwrap();
    writer.close().unwrap();

    store.bulk_load_file(&source).unwrap();

    assert!(source.exists());
    let files = store.store_files();
    assert_eq!(files.len(), 2);
    assert!(files[1].is_bulk_loaded());
    assert_eq!(
        row_keys(&scan_rows(&store, Scan::new(FAMILY))),
        vec![b"a".to_vec(), b"m".to_vec(), b"n".to_vec()]
    );
}

#[test]
fn test_bulk_load_rejects_other_family() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(&temp.path().join("store"), &log);

    let source = temp.path().join("import");
    let other = FamilyConfig::builder(b"g".to_vec()).build();
    let mut writer = StoreFileWriter::create(&source, &other, 1, None).unwrap();
    writer.append(&Cell::put(b"m", b"g", b"q", 1, b"v")).unwrap();
    writer.close().unwrap();

    assert!(matches!(
        store.bulk_load_file(&source),
        Err(CellStoreError::NoSuchFamily(_))
    ));
    assert_eq!(store.storefile_count(), 0);
}

// =============================================================================
// Admission and Lifecycle Tests
// =============================================================================

#[test]
fn test_wrong_family_rejected() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    let result = store.put(&[Cell::put(b"r", b"x", b"q", 1, b"v")]);
    assert!(matches!(result, Err(CellStoreError::NoSuchFamily(_))));
    assert!(matches!(
        store.scan(Scan::new(b"x".to_vec())),
        Err(CellStoreError::NoSuchFamily(_))
    ));
    assert!(log.is_empty());
}

#[test]
fn test_read_only_store_refuses_writes() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let config = StoreConfig::builder().read_only(true).build();
    let store = open_with(temp.path(), &log, family(3), config);

    let result = store.put(&[Cell::put(b"r", FAMILY, b"q", 1, b"v")]);
    assert!(matches!(result, Err(CellStoreError::ReadOnly)));
    assert!(scan_rows(&store, Scan::new(FAMILY)).is_empty());
}

#[test]
fn test_too_busy_until_flushed() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let config = StoreConfig::builder()
        .flush_size(1024)
        .blocking_multiplier(1)
        .build();
    let store = open_with(temp.path(), &log, family(3), config);

    put(&store, b"a", b"q", 1, &[0u8; 2048]);
    assert!(store.needs_flush());

    let result = store.put(&[Cell::put(b"b", FAMILY, b"q", 1, b"v")]);
    assert!(matches!(result, Err(CellStoreError::TooBusy { .. })));

    store.flush().unwrap();
    assert!(!store.needs_flush());
    put(&store, b"b", b"q", 1, b"v");
}

#[test]
fn test_open_corrupt_file() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    fs::write(temp.path().join("00000000deadbeef"), b"not a sorted file").unwrap();

    let result = Store::open(temp.path(), family(3), store_config(), None, log.clone());
    assert!(result.is_err());

    let config = StoreConfig::builder().skip_corrupt_files(true).build();
    let store = open_with(temp.path(), &log, family(3), config);
    assert_eq!(store.storefile_count(), 0);
}

#[test]
fn test_close_hands_back_files() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());
    let store = open_store(temp.path(), &log);

    put(&store, b"a", b"q", 1, b"v");
    store.flush().unwrap();

    let files = store.close().unwrap();
    assert_eq!(files.len(), 1);
    assert!(matches!(store.flush(), Err(CellStoreError::Closed)));
    assert!(matches!(
        store.put(&[Cell::put(b"b", FAMILY, b"q", 1, b"v")]),
        Err(CellStoreError::Closed)
    ));
}

#[test]
fn test_reopen_orders_files_by_sequence_id() {
    let temp = TempDir::new().unwrap();
    let log = Arc::new(MemoryLog::new());

    {
        let store = open_store(temp.path(), &log);
        put(&store, b"r", b"c", 5, b"old");
        store.flush().unwrap();
        // Same key rewritten; the newer file must win
        put(&store, b"r", b"c", 5, b"new");
        store.flush().unwrap();
    }

    let store = open_store(temp.path(), &log);
    let files = store.store_files();
    assert!(files[0].max_sequence_id() < files[1].max_sequence_id());
    assert_eq!(values(&store.get(Scan::get(FAMILY, b"r")).unwrap()), vec![b"new".to_vec()]);
}
