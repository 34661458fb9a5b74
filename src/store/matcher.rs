//! Scan Query Matcher
//!
//! Decides, cell by cell, what a store scan does next. Checks run in this
//! order for every cell:
//!
//! 1. stop row reached or the filter is done with the scan
//! 2. every requested column already satisfied
//! 3. expired by TTL, or outside the scan's time range
//! 4. covered by a delete marker seen earlier in the row
//! 5. version budget of the column
//! 6. the scan's filter

use std::sync::Arc;

use crate::cell::Cell;

use super::column_tracker::ColumnTracker;
use super::delete_tracker::DeleteTracker;
use super::oldest_timestamp;
use super::scan::{CellFilter, FilterDecision, Scan, TimeRange};

/// Outcome of matching one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCode {
    /// Return the cell
    Include,
    /// Drop the cell and move to the next one
    Skip,
    /// Drop the cell and seek past its column
    SeekNextColumn,
    /// Drop the cell and seek past its row
    SeekNextRow,
    /// The current row is complete; the cell belongs to the next one
    Done,
    /// Nothing further can match
    DoneScan,
}

pub struct ScanQueryMatcher {
    columns: ColumnTracker,
    deletes: DeleteTracker,
    time_range: TimeRange,
    /// Cells older than this have expired
    oldest_stamp: i64,
    /// Exclusive stop row; empty means "to the end"
    stop_row: Vec<u8>,
    /// Single row of a get
    get_row: Option<Vec<u8>>,
    filter: Option<Arc<dyn CellFilter>>,
    row: Option<Vec<u8>>,
    sticky_next_row: bool,
}

impl ScanQueryMatcher {
    /// Matcher for a user scan; versions are capped by the family setting
    pub fn for_scan(scan: &Scan, family_max_versions: usize, ttl_millis: i64, now: i64) -> Self {
        let max_versions = scan.max_versions().min(family_max_versions).max(1);
        Self {
            columns: ColumnTracker::new(scan.columns(), max_versions),
            deletes: DeleteTracker::new(),
            time_range: *scan.time_range(),
            oldest_stamp: oldest_timestamp(ttl_millis, now),
            stop_row: scan.stop_row().to_vec(),
            get_row: scan.is_get().then(|| scan.start_row().to_vec()),
            filter: scan.filter().cloned(),
            row: None,
            sticky_next_row: false,
        }
    }

    /// Matcher for a major compaction: family version and TTL limits apply,
    /// delete markers and the cells they cover are dropped
    pub fn for_compaction(max_versions: usize, ttl_millis: i64, now: i64) -> Self {
        Self {
            columns: ColumnTracker::new(&Default::default(), max_versions.max(1)),
            deletes: DeleteTracker::new(),
            time_range: TimeRange::all(),
            oldest_stamp: oldest_timestamp(ttl_millis, now),
            stop_row: Vec::new(),
            get_row: None,
            filter: None,
            row: None,
            sticky_next_row: false,
        }
    }

    pub fn row(&self) -> Option<&[u8]> {
        self.row.as_deref()
    }

    /// Start matching a new row
    pub fn set_row(&mut self, row: &[u8]) {
        self.row = Some(row.to_vec());
        self.reset();
    }

    pub fn reset(&mut self) {
        self.columns.reset();
        self.deletes.reset();
        self.sticky_next_row = false;
    }

    pub fn match_cell(&mut self, cell: &Cell) -> MatchCode {
        if self.filter.as_ref().is_some_and(|f| f.filter_all_remaining()) {
            return MatchCode::DoneScan;
        }

        match self.row.as_deref() {
            Some(row) if cell.row() != row => {
                return if cell.row() > row {
                    MatchCode::Done
                } else {
                    MatchCode::SeekNextRow
                };
            }
            Some(_) => {}
            None => self.set_row(cell.row()),
        }

        if self.is_past_stop(cell.row()) {
            return MatchCode::DoneScan;
        }

        if self.sticky_next_row || self.columns.done() {
            self.sticky_next_row = true;
            return MatchCode::SeekNextRow;
        }

        let timestamp = cell.timestamp();
        // Every older version of the column has expired too
        if timestamp < self.oldest_stamp {
            return MatchCode::SeekNextColumn;
        }

        if cell.is_delete() {
            self.deletes.add(cell.qualifier(), timestamp, cell.cell_type());
            return MatchCode::Skip;
        }

        if !self.deletes.is_empty() && self.deletes.is_deleted(cell.qualifier(), timestamp) {
            return MatchCode::Skip;
        }

        match self.time_range.compare(timestamp) {
            c if c > 0 => return MatchCode::Skip,
            c if c < 0 => return self.next_row_or_column(),
            _ => {}
        }

        let code = self.columns.check_column(cell.qualifier());
        if code != MatchCode::Include {
            if code == MatchCode::SeekNextRow {
                self.sticky_next_row = true;
            }
            return code;
        }

        match self.filter.as_ref().map(|f| f.filter_cell(cell)) {
            None | Some(FilterDecision::Include) => MatchCode::Include,
            Some(FilterDecision::Skip) => MatchCode::Skip,
            Some(FilterDecision::NextColumn) => self.next_row_or_column(),
            Some(FilterDecision::NextRow) => {
                self.sticky_next_row = true;
                MatchCode::SeekNextRow
            }
        }
    }

    fn is_past_stop(&self, row: &[u8]) -> bool {
        match &self.get_row {
            Some(get_row) => row != get_row.as_slice(),
            None => !self.stop_row.is_empty() && row >= self.stop_row.as_slice(),
        }
    }

    fn next_row_or_column(&mut self) -> MatchCode {
        if self.columns.done() {
            self.sticky_next_row = true;
            MatchCode::SeekNextRow
        } else {
            MatchCode::SeekNextColumn
        }
    }

    /// Seek target past the row of `cell`
    pub fn key_for_next_row(&self, cell: &Cell) -> Cell {
        Cell::last_on_row(cell.row())
    }

    /// Seek target past the column of `cell`
    pub fn key_for_next_column(&self, cell: &Cell) -> Cell {
        Cell::last_on_column(cell.row(), cell.family(), cell.qualifier())
    }
}
