//! Read requests
//!
//! A `Scan` names a row range (or a single row for gets), the columns of
//! the family to return, a time range, how many versions per column to
//! return, and an optional caller predicate.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::cell::Cell;
use crate::error::{CellStoreError, Result};

// =============================================================================
// Time Range
// =============================================================================

/// Half-open timestamp interval `[min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    min: i64,
    max: i64,
}

impl TimeRange {
    /// Every timestamp
    pub fn all() -> Self {
        Self {
            min: 0,
            max: i64::MAX,
        }
    }

    pub fn new(min: i64, max: i64) -> Result<Self> {
        if min > max {
            return Err(CellStoreError::InvalidTimeRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Exactly one timestamp
    pub fn at(ts: i64) -> Self {
        Self {
            min: ts,
            max: ts.saturating_add(1),
        }
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn is_all(&self) -> bool {
        self.min == 0 && self.max == i64::MAX
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.min <= ts && ts < self.max
    }

    /// Compare a timestamp against the range: negative when it is below
    /// `min`, positive when at or past `max`
    pub fn compare(&self, ts: i64) -> i32 {
        if ts < self.min {
            -1
        } else if ts >= self.max {
            1
        } else {
            0
        }
    }

    /// Whether any timestamp in the closed file interval `[lo, hi]` falls
    /// in this range
    pub fn overlaps_closed(&self, lo: i64, hi: i64) -> bool {
        lo < self.max && hi >= self.min
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

// =============================================================================
// Cell Filter
// =============================================================================

/// Verdict of a caller predicate on one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Include,
    Skip,
    NextColumn,
    NextRow,
}

/// Caller predicate applied after versions and deletes are resolved
pub trait CellFilter: Send + Sync {
    fn filter_cell(&self, cell: &Cell) -> FilterDecision;

    /// `true` once no later row can match; ends the scan
    fn filter_all_remaining(&self) -> bool {
        false
    }
}

impl<F> CellFilter for F
where
    F: Fn(&Cell) -> FilterDecision + Send + Sync,
{
    fn filter_cell(&self, cell: &Cell) -> FilterDecision {
        self(cell)
    }
}

// =============================================================================
// Scan
// =============================================================================

#[derive(Clone)]
pub struct Scan {
    family: Vec<u8>,
    start_row: Vec<u8>,
    /// Exclusive; empty means "to the end"
    stop_row: Vec<u8>,
    get: bool,
    columns: BTreeSet<Vec<u8>>,
    time_range: TimeRange,
    max_versions: usize,
    filter: Option<Arc<dyn CellFilter>>,
    cache_blocks: bool,
}

impl Scan {
    /// Full-family scan over every row
    pub fn new(family: impl Into<Vec<u8>>) -> Self {
        Self {
            family: family.into(),
            start_row: Vec::new(),
            stop_row: Vec::new(),
            get: false,
            columns: BTreeSet::new(),
            time_range: TimeRange::all(),
            max_versions: 1,
            filter: None,
            cache_blocks: true,
        }
    }

    /// Point lookup of one row
    pub fn get(family: impl Into<Vec<u8>>, row: &[u8]) -> Self {
        let mut scan = Self::new(family);
        scan.start_row = row.to_vec();
        scan.stop_row = row.to_vec();
        scan.get = true;
        scan
    }

    pub fn with_start_row(mut self, row: &[u8]) -> Self {
        self.start_row = row.to_vec();
        self
    }

    pub fn with_stop_row(mut self, row: &[u8]) -> Self {
        self.stop_row = row.to_vec();
        self
    }

    /// Restrict to one qualifier; repeat for more. No columns means all.
    pub fn add_column(mut self, qualifier: &[u8]) -> Self {
        self.columns.insert(qualifier.to_vec());
        self
    }

    pub fn with_time_range(mut self, min: i64, max: i64) -> Result<Self> {
        self.time_range = TimeRange::new(min, max)?;
        Ok(self)
    }

    pub fn with_timestamp(mut self, ts: i64) -> Self {
        self.time_range = TimeRange::at(ts);
        self
    }

    pub fn with_max_versions(mut self, versions: usize) -> Self {
        self.max_versions = versions.max(1);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn CellFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Whether blocks read by this scan are added to the cache
    pub fn with_cache_blocks(mut self, cache_blocks: bool) -> Self {
        self.cache_blocks = cache_blocks;
        self
    }

    pub fn family(&self) -> &[u8] {
        &self.family
    }

    pub fn start_row(&self) -> &[u8] {
        &self.start_row
    }

    pub fn stop_row(&self) -> &[u8] {
        &self.stop_row
    }

    pub fn is_get(&self) -> bool {
        self.get
    }

    pub fn columns(&self) -> &BTreeSet<Vec<u8>> {
        &self.columns
    }

    pub fn time_range(&self) -> &TimeRange {
        &self.time_range
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    pub fn filter(&self) -> Option<&Arc<dyn CellFilter>> {
        self.filter.as_ref()
    }

    pub fn cache_blocks(&self) -> bool {
        self.cache_blocks
    }

    /// Whether `row` lies past the end of this scan
    pub fn is_past_stop(&self, row: &[u8]) -> bool {
        if self.get {
            return row != self.start_row.as_slice();
        }
        !self.stop_row.is_empty() && row >= self.stop_row.as_slice()
    }
}

impl fmt::Debug for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scan")
            .field("family", &String::from_utf8_lossy(&self.family))
            .field("start_row", &String::from_utf8_lossy(&self.start_row))
            .field("stop_row", &String::from_utf8_lossy(&self.stop_row))
            .field("get", &self.get)
            .field("columns", &self.columns.len())
            .field("time_range", &self.time_range)
            .field("max_versions", &self.max_versions)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}
