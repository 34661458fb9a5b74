//! Column version tracking within one row
//!
//! Counts the versions returned per column. The explicit tracker only
//! admits the requested qualifiers; the wildcard tracker admits every
//! qualifier. Both are reset at each new row.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::matcher::MatchCode;

#[derive(Debug)]
pub enum ColumnTracker {
    Explicit(ExplicitColumnTracker),
    Wildcard(WildcardColumnTracker),
}

impl ColumnTracker {
    /// Explicit tracking when `columns` is non-empty, wildcard otherwise
    pub fn new(columns: &BTreeSet<Vec<u8>>, max_versions: usize) -> Self {
        if columns.is_empty() {
            ColumnTracker::Wildcard(WildcardColumnTracker::new(max_versions))
        } else {
            ColumnTracker::Explicit(ExplicitColumnTracker::new(columns, max_versions))
        }
    }

    /// Count a visible version of `qualifier`
    pub fn check_column(&mut self, qualifier: &[u8]) -> MatchCode {
        match self {
            ColumnTracker::Explicit(tracker) => tracker.check_column(qualifier),
            ColumnTracker::Wildcard(tracker) => tracker.check_column(qualifier),
        }
    }

    /// Whether nothing more in this row can be returned
    pub fn done(&self) -> bool {
        match self {
            ColumnTracker::Explicit(tracker) => tracker.done(),
            ColumnTracker::Wildcard(_) => false,
        }
    }

    pub fn reset(&mut self) {
        match self {
            ColumnTracker::Explicit(tracker) => tracker.reset(),
            ColumnTracker::Wildcard(tracker) => tracker.reset(),
        }
    }
}

// =============================================================================
// Explicit
// =============================================================================

#[derive(Debug)]
pub struct ExplicitColumnTracker {
    /// Requested qualifiers in order
    columns: Vec<Vec<u8>>,
    /// Versions still wanted per requested qualifier
    remaining: Vec<usize>,
    index: usize,
    max_versions: usize,
}

impl ExplicitColumnTracker {
    pub fn new(columns: &BTreeSet<Vec<u8>>, max_versions: usize) -> Self {
        let columns: Vec<Vec<u8>> = columns.iter().cloned().collect();
        let remaining = vec![max_versions; columns.len()];
        Self {
            columns,
            remaining,
            index: 0,
            max_versions,
        }
    }

    pub fn check_column(&mut self, qualifier: &[u8]) -> MatchCode {
        loop {
            let Some(wanted) = self.columns.get(self.index) else {
                return MatchCode::SeekNextRow;
            };

            match wanted.as_slice().cmp(qualifier) {
                Ordering::Equal => {
                    if self.remaining[self.index] == 0 {
                        return MatchCode::SeekNextColumn;
                    }
                    self.remaining[self.index] -= 1;
                    if self.remaining[self.index] == 0 {
                        // Later versions of this column seek past it
                        self.index += 1;
                    }
                    return MatchCode::Include;
                }
                // The cell's column was not requested
                Ordering::Greater => return MatchCode::SeekNextColumn,
                // The requested column is absent from this row
                Ordering::Less => self.index += 1,
            }
        }
    }

    pub fn done(&self) -> bool {
        self.index >= self.columns.len()
    }

    pub fn reset(&mut self) {
        self.index = 0;
        for remaining in &mut self.remaining {
            *remaining = self.max_versions;
        }
    }
}

// =============================================================================
// Wildcard
// =============================================================================

#[derive(Debug)]
pub struct WildcardColumnTracker {
    current: Option<Vec<u8>>,
    count: usize,
    max_versions: usize,
}

impl WildcardColumnTracker {
    pub fn new(max_versions: usize) -> Self {
        Self {
            current: None,
            count: 0,
            max_versions,
        }
    }

    pub fn check_column(&mut self, qualifier: &[u8]) -> MatchCode {
        let same = self.current.as_deref() == Some(qualifier);
        if !same {
            self.current = Some(qualifier.to_vec());
            self.count = 0;
        }
        self.count += 1;
        if self.count > self.max_versions {
            MatchCode::SeekNextColumn
        } else {
            MatchCode::Include
        }
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.count = 0;
    }
}
