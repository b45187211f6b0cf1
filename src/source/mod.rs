//! Row sources: uniform slice-at-a-time pagination over a CSV file, a host
//! query, or an external cursor-paginated API.
//!
//! All variants hand back [`SourceBatch`] slices so the orchestrator can
//! drive export, import, and sync through one loop.

mod cursor;
mod file;

pub use cursor::{CursorSource, RowFetcher, SyncPage};
pub use file::CsvFileSource;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// One logical data row: an ordered list of (column, value) pairs.
///
/// Order is preserved from the producing source; the CSV sink fixes its
/// column order from the first record it sees. Lookups are by column name;
/// a record may carry fewer or more columns than its header (ragged CSV
/// rows are emitted, not dropped).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Creates a record from ordered (column, value) pairs.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self { fields: pairs }
    }

    /// Appends a column. Duplicate names keep the first value for lookups.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.fields.push((column.into(), value.into()));
    }

    /// Returns the value of the first column with the given name.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// Column names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, v)| v.as_str())
    }

    /// Ordered (column, value) pairs.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the record has no columns at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True iff every value is empty after trimming.
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.trim().is_empty())
    }
}

impl FromIterator<(String, String)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Position
// ─────────────────────────────────────────────────────────────────────────────

/// Where the next batch should resume from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Position {
    /// Zero-based data-row offset (header row excluded from counting).
    Offset(u64),
    /// Opaque cursor handed back by the external API. Never interpreted,
    /// only passed back unchanged on the next call. `None` means "from the
    /// beginning".
    Cursor(Option<String>),
}

impl Default for Position {
    fn default() -> Self {
        Position::Offset(0)
    }
}

impl Position {
    /// Returns the offset, or 0 for cursor positions.
    pub fn offset(&self) -> u64 {
        match self {
            Position::Offset(n) => *n,
            Position::Cursor(_) => 0,
        }
    }

    /// Returns the cursor string, if this is a cursor position.
    pub fn cursor(&self) -> Option<&str> {
        match self {
            Position::Cursor(c) => c.as_deref(),
            Position::Offset(_) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SourceBatch
// ─────────────────────────────────────────────────────────────────────────────

/// One slice pulled from a row source.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    /// The rows in this slice. May be fewer than requested at the tail.
    pub rows: Vec<Record>,
    /// True if another call at `next` would yield more rows.
    pub has_more: bool,
    /// Position to resume from on the next call.
    pub next: Position,
    /// Total item count, if the source knows it. Cursor sources may report
    /// this lazily (None on early pages); adopt it once seen.
    pub total: Option<u64>,
}
