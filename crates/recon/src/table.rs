//! In-memory delimited table. The engine never touches files; callers hand it
//! `Table`s that were loaded by `traitlist-io` (or built in tests).

use crate::error::ReconError;

/// A materialized table: header names plus rows of optional cells.
///
/// `None` is a null cell. Readers map empty-after-trim cells to `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows: Vec::new(),
        }
    }

    /// Build from string literals. Empty strings become nulls.
    pub fn from_rows(name: &str, headers: &[&str], rows: &[&[&str]]) -> Self {
        let mut table = Self::new(name, headers.iter().map(|h| h.to_string()).collect());
        for row in rows {
            table.push(row.iter().map(|c| non_empty(c)).collect());
        }
        table
    }

    pub fn push(&mut self, row: Vec<Option<String>>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    /// Column index, or a schema error naming this table.
    pub fn require(&self, column: &str) -> Result<usize, ReconError> {
        self.position(column)
            .ok_or_else(|| ReconError::missing_column(&self.name, column))
    }

    /// Cell text, trimmed; `None` for null or blank cells.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
