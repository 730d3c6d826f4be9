//! Neutral row/column representation of a winning answer.

use std::fmt;

use crate::config::TargetId;

/// One row as produced by a replica: nullable text cells in column order.
pub type RawRow = Vec<Option<String>>;

/// Result of a successful query attempt.
///
/// Every row holds exactly `columns.len()` cells. NULL cells are stored as the
/// empty string, so NULL and `''` are indistinguishable here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    source: TargetId,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl QueryResult {
    pub(crate) fn new(source: TargetId, columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        debug_assert!(rows.iter().all(|row| row.len() == columns.len()));
        Self {
            source,
            columns,
            rows,
        }
    }

    /// The replica that produced this result.
    pub fn source(&self) -> &TargetId {
        &self.source
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_parts(self) -> (TargetId, Vec<String>, Vec<Vec<String>>) {
        (self.source, self.columns, self.rows)
    }
}

/// Turns a raw row into text cells, mapping NULL to the empty string.
pub(crate) fn materialize(row: RawRow) -> Vec<String> {
    row.into_iter().map(Option::unwrap_or_default).collect()
}

/// Tab-separated rendering: a `-- source` line, the header, then one line per row.
impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- {}", self.source)?;
        writeln!(f, "{}", self.columns.join("\t"))?;
        for row in &self.rows {
            writeln!(f, "{}", row.join("\t"))?;
        }
        Ok(())
    }
}
