//! Materialized working table.
//!
//! # Responsibility
//! - Hold the merged rows one plan exposes, in plan order, with only the
//!   visible columns.
//! - Carry non-fatal merge issues alongside the rows.
//!
//! # Invariants
//! - Every row has exactly one value per table column.
//! - A feature id appears at most once.

use crate::model::schema::Column;
use crate::model::value::{FeatureId, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};

/// Data-integrity problem found while materializing. The affected row is
/// left out; the rest of the table is still usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeIssue {
    /// Plan references an id that is neither a base row nor an added feature.
    DanglingFeatureReference { feature_id: FeatureId },
}

impl Display for MergeIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingFeatureReference { feature_id } => {
                write!(f, "dangling feature reference: {feature_id}")
            }
        }
    }
}

/// Merged values for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingRow {
    pub feature_id: FeatureId,
    /// Values in table column order.
    pub values: Vec<Value>,
    /// Indexes of columns whose value came from an overlay override.
    pub edited_columns: BTreeSet<usize>,
    /// Row exists only in the overlay.
    pub added: bool,
}

impl WorkingRow {
    pub fn is_edited(&self, column_index: usize) -> bool {
        self.edited_columns.contains(&column_index)
    }
}

/// Result of merging base rows with the overlay under one plan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkingTable {
    columns: Vec<Column>,
    rows: Vec<WorkingRow>,
    row_index: HashMap<FeatureId, usize>,
    issues: Vec<MergeIssue>,
}

impl WorkingTable {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    pub(crate) fn push_row(&mut self, row: WorkingRow) {
        self.row_index.insert(row.feature_id, self.rows.len());
        self.rows.push(row);
    }

    pub(crate) fn push_issue(&mut self, issue: MergeIssue) {
        self.issues.push(issue);
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[WorkingRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, id: FeatureId) -> Option<&WorkingRow> {
        self.row_index.get(&id).map(|index| &self.rows[*index])
    }

    /// Value of `column` in `row`, or `None` when the column is not part of
    /// this table.
    pub fn value<'a>(&self, row: &'a WorkingRow, column: &str) -> Option<&'a Value> {
        self.column_index(column)
            .and_then(|index| row.values.get(index))
    }

    pub fn issues(&self) -> &[MergeIssue] {
        &self.issues
    }
}
