//! Column definitions and per-plan column modes.
//!
//! # Responsibility
//! - Describe the typed columns a plan exposes and how each one is shown.
//! - Merge persisted `{column -> mode}` configuration onto dataset columns.
//!
//! # Invariants
//! - Column names are unique within one `Schema`.
//! - Declaration order is the display and export order.
//! - Modes are plan-local; the same column may be editable in one plan and
//!   hidden in another.

use crate::model::value::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Visibility/edit mode of one column inside a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnMode {
    #[default]
    Hidden,
    Display,
    Editable,
}

impl ColumnMode {
    /// Rotates Hidden -> Display -> Editable -> Hidden.
    pub fn cycle(self) -> Self {
        match self {
            Self::Hidden => Self::Display,
            Self::Display => Self::Editable,
            Self::Editable => Self::Hidden,
        }
    }

    pub fn is_visible(self) -> bool {
        self != Self::Hidden
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::Display => "display",
            Self::Editable => "editable",
        }
    }

    /// Parses persisted mode names, including the labels older sidecar
    /// stores wrote.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "hidden" | "非表示" => Some(Self::Hidden),
            "display" | "表示のみ" => Some(Self::Display),
            "editable" | "表示＋編集" => Some(Self::Editable),
            _ => None,
        }
    }
}

/// One typed column with its plan-local mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub mode: ColumnMode,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType, mode: ColumnMode) -> Self {
        Self {
            name: name.into(),
            column_type,
            mode,
        }
    }

    /// Column as supplied by a dataset reader: no plan has configured it yet.
    pub fn hidden(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self::new(name, column_type, ColumnMode::Hidden)
    }
}

/// Persisted form of one column configuration entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    pub mode: ColumnMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    DuplicateColumn(String),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateColumn(name) => write!(f, "duplicate column name `{name}`"),
        }
    }
}

impl Error for SchemaError {}

/// Ordered, uniquely named column set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Builds a schema, rejecting duplicate names.
    pub fn new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    /// Builds a schema from dataset columns with every column hidden.
    pub fn from_columns(columns: &[Column]) -> Result<Self, SchemaError> {
        Self::new(
            columns
                .iter()
                .map(|column| Column::hidden(column.name.clone(), column.column_type))
                .collect(),
        )
    }

    /// Resolves persisted configuration against dataset columns.
    ///
    /// Configured columns come first, in configuration order; dataset
    /// columns the configuration does not mention follow as hidden.
    /// Configured names the dataset no longer has are ignored.
    pub fn resolve(dataset_columns: &[Column], config: &[ColumnConfig]) -> Result<Self, SchemaError> {
        let mut columns = Vec::with_capacity(dataset_columns.len());
        let mut placed = HashSet::new();
        for entry in config {
            let Some(column) = dataset_columns.iter().find(|c| c.name == entry.name) else {
                continue;
            };
            if placed.insert(column.name.as_str()) {
                columns.push(Column::new(column.name.clone(), column.column_type, entry.mode));
            }
        }
        for column in dataset_columns {
            if placed.insert(column.name.as_str()) {
                columns.push(Column::hidden(column.name.clone(), column.column_type));
            }
        }
        Self::new(columns)
    }

    /// Applies `{name -> mode}` entries in place, ignoring unknown names.
    pub fn apply_modes(&mut self, config: &[ColumnConfig]) {
        for entry in config {
            if let Some(column) = self.columns.iter_mut().find(|c| c.name == entry.name) {
                column.mode = entry.mode;
            }
        }
    }

    /// Sets one column mode. Returns `false` when the column is unknown.
    pub fn set_mode(&mut self, name: &str, mode: ColumnMode) -> bool {
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(column) => {
                column.mode = mode;
                true
            }
            None => false,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Columns with mode other than `Hidden`, in declaration order.
    pub fn visible(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.mode.is_visible())
    }

    pub fn display_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.mode == ColumnMode::Display)
    }

    pub fn editable_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.mode == ColumnMode::Editable)
    }

    /// Persisted `{name, mode}` form in declaration order.
    pub fn to_config(&self) -> Vec<ColumnConfig> {
        self.columns
            .iter()
            .map(|column| ColumnConfig {
                name: column.name.clone(),
                mode: column.mode,
            })
            .collect()
    }
}
