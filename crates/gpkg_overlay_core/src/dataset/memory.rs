//! In-memory base dataset.

use crate::dataset::{BaseRow, BaseRowSource, DatasetError, DatasetResult};
use crate::model::schema::Column;
use crate::model::value::{FeatureId, Value};
use std::collections::HashMap;

/// Base dataset held fully in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataset {
    columns: Vec<Column>,
    order: Vec<FeatureId>,
    rows: HashMap<FeatureId, BaseRow>,
}

impl MemoryDataset {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// Inserts or replaces one base row. Columns left out read as null.
    pub fn insert_row<I, K>(&mut self, id: FeatureId, values: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut row: BaseRow = self
            .columns
            .iter()
            .map(|column| (column.name.clone(), Value::Null))
            .collect();
        for (name, value) in values {
            row.insert(name.into(), value);
        }
        if self.rows.insert(id, row).is_none() {
            self.order.push(id);
        }
    }

    pub fn with_row<I, K>(mut self, id: FeatureId, values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.insert_row(id, values);
        self
    }
}

impl BaseRowSource for MemoryDataset {
    fn list_columns(&self) -> &[Column] {
        &self.columns
    }

    fn list_feature_ids(&self) -> Vec<FeatureId> {
        self.order.clone()
    }

    fn get_row(&self, id: FeatureId) -> DatasetResult<&BaseRow> {
        self.rows.get(&id).ok_or(DatasetError::NotFound(id))
    }

    fn contains(&self, id: FeatureId) -> bool {
        self.rows.contains_key(&id)
    }
}
