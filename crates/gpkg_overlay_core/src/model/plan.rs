//! Plan domain model.
//!
//! # Responsibility
//! - Bundle feature membership, column configuration and status rows under
//!   one persisted name.
//!
//! # Invariants
//! - `name` is trimmed, non-empty, and is the persistence key.
//! - `feature_ids` defines both membership and display order; it holds no
//!   duplicates.
//! - A plan never owns overlay records; those are shared across plans.

use crate::model::schema::Schema;
use crate::model::value::FeatureId;
use serde::{Deserialize, Serialize};

/// One labelled status expression shown under the working table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub label: String,
    /// Expression source text. Parsed on demand, never evaluated eagerly.
    pub expression: String,
}

impl StatusRow {
    pub fn new(label: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            expression: expression.into(),
        }
    }
}

/// Named working set: which features, which columns, which status rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub name: String,
    pub feature_ids: Vec<FeatureId>,
    pub schema: Schema,
    pub status_rows: Vec<StatusRow>,
}

impl Plan {
    pub fn new(name: impl Into<String>, feature_ids: Vec<FeatureId>, schema: Schema) -> Self {
        let mut plan = Self {
            name: name.into(),
            feature_ids: Vec::new(),
            schema,
            status_rows: Vec::new(),
        };
        plan.add_features(&feature_ids);
        plan
    }

    pub fn with_status_rows(mut self, status_rows: Vec<StatusRow>) -> Self {
        self.status_rows = status_rows;
        self
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.feature_ids.contains(&id)
    }

    /// Appends ids that are not members yet. Returns how many were added.
    pub fn add_features(&mut self, ids: &[FeatureId]) -> usize {
        let mut added = 0;
        for id in ids {
            if !self.feature_ids.contains(id) {
                self.feature_ids.push(*id);
                added += 1;
            }
        }
        added
    }

    /// Drops the given ids from membership. Returns how many were removed.
    pub fn remove_features(&mut self, ids: &[FeatureId]) -> usize {
        let before = self.feature_ids.len();
        self.feature_ids.retain(|id| !ids.contains(id));
        before - self.feature_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::Plan;
    use crate::model::schema::Schema;
    use crate::model::value::FeatureId;

    #[test]
    fn membership_keeps_order_and_ignores_duplicates() {
        let mut plan = Plan::new(
            "P1",
            vec![FeatureId(3), FeatureId(1), FeatureId(3)],
            Schema::default(),
        );
        assert_eq!(plan.feature_ids, vec![FeatureId(3), FeatureId(1)]);

        assert_eq!(plan.add_features(&[FeatureId(1), FeatureId(9)]), 1);
        assert_eq!(plan.remove_features(&[FeatureId(3), FeatureId(42)]), 1);
        assert_eq!(plan.feature_ids, vec![FeatureId(1), FeatureId(9)]);
    }
}
