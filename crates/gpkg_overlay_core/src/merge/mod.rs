//! Merge engine: base rows + overlay -> working table.
//!
//! # Responsibility
//! - Materialize the rows one plan exposes, applying overlay overrides on
//!   top of base values.
//!
//! # Invariants
//! - Output is a pure function of (plan, base snapshot, overlay snapshot).
//! - An override always wins over the base value for the same cell.
//! - `Removed` rows are skipped whatever the plan says.
//! - Only non-hidden columns are materialized, in schema order.
//! - A plan id that resolves to nothing becomes a `MergeIssue`, never a
//!   silently dropped row and never a hard failure.

use crate::dataset::BaseRowSource;
use crate::model::plan::Plan;
use crate::model::schema::Column;
use crate::model::table::{MergeIssue, WorkingRow, WorkingTable};
use crate::model::value::Value;
use crate::overlay::OverlayStore;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::time::Instant;

/// Builds the working table for `plan`.
pub fn materialize(plan: &Plan, base: &dyn BaseRowSource, overlay: &OverlayStore) -> WorkingTable {
    let started_at = Instant::now();
    let columns: Vec<Column> = plan.schema.visible().cloned().collect();
    let mut table = WorkingTable::new(columns.clone());
    let mut skipped_removed = 0usize;

    for id in &plan.feature_ids {
        let id = *id;
        if overlay.is_removed(id) {
            skipped_removed += 1;
            continue;
        }

        let added = overlay.is_added(id);
        let base_row = if added {
            None
        } else {
            match base.get_row(id) {
                Ok(row) => Some(row),
                Err(err) => {
                    warn!(
                        "event=materialize module=merge status=warn error_code=dangling_feature feature_id={} error={}",
                        id, err
                    );
                    table.push_issue(MergeIssue::DanglingFeatureReference { feature_id: id });
                    continue;
                }
            }
        };

        let mut values = Vec::with_capacity(columns.len());
        let mut edited_columns = BTreeSet::new();
        for (index, column) in columns.iter().enumerate() {
            if let Some(value) = overlay.get_override(id, &column.name) {
                values.push(value.clone());
                edited_columns.insert(index);
            } else {
                let value = base_row
                    .and_then(|row| row.get(&column.name))
                    .cloned()
                    .unwrap_or(Value::Null);
                values.push(value);
            }
        }

        table.push_row(WorkingRow {
            feature_id: id,
            values,
            edited_columns,
            added,
        });
    }

    debug!(
        "event=materialize module=merge status=ok rows={} removed={} issues={} duration_ms={}",
        table.len(),
        skipped_removed,
        table.issues().len(),
        started_at.elapsed().as_millis()
    );
    table
}
