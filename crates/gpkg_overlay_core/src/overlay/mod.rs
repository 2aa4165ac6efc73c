//! In-memory overlay of attribute edits and row markers.
//!
//! # Responsibility
//! - Hold per-(feature, column) override values on top of the base dataset.
//! - Track row-level `Added` and `Removed` markers.
//! - Count mutations so materialized tables can be cached safely.
//!
//! # Invariants
//! - An absent override means "use base value"; `Some(Value::Null)` is an
//!   explicit edit to blank.
//! - Stored override values always match the column's declared type.
//! - `Removed` hides a row without deleting its overrides; clearing the
//!   marker restores them unchanged.
//! - Added features get store-allocated negative ids, so they never collide
//!   with dataset primary keys.
//! - `version` increases on every call that changes state and only then.
//!
//! Persistence lives in `repo::overlay_repo`; mutations here are in-memory
//! only until `persist` runs.

use crate::dataset::BaseRowSource;
use crate::model::schema::Column;
use crate::model::value::{ColumnType, FeatureId, Value};
use log::debug;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type OverlayResult<T> = Result<T, OverlayError>;

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayError {
    /// Value cannot be coerced to the column's declared type.
    TypeMismatch {
        feature_id: FeatureId,
        column: String,
        expected: ColumnType,
        found: &'static str,
    },
    /// Allocated id collides with an existing base feature.
    DuplicateFeature(FeatureId),
}

impl Display for OverlayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch {
                feature_id,
                column,
                expected,
                found,
            } => write!(
                f,
                "type mismatch for feature {feature_id} column `{column}`: expected {expected}, got {found}"
            ),
            Self::DuplicateFeature(id) => write!(f, "feature id {id} already exists"),
        }
    }
}

impl Error for OverlayError {}

/// Where a row comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RowOrigin {
    #[default]
    Base,
    Added,
}

impl RowOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Added => "added",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "base" => Some(Self::Base),
            "added" => Some(Self::Added),
            _ => None,
        }
    }
}

/// Row-level marker. The default (`Base`, not removed) is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RowMarker {
    pub origin: RowOrigin,
    pub removed: bool,
}

impl RowMarker {
    fn is_default(self) -> bool {
        self == Self::default()
    }
}

/// Edits and markers layered over the immutable base dataset.
#[derive(Debug, Clone, Default)]
pub struct OverlayStore {
    overrides: BTreeMap<FeatureId, BTreeMap<String, Value>>,
    markers: BTreeMap<FeatureId, RowMarker>,
    version: u64,
    dirty: bool,
}

impl PartialEq for OverlayStore {
    /// Two stores are equal when they hold the same overrides and markers;
    /// version counters and dirty flags are bookkeeping only.
    fn eq(&self, other: &Self) -> bool {
        self.overrides == other.overrides && self.markers == other.markers
    }
}

impl OverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the override for one cell, or `None` when unedited.
    pub fn get_override(&self, id: FeatureId, column: &str) -> Option<&Value> {
        self.overrides.get(&id).and_then(|cells| cells.get(column))
    }

    /// All overrides of one feature keyed by column name.
    pub fn overrides_for(&self, id: FeatureId) -> Option<&BTreeMap<String, Value>> {
        self.overrides.get(&id)
    }

    /// Stores an override after coercing `value` to the column type.
    ///
    /// # Errors
    /// - `TypeMismatch` when no coercion to `column.column_type` exists.
    pub fn set_override(&mut self, id: FeatureId, column: &Column, value: Value) -> OverlayResult<()> {
        let coerced = coerce_for(id, column, &value)?;
        let cells = self.overrides.entry(id).or_default();
        if cells.get(&column.name) == Some(&coerced) {
            return Ok(());
        }
        cells.insert(column.name.clone(), coerced);
        debug!(
            "event=overlay_set module=overlay status=ok feature_id={} column={}",
            id, column.name
        );
        self.touch();
        Ok(())
    }

    /// Drops one override so the base value shows again. Returns whether an
    /// override existed.
    pub fn clear_override(&mut self, id: FeatureId, column: &str) -> bool {
        let Some(cells) = self.overrides.get_mut(&id) else {
            return false;
        };
        let removed = cells.remove(column).is_some();
        if cells.is_empty() {
            self.overrides.remove(&id);
        }
        if removed {
            self.touch();
        }
        removed
    }

    /// Marks a feature removed. Idempotent.
    pub fn mark_removed(&mut self, id: FeatureId) {
        self.update_marker(id, |marker| marker.removed = true);
    }

    /// Clears the removed marker, keeping every override. Idempotent.
    pub fn clear_removed(&mut self, id: FeatureId) {
        self.update_marker(id, |marker| marker.removed = false);
    }

    pub fn is_removed(&self, id: FeatureId) -> bool {
        self.markers.get(&id).is_some_and(|marker| marker.removed)
    }

    pub fn is_added(&self, id: FeatureId) -> bool {
        self.markers
            .get(&id)
            .is_some_and(|marker| marker.origin == RowOrigin::Added)
    }

    pub fn marker(&self, id: FeatureId) -> RowMarker {
        self.markers.get(&id).copied().unwrap_or_default()
    }

    /// Ids of overlay-only features in allocation order.
    pub fn added_features(&self) -> Vec<FeatureId> {
        let mut ids: Vec<FeatureId> = self
            .markers
            .iter()
            .filter(|(_, marker)| marker.origin == RowOrigin::Added)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by(|a, b| b.cmp(a));
        ids
    }

    /// Returns whether `id` resolves to a base row or an added feature.
    pub fn resolves(&self, base: &dyn BaseRowSource, id: FeatureId) -> bool {
        self.is_added(id) || base.contains(id)
    }

    /// Creates an overlay-only feature with the given initial values.
    ///
    /// Every value is type-checked before anything is stored, so a failing
    /// call leaves the store untouched.
    ///
    /// # Errors
    /// - `TypeMismatch` for the first value that does not fit its column.
    /// - `DuplicateFeature` if the allocated id exists in the base dataset.
    pub fn add_feature(
        &mut self,
        base: &dyn BaseRowSource,
        initial_values: &[(Column, Value)],
    ) -> OverlayResult<FeatureId> {
        let id = self.next_added_id();
        if base.contains(id) {
            return Err(OverlayError::DuplicateFeature(id));
        }

        let mut cells = BTreeMap::new();
        for (column, value) in initial_values {
            cells.insert(column.name.clone(), coerce_for(id, column, value)?);
        }

        self.markers.insert(
            id,
            RowMarker {
                origin: RowOrigin::Added,
                removed: false,
            },
        );
        if !cells.is_empty() {
            self.overrides.insert(id, cells);
        }
        debug!(
            "event=overlay_add module=overlay status=ok feature_id={} values={}",
            id,
            initial_values.len()
        );
        self.touch();
        Ok(id)
    }

    /// Drops a feature created by [`OverlayStore::add_feature`] together with
    /// its initial values. Base features are left alone.
    pub(crate) fn discard_added(&mut self, id: FeatureId) {
        let added = self
            .markers
            .get(&id)
            .is_some_and(|marker| marker.origin == RowOrigin::Added);
        if added {
            self.markers.remove(&id);
            self.overrides.remove(&id);
            debug!("event=overlay_discard module=overlay status=ok feature_id={}", id);
            self.touch();
        }
    }

    /// Mutation counter; changes whenever overlay content changes.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether there are mutations not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn edit_count(&self) -> usize {
        self.overrides.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty() && self.markers.is_empty()
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn iter_overrides(&self) -> impl Iterator<Item = (FeatureId, &str, &Value)> {
        self.overrides.iter().flat_map(|(id, cells)| {
            cells
                .iter()
                .map(move |(column, value)| (*id, column.as_str(), value))
        })
    }

    pub(crate) fn iter_markers(&self) -> impl Iterator<Item = (FeatureId, RowMarker)> + '_ {
        self.markers.iter().map(|(id, marker)| (*id, *marker))
    }

    /// Inserts a persisted override without type checks or version bumps.
    pub(crate) fn restore_override(&mut self, id: FeatureId, column: String, value: Value) {
        self.overrides.entry(id).or_default().insert(column, value);
    }

    pub(crate) fn restore_marker(&mut self, id: FeatureId, marker: RowMarker) {
        if !marker.is_default() {
            self.markers.insert(id, marker);
        }
    }

    fn update_marker(&mut self, id: FeatureId, change: impl FnOnce(&mut RowMarker)) {
        let current = self.marker(id);
        let mut next = current;
        change(&mut next);
        if next == current {
            return;
        }
        if next.is_default() {
            self.markers.remove(&id);
        } else {
            self.markers.insert(id, next);
        }
        debug!(
            "event=overlay_marker module=overlay status=ok feature_id={} removed={}",
            id, next.removed
        );
        self.touch();
    }

    fn next_added_id(&self) -> FeatureId {
        let lowest = self
            .markers
            .keys()
            .chain(self.overrides.keys())
            .map(|id| id.get())
            .min()
            .unwrap_or(0);
        FeatureId(lowest.min(0) - 1)
    }

    fn touch(&mut self) {
        self.version += 1;
        self.dirty = true;
    }
}

fn coerce_for(id: FeatureId, column: &Column, value: &Value) -> OverlayResult<Value> {
    value
        .coerce_to(column.column_type)
        .ok_or_else(|| OverlayError::TypeMismatch {
            feature_id: id,
            column: column.name.clone(),
            expected: column.column_type,
            found: value.kind_name(),
        })
}

#[cfg(test)]
mod tests {
    use super::{OverlayError, OverlayStore, RowOrigin};
    use crate::dataset::MemoryDataset;
    use crate::model::schema::Column;
    use crate::model::value::{ColumnType, FeatureId, Value};

    fn val_column() -> Column {
        Column::hidden("VAL", ColumnType::Number)
    }

    #[test]
    fn absent_and_null_overrides_are_distinct() {
        let mut store = OverlayStore::new();
        assert_eq!(store.get_override(FeatureId(1), "VAL"), None);

        store
            .set_override(FeatureId(1), &val_column(), Value::Null)
            .unwrap();
        assert_eq!(store.get_override(FeatureId(1), "VAL"), Some(&Value::Null));
    }

    #[test]
    fn text_is_coerced_to_number_columns() {
        let mut store = OverlayStore::new();
        store
            .set_override(FeatureId(1), &val_column(), Value::text("20"))
            .unwrap();
        assert_eq!(
            store.get_override(FeatureId(1), "VAL"),
            Some(&Value::Number(20.0))
        );

        let err = store
            .set_override(FeatureId(1), &val_column(), Value::text("twenty"))
            .unwrap_err();
        assert!(matches!(err, OverlayError::TypeMismatch { found: "text", .. }));
        assert_eq!(
            store.get_override(FeatureId(1), "VAL"),
            Some(&Value::Number(20.0))
        );
    }

    #[test]
    fn identical_overwrite_does_not_bump_version() {
        let mut store = OverlayStore::new();
        store
            .set_override(FeatureId(1), &val_column(), Value::Number(3.0))
            .unwrap();
        let version = store.version();
        store
            .set_override(FeatureId(1), &val_column(), Value::Number(3.0))
            .unwrap();
        assert_eq!(store.version(), version);
    }

    #[test]
    fn removed_marker_toggles_idempotently_and_keeps_edits() {
        let mut store = OverlayStore::new();
        store
            .set_override(FeatureId(4), &val_column(), Value::Number(1.0))
            .unwrap();

        store.mark_removed(FeatureId(4));
        store.mark_removed(FeatureId(4));
        assert!(store.is_removed(FeatureId(4)));

        store.clear_removed(FeatureId(4));
        store.clear_removed(FeatureId(4));
        assert!(!store.is_removed(FeatureId(4)));
        assert_eq!(
            store.get_override(FeatureId(4), "VAL"),
            Some(&Value::Number(1.0))
        );
        assert_eq!(store.iter_markers().count(), 0);
    }

    #[test]
    fn added_features_get_fresh_negative_ids() {
        let base = MemoryDataset::new(vec![val_column()])
            .with_row(FeatureId(1), [("VAL", Value::Number(1.0))]);
        let mut store = OverlayStore::new();

        let first = store
            .add_feature(&base, &[(val_column(), Value::Number(5.0))])
            .unwrap();
        let second = store.add_feature(&base, &[]).unwrap();

        assert_eq!(first, FeatureId(-1));
        assert_eq!(second, FeatureId(-2));
        assert!(store.is_added(first));
        assert_eq!(store.marker(first).origin, RowOrigin::Added);
        assert_eq!(store.added_features(), vec![first, second]);
    }

    #[test]
    fn add_feature_with_bad_value_leaves_store_untouched() {
        let base = MemoryDataset::new(vec![val_column()]);
        let mut store = OverlayStore::new();
        let err = store
            .add_feature(&base, &[(val_column(), Value::text("nope"))])
            .unwrap_err();
        assert!(matches!(err, OverlayError::TypeMismatch { .. }));
        assert!(store.is_empty());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn add_feature_rejects_collision_with_base_id() {
        let base = MemoryDataset::new(vec![val_column()]).with_row(FeatureId(-1), [("VAL", Value::Null)]);
        let mut store = OverlayStore::new();
        let err = store.add_feature(&base, &[]).unwrap_err();
        assert_eq!(err, OverlayError::DuplicateFeature(FeatureId(-1)));
    }
}
