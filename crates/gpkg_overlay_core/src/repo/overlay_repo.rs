//! Overlay snapshot persistence on SQLite.
//!
//! # Responsibility
//! - Save the whole in-memory overlay as one atomic snapshot.
//! - Load a snapshot back, skipping rows that cannot be decoded.
//!
//! # Invariants
//! - `edits` and `feature_markers` are replaced inside one transaction.
//! - A cancelled save rolls back; readers never see a partial snapshot.
//! - `value_kind` distinguishes an explicit null edit from no edit.

use crate::exclusive::CancelToken;
use crate::model::value::{FeatureId, Value};
use crate::overlay::{OverlayStore, RowMarker, RowOrigin};
use crate::repo::{RepoError, RepoResult};
use log::{info, warn};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, TransactionBehavior};
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// One overlay entry (or the whole store) that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCorruption {
    /// `None` when the problem concerns the whole store.
    pub feature_id: Option<FeatureId>,
    pub column: Option<String>,
    pub reason: String,
}

impl StoreCorruption {
    pub fn whole_store(reason: impl Into<String>) -> Self {
        Self {
            feature_id: None,
            column: None,
            reason: reason.into(),
        }
    }
}

impl Display for StoreCorruption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (&self.feature_id, &self.column) {
            (Some(id), Some(column)) => {
                write!(f, "corrupt overlay entry {id}/{column}: {}", self.reason)
            }
            (Some(id), None) => write!(f, "corrupt overlay marker {id}: {}", self.reason),
            _ => write!(f, "corrupt overlay store: {}", self.reason),
        }
    }
}

/// Overlay restored from the side store plus everything that was skipped.
#[derive(Debug, Clone, Default)]
pub struct OverlayLoad {
    pub store: OverlayStore,
    pub corruption: Vec<StoreCorruption>,
}

/// Persistence contract for overlay snapshots.
pub trait OverlayRepository {
    fn load_overlay(&self) -> RepoResult<OverlayLoad>;
    fn save_overlay(&mut self, store: &OverlayStore, cancel: &CancelToken) -> RepoResult<()>;
}

/// SQLite-backed overlay repository.
pub struct SqliteOverlayRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteOverlayRepository<'conn> {
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }
}

impl OverlayRepository for SqliteOverlayRepository<'_> {
    fn load_overlay(&self) -> RepoResult<OverlayLoad> {
        let started_at = Instant::now();
        let mut load = OverlayLoad::default();

        let mut stmt = self
            .conn
            .prepare("SELECT feature_id, col_name, value_kind, value FROM edits;")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let (id, column) = (row.get_ref(0)?, row.get_ref(1)?);
            match decode_edit(id, column, row.get_ref(2)?, row.get_ref(3)?) {
                Ok((id, column, value)) => load.store.restore_override(id, column, value),
                Err(reason) => {
                    let id = row_feature_id(id).ok();
                    let column = text_cell(column, "col_name").ok();
                    warn!(
                        "event=overlay_load_skip module=overlay status=warn feature_id={} column={} reason={}",
                        display_or_unknown(id.as_ref()),
                        display_or_unknown(column.as_ref()),
                        reason
                    );
                    load.corruption.push(StoreCorruption {
                        feature_id: id,
                        column,
                        reason,
                    });
                }
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT feature_id, origin, removed FROM feature_markers;")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let (id, origin, removed) = (row.get_ref(0)?, row.get_ref(1)?, row.get_ref(2)?);
            let decoded = row_feature_id(id).and_then(|id| {
                let origin = text_cell(origin, "origin")?;
                Ok((id, decode_marker(&origin, removed)?))
            });
            match decoded {
                Ok((id, marker)) => load.store.restore_marker(id, marker),
                Err(reason) => {
                    let id = row_feature_id(id).ok();
                    warn!(
                        "event=overlay_load_skip module=overlay status=warn feature_id={} reason={}",
                        display_or_unknown(id.as_ref()),
                        reason
                    );
                    load.corruption.push(StoreCorruption {
                        feature_id: id,
                        column: None,
                        reason,
                    });
                }
            }
        }

        info!(
            "event=overlay_load module=overlay status=ok edits={} skipped={} duration_ms={}",
            load.store.edit_count(),
            load.corruption.len(),
            started_at.elapsed().as_millis()
        );
        Ok(load)
    }

    fn save_overlay(&mut self, store: &OverlayStore, cancel: &CancelToken) -> RepoResult<()> {
        let started_at = Instant::now();
        info!("event=overlay_persist module=overlay status=start");

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM edits;", [])?;
        tx.execute("DELETE FROM feature_markers;", [])?;

        let mut written = 0usize;
        {
            let mut insert_edit = tx.prepare(
                "INSERT INTO edits (feature_id, col_name, value_kind, value)
                 VALUES (?1, ?2, ?3, ?4);",
            )?;
            for (id, column, value) in store.iter_overrides() {
                if cancel.is_cancelled() {
                    return Err(cancelled(started_at));
                }
                let (kind, sql_value) = encode_value(value);
                insert_edit.execute(params![id.get(), column, kind, sql_value])?;
                written += 1;
            }

            let mut insert_marker = tx.prepare(
                "INSERT INTO feature_markers (feature_id, origin, removed)
                 VALUES (?1, ?2, ?3);",
            )?;
            for (id, marker) in store.iter_markers() {
                if cancel.is_cancelled() {
                    return Err(cancelled(started_at));
                }
                insert_marker.execute(params![
                    id.get(),
                    marker.origin.as_str(),
                    i64::from(marker.removed)
                ])?;
            }
        }

        if cancel.is_cancelled() {
            return Err(cancelled(started_at));
        }
        tx.commit()?;

        info!(
            "event=overlay_persist module=overlay status=ok edits={} duration_ms={}",
            written,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

fn cancelled(started_at: Instant) -> RepoError {
    info!(
        "event=overlay_persist module=overlay status=cancelled duration_ms={}",
        started_at.elapsed().as_millis()
    );
    RepoError::Cancelled
}

fn encode_value(value: &Value) -> (&'static str, rusqlite::types::Value) {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => ("null", Sql::Null),
        Value::Number(v) => ("number", Sql::Real(*v)),
        Value::Text(v) => ("text", Sql::Text(v.clone())),
        Value::Boolean(v) => ("boolean", Sql::Integer(i64::from(*v))),
    }
}

fn decode_value(kind: &str, raw: ValueRef<'_>) -> Result<Value, String> {
    match (kind, raw) {
        ("null", _) => Ok(Value::Null),
        ("number", ValueRef::Real(v)) => Ok(Value::Number(v)),
        ("number", ValueRef::Integer(v)) => Ok(Value::Number(v as f64)),
        ("text", ValueRef::Text(bytes)) => std::str::from_utf8(bytes)
            .map(|text| Value::Text(text.to_string()))
            .map_err(|_| "text value is not valid UTF-8".to_string()),
        ("boolean", ValueRef::Integer(0)) => Ok(Value::Boolean(false)),
        ("boolean", ValueRef::Integer(1)) => Ok(Value::Boolean(true)),
        ("number" | "text" | "boolean", other) => Err(format!(
            "value of kind `{kind}` stored as {:?}",
            other.data_type()
        )),
        (other, _) => Err(format!("unknown value kind `{other}`")),
    }
}

fn decode_edit(
    id: ValueRef<'_>,
    column: ValueRef<'_>,
    kind: ValueRef<'_>,
    value: ValueRef<'_>,
) -> Result<(FeatureId, String, Value), String> {
    let id = row_feature_id(id)?;
    let column = text_cell(column, "col_name")?;
    let kind = text_cell(kind, "value_kind")?;
    Ok((id, column, decode_value(&kind, value)?))
}

fn row_feature_id(raw: ValueRef<'_>) -> Result<FeatureId, String> {
    match raw {
        ValueRef::Integer(id) => Ok(FeatureId(id)),
        other => Err(format!("feature_id stored as {:?}", other.data_type())),
    }
}

fn text_cell(raw: ValueRef<'_>, name: &str) -> Result<String, String> {
    match raw {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| format!("{name} is not valid UTF-8")),
        other => Err(format!("{name} stored as {:?}", other.data_type())),
    }
}

fn display_or_unknown<T: Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "?".to_string(), ToString::to_string)
}

fn decode_marker(origin: &str, removed: ValueRef<'_>) -> Result<RowMarker, String> {
    let origin =
        RowOrigin::parse(origin).ok_or_else(|| format!("unknown marker origin `{origin}`"))?;
    let removed = match removed {
        ValueRef::Integer(0) => false,
        ValueRef::Integer(1) => true,
        ValueRef::Integer(other) => return Err(format!("invalid removed flag `{other}`")),
        other => return Err(format!("removed flag stored as {:?}", other.data_type())),
    };
    Ok(RowMarker { origin, removed })
}
