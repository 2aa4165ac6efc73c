//! Plan record persistence on SQLite.
//!
//! # Responsibility
//! - Store plans keyed by name with membership, column configuration and
//!   status rows encoded as JSON text columns.
//! - Read records written by older releases (mode labels and status
//!   expressions stored as JSON objects).
//!
//! # Invariants
//! - Saving an existing name replaces the record in a single statement.
//! - Names are listed in ascending order.

use crate::model::plan::StatusRow;
use crate::model::schema::{ColumnConfig, ColumnMode};
use crate::model::value::FeatureId;
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as Json;

/// Persisted form of a plan; column types are resolved from the dataset
/// when the plan is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRecord {
    pub name: String,
    pub feature_ids: Vec<FeatureId>,
    pub columns: Vec<ColumnConfig>,
    pub status_rows: Vec<StatusRow>,
}

/// Repository interface for plan records.
pub trait PlanRepository {
    fn save_plan(&self, record: &PlanRecord) -> RepoResult<()>;
    fn get_plan(&self, name: &str) -> RepoResult<Option<PlanRecord>>;
    fn list_plan_names(&self) -> RepoResult<Vec<String>>;
    /// Returns whether a record was deleted.
    fn delete_plan(&self, name: &str) -> RepoResult<bool>;
}

/// SQLite-backed plan repository.
pub struct SqlitePlanRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePlanRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl PlanRepository for SqlitePlanRepository<'_> {
    fn save_plan(&self, record: &PlanRecord) -> RepoResult<()> {
        let fids = serde_json::to_string(&record.feature_ids)?;
        let columns = serde_json::to_string(&record.columns)?;
        let status_rows = if record.status_rows.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.status_rows)?)
        };

        self.conn.execute(
            "INSERT INTO plans (name, fids, column_config, status_exprs, updated_at)
             VALUES (?1, ?2, ?3, ?4, (strftime('%s', 'now') * 1000))
             ON CONFLICT(name) DO UPDATE SET
                fids = excluded.fids,
                column_config = excluded.column_config,
                status_exprs = excluded.status_exprs,
                updated_at = excluded.updated_at;",
            params![record.name, fids, columns, status_rows],
        )?;
        Ok(())
    }

    fn get_plan(&self, name: &str) -> RepoResult<Option<PlanRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT fids, column_config, status_exprs FROM plans WHERE name = ?1;",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((fids, columns, status_rows)) = row else {
            return Ok(None);
        };

        Ok(Some(PlanRecord {
            name: name.to_string(),
            feature_ids: serde_json::from_str(&fids)?,
            columns: parse_column_config(&columns)?,
            status_rows: parse_status_rows(status_rows.as_deref())?,
        }))
    }

    fn list_plan_names(&self) -> RepoResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM plans ORDER BY name ASC;")?;
        let mut rows = stmt.query([])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            names.push(row.get(0)?);
        }
        Ok(names)
    }

    fn delete_plan(&self, name: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM plans WHERE name = ?1;", [name])?;
        Ok(changed > 0)
    }
}

/// Decodes column configuration: current `[{name, mode}]` arrays or the
/// older `{name: label}` objects.
fn parse_column_config(text: &str) -> RepoResult<Vec<ColumnConfig>> {
    match serde_json::from_str::<Json>(text)? {
        Json::Array(_) => Ok(serde_json::from_str(text)?),
        Json::Object(entries) => entries
            .into_iter()
            .map(|(name, mode)| {
                let label = mode.as_str().unwrap_or_default();
                let mode = ColumnMode::parse(label).ok_or_else(|| {
                    RepoError::InvalidData(format!("unknown column mode `{label}` for `{name}`"))
                })?;
                Ok(ColumnConfig { name, mode })
            })
            .collect(),
        other => Err(RepoError::InvalidData(format!(
            "column_config must be an array or object, got {other}"
        ))),
    }
}

/// Decodes status rows: current `[{label, expression}]` arrays or the older
/// `{"expr1": "...", "expr2": "..."}` objects. Empty legacy slots are dropped.
fn parse_status_rows(text: Option<&str>) -> RepoResult<Vec<StatusRow>> {
    let Some(text) = text else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<Json>(text)? {
        Json::Null => Ok(Vec::new()),
        Json::Array(_) => Ok(serde_json::from_str(text)?),
        Json::Object(entries) => Ok(entries
            .into_iter()
            .filter_map(|(label, expression)| match expression {
                Json::String(expression) if !expression.trim().is_empty() => {
                    Some(StatusRow::new(label, expression))
                }
                _ => None,
            })
            .collect()),
        other => Err(RepoError::InvalidData(format!(
            "status_exprs must be an array or object, got {other}"
        ))),
    }
}
