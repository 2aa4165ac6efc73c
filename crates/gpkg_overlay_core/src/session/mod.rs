//! Editing session context.
//!
//! # Responsibility
//! - Own the dataset reader, the side-store connection, the in-memory
//!   overlay, the active plan and the current row selection.
//! - Route user commands (edit, paste, add, remove, persist, export) to the
//!   overlay, plan and export layers.
//!
//! # Invariants
//! - Nothing here is process-global; independent sessions never share
//!   state.
//! - While a persist or export holds the exclusive lock, every mutating
//!   call returns `SessionError::Busy`.
//! - The cached working table is reused only while both the overlay
//!   version and the plan revision are unchanged.
//! - A corrupt side-store file is moved aside and reported; the session
//!   continues with an empty overlay.

mod error;
mod export_job;

pub use error::{SessionError, SessionResult};
pub use export_job::ExportJob;

use crate::config::SessionConfig;
use crate::dataset::{BaseRowSource, GpkgDataset};
use crate::db::{import_legacy_plans, open_db, open_db_in_memory};
use crate::exclusive::{CancelToken, ExclusiveLock};
use crate::export::{ExportFormat, ExportScope, ExportSnapshot, ExportSummary};
use crate::expr::{evaluate_status_rows, format_status, ExprResult};
use crate::merge::materialize;
use crate::model::plan::Plan;
use crate::model::schema::{Column, ColumnMode};
use crate::model::table::WorkingTable;
use crate::model::value::{FeatureId, Value};
use crate::overlay::{OverlayError, OverlayStore};
use crate::repo::overlay_repo::{OverlayRepository, SqliteOverlayRepository, StoreCorruption};
use crate::repo::plan_repo::SqlitePlanRepository;
use crate::service::plan_service::PlanManager;
use log::{info, warn};
use rusqlite::Connection;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One cell of a paste batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CellEdit {
    pub feature_id: FeatureId,
    pub column: String,
    pub value: Value,
}

impl CellEdit {
    pub fn new(feature_id: FeatureId, column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            feature_id,
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Evaluated status row of the active plan.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusValue {
    pub label: String,
    pub result: ExprResult<Value>,
}

impl StatusValue {
    /// Text shown in the status area, e.g. `7` or `#ERR: TypeError`.
    pub fn display(&self) -> String {
        format_status(&self.result)
    }
}

struct CachedTable {
    overlay_version: u64,
    plan_revision: u64,
    table: WorkingTable,
}

/// Explicit editing context over one dataset and its side store.
pub struct Session<D: BaseRowSource> {
    dataset: D,
    conn: Connection,
    overlay: OverlayStore,
    corruption: Vec<StoreCorruption>,
    active_plan: Option<Plan>,
    plan_revision: u64,
    selection: Option<FeatureId>,
    lock: ExclusiveLock,
    cache: Option<CachedTable>,
}

impl Session<GpkgDataset> {
    /// Opens the dataset and its side store as configured.
    ///
    /// Plans from a legacy plan file next to the dataset are imported when
    /// present; plans already in the side store win.
    pub fn open(config: &SessionConfig) -> SessionResult<Self> {
        let dataset = GpkgDataset::open(&config.dataset_path, config.layer.as_deref())?;
        let mut session = Self::with_store(dataset, &config.store_path)?;

        let legacy = config.legacy_plans_path();
        if legacy.exists() {
            let imported = import_legacy_plans(&mut session.conn, &legacy)?;
            info!(
                "event=legacy_import module=session status=ok plans={}",
                imported
            );
        }
        Ok(session)
    }
}

impl<D: BaseRowSource> Session<D> {
    /// Opens (or creates) the side store at `store_path` for `dataset`.
    pub fn with_store(dataset: D, store_path: impl AsRef<Path>) -> SessionResult<Self> {
        let (conn, corruption) = open_store(store_path.as_ref())?;
        Self::from_connection(dataset, conn, corruption.into_iter().collect())
    }

    /// Session backed by a throwaway in-memory side store.
    pub fn in_memory(dataset: D) -> SessionResult<Self> {
        Self::from_connection(dataset, open_db_in_memory()?, Vec::new())
    }

    fn from_connection(
        dataset: D,
        mut conn: Connection,
        mut corruption: Vec<StoreCorruption>,
    ) -> SessionResult<Self> {
        let load = SqliteOverlayRepository::new(&mut conn).load_overlay()?;
        corruption.extend(load.corruption);
        info!(
            "event=session_open module=session status=ok edits={} added={} corrupt_entries={}",
            load.store.edit_count(),
            load.store.added_features().len(),
            corruption.len()
        );
        Ok(Self {
            dataset,
            conn,
            overlay: load.store,
            corruption,
            active_plan: None,
            plan_revision: 0,
            selection: None,
            lock: ExclusiveLock::new(),
            cache: None,
        })
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn overlay(&self) -> &OverlayStore {
        &self.overlay
    }

    /// Side-store problems found while opening. Empty for a healthy store.
    pub fn store_corruption(&self) -> &[StoreCorruption] {
        &self.corruption
    }

    pub fn active_plan(&self) -> Option<&Plan> {
        self.active_plan.as_ref()
    }

    pub fn selection(&self) -> Option<FeatureId> {
        self.selection
    }

    /// Whether an exclusive operation currently holds the session.
    pub fn is_busy(&self) -> bool {
        self.lock.is_busy()
    }

    /// Whether the overlay has edits that are not persisted yet.
    pub fn has_unsaved_edits(&self) -> bool {
        self.overlay.is_dirty()
    }

    pub fn list_plans(&self) -> SessionResult<Vec<String>> {
        Ok(self.plans().list()?)
    }

    /// Loads a stored plan and makes it the active one.
    pub fn select_plan(&mut self, name: &str) -> SessionResult<()> {
        self.ensure_idle()?;
        let plan = self.plans().load(name, &self.dataset, &self.overlay)?;
        info!(
            "event=plan_select module=session status=ok features={}",
            plan.feature_ids.len()
        );
        self.set_active(Some(plan));
        self.selection = None;
        Ok(())
    }

    /// Stores `plan`, replacing a plan of the same name. Saving the active
    /// plan's name refreshes the active plan.
    pub fn save_plan(&mut self, plan: &Plan) -> SessionResult<()> {
        self.ensure_idle()?;
        self.plans().save(plan)?;
        let name = plan.name.trim();
        if self.active_plan.as_ref().is_some_and(|active| active.name == name) {
            let mut saved = plan.clone();
            saved.name = name.to_string();
            self.set_active(Some(saved));
        }
        Ok(())
    }

    /// Stores the active plan including in-memory mode changes.
    pub fn save_active_plan(&mut self) -> SessionResult<()> {
        let plan = self.active_plan.clone().ok_or(SessionError::NoActivePlan)?;
        self.save_plan(&plan)
    }

    /// Deletes a stored plan. Deleting the active plan clears the selection.
    pub fn delete_plan(&mut self, name: &str) -> SessionResult<()> {
        self.ensure_idle()?;
        self.plans().delete(name)?;
        if self
            .active_plan
            .as_ref()
            .is_some_and(|active| active.name == name.trim())
        {
            self.set_active(None);
            self.selection = None;
        }
        Ok(())
    }

    /// Adds ids to the active plan and its stored record.
    pub fn add_plan_features(&mut self, ids: &[FeatureId]) -> SessionResult<usize> {
        self.ensure_idle()?;
        let name = self.active_name()?;
        if let Some(missing) = ids.iter().find(|id| !self.overlay.resolves(&self.dataset, **id)) {
            return Err(SessionError::UnknownFeature(*missing));
        }
        self.plans().add_features(&name, ids)?;
        let added = self.plan_mut()?.add_features(ids);
        self.plan_revision += 1;
        Ok(added)
    }

    /// Removes ids from the active plan only; overlay data stays as is.
    pub fn remove_plan_features(&mut self, ids: &[FeatureId]) -> SessionResult<usize> {
        self.ensure_idle()?;
        let name = self.active_name()?;
        self.plans().remove_features(&name, ids)?;
        let removed = self.plan_mut()?.remove_features(ids);
        if self.selection.is_some_and(|selected| ids.contains(&selected)) {
            self.selection = None;
        }
        self.plan_revision += 1;
        Ok(removed)
    }

    /// Sets a column mode on the active plan (in memory until saved).
    pub fn set_column_mode(&mut self, column: &str, mode: ColumnMode) -> SessionResult<()> {
        self.ensure_idle()?;
        if !self.plan_mut()?.schema.set_mode(column, mode) {
            return Err(SessionError::UnknownColumn(column.to_string()));
        }
        self.plan_revision += 1;
        Ok(())
    }

    /// Advances a column to its next mode and returns it.
    pub fn cycle_column_mode(&mut self, column: &str) -> SessionResult<ColumnMode> {
        let current = self
            .active_plan
            .as_ref()
            .ok_or(SessionError::NoActivePlan)?
            .schema
            .column(column)
            .map(|c| c.mode)
            .ok_or_else(|| SessionError::UnknownColumn(column.to_string()))?;
        let next = current.cycle();
        self.set_column_mode(column, next)?;
        Ok(next)
    }

    /// Merged view of the active plan, rebuilt only after a change.
    pub fn working_table(&mut self) -> SessionResult<&WorkingTable> {
        self.refresh_table()?;
        self.cached_table()
    }

    /// Edits one cell of the working table.
    ///
    /// # Errors
    /// - `ColumnNotEditable` unless the active plan marks the column editable.
    /// - `Overlay(TypeMismatch)` when the value does not fit the column type.
    pub fn edit_cell(
        &mut self,
        id: FeatureId,
        column: &str,
        value: impl Into<Value>,
    ) -> SessionResult<()> {
        self.ensure_idle()?;
        let column = self.editable_column(column)?;
        self.ensure_editable_row(id)?;
        self.overlay.set_override(id, &column, value.into())?;
        Ok(())
    }

    /// Reverts one cell to its base value.
    pub fn revert_cell(&mut self, id: FeatureId, column: &str) -> SessionResult<bool> {
        self.ensure_idle()?;
        let column = self.editable_column(column)?;
        self.ensure_editable_row(id)?;
        Ok(self.overlay.clear_override(id, &column.name))
    }

    /// Applies a batch of cell edits. Every edit is checked first; if one
    /// fails nothing is applied.
    pub fn paste_cells(&mut self, edits: &[CellEdit]) -> SessionResult<usize> {
        self.ensure_idle()?;
        let mut checked = Vec::with_capacity(edits.len());
        for edit in edits {
            let column = self.editable_column(&edit.column)?;
            self.ensure_editable_row(edit.feature_id)?;
            if edit.value.coerce_to(column.column_type).is_none() {
                return Err(OverlayError::TypeMismatch {
                    feature_id: edit.feature_id,
                    column: column.name,
                    expected: column.column_type,
                    found: edit.value.kind_name(),
                }
                .into());
            }
            checked.push((edit.feature_id, column, edit.value.clone()));
        }
        for (id, column, value) in checked {
            self.overlay.set_override(id, &column, value)?;
        }
        info!(
            "event=paste module=session status=ok cells={}",
            edits.len()
        );
        Ok(edits.len())
    }

    /// Renders cells of the working table as tab-separated lines, one line
    /// per feature in the order given.
    pub fn copy_cells(&mut self, ids: &[FeatureId], columns: &[&str]) -> SessionResult<String> {
        let table = self.working_table()?;
        let indexes = columns
            .iter()
            .map(|name| {
                table
                    .column_index(name)
                    .ok_or_else(|| SessionError::UnknownColumn(name.to_string()))
            })
            .collect::<SessionResult<Vec<_>>>()?;

        let mut lines = Vec::with_capacity(ids.len());
        for id in ids {
            let row = table.row(*id).ok_or(SessionError::UnknownFeature(*id))?;
            let cells: Vec<String> = indexes
                .iter()
                .map(|index| row.values[*index].display_text())
                .collect();
            lines.push(cells.join("\t"));
        }
        Ok(lines.join("\n"))
    }

    /// Creates an overlay-only feature and appends it to the active plan.
    pub fn add_feature(&mut self, values: &[(&str, Value)]) -> SessionResult<FeatureId> {
        self.ensure_idle()?;
        let initial = values
            .iter()
            .map(|(name, value)| {
                self.dataset
                    .list_columns()
                    .iter()
                    .find(|column| column.name == *name)
                    .map(|column| (column.clone(), value.clone()))
                    .ok_or_else(|| SessionError::UnknownColumn(name.to_string()))
            })
            .collect::<SessionResult<Vec<(Column, Value)>>>()?;

        let id = self.overlay.add_feature(&self.dataset, &initial)?;
        if let Some(name) = self.active_plan.as_ref().map(|plan| plan.name.clone()) {
            if let Err(err) = self.plans().add_features(&name, &[id]) {
                self.overlay.discard_added(id);
                warn!(
                    "event=feature_add module=session status=error feature_id={} plan={} error={}",
                    id, name, err
                );
                return Err(err.into());
            }
            self.plan_mut()?.add_features(&[id]);
            self.plan_revision += 1;
        }
        info!("event=feature_add module=session status=ok feature_id={}", id);
        Ok(id)
    }

    /// Hides a feature from every plan; its edits are kept.
    pub fn remove_feature(&mut self, id: FeatureId) -> SessionResult<()> {
        self.ensure_idle()?;
        if !self.overlay.resolves(&self.dataset, id) {
            return Err(SessionError::UnknownFeature(id));
        }
        self.overlay.mark_removed(id);
        if self.selection == Some(id) {
            self.selection = None;
        }
        Ok(())
    }

    /// Shows a removed feature again with its previous edits.
    pub fn restore_feature(&mut self, id: FeatureId) -> SessionResult<()> {
        self.ensure_idle()?;
        self.overlay.clear_removed(id);
        Ok(())
    }

    /// Selects a row of the working table, or clears the selection.
    pub fn select_row(&mut self, id: Option<FeatureId>) -> SessionResult<()> {
        if let Some(id) = id {
            if self.working_table()?.row(id).is_none() {
                return Err(SessionError::UnknownFeature(id));
            }
        }
        self.selection = id;
        Ok(())
    }

    /// Evaluates every status row of the active plan against the current
    /// working table and selection. Each row fails on its own.
    pub fn status_values(&mut self) -> SessionResult<Vec<StatusValue>> {
        self.refresh_table()?;
        let table = self.cached_table()?;
        let plan = self.active_plan.as_ref().ok_or(SessionError::NoActivePlan)?;
        let selected = self.selection.and_then(|id| table.row(id));
        let results = evaluate_status_rows(&plan.status_rows, table, selected);
        Ok(plan
            .status_rows
            .iter()
            .zip(results)
            .map(|(row, result)| StatusValue {
                label: row.label.clone(),
                result,
            })
            .collect())
    }

    /// Writes the overlay to the side store as one snapshot.
    ///
    /// # Errors
    /// - `Busy` while another exclusive operation runs.
    /// - `Cancelled` when `cancel` fires; the stored snapshot is unchanged.
    pub fn persist(&mut self, cancel: &CancelToken) -> SessionResult<()> {
        let _guard = self.lock.try_acquire("persist").ok_or(SessionError::Busy)?;
        SqliteOverlayRepository::new(&mut self.conn).save_overlay(&self.overlay, cancel)?;
        self.overlay.mark_clean();
        Ok(())
    }

    /// Snapshots the rows in `scope` for export and locks the session until
    /// the returned job is dropped.
    ///
    /// # Errors
    /// - `Busy` while another exclusive operation runs.
    /// - `NoActivePlan` without a selected plan; its columns shape both scopes.
    pub fn begin_export(&mut self, scope: ExportScope) -> SessionResult<ExportJob> {
        let guard = self.lock.try_acquire("export").ok_or(SessionError::Busy)?;
        let snapshot = match scope {
            ExportScope::Plan => {
                self.refresh_table()?;
                ExportSnapshot::capture(self.cached_table()?, &self.dataset)
            }
            ExportScope::Dataset => {
                let mut whole = self
                    .active_plan
                    .clone()
                    .ok_or(SessionError::NoActivePlan)?;
                whole.feature_ids = self.dataset.list_feature_ids();
                whole.add_features(&self.overlay.added_features());
                let table = materialize(&whole, &self.dataset, &self.overlay);
                ExportSnapshot::capture(&table, &self.dataset)
            }
        };
        info!(
            "event=export_snapshot module=session status=ok scope={} rows={}",
            scope.as_str(),
            snapshot.table.len()
        );
        Ok(ExportJob::new(guard, snapshot))
    }

    /// Exports the working table to `sink` in `format`.
    pub fn export<W: Write>(
        &mut self,
        format: ExportFormat,
        sink: &mut W,
        cancel: &CancelToken,
    ) -> SessionResult<ExportSummary> {
        self.begin_export(ExportScope::Plan)?
            .write_to(format, sink, cancel)
    }

    /// Exports the working table to a file at `path`.
    pub fn export_to_path(
        &mut self,
        format: ExportFormat,
        path: impl AsRef<Path>,
        cancel: &CancelToken,
    ) -> SessionResult<ExportSummary> {
        self.begin_export(ExportScope::Plan)?
            .write_to_path(format, path, cancel)
    }

    fn plans(&self) -> PlanManager<SqlitePlanRepository<'_>> {
        PlanManager::new(SqlitePlanRepository::new(&self.conn))
    }

    fn ensure_idle(&self) -> SessionResult<()> {
        if self.lock.is_busy() {
            return Err(SessionError::Busy);
        }
        Ok(())
    }

    fn set_active(&mut self, plan: Option<Plan>) {
        self.active_plan = plan;
        self.plan_revision += 1;
    }

    fn active_name(&self) -> SessionResult<String> {
        self.active_plan
            .as_ref()
            .map(|plan| plan.name.clone())
            .ok_or(SessionError::NoActivePlan)
    }

    fn plan_mut(&mut self) -> SessionResult<&mut Plan> {
        self.active_plan.as_mut().ok_or(SessionError::NoActivePlan)
    }

    fn editable_column(&self, name: &str) -> SessionResult<Column> {
        let plan = self.active_plan.as_ref().ok_or(SessionError::NoActivePlan)?;
        let column = plan
            .schema
            .column(name)
            .ok_or_else(|| SessionError::UnknownColumn(name.to_string()))?;
        if column.mode != ColumnMode::Editable {
            return Err(SessionError::ColumnNotEditable(name.to_string()));
        }
        Ok(column.clone())
    }

    /// Only rows visible in the working table can be edited.
    fn ensure_editable_row(&self, id: FeatureId) -> SessionResult<()> {
        let plan = self.active_plan.as_ref().ok_or(SessionError::NoActivePlan)?;
        if !plan.contains(id)
            || self.overlay.is_removed(id)
            || !self.overlay.resolves(&self.dataset, id)
        {
            return Err(SessionError::UnknownFeature(id));
        }
        Ok(())
    }

    fn refresh_table(&mut self) -> SessionResult<()> {
        let plan = self.active_plan.as_ref().ok_or(SessionError::NoActivePlan)?;
        let overlay_version = self.overlay.version();
        let fresh = self.cache.as_ref().is_some_and(|cache| {
            cache.overlay_version == overlay_version && cache.plan_revision == self.plan_revision
        });
        if !fresh {
            self.cache = Some(CachedTable {
                overlay_version,
                plan_revision: self.plan_revision,
                table: materialize(plan, &self.dataset, &self.overlay),
            });
        }
        Ok(())
    }

    fn cached_table(&self) -> SessionResult<&WorkingTable> {
        self.cache
            .as_ref()
            .map(|cache| &cache.table)
            .ok_or(SessionError::NoActivePlan)
    }
}

/// Opens the side store, moving a corrupt file aside and starting fresh.
fn open_store(path: &Path) -> SessionResult<(Connection, Option<StoreCorruption>)> {
    match open_db(path) {
        Ok(conn) => Ok((conn, None)),
        Err(err) if err.is_corrupt_file() => {
            let quarantine = quarantine_path(path);
            if fs::rename(path, &quarantine).is_err() {
                return Err(err.into());
            }
            warn!(
                "event=store_quarantine module=session status=warn error_code=store_corrupt error={}",
                err
            );
            let conn = open_db(path)?;
            let corruption = StoreCorruption::whole_store(format!(
                "unreadable side store moved to {}: {err}",
                quarantine.display()
            ));
            Ok((conn, Some(corruption)))
        }
        Err(err) => Err(err.into()),
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".corrupt-{secs}"));
    PathBuf::from(name)
}
