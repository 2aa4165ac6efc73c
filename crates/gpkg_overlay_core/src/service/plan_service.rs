//! Plan use-case service.
//!
//! # Responsibility
//! - Save, load, list and delete named plans.
//! - Resolve persisted column configuration against dataset columns.
//! - Edit plan membership without touching overlay data.
//!
//! # Invariants
//! - Plan names are trimmed and non-empty.
//! - Loaded plans only reference ids that resolve to a base row or an
//!   overlay-added feature.
//! - Membership edits never call into the overlay store.

use crate::dataset::BaseRowSource;
use crate::model::plan::Plan;
use crate::model::schema::{Schema, SchemaError};
use crate::model::value::FeatureId;
use crate::overlay::OverlayStore;
use crate::repo::plan_repo::{PlanRecord, PlanRepository};
use crate::repo::RepoError;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type PlanResult<T> = Result<T, PlanError>;

/// Errors from plan service operations.
#[derive(Debug)]
pub enum PlanError {
    /// Name is blank after trim.
    InvalidName,
    NotFound(String),
    /// Plan references an id that resolves to nothing.
    DanglingFeatureReference { plan: String, feature_id: FeatureId },
    Schema(SchemaError),
    Repo(RepoError),
}

impl Display for PlanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "plan name must not be blank"),
            Self::NotFound(name) => write!(f, "plan not found: `{name}`"),
            Self::DanglingFeatureReference { plan, feature_id } => write!(
                f,
                "plan `{plan}` references feature {feature_id}, which exists neither in the dataset nor in the overlay"
            ),
            Self::Schema(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PlanError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for PlanError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<SchemaError> for PlanError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

/// Plan manager facade over a plan repository.
pub struct PlanManager<R: PlanRepository> {
    repo: R,
}

impl<R: PlanRepository> PlanManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Saves a plan, replacing any plan of the same name.
    pub fn save(&self, plan: &Plan) -> PlanResult<()> {
        let name = normalize_plan_name(&plan.name)?;
        let record = PlanRecord {
            name: name.clone(),
            feature_ids: plan.feature_ids.clone(),
            columns: plan.schema.to_config(),
            status_rows: plan.status_rows.clone(),
        };
        self.repo.save_plan(&record)?;
        info!(
            "event=plan_save module=plan status=ok features={} columns={} status_rows={}",
            record.feature_ids.len(),
            record.columns.len(),
            record.status_rows.len()
        );
        Ok(())
    }

    /// Loads a plan and resolves it against the dataset and overlay.
    ///
    /// # Errors
    /// - `NotFound` for an unknown name.
    /// - `DanglingFeatureReference` for the first id that resolves neither
    ///   to a base row nor to an added feature.
    pub fn load(
        &self,
        name: &str,
        base: &dyn BaseRowSource,
        overlay: &OverlayStore,
    ) -> PlanResult<Plan> {
        let record = self.record(name)?;
        if let Some(missing) = record
            .feature_ids
            .iter()
            .find(|id| !overlay.resolves(base, **id))
        {
            warn!(
                "event=plan_load module=plan status=error error_code=dangling_feature feature_id={}",
                missing
            );
            return Err(PlanError::DanglingFeatureReference {
                plan: record.name,
                feature_id: *missing,
            });
        }

        let schema = Schema::resolve(base.list_columns(), &record.columns)?;
        info!(
            "event=plan_load module=plan status=ok features={} visible_columns={}",
            record.feature_ids.len(),
            schema.visible().count()
        );
        Ok(Plan::new(record.name, record.feature_ids, schema).with_status_rows(record.status_rows))
    }

    /// Returns plan names in ascending order.
    pub fn list(&self) -> PlanResult<Vec<String>> {
        Ok(self.repo.list_plan_names()?)
    }

    /// Deletes a plan by name.
    pub fn delete(&self, name: &str) -> PlanResult<()> {
        let name = normalize_plan_name(name)?;
        if !self.repo.delete_plan(&name)? {
            return Err(PlanError::NotFound(name));
        }
        info!("event=plan_delete module=plan status=ok");
        Ok(())
    }

    /// Appends ids to a stored plan's membership. Returns how many were new.
    pub fn add_features(&self, name: &str, ids: &[FeatureId]) -> PlanResult<usize> {
        let mut record = self.record(name)?;
        let mut added = 0;
        for id in ids {
            if !record.feature_ids.contains(id) {
                record.feature_ids.push(*id);
                added += 1;
            }
        }
        if added > 0 {
            self.repo.save_plan(&record)?;
        }
        Ok(added)
    }

    /// Drops ids from a stored plan's membership. Returns how many were
    /// removed. Overlay data of the dropped ids is left alone.
    pub fn remove_features(&self, name: &str, ids: &[FeatureId]) -> PlanResult<usize> {
        let mut record = self.record(name)?;
        let before = record.feature_ids.len();
        record.feature_ids.retain(|id| !ids.contains(id));
        let removed = before - record.feature_ids.len();
        if removed > 0 {
            self.repo.save_plan(&record)?;
        }
        Ok(removed)
    }

    fn record(&self, name: &str) -> PlanResult<PlanRecord> {
        let name = normalize_plan_name(name)?;
        self.repo
            .get_plan(&name)?
            .ok_or(PlanError::NotFound(name))
    }
}

fn normalize_plan_name(name: &str) -> PlanResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PlanError::InvalidName);
    }
    Ok(trimmed.to_string())
}
