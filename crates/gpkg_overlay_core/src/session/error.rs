use crate::dataset::DatasetError;
use crate::db::DbError;
use crate::export::ExportError;
use crate::model::value::FeatureId;
use crate::overlay::OverlayError;
use crate::repo::RepoError;
use crate::service::plan_service::PlanError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by session operations.
#[derive(Debug)]
pub enum SessionError {
    /// A persist or export is in flight; retry once it completes.
    Busy,
    Cancelled,
    NoActivePlan,
    UnknownColumn(String),
    /// Column exists but the active plan does not allow editing it.
    ColumnNotEditable(String),
    /// Feature is not part of the working table.
    UnknownFeature(FeatureId),
    Overlay(OverlayError),
    Plan(PlanError),
    Repo(RepoError),
    Db(DbError),
    Dataset(DatasetError),
    Export(ExportError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => write!(f, "another persist or export is in progress"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::NoActivePlan => write!(f, "no plan is selected"),
            Self::UnknownColumn(name) => write!(f, "unknown column `{name}`"),
            Self::ColumnNotEditable(name) => write!(f, "column `{name}` is not editable"),
            Self::UnknownFeature(id) => write!(f, "feature {id} is not in the working table"),
            Self::Overlay(err) => write!(f, "{err}"),
            Self::Plan(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Dataset(err) => write!(f, "{err}"),
            Self::Export(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Overlay(err) => Some(err),
            Self::Plan(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Dataset(err) => Some(err),
            Self::Export(err) => Some(err),
            _ => None,
        }
    }
}

impl From<OverlayError> for SessionError {
    fn from(value: OverlayError) -> Self {
        Self::Overlay(value)
    }
}

impl From<PlanError> for SessionError {
    fn from(value: PlanError) -> Self {
        Self::Plan(value)
    }
}

impl From<RepoError> for SessionError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Cancelled => Self::Cancelled,
            other => Self::Repo(other),
        }
    }
}

impl From<DbError> for SessionError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<DatasetError> for SessionError {
    fn from(value: DatasetError) -> Self {
        Self::Dataset(value)
    }
}

impl From<ExportError> for SessionError {
    fn from(value: ExportError) -> Self {
        match value {
            ExportError::Cancelled => Self::Cancelled,
            other => Self::Export(other),
        }
    }
}
