//! Repository layer over the side store.
//!
//! # Responsibility
//! - Define persistence contracts for overlay snapshots and plans.
//! - Isolate SQLite query details from session/service orchestration.
//!
//! # Invariants
//! - Overlay snapshots are replaced atomically; a cancelled or failed save
//!   leaves the previous snapshot in place.
//! - Reads report undecodable rows instead of masking them as valid data.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod overlay_repo;
pub mod plan_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for side-store persistence and queries.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
    /// Operation stopped on request before committing.
    Cancelled,
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) | Self::Cancelled => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}
