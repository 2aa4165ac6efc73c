//! Core of the GeoPackage attribute overlay editor.
//!
//! Base datasets are never written. Edits, row markers and plans live in a
//! SQLite side store and are merged over the base rows on demand.

pub mod config;
pub mod dataset;
pub mod db;
pub mod exclusive;
pub mod export;
pub mod expr;
pub mod logging;
pub mod merge;
pub mod model;
pub mod overlay;
pub mod repo;
pub mod service;
pub mod session;

pub use config::SessionConfig;
pub use dataset::{BaseRowSource, DatasetError, GpkgDataset, MemoryDataset};
pub use exclusive::{CancelToken, ExclusiveGuard, ExclusiveLock};
pub use export::{ExportError, ExportFormat, ExportScope, ExportSnapshot, ExportSummary};
pub use expr::{evaluate_status_rows, format_status, ExprError, Expression};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget, LoggingError};
pub use merge::materialize;
pub use model::plan::{Plan, StatusRow};
pub use model::schema::{Column, ColumnConfig, ColumnMode, Schema};
pub use model::table::{MergeIssue, WorkingRow, WorkingTable};
pub use model::value::{ColumnType, FeatureId, Value};
pub use overlay::{OverlayError, OverlayStore};
pub use repo::overlay_repo::StoreCorruption;
pub use service::plan_service::{PlanError, PlanManager};
pub use session::{CellEdit, ExportJob, Session, SessionError, SessionResult, StatusValue};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
