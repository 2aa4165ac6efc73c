//! Export of the merged working table.
//!
//! # Responsibility
//! - Capture an immutable snapshot of the working table and the geometry it
//!   needs, so writing can proceed while the session stays locked.
//! - Write the snapshot as CSV or as a new GeoPackage.
//!
//! # Invariants
//! - Columns are written in table (schema) order; hidden columns never
//!   appear.
//! - A cancelled or failed export leaves no output behind: path targets are
//!   written to `<path>.partial` and renamed only on success, and writer
//!   targets receive nothing.

pub mod csv;
pub mod gpkg;

use crate::dataset::{BaseRowSource, GeometryMeta};
use crate::db::DbError;
use crate::exclusive::CancelToken;
use crate::model::table::WorkingTable;
use crate::model::value::FeatureId;
use log::{error, info};
use std::collections::HashMap;
use std::error::Error;
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Gpkg,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Gpkg => "gpkg",
        }
    }

    /// Picks the format from a file extension, case-insensitively.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let extension = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(Self::Csv),
            "gpkg" => Some(Self::Gpkg),
            _ => None,
        }
    }
}

/// Which features an export covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportScope {
    /// The active plan's features.
    #[default]
    Plan,
    /// Every dataset feature plus added features, laid out with the
    /// active plan's columns.
    Dataset,
}

impl ExportScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Dataset => "dataset",
        }
    }
}

impl Display for ExportFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Db(DbError),
    Cancelled,
}

impl Display for ExportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "export i/o failed: {err}"),
            Self::Db(err) => write!(f, "export database write failed: {err}"),
            Self::Cancelled => write!(f, "export cancelled"),
        }
    }
}

impl Error for ExportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Cancelled => None,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DbError> for ExportError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ExportError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// What one export wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub format: ExportFormat,
    pub rows: usize,
}

/// Everything an exporter reads, detached from the live session.
#[derive(Debug, Clone)]
pub struct ExportSnapshot {
    pub layer_name: String,
    pub table: WorkingTable,
    pub geometry_meta: Option<GeometryMeta>,
    /// Source geometry blobs of the rows in `table`. Added features have none.
    pub geometries: HashMap<FeatureId, Vec<u8>>,
    /// Source storage types of the table columns, where the dataset has them.
    pub declared_types: HashMap<String, String>,
}

impl ExportSnapshot {
    pub fn capture(table: &WorkingTable, base: &dyn BaseRowSource) -> Self {
        let geometries = table
            .rows()
            .iter()
            .filter_map(|row| {
                base.geometry(row.feature_id)
                    .map(|blob| (row.feature_id, blob.to_vec()))
            })
            .collect();
        let declared_types = table
            .columns()
            .iter()
            .filter_map(|column| {
                base.declared_type(&column.name)
                    .map(|declared| (column.name.clone(), declared.to_string()))
            })
            .collect();
        Self {
            layer_name: base.layer_name().to_string(),
            table: table.clone(),
            geometry_meta: base.geometry_meta().cloned(),
            geometries,
            declared_types,
        }
    }

    /// Writes the snapshot to `path`, replacing any existing file only once
    /// the new content is complete.
    ///
    /// # Side effects
    /// - Emits `export` logging events with format, row count and duration.
    pub fn write_to_path(
        &self,
        format: ExportFormat,
        path: impl AsRef<Path>,
        cancel: &CancelToken,
    ) -> ExportResult<ExportSummary> {
        let path = path.as_ref();
        let partial = partial_path(path);
        logged(format, self.table.len(), || {
            let result = self.write_file(format, &partial, cancel).and_then(|rows| {
                replace_file(&partial, path)?;
                Ok(rows)
            });
            if result.is_err() {
                let _ = fs::remove_file(&partial);
            }
            result
        })
    }

    /// Writes the complete encoded output to `sink`. Nothing is written when
    /// the export is cancelled or fails.
    pub fn write_to<W: Write>(
        &self,
        format: ExportFormat,
        sink: &mut W,
        cancel: &CancelToken,
    ) -> ExportResult<ExportSummary> {
        logged(format, self.table.len(), || {
            let bytes = match format {
                ExportFormat::Csv => {
                    let mut buffer = Vec::new();
                    csv::write_csv(&self.table, &mut buffer, cancel)?;
                    buffer
                }
                ExportFormat::Gpkg => {
                    let scratch = tempfile::Builder::new()
                        .prefix("gpkg_overlay_export")
                        .tempdir()?;
                    let path = scratch.path().join("export.gpkg");
                    gpkg::write_gpkg(self, &path, cancel)?;
                    fs::read(&path)?
                }
            };
            sink.write_all(&bytes)?;
            sink.flush()?;
            Ok(self.table.len())
        })
    }

    fn write_file(&self, format: ExportFormat, path: &Path, cancel: &CancelToken) -> ExportResult<usize> {
        match format {
            ExportFormat::Csv => {
                let mut buffer = Vec::new();
                let rows = csv::write_csv(&self.table, &mut buffer, cancel)?;
                fs::write(path, buffer)?;
                Ok(rows)
            }
            ExportFormat::Gpkg => gpkg::write_gpkg(self, path, cancel),
        }
    }
}

fn logged(
    format: ExportFormat,
    row_count: usize,
    run: impl FnOnce() -> ExportResult<usize>,
) -> ExportResult<ExportSummary> {
    let started_at = Instant::now();
    info!(
        "event=export module=export status=start format={} rows={}",
        format, row_count
    );
    match run() {
        Ok(rows) => {
            info!(
                "event=export module=export status=ok format={} rows={} duration_ms={}",
                format,
                rows,
                started_at.elapsed().as_millis()
            );
            Ok(ExportSummary { format, rows })
        }
        Err(ExportError::Cancelled) => {
            info!(
                "event=export module=export status=cancelled format={} duration_ms={}",
                format,
                started_at.elapsed().as_millis()
            );
            Err(ExportError::Cancelled)
        }
        Err(err) => {
            error!(
                "event=export module=export status=error format={} duration_ms={} error={}",
                format,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

fn replace_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    fs::rename(from, to)
}
