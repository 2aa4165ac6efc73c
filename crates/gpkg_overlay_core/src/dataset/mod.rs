//! Read-only access to the immutable base dataset.
//!
//! # Responsibility
//! - Define the reader contract the merge engine consumes.
//! - Provide an in-memory reader and a GeoPackage reader.
//!
//! # Invariants
//! - Base rows are never mutated through this interface.
//! - `get_row` on an unknown id returns `DatasetError::NotFound`, never a
//!   synthesized empty row.

use crate::db::DbError;
use crate::model::schema::Column;
use crate::model::value::{FeatureId, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod gpkg;
pub mod memory;

pub use gpkg::{GeometryMeta, GpkgDataset, SpatialRefSys};
pub use memory::MemoryDataset;

/// Attribute values of one base feature keyed by column name.
pub type BaseRow = HashMap<String, Value>;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug)]
pub enum DatasetError {
    NotFound(FeatureId),
    LayerNotFound(String),
    Db(DbError),
    InvalidData(String),
}

impl Display for DatasetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "base feature not found: {id}"),
            Self::LayerNotFound(layer) => write!(f, "dataset layer not found: `{layer}`"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid dataset content: {message}"),
        }
    }
}

impl Error for DatasetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for DatasetError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for DatasetError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Reader contract for the immutable base dataset.
pub trait BaseRowSource {
    /// Dataset columns in native order. Modes are always `Hidden` here.
    fn list_columns(&self) -> &[Column];
    /// Every base feature id in native order.
    fn list_feature_ids(&self) -> Vec<FeatureId>;
    fn get_row(&self, id: FeatureId) -> DatasetResult<&BaseRow>;

    fn contains(&self, id: FeatureId) -> bool {
        self.get_row(id).is_ok()
    }

    /// Table name used when the merged view is written back out.
    fn layer_name(&self) -> &str {
        "features"
    }

    /// Geometry layout of the layer, when the dataset has one.
    fn geometry_meta(&self) -> Option<&GeometryMeta> {
        None
    }

    /// Encoded geometry blob of one feature, copied verbatim on export.
    fn geometry(&self, _id: FeatureId) -> Option<&[u8]> {
        None
    }

    /// Storage type the source declares for an attribute column
    /// (`INTEGER`, `DATE`, ...), when it has one.
    fn declared_type(&self, _column: &str) -> Option<&str> {
        None
    }
}
