//! GeoPackage base dataset reader.
//!
//! # Responsibility
//! - Read one feature (or attribute) table of a GeoPackage into memory.
//! - Expose geometry blobs and geometry metadata for export.
//!
//! # Invariants
//! - The source file is opened read-only and closed after loading.
//! - Feature ids are the table's integer primary key.
//! - Geometry blobs are kept byte-for-byte; this reader never decodes them.

use crate::dataset::{BaseRow, BaseRowSource, DatasetError, DatasetResult};
use crate::db::quote_ident;
use crate::model::schema::Column;
use crate::model::value::{ColumnType, FeatureId, Value};
use log::{error, info, warn};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

/// Row of `gpkg_spatial_ref_sys` used by the layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialRefSys {
    pub srs_name: String,
    pub srs_id: i64,
    pub organization: String,
    pub organization_coordsys_id: i64,
    pub definition: String,
    pub description: Option<String>,
}

/// Row of `gpkg_geometry_columns` for the layer plus its SRS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryMeta {
    pub column_name: String,
    pub geometry_type_name: String,
    pub srs: Option<SpatialRefSys>,
    pub z: i64,
    pub m: i64,
}

/// GeoPackage layer loaded into memory.
#[derive(Debug, Clone)]
pub struct GpkgDataset {
    layer: String,
    columns: Vec<Column>,
    order: Vec<FeatureId>,
    rows: HashMap<FeatureId, BaseRow>,
    geometry_meta: Option<GeometryMeta>,
    geometries: HashMap<FeatureId, Vec<u8>>,
    declared_types: HashMap<String, String>,
}

impl GpkgDataset {
    /// Opens `path` and loads `layer`, or the first layer listed in
    /// `gpkg_contents` when `layer` is `None`.
    ///
    /// # Side effects
    /// - Emits `dataset_open` logging events with duration and row count.
    pub fn open(path: impl AsRef<Path>, layer: Option<&str>) -> DatasetResult<Self> {
        let started_at = Instant::now();
        info!("event=dataset_open module=dataset status=start");
        match Self::load(path.as_ref(), layer) {
            Ok(dataset) => {
                info!(
                    "event=dataset_open module=dataset status=ok layer={} columns={} rows={} duration_ms={}",
                    dataset.layer,
                    dataset.columns.len(),
                    dataset.order.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(dataset)
            }
            Err(err) => {
                error!(
                    "event=dataset_open module=dataset status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn load(path: &Path, layer: Option<&str>) -> DatasetResult<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let layer = match layer {
            Some(name) => name.to_string(),
            None => first_layer(&conn)?,
        };

        let geometry_meta = load_geometry_meta(&conn, &layer)?;
        let table_columns = load_table_columns(&conn, &layer)?;
        let Some(fid_column) = table_columns
            .iter()
            .find(|c| c.primary_key)
            .map(|c| c.name.clone())
        else {
            return Err(DatasetError::InvalidData(format!(
                "layer `{layer}` has no integer primary key"
            )));
        };
        let geometry_column = geometry_meta.as_ref().map(|meta| meta.column_name.clone());

        let columns: Vec<Column> = table_columns
            .iter()
            .filter(|c| !c.primary_key && Some(&c.name) != geometry_column.as_ref())
            .map(|c| Column::hidden(c.name.clone(), map_declared_type(&c.declared_type)))
            .collect();
        let declared_types: HashMap<String, String> = table_columns
            .iter()
            .filter(|c| columns.iter().any(|column| column.name == c.name))
            .map(|c| (c.name.clone(), c.declared_type.clone()))
            .collect();

        let mut select = vec![quote_ident(&fid_column)];
        select.push(match &geometry_column {
            Some(name) => quote_ident(name),
            None => "NULL".to_string(),
        });
        select.extend(columns.iter().map(|c| quote_ident(&c.name)));
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {};",
            select.join(", "),
            quote_ident(&layer),
            quote_ident(&fid_column)
        );

        let mut order = Vec::new();
        let mut rows = HashMap::new();
        let mut geometries = HashMap::new();
        let mut stmt = conn.prepare(&sql)?;
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let id = FeatureId(row.get::<_, i64>(0)?);
            if let ValueRef::Blob(blob) = row.get_ref(1)? {
                geometries.insert(id, blob.to_vec());
            }
            let mut values = BaseRow::with_capacity(columns.len());
            for (offset, column) in columns.iter().enumerate() {
                let raw = read_value(row.get_ref(offset + 2)?);
                let value = match raw.coerce_to(column.column_type) {
                    Some(value) => value,
                    None => {
                        warn!(
                            "event=dataset_value_mismatch module=dataset status=warn feature_id={} column={} expected={} found={}",
                            id,
                            column.name,
                            column.column_type,
                            raw.kind_name()
                        );
                        raw
                    }
                };
                values.insert(column.name.clone(), value);
            }
            order.push(id);
            rows.insert(id, values);
        }

        Ok(Self {
            layer,
            columns,
            order,
            rows,
            geometry_meta,
            geometries,
            declared_types,
        })
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }
}

impl BaseRowSource for GpkgDataset {
    fn list_columns(&self) -> &[Column] {
        &self.columns
    }

    fn list_feature_ids(&self) -> Vec<FeatureId> {
        self.order.clone()
    }

    fn get_row(&self, id: FeatureId) -> DatasetResult<&BaseRow> {
        self.rows.get(&id).ok_or(DatasetError::NotFound(id))
    }

    fn contains(&self, id: FeatureId) -> bool {
        self.rows.contains_key(&id)
    }

    fn layer_name(&self) -> &str {
        &self.layer
    }

    fn geometry_meta(&self) -> Option<&GeometryMeta> {
        self.geometry_meta.as_ref()
    }

    fn geometry(&self, id: FeatureId) -> Option<&[u8]> {
        self.geometries.get(&id).map(Vec::as_slice)
    }

    fn declared_type(&self, column: &str) -> Option<&str> {
        self.declared_types
            .get(column)
            .map(String::as_str)
            .filter(|declared| !declared.trim().is_empty())
    }
}

struct TableColumn {
    name: String,
    declared_type: String,
    primary_key: bool,
}

fn first_layer(conn: &Connection) -> DatasetResult<String> {
    conn.query_row(
        "SELECT table_name
         FROM gpkg_contents
         WHERE data_type IN ('features', 'attributes')
         ORDER BY rowid
         LIMIT 1;",
        [],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| DatasetError::LayerNotFound("<first layer>".to_string()))
}

fn load_geometry_meta(conn: &Connection, layer: &str) -> DatasetResult<Option<GeometryMeta>> {
    let meta = conn
        .query_row(
            "SELECT column_name, geometry_type_name, srs_id, z, m
             FROM gpkg_geometry_columns
             WHERE table_name = ?1;",
            [layer],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((column_name, geometry_type_name, srs_id, z, m)) = meta else {
        return Ok(None);
    };

    let srs = conn
        .query_row(
            "SELECT srs_name, srs_id, organization, organization_coordsys_id, definition, description
             FROM gpkg_spatial_ref_sys
             WHERE srs_id = ?1;",
            [srs_id],
            |row| {
                Ok(SpatialRefSys {
                    srs_name: row.get(0)?,
                    srs_id: row.get(1)?,
                    organization: row.get(2)?,
                    organization_coordsys_id: row.get(3)?,
                    definition: row.get(4)?,
                    description: row.get(5)?,
                })
            },
        )
        .optional()?;

    Ok(Some(GeometryMeta {
        column_name,
        geometry_type_name,
        srs,
        z,
        m,
    }))
}

fn load_table_columns(conn: &Connection, layer: &str) -> DatasetResult<Vec<TableColumn>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(layer)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let declared_type: String = row.get(2)?;
        let pk: i64 = row.get(5)?;
        columns.push(TableColumn {
            name: row.get(1)?,
            primary_key: pk > 0 && declared_type.eq_ignore_ascii_case("INTEGER"),
            declared_type,
        });
    }
    if columns.is_empty() {
        return Err(DatasetError::LayerNotFound(layer.to_string()));
    }
    Ok(columns)
}

/// Maps a declared SQLite/GeoPackage column type onto a scalar type.
pub fn map_declared_type(declared: &str) -> ColumnType {
    let upper = declared.trim().to_ascii_uppercase();
    if upper.starts_with("BOOL") {
        ColumnType::Boolean
    } else if upper.contains("INT")
        || upper.starts_with("REAL")
        || upper.starts_with("DOUBLE")
        || upper.starts_with("FLOAT")
        || upper.starts_with("NUMERIC")
        || upper.starts_with("DECIMAL")
    {
        ColumnType::Number
    } else {
        ColumnType::Text
    }
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Number(v as f64),
        ValueRef::Real(v) => Value::Number(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::map_declared_type;
    use crate::model::value::ColumnType;

    #[test]
    fn declared_types_map_to_scalars() {
        assert_eq!(map_declared_type("INTEGER"), ColumnType::Number);
        assert_eq!(map_declared_type("MEDIUMINT"), ColumnType::Number);
        assert_eq!(map_declared_type("REAL"), ColumnType::Number);
        assert_eq!(map_declared_type("BOOLEAN"), ColumnType::Boolean);
        assert_eq!(map_declared_type("TEXT(20)"), ColumnType::Text);
        assert_eq!(map_declared_type("DATE"), ColumnType::Text);
    }
}
