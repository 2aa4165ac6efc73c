//! GeoPackage encoding of a working table.
//!
//! # Responsibility
//! - Create a minimal GeoPackage with the required metadata tables and one
//!   feature (or attribute) table holding the merged values.
//!
//! # Invariants
//! - Geometry blobs are copied byte-for-byte; added features get NULL.
//! - The layer keeps the source geometry column name, type and SRS.
//! - Rows are inserted in one transaction; a cancel rolls it back.

use crate::dataset::gpkg::map_declared_type;
use crate::dataset::SpatialRefSys;
use crate::db::quote_ident;
use crate::exclusive::CancelToken;
use crate::export::{ExportError, ExportResult, ExportSnapshot};
use crate::model::schema::Column;
use crate::model::value::{ColumnType, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;

/// `GPKG` in ASCII.
const APPLICATION_ID: i32 = 0x4750_4B47;
const USER_VERSION: i32 = 10200;

const CREATE_METADATA_SQL: &str = r#"
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition TEXT NOT NULL,
  description TEXT
);

CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);

CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);

INSERT INTO gpkg_spatial_ref_sys VALUES
  ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', 'undefined cartesian coordinate reference system'),
  ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', 'undefined geographic coordinate reference system');
"#;

const WGS84_DEFINITION: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#;

/// Creates a GeoPackage at `path` from the snapshot. Returns the number of
/// feature rows written.
pub fn write_gpkg(
    snapshot: &ExportSnapshot,
    path: &Path,
    cancel: &CancelToken,
) -> ExportResult<usize> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut conn = Connection::open(path)?;
    conn.pragma_update(None, "application_id", APPLICATION_ID)?;
    conn.pragma_update(None, "user_version", USER_VERSION)?;
    conn.execute_batch(CREATE_METADATA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO gpkg_spatial_ref_sys VALUES
           ('WGS 84 geodetic', 4326, 'EPSG', 4326, ?1, 'longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid');",
        [WGS84_DEFINITION],
    )?;

    let table = &snapshot.table;
    let layer = snapshot.layer_name.as_str();
    let meta = snapshot.geometry_meta.as_ref();
    let srs_id = match meta.and_then(|meta| meta.srs.as_ref()) {
        Some(srs) => {
            insert_srs(&conn, srs)?;
            srs.srs_id
        }
        None => 0,
    };

    let fid = primary_key_name(snapshot);
    let mut definitions = vec![format!("{} INTEGER PRIMARY KEY", quote_ident(&fid))];
    if let Some(meta) = meta {
        definitions.push(format!(
            "{} {}",
            quote_ident(&meta.column_name),
            geometry_sql_type(&meta.geometry_type_name)
        ));
    }
    definitions.extend(
        table
            .columns()
            .iter()
            .map(|column| format!("{} {}", quote_ident(&column.name), column_sql_type(snapshot, column))),
    );
    conn.execute_batch(&format!(
        "CREATE TABLE {} ({});",
        quote_ident(layer),
        definitions.join(", ")
    ))?;

    conn.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, srs_id)
         VALUES (?1, ?2, ?1, ?3);",
        params![
            layer,
            if meta.is_some() { "features" } else { "attributes" },
            meta.map(|_| srs_id)
        ],
    )?;
    if let Some(meta) = meta {
        conn.execute(
            "INSERT INTO gpkg_geometry_columns
               (table_name, column_name, geometry_type_name, srs_id, z, m)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                layer,
                meta.column_name,
                meta.geometry_type_name,
                srs_id,
                meta.z,
                meta.m
            ],
        )?;
    }

    let mut columns = vec![quote_ident(&fid)];
    if let Some(meta) = meta {
        columns.push(quote_ident(&meta.column_name));
    }
    columns.extend(table.columns().iter().map(|column| quote_ident(&column.name)));
    let placeholders = (1..=columns.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_sql = format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_ident(layer),
        columns.join(", "),
        placeholders
    );

    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare(&insert_sql)?;
        for row in table.rows() {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            let mut values = vec![SqlValue::Integer(row.feature_id.get())];
            if meta.is_some() {
                values.push(match snapshot.geometries.get(&row.feature_id) {
                    Some(blob) => SqlValue::Blob(blob.clone()),
                    None => SqlValue::Null,
                });
            }
            values.extend(row.values.iter().map(to_sql));
            insert.execute(params_from_iter(values))?;
        }
    }
    if cancel.is_cancelled() {
        return Err(ExportError::Cancelled);
    }
    tx.commit()?;
    Ok(table.len())
}

fn insert_srs(conn: &Connection, srs: &SpatialRefSys) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO gpkg_spatial_ref_sys
           (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            srs.srs_name,
            srs.srs_id,
            srs.organization,
            srs.organization_coordsys_id,
            srs.definition,
            srs.description
        ],
    )?;
    Ok(())
}

/// Name of the integer key column. `fid` unless an attribute or the
/// geometry column already uses it (SQLite names are case-insensitive).
fn primary_key_name(snapshot: &ExportSnapshot) -> String {
    let taken = |name: &str| {
        snapshot
            .table
            .columns()
            .iter()
            .any(|column| column.name.eq_ignore_ascii_case(name))
            || snapshot
                .geometry_meta
                .as_ref()
                .is_some_and(|meta| meta.column_name.eq_ignore_ascii_case(name))
    };
    let mut name = "fid".to_string();
    let mut suffix = 0;
    while taken(&name) {
        suffix += 1;
        name = format!("fid_{suffix}");
    }
    name
}

/// Keeps the source's declared type when it still maps to the column type.
fn column_sql_type<'a>(snapshot: &'a ExportSnapshot, column: &Column) -> &'a str {
    match snapshot.declared_types.get(&column.name) {
        Some(declared)
            if is_plain_type_name(declared)
                && map_declared_type(declared) == column.column_type =>
        {
            declared.as_str()
        }
        _ => sql_type(column.column_type),
    }
}

fn is_plain_type_name(declared: &str) -> bool {
    !declared.trim().is_empty()
        && declared
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','))
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Number => "REAL",
        ColumnType::Text => "TEXT",
        ColumnType::Boolean => "BOOLEAN",
    }
}

/// Geometry type names are plain words (`POINT`, `MULTIPOLYGON`); anything
/// else falls back to the generic type.
fn geometry_sql_type(name: &str) -> &str {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric()) {
        name
    } else {
        "GEOMETRY"
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Number(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Boolean(v) => SqlValue::Integer(i64::from(*v)),
    }
}
