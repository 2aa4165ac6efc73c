#![allow(dead_code)]

use gpkg_overlay_core::{
    Column, ColumnMode, ColumnType, FeatureId, MemoryDataset, Plan, Schema, Value,
};
use rusqlite::Connection;
use std::path::Path;

pub const POLYGON_BLOB: &[u8] = &[0x47, 0x50, 0x00, 0x01, 0xe6, 0x10, 0x00, 0x00, 0x01, 0x03];

/// `f1..f3` with NAME (text) and VAL (number).
pub fn name_val_dataset() -> MemoryDataset {
    MemoryDataset::new(vec![
        Column::hidden("NAME", ColumnType::Text),
        Column::hidden("VAL", ColumnType::Number),
    ])
    .with_row(
        FeatureId(1),
        [("NAME", Value::text("alpha")), ("VAL", Value::Number(10.0))],
    )
    .with_row(
        FeatureId(2),
        [("NAME", Value::text("beta")), ("VAL", Value::Number(5.0))],
    )
    .with_row(
        FeatureId(3),
        [("NAME", Value::text("gamma")), ("VAL", Value::Null)],
    )
}

pub fn name_val_schema() -> Schema {
    Schema::new(vec![
        Column::new("NAME", ColumnType::Text, ColumnMode::Display),
        Column::new("VAL", ColumnType::Number, ColumnMode::Editable),
    ])
    .unwrap()
}

pub fn plan(name: &str, ids: &[i64]) -> Plan {
    Plan::new(
        name,
        ids.iter().copied().map(FeatureId).collect(),
        name_val_schema(),
    )
}

/// Writes a small GeoPackage with one polygon layer `stands`.
pub fn write_fixture_gpkg(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        r#"
        PRAGMA application_id = 1196444487;
        CREATE TABLE gpkg_spatial_ref_sys (
          srs_name TEXT NOT NULL,
          srs_id INTEGER PRIMARY KEY,
          organization TEXT NOT NULL,
          organization_coordsys_id INTEGER NOT NULL,
          definition TEXT NOT NULL,
          description TEXT
        );
        INSERT INTO gpkg_spatial_ref_sys VALUES
          ('JGD2011 / Japan Plane Rectangular CS IX', 6677, 'EPSG', 6677, 'PROJCS["JGD2011 / IX"]', NULL);
        CREATE TABLE gpkg_contents (
          table_name TEXT NOT NULL PRIMARY KEY,
          data_type TEXT NOT NULL,
          identifier TEXT,
          srs_id INTEGER
        );
        INSERT INTO gpkg_contents VALUES ('stands', 'features', 'stands', 6677);
        CREATE TABLE gpkg_geometry_columns (
          table_name TEXT NOT NULL,
          column_name TEXT NOT NULL,
          geometry_type_name TEXT NOT NULL,
          srs_id INTEGER NOT NULL,
          z TINYINT NOT NULL,
          m TINYINT NOT NULL
        );
        INSERT INTO gpkg_geometry_columns VALUES ('stands', 'geom', 'POLYGON', 6677, 0, 0);
        CREATE TABLE stands (
          fid INTEGER PRIMARY KEY,
          geom POLYGON,
          NAME TEXT,
          VAL INTEGER,
          ACTIVE BOOLEAN
        );
        "#,
    )
    .unwrap();
    conn.execute(
        "INSERT INTO stands VALUES (1, ?1, 'alpha', 10, 1);",
        [POLYGON_BLOB],
    )
    .unwrap();
    conn.execute_batch(
        "INSERT INTO stands VALUES (2, NULL, 'beta', 5, 0);
         INSERT INTO stands VALUES (3, NULL, 'gamma', NULL, NULL);",
    )
    .unwrap();
}
