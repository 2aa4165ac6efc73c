mod common;

use common::{write_fixture_gpkg, POLYGON_BLOB};
use gpkg_overlay_core::{
    materialize, BaseRowSource, CancelToken, Column, ColumnMode, ColumnType, ExportFormat,
    ExportSnapshot, FeatureId, GpkgDataset, MemoryDataset, OverlayStore, Plan, Schema, Session,
    SessionConfig, SessionError, Value,
};
use rusqlite::Connection;
use std::path::Path;

fn open_fixture(dir: &Path) -> Session<GpkgDataset> {
    let dataset = dir.join("forest.gpkg");
    write_fixture_gpkg(&dataset);
    Session::open(&SessionConfig::for_dataset(dataset)).unwrap()
}

fn reordered_plan(ids: &[i64]) -> Plan {
    let schema = Schema::new(vec![
        Column::new("VAL", ColumnType::Number, ColumnMode::Editable),
        Column::new("NAME", ColumnType::Text, ColumnMode::Display),
        Column::new("ACTIVE", ColumnType::Boolean, ColumnMode::Hidden),
    ])
    .unwrap();
    Plan::new("P1", ids.iter().copied().map(FeatureId).collect(), schema)
}

#[test]
fn gpkg_export_keeps_geometry_and_schema_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = open_fixture(dir.path());
    assert_eq!(session.dataset().layer(), "stands");

    session.save_plan(&reordered_plan(&[1, 2])).unwrap();
    session.select_plan("P1").unwrap();
    session.edit_cell(FeatureId(1), "VAL", 20.0).unwrap();
    let added = session
        .add_feature(&[("NAME", Value::text("delta")), ("VAL", Value::Number(3.0))])
        .unwrap();

    let out = dir.path().join("export.gpkg");
    let summary = session
        .export_to_path(ExportFormat::Gpkg, &out, &CancelToken::new())
        .unwrap();
    assert_eq!(summary.rows, 3);
    assert!(!dir.path().join("export.gpkg.partial").exists());

    let exported = GpkgDataset::open(&out, None).unwrap();
    assert_eq!(exported.layer(), "stands");
    let names: Vec<&str> = exported
        .list_columns()
        .iter()
        .map(|column| column.name.as_str())
        .collect();
    assert_eq!(names, vec!["VAL", "NAME"]);
    assert_eq!(
        exported.list_feature_ids(),
        vec![added, FeatureId(1), FeatureId(2)]
    );
    assert_eq!(exported.geometry(FeatureId(1)), Some(POLYGON_BLOB));
    assert_eq!(exported.geometry(added), None);
    assert_eq!(
        exported.get_row(FeatureId(1)).unwrap().get("VAL"),
        Some(&Value::Number(20.0))
    );
    assert_eq!(
        exported.get_row(added).unwrap().get("NAME"),
        Some(&Value::text("delta"))
    );

    let conn = Connection::open(&out).unwrap();
    let application_id: i64 = conn
        .query_row("PRAGMA application_id;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(application_id, 0x4750_4B47);
    let (geometry_type, srs_id): (String, i64) = conn
        .query_row(
            "SELECT geometry_type_name, srs_id FROM gpkg_geometry_columns WHERE table_name = 'stands';",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(geometry_type, "POLYGON");
    assert_eq!(srs_id, 6677);
    let data_type: String = conn
        .query_row(
            "SELECT data_type FROM gpkg_contents WHERE table_name = 'stands';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(data_type, "features");
}

#[test]
fn export_leaves_dataset_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = open_fixture(dir.path());
    session.save_plan(&reordered_plan(&[1])).unwrap();
    session.select_plan("P1").unwrap();
    session.edit_cell(FeatureId(1), "VAL", 99.0).unwrap();
    session.persist(&CancelToken::new()).unwrap();

    let reread = GpkgDataset::open(dir.path().join("forest.gpkg"), None).unwrap();
    assert_eq!(
        reread.get_row(FeatureId(1)).unwrap().get("VAL"),
        Some(&Value::Number(10.0))
    );
    assert!(dir.path().join("forest_data.sqlite").exists());
}

#[test]
fn csv_export_to_path_uses_visible_columns() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = open_fixture(dir.path());
    session.save_plan(&reordered_plan(&[2, 3])).unwrap();
    session.select_plan("P1").unwrap();

    let out = dir.path().join("export.CSV");
    assert_eq!(ExportFormat::from_path(&out), Some(ExportFormat::Csv));
    session
        .export_to_path(ExportFormat::Csv, &out, &CancelToken::new())
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        "VAL,NAME\n5,beta\n,gamma\n"
    );
}

#[test]
fn cancelled_export_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = open_fixture(dir.path());
    session.save_plan(&reordered_plan(&[1, 2, 3])).unwrap();
    session.select_plan("P1").unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    for (format, file) in [(ExportFormat::Gpkg, "out.gpkg"), (ExportFormat::Csv, "out.csv")] {
        let out = dir.path().join(file);
        let err = session.export_to_path(format, &out, &cancel).unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert!(!out.exists());
        assert!(!dir.path().join(format!("{file}.partial")).exists());
    }
    assert!(!session.is_busy());
}

#[test]
fn gpkg_export_to_writer_produces_a_geopackage() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = open_fixture(dir.path());
    session.save_plan(&reordered_plan(&[1])).unwrap();
    session.select_plan("P1").unwrap();

    let mut bytes = Vec::new();
    session
        .export(ExportFormat::Gpkg, &mut bytes, &CancelToken::new())
        .unwrap();
    assert!(bytes.starts_with(b"SQLite format 3\0"));

    let copy = dir.path().join("copy.gpkg");
    std::fs::write(&copy, &bytes).unwrap();
    let exported = GpkgDataset::open(&copy, Some("stands")).unwrap();
    assert_eq!(exported.list_feature_ids(), vec![FeatureId(1)]);
}

#[test]
fn legacy_plan_file_is_imported_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = Connection::open(dir.path().join("forest_plans.sqlite")).unwrap();
    legacy
        .execute_batch(
            r#"
            CREATE TABLE plans (name TEXT PRIMARY KEY, fids TEXT, column_config TEXT);
            INSERT INTO plans VALUES ('old', '[1, 3]', '{"NAME": "表示のみ", "VAL": "表示＋編集"}');
            "#,
        )
        .unwrap();
    drop(legacy);

    let mut session = open_fixture(dir.path());
    assert_eq!(session.list_plans().unwrap(), vec!["old".to_string()]);
    session.select_plan("old").unwrap();
    session.edit_cell(FeatureId(3), "VAL", 4.0).unwrap();
    assert_eq!(session.working_table().unwrap().len(), 2);
}

fn declared_types(conn: &Connection, table: &str) -> Vec<(String, String)> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\");"))
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn gpkg_export_keeps_declared_column_types() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = open_fixture(dir.path());
    session.save_plan(&reordered_plan(&[1, 2])).unwrap();
    session.select_plan("P1").unwrap();

    let out = dir.path().join("typed.gpkg");
    session
        .export_to_path(ExportFormat::Gpkg, &out, &CancelToken::new())
        .unwrap();

    let conn = Connection::open(&out).unwrap();
    let types = declared_types(&conn, "stands");
    assert!(types.contains(&("VAL".to_string(), "INTEGER".to_string())));
    assert!(types.contains(&("NAME".to_string(), "TEXT".to_string())));
    let stored: String = conn
        .query_row("SELECT typeof(VAL) FROM stands WHERE fid = 1;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, "integer");
}

#[test]
fn attribute_named_fid_gets_a_separate_key_column() {
    let dir = tempfile::tempdir().unwrap();
    let base = MemoryDataset::new(vec![
        Column::hidden("FID", ColumnType::Text),
        Column::hidden("fid_1", ColumnType::Number),
    ])
    .with_row(
        FeatureId(7),
        [("FID", Value::text("A-7")), ("fid_1", Value::Number(1.0))],
    );
    let schema = Schema::new(vec![
        Column::new("FID", ColumnType::Text, ColumnMode::Display),
        Column::new("fid_1", ColumnType::Number, ColumnMode::Display),
    ])
    .unwrap();
    let plan = Plan::new("P", vec![FeatureId(7)], schema);
    let table = materialize(&plan, &base, &OverlayStore::new());
    let snapshot = ExportSnapshot::capture(&table, &base);

    let out = dir.path().join("keys.gpkg");
    snapshot
        .write_to_path(ExportFormat::Gpkg, &out, &CancelToken::new())
        .unwrap();

    let conn = Connection::open(&out).unwrap();
    let names: Vec<String> = declared_types(&conn, &snapshot.layer_name)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["fid_2", "FID", "fid_1"]);
    let (key, label): (i64, String) = conn
        .query_row(
            &format!("SELECT fid_2, FID FROM \"{}\";", snapshot.layer_name),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!((key, label), (7, "A-7".to_string()));
}
