mod common;

use common::{name_val_dataset, plan};
use gpkg_overlay_core::{
    CancelToken, CellEdit, ColumnMode, ExportFormat, ExportScope, ExprError, FeatureId,
    OverlayError, PlanError, Session, SessionError, StatusRow, Value,
};
use rusqlite::Connection;

fn session_with_p1(ids: &[i64]) -> Session<gpkg_overlay_core::MemoryDataset> {
    let mut session = Session::in_memory(name_val_dataset()).unwrap();
    let p1 = plan("P1", ids).with_status_rows(vec![
        StatusRow::new("concat", "\"VAL\" || 1"),
        StatusRow::new("total", "round(sum(\"VAL\"), 1)"),
    ]);
    session.save_plan(&p1).unwrap();
    session.select_plan("P1").unwrap();
    session
}

#[test]
fn edit_then_export_csv() {
    let mut session = session_with_p1(&[1]);
    session.edit_cell(FeatureId(1), "VAL", 20.0).unwrap();

    let table = session.working_table().unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.rows()[0].values, vec![Value::text("alpha"), Value::Number(20.0)]);

    let mut out = Vec::new();
    let summary = session
        .export(ExportFormat::Csv, &mut out, &CancelToken::new())
        .unwrap();
    assert_eq!(summary.rows, 1);
    assert_eq!(String::from_utf8(out).unwrap(), "NAME,VAL\nalpha,20\n");
}

#[test]
fn edits_are_rejected_while_export_holds_the_session() {
    let mut session = session_with_p1(&[1, 2]);
    let job = session.begin_export(ExportScope::Plan).unwrap();

    assert!(session.is_busy());
    assert!(matches!(
        session.edit_cell(FeatureId(1), "VAL", 1.0),
        Err(SessionError::Busy)
    ));
    assert!(matches!(
        session.persist(&CancelToken::new()),
        Err(SessionError::Busy)
    ));
    assert!(matches!(
        session.begin_export(ExportScope::Dataset),
        Err(SessionError::Busy)
    ));

    let mut out = Vec::new();
    job.write_to(ExportFormat::Csv, &mut out, &CancelToken::new())
        .unwrap();
    drop(job);

    assert!(!session.is_busy());
    session.edit_cell(FeatureId(1), "VAL", 1.0).unwrap();
}

#[test]
fn cancelled_export_writes_nothing() {
    let mut session = session_with_p1(&[1, 2]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut out = Vec::new();
    let err = session
        .export(ExportFormat::Csv, &mut out, &cancel)
        .unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));
    assert!(out.is_empty());
    assert!(!session.is_busy());
}

#[test]
fn only_editable_columns_accept_edits() {
    let mut session = session_with_p1(&[1]);
    assert!(matches!(
        session.edit_cell(FeatureId(1), "NAME", "renamed"),
        Err(SessionError::ColumnNotEditable(_))
    ));
    assert!(matches!(
        session.edit_cell(FeatureId(1), "NOPE", 1.0),
        Err(SessionError::UnknownColumn(_))
    ));
    assert!(matches!(
        session.edit_cell(FeatureId(2), "VAL", 1.0),
        Err(SessionError::UnknownFeature(FeatureId(2)))
    ));

    assert_eq!(session.cycle_column_mode("NAME").unwrap(), ColumnMode::Editable);
    session.edit_cell(FeatureId(1), "NAME", "renamed").unwrap();
}

#[test]
fn paste_is_all_or_nothing() {
    let mut session = session_with_p1(&[1, 2]);
    let err = session
        .paste_cells(&[
            CellEdit::new(FeatureId(1), "VAL", 30.0),
            CellEdit::new(FeatureId(2), "VAL", "not a number"),
        ])
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Overlay(OverlayError::TypeMismatch { .. })
    ));
    assert_eq!(session.overlay().get_override(FeatureId(1), "VAL"), None);

    let applied = session
        .paste_cells(&[
            CellEdit::new(FeatureId(1), "VAL", "30"),
            CellEdit::new(FeatureId(2), "VAL", 40.0),
        ])
        .unwrap();
    assert_eq!(applied, 2);
    assert_eq!(
        session.copy_cells(&[FeatureId(2), FeatureId(1)], &["VAL", "NAME"]).unwrap(),
        "40\tbeta\n30\talpha"
    );
}

#[test]
fn copy_cells_reports_unknown_columns_and_rows() {
    let mut session = session_with_p1(&[1, 3]);
    assert_eq!(
        session.copy_cells(&[FeatureId(3)], &["VAL", "NAME"]).unwrap(),
        "\tgamma"
    );
    assert_eq!(session.copy_cells(&[], &["NAME"]).unwrap(), "");
    assert!(matches!(
        session.copy_cells(&[FeatureId(1)], &["NAME", "MISSING"]),
        Err(SessionError::UnknownColumn(name)) if name == "MISSING"
    ));
    assert!(matches!(
        session.copy_cells(&[FeatureId(1), FeatureId(2)], &["NAME"]),
        Err(SessionError::UnknownFeature(FeatureId(2)))
    ));
}

#[test]
fn status_rows_fail_independently() {
    let mut session = session_with_p1(&[1, 2]);
    session.select_row(Some(FeatureId(1))).unwrap();

    let values = session.status_values().unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].label, "concat");
    assert!(matches!(values[0].result, Err(ExprError::Type(_))));
    assert_eq!(values[0].display(), "#ERR: TypeError");
    assert_eq!(values[1].result, Ok(Value::Number(15.0)));

    session.edit_cell(FeatureId(2), "VAL", 7.5).unwrap();
    let values = session.status_values().unwrap();
    assert_eq!(values[1].display(), "17.5");
}

#[test]
fn working_table_tracks_overlay_and_plan_changes() {
    let mut session = session_with_p1(&[1, 2]);
    assert_eq!(session.working_table().unwrap().len(), 2);

    session.remove_feature(FeatureId(2)).unwrap();
    assert_eq!(session.working_table().unwrap().len(), 1);

    session.restore_feature(FeatureId(2)).unwrap();
    assert_eq!(session.working_table().unwrap().len(), 2);

    session.set_column_mode("NAME", ColumnMode::Hidden).unwrap();
    let names: Vec<String> = session
        .working_table()
        .unwrap()
        .column_names()
        .map(str::to_string)
        .collect();
    assert_eq!(names, vec!["VAL".to_string()]);

    assert_eq!(session.remove_plan_features(&[FeatureId(1)]).unwrap(), 1);
    assert_eq!(session.working_table().unwrap().len(), 1);
}

#[test]
fn added_feature_joins_active_plan_and_survives_reselect() {
    let mut session = session_with_p1(&[1]);
    let id = session
        .add_feature(&[("NAME", Value::text("delta")), ("VAL", Value::Number(3.0))])
        .unwrap();
    assert!(id.is_overlay_allocated());

    let row = session.working_table().unwrap().row(id).unwrap().clone();
    assert!(row.added);
    assert_eq!(row.values, vec![Value::text("delta"), Value::Number(3.0)]);

    session.select_plan("P1").unwrap();
    assert!(session.working_table().unwrap().row(id).is_some());
}

#[test]
fn persist_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("forest_data.sqlite");

    {
        let mut session = Session::with_store(name_val_dataset(), &store).unwrap();
        session.save_plan(&plan("P1", &[1, 2])).unwrap();
        session.select_plan("P1").unwrap();
        session.edit_cell(FeatureId(1), "VAL", 20.0).unwrap();
        assert!(session.has_unsaved_edits());
        session.persist(&CancelToken::new()).unwrap();
        assert!(!session.has_unsaved_edits());

        session.edit_cell(FeatureId(2), "VAL", 99.0).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(session.persist(&cancel), Err(SessionError::Cancelled)));
    }

    let mut session = Session::with_store(name_val_dataset(), &store).unwrap();
    assert!(session.store_corruption().is_empty());
    assert_eq!(session.list_plans().unwrap(), vec!["P1".to_string()]);
    session.select_plan("P1").unwrap();
    let table = session.working_table().unwrap();
    assert_eq!(table.rows()[0].values[1], Value::Number(20.0));
    assert_eq!(table.rows()[1].values[1], Value::Number(5.0));
}

#[test]
fn corrupt_store_is_quarantined_and_session_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("forest_data.sqlite");
    std::fs::write(&store, b"this is not an sqlite file, only some unrelated bytes").unwrap();

    let session = Session::with_store(name_val_dataset(), &store).unwrap();
    assert_eq!(session.store_corruption().len(), 1);
    assert_eq!(session.store_corruption()[0].feature_id, None);
    assert!(session.overlay().is_empty());

    let quarantined = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("forest_data.sqlite.corrupt-")
        })
        .count();
    assert_eq!(quarantined, 1);
}

#[test]
fn operations_without_plan_report_no_active_plan() {
    let mut session = Session::in_memory(name_val_dataset()).unwrap();
    assert!(matches!(session.working_table(), Err(SessionError::NoActivePlan)));
    assert!(matches!(
        session.edit_cell(FeatureId(1), "VAL", 1.0),
        Err(SessionError::NoActivePlan)
    ));
    assert!(matches!(
        session.select_plan("missing"),
        Err(SessionError::Plan(_))
    ));
}

#[test]
fn deleting_active_plan_clears_it() {
    let mut session = session_with_p1(&[1]);
    session.delete_plan("P1").unwrap();
    assert!(session.active_plan().is_none());
    assert!(session.list_plans().unwrap().is_empty());
}

#[test]
fn dataset_scope_exports_every_feature_with_plan_columns() {
    let mut session = session_with_p1(&[1]);
    session.edit_cell(FeatureId(1), "VAL", 20.0).unwrap();
    session.remove_feature(FeatureId(3)).unwrap();
    session
        .add_feature(&[("NAME", Value::text("delta")), ("VAL", Value::Number(3.0))])
        .unwrap();

    let job = session.begin_export(ExportScope::Dataset).unwrap();
    assert_eq!(job.snapshot().table.len(), 3);
    let mut out = Vec::new();
    job.write_to(ExportFormat::Csv, &mut out, &CancelToken::new())
        .unwrap();
    drop(job);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "NAME,VAL\nalpha,20\nbeta,5\ndelta,3\n"
    );

    // The plan itself still covers f1 and the added feature only.
    assert_eq!(session.working_table().unwrap().len(), 2);
}

#[test]
fn dataset_scope_needs_an_active_plan() {
    let mut session = Session::in_memory(name_val_dataset()).unwrap();
    assert!(matches!(
        session.begin_export(ExportScope::Dataset),
        Err(SessionError::NoActivePlan)
    ));
    assert!(!session.is_busy());
}

#[test]
fn failed_plan_write_leaves_no_added_feature() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("overlay.sqlite");
    let mut session = Session::with_store(name_val_dataset(), &store).unwrap();
    session.save_plan(&plan("P1", &[1])).unwrap();
    session.select_plan("P1").unwrap();

    Connection::open(&store)
        .unwrap()
        .execute("DELETE FROM plans WHERE name = 'P1';", [])
        .unwrap();

    let err = session
        .add_feature(&[("NAME", Value::text("delta"))])
        .unwrap_err();
    assert!(matches!(err, SessionError::Plan(PlanError::NotFound(_))));
    assert!(session.overlay().added_features().is_empty());
    assert_eq!(session.active_plan().unwrap().feature_ids, vec![FeatureId(1)]);
}
