//! CSV encoding of a working table.
//!
//! UTF-8, `\n` line endings, fields quoted when they contain a comma,
//! a double quote, CR or LF. Null cells are empty fields.

use crate::exclusive::CancelToken;
use crate::export::{ExportError, ExportResult};
use crate::model::table::WorkingTable;
use std::io::Write;

/// Writes the header and every row. Returns the number of data rows.
pub fn write_csv<W: Write>(
    table: &WorkingTable,
    out: &mut W,
    cancel: &CancelToken,
) -> ExportResult<usize> {
    let header: Vec<&str> = table.column_names().collect();
    write_record(out, header.iter().copied())?;

    for row in table.rows() {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let fields: Vec<String> = row.values.iter().map(|value| value.display_text()).collect();
        write_record(out, fields.iter().map(String::as_str))?;
    }
    Ok(table.len())
}

fn write_record<'a, W: Write>(
    out: &mut W,
    fields: impl Iterator<Item = &'a str>,
) -> std::io::Result<()> {
    let line = fields.map(escape_field).collect::<Vec<_>>().join(",");
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")
}

/// Quotes a field when needed, doubling embedded quotes.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{escape_field, write_csv};
    use crate::exclusive::CancelToken;
    use crate::export::ExportError;
    use crate::model::schema::{Column, ColumnMode};
    use crate::model::table::{WorkingRow, WorkingTable};
    use crate::model::value::{ColumnType, FeatureId, Value};
    use std::collections::BTreeSet;

    fn table() -> WorkingTable {
        let mut table = WorkingTable::new(vec![
            Column::new("NAME", ColumnType::Text, ColumnMode::Display),
            Column::new("VAL", ColumnType::Number, ColumnMode::Editable),
            Column::new("OK", ColumnType::Boolean, ColumnMode::Display),
        ]);
        table.push_row(WorkingRow {
            feature_id: FeatureId(1),
            values: vec![Value::text("a, \"b\""), Value::Number(2.5), Value::Boolean(true)],
            edited_columns: BTreeSet::new(),
            added: false,
        });
        table.push_row(WorkingRow {
            feature_id: FeatureId(2),
            values: vec![Value::text("line\nbreak"), Value::Null, Value::Null],
            edited_columns: BTreeSet::new(),
            added: false,
        });
        table
    }

    #[test]
    fn escapes_only_when_needed() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("cr\r"), "\"cr\r\"");
    }

    #[test]
    fn writes_header_rows_and_blank_nulls() {
        let mut out = Vec::new();
        let rows = write_csv(&table(), &mut out, &CancelToken::new()).unwrap();
        assert_eq!(rows, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "NAME,VAL,OK\n\"a, \"\"b\"\"\",2.5,true\n\"line\nbreak\",,\n"
        );
    }

    #[test]
    fn cancelled_write_stops_before_rows() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        assert!(matches!(
            write_csv(&table(), &mut out, &cancel),
            Err(ExportError::Cancelled)
        ));
    }
}
