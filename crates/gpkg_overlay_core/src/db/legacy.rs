//! Import of plans from the older standalone plans file.
//!
//! Earlier releases kept plans in `<stem>_plans.sqlite` next to the dataset.
//! The import copies them into the side store without overwriting plans the
//! store already has.

use crate::db::DbResult;
use log::{info, warn};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Copies legacy plans into `conn`. Returns how many plans were inserted.
///
/// A missing legacy file or a legacy file without a `plans` table imports
/// nothing. Legacy tables without a `status_exprs` column are accepted.
pub fn import_legacy_plans(conn: &mut Connection, legacy_path: &Path) -> DbResult<usize> {
    if !legacy_path.exists() {
        return Ok(0);
    }

    let legacy = Connection::open_with_flags(legacy_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let has_plans: i64 = legacy.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'plans'
        );",
        [],
        |row| row.get(0),
    )?;
    if has_plans == 0 {
        warn!("event=legacy_import module=db status=warn reason=no_plans_table");
        return Ok(0);
    }

    let select = if legacy_has_column(&legacy, "status_exprs")? {
        "SELECT name, fids, column_config, status_exprs FROM plans;"
    } else {
        "SELECT name, fids, column_config, NULL FROM plans;"
    };

    let mut stmt = legacy.prepare(select)?;
    let mut rows = stmt.query([])?;
    let mut legacy_plans = Vec::new();
    while let Some(row) = rows.next()? {
        legacy_plans.push((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
        ));
    }

    let tx = conn.transaction()?;
    let mut inserted = 0;
    for (name, fids, column_config, status_exprs) in &legacy_plans {
        inserted += tx.execute(
            "INSERT OR IGNORE INTO plans (name, fids, column_config, status_exprs)
             VALUES (?1, ?2, ?3, ?4);",
            rusqlite::params![name, fids, column_config, status_exprs],
        )?;
    }
    tx.commit()?;

    info!(
        "event=legacy_import module=db status=ok found={} inserted={}",
        legacy_plans.len(),
        inserted
    );
    Ok(inserted)
}

fn legacy_has_column(conn: &Connection, column: &str) -> DbResult<bool> {
    let mut stmt = conn.prepare("PRAGMA table_info(plans);")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
