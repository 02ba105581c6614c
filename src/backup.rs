//! Data backup and factory reset.
//!
//! A backup is a zip holding one `{table}.json` array per table plus a
//! `manifest.json`. PIN hashes never leave the database.

use chrono::Utc;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::{self, DbState};
use crate::diagnostics::DATA_TABLES;
use crate::error::PosResult;

pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// Business tables, children first so deletes satisfy foreign keys.
const RESET_ORDER: &[&str] = &[
    "installment_payments",
    "installment_schedule",
    "installment_plan_guarantors",
    "installment_plans",
    "sale_items",
    "sales",
    "guarantors",
    "customers",
    "products",
    "suppliers",
];

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => json!(b),
    }
}

fn dump_table(conn: &Connection, table: &str) -> PosResult<Vec<Value>> {
    let sql = if table == "local_settings" {
        "SELECT setting_category, setting_key, setting_value, updated_at FROM local_settings
         WHERE setting_key NOT LIKE '%_pin_hash' ORDER BY setting_category, setting_key"
            .to_string()
    } else {
        format!("SELECT * FROM {table} ORDER BY rowid")
    };
    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let rows = stmt.query_map([], |row| {
        let mut obj = serde_json::Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            obj.insert(name.clone(), column_value(row.get_ref(idx)?));
        }
        Ok(Value::Object(obj))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Write `electromart-backup-{ts}.zip` into `out_dir` and return its path.
pub fn export_backup(db: &DbState, out_dir: &Path) -> PosResult<PathBuf> {
    let (tables, schema_version) = {
        let conn = db.conn.lock()?;
        let mut tables = Vec::with_capacity(DATA_TABLES.len());
        for table in DATA_TABLES {
            tables.push((*table, dump_table(&conn, table)?));
        }
        (tables, db::schema_version(&conn))
    };

    fs::create_dir_all(out_dir)?;
    let now = Utc::now();
    let zip_path = out_dir.join(format!(
        "electromart-backup-{}.zip",
        now.format("%Y%m%d_%H%M%S")
    ));
    let file = fs::File::create(&zip_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut counts = serde_json::Map::new();
    for (table, rows) in &tables {
        counts.insert((*table).to_string(), json!(rows.len()));
        zip.start_file(format!("{table}.json"), options)?;
        zip.write_all(serde_json::to_string_pretty(rows)?.as_bytes())?;
    }

    let manifest = json!({
        "format": BACKUP_FORMAT_VERSION,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "schemaVersion": schema_version,
        "exportedAt": now.to_rfc3339(),
        "counts": counts,
    });
    zip.start_file("manifest.json", options)?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;
    zip.finish()?;

    info!(path = %zip_path.display(), tables = tables.len(), "Backup exported");
    Ok(zip_path)
}

/// Delete all business data in one transaction.
///
/// Carts always go. With `keep_settings` false the store profile goes too;
/// staff PINs are kept either way so the Admin Portal stays reachable.
pub fn reset_data(db: &DbState, keep_settings: bool) -> PosResult<Value> {
    let conn = db.conn.lock()?;
    let deleted = db::with_transaction(&conn, |tx| {
        let mut deleted = serde_json::Map::new();
        for table in RESET_ORDER {
            let n = tx.execute(&format!("DELETE FROM {table}"), [])?;
            deleted.insert((*table).to_string(), json!(n));
        }
        let settings_sql = if keep_settings {
            "DELETE FROM local_settings WHERE setting_category = 'local'"
        } else {
            "DELETE FROM local_settings WHERE setting_category != 'staff'"
        };
        deleted.insert("local_settings".into(), json!(tx.execute(settings_sql, [])?));
        Ok(deleted)
    })?;

    info!(keep_settings, "All business data reset");
    Ok(json!({ "success": true, "deleted": deleted }))
}
