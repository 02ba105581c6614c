//! Diagnostics for the Admin Portal.
//!
//! - **About info**: version, build timestamp, git SHA, platform
//! - **System health**: schema version, database size, row counts
//! - **Diagnostics export**: about, health, store settings and recent logs
//!   in one zip bundle
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files

use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::fs;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{self, DbState};
use crate::error::PosResult;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Maximum bytes copied from a single log file into an export (5 MB).
pub const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;

/// Log file name prefix used by the rolling appender.
pub const LOG_FILE_PREFIX: &str = "pos";

/// Tables reported by the health screen and the backup manifest.
pub(crate) const DATA_TABLES: &[&str] = &[
    "suppliers",
    "products",
    "customers",
    "guarantors",
    "sales",
    "sale_items",
    "installment_plans",
    "installment_plan_guarantors",
    "installment_schedule",
    "installment_payments",
    "local_settings",
];

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "name": "ElectroMart POS",
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// System health
// ---------------------------------------------------------------------------

pub(crate) fn table_counts(conn: &Connection) -> Value {
    let mut counts = serde_json::Map::new();
    for table in DATA_TABLES {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap_or_else(|e| {
                warn!(table = %table, "count failed: {e}");
                0
            });
        counts.insert((*table).to_string(), json!(count));
    }
    Value::Object(counts)
}

/// Collects database status for the System Health screen.
pub fn get_system_health(db: &DbState) -> PosResult<Value> {
    let conn = db.conn.lock()?;

    let schema_version = db::schema_version(&conn);
    let integrity: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .unwrap_or_else(|_| "unknown".to_string());
    let last_sale_at: Option<String> = conn
        .query_row("SELECT MAX(created_at) FROM sales", [], |row| row.get(0))
        .unwrap_or(None);
    let active_plans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM installment_plans WHERE status = 'active'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);
    let wal_size = fs::metadata(db.db_path.with_extension("db-wal"))
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "expectedSchemaVersion": db::CURRENT_SCHEMA_VERSION,
        "integrity": integrity,
        "dbPath": db.db_path.to_string_lossy(),
        "dbSizeBytes": db_size,
        "walSizeBytes": wal_size,
        "tableCounts": table_counts(&conn),
        "activePlans": active_plans,
        "lastSaleAt": last_sale_at,
        "checkedAt": Utc::now().to_rfc3339(),
    }))
}

// ---------------------------------------------------------------------------
// Diagnostics export
// ---------------------------------------------------------------------------

/// Write a diagnostics zip into `output_dir` and return its path.
///
/// Settings are redacted (PIN hashes, endpoint tokens); log files are only
/// included when `include_logs` is set.
pub fn export_diagnostics(db: &DbState, output_dir: &Path, include_logs: bool) -> PosResult<PathBuf> {
    let health = get_system_health(db)?;
    let settings = {
        let conn = db.conn.lock()?;
        redact_sensitive_fields(db::get_all_settings(&conn))
    };

    fs::create_dir_all(output_dir)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let zip_path = output_dir.join(format!("electromart-diagnostics-{timestamp}.zip"));

    let file = fs::File::create(&zip_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let zip_options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, value) in [
        ("about.json", get_about_info()),
        ("system_health.json", health),
        ("settings.json", settings),
    ] {
        zip.start_file(name, zip_options)?;
        zip.write_all(serde_json::to_string_pretty(&value)?.as_bytes())?;
    }

    if include_logs {
        for path in log_files(&get_log_dir()) {
            let Some(fname) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let mut buf = Vec::new();
            match fs::File::open(&path) {
                Ok(f) => {
                    f.take(MAX_LOG_SIZE).read_to_end(&mut buf)?;
                }
                Err(e) => {
                    warn!("Skipping log {}: {e}", path.display());
                    continue;
                }
            }
            zip.start_file(format!("logs/{fname}"), zip_options)?;
            zip.write_all(&buf)?;
        }
    }

    zip.finish()?;
    info!(path = %zip_path.display(), "Diagnostics exported");
    Ok(zip_path)
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    ["secret", "password", "token", "pin", "endpoint", "api_key", "apikey"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Log directory, `{data_dir}/logs`. Same location `lib.rs` writes to.
pub fn get_log_dir() -> PathBuf {
    AppConfig::from_env().log_dir()
}

/// Rolling log files in `log_dir`, newest first.
fn log_files(log_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return Vec::new();
    };
    let prefix = format!("{LOG_FILE_PREFIX}.");
    let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix))
        })
        .filter(|entry| entry.path().is_file())
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    files.into_iter().map(|(path, _)| path).collect()
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    let mut removed = 0;
    for path in log_files(log_dir).iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::seed_product;
    use std::io::Read;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{tag}_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        for key in ["version", "buildTimestamp", "gitSha", "platform", "arch"] {
            assert!(info.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_system_health_counts_rows() {
        let db = db::test_db_state();
        seed_product(&db, "FAN-1", 4_500.0, 3);
        seed_product(&db, "FAN-2", 5_500.0, 3);

        let health = get_system_health(&db).unwrap();
        assert_eq!(health["schemaVersion"], json!(db::CURRENT_SCHEMA_VERSION));
        assert_eq!(health["tableCounts"]["products"], json!(2));
        assert_eq!(health["tableCounts"]["sales"], json!(0));
        assert_eq!(health["integrity"], json!("ok"));
        assert!(health["lastSaleAt"].is_null());
    }

    #[test]
    fn test_system_health_on_disk_db() {
        let dir = temp_dir("diag_health");
        let db_state = db::init(&dir).unwrap();
        let health = get_system_health(&db_state).unwrap();
        assert!(health["dbSizeBytes"].as_u64().unwrap() > 0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_export_diagnostics_redacts_secrets() {
        let dir = temp_dir("diag_export");
        let db_state = db::init(&dir).unwrap();
        {
            let conn = db_state.conn.lock().unwrap();
            db::set_setting(&conn, "staff", "admin_pin_hash", "$2b$04$secret").unwrap();
            db::set_setting(&conn, "store", "form_endpoint", "https://formspree.io/f/abc").unwrap();
            db::set_setting(&conn, "store", "store_name", "ElectroMart Saddar").unwrap();
        }

        let zip_path = export_diagnostics(&db_state, &dir, false).unwrap();
        let file = fs::File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.len(), 3);

        let mut settings = String::new();
        archive
            .by_name("settings.json")
            .unwrap()
            .read_to_string(&mut settings)
            .unwrap();
        assert!(!settings.contains("$2b$04$secret"));
        assert!(!settings.contains("formspree.io/f/abc"));
        assert!(settings.contains("[REDACTED]"));
        assert!(settings.contains("ElectroMart Saddar"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_should_redact_key_matches_sensitive_markers() {
        assert!(should_redact_key("admin_pin_hash"));
        assert!(should_redact_key("form_endpoint"));
        assert!(should_redact_key("Token"));
        assert!(!should_redact_key("store_name"));
    }

    #[test]
    fn test_prune_keeps_newest_files() {
        let dir = temp_dir("diag_logs");
        for day in 1..=(MAX_LOG_FILES + 3) {
            fs::write(dir.join(format!("pos.2026-01-{day:02}")), b"log").unwrap();
        }
        fs::write(dir.join("other.txt"), b"keep").unwrap();

        let removed = prune_old_logs(&dir);
        assert_eq!(removed, 3);
        assert_eq!(log_files(&dir).len(), MAX_LOG_FILES);
        assert!(dir.join("other.txt").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = std::env::temp_dir().join(format!("diag_none_{}", uuid::Uuid::new_v4()));
        assert_eq!(prune_old_logs(&dir), 0);
    }
}
