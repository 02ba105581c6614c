use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::warn;

use super::{emit, require};
use crate::{auth, backup, db, diagnostics};

/// Export target: `outputDir` from the payload, else `{data_dir}/exports`.
fn export_dir(arg0: Option<&Value>, db: &db::DbState) -> PathBuf {
    if let Some(dir) = arg0.and_then(|p| crate::value_str(p, &["outputDir", "output_dir", "dir"])) {
        return PathBuf::from(dir);
    }
    db.db_path
        .parent()
        .map(|p| p.join("exports"))
        .unwrap_or_else(|| PathBuf::from("exports"))
}

fn reset_confirmed(arg0: Option<&Value>) -> bool {
    arg0.and_then(|p| p.get("confirm"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[tauri::command]
pub async fn diagnostics_get_about() -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

#[tauri::command]
pub async fn diagnostics_get_system_health(
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    Ok(diagnostics::get_system_health(&db)?)
}

#[tauri::command]
pub async fn diagnostics_export(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "export_data")?;
    let include_logs = arg0
        .as_ref()
        .and_then(|p| p.get("includeLogs").or_else(|| p.get("include_logs")))
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let path = diagnostics::export_diagnostics(&db, &export_dir(arg0.as_ref(), &db), include_logs)?;
    Ok(json!({ "success": true, "path": path.to_string_lossy() }))
}

#[tauri::command]
pub async fn backup_export(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "export_data")?;
    let path = backup::export_backup(&db, &export_dir(arg0.as_ref(), &db))?;
    Ok(json!({ "success": true, "path": path.to_string_lossy() }))
}

/// Wipes business data. The payload must carry `"confirm": true`.
#[tauri::command]
pub async fn database_reset(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let staff_id = require(&auth_state, "reset_data")?;
    if !reset_confirmed(arg0.as_ref()) {
        return Err("Reset must be confirmed".into());
    }
    let keep_settings = arg0
        .as_ref()
        .and_then(|p| p.get("keepSettings").or_else(|| p.get("keep_settings")))
        .and_then(Value::as_bool)
        .unwrap_or(true);
    warn!(staff_id = %staff_id, keep_settings, "Database reset requested");
    let result = backup::reset_data(&db, keep_settings)?;
    emit(&app, "data_reset", json!({ "keepSettings": keep_settings }));
    Ok(result)
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn reset_requires_explicit_confirmation() {
        assert!(reset_confirmed(Some(&json!({ "confirm": true }))));
        assert!(!reset_confirmed(Some(&json!({ "confirm": "yes" }))));
        assert!(!reset_confirmed(Some(&json!({}))));
        assert!(!reset_confirmed(None));
    }

    #[test]
    fn export_dir_defaults_next_to_database() {
        let db = db::test_db_state();
        assert_eq!(
            export_dir(Some(&json!({ "outputDir": "/tmp/out" })), &db),
            PathBuf::from("/tmp/out")
        );
        assert_eq!(export_dir(None, &db), PathBuf::from("exports"));
    }
}
