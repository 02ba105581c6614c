use serde_json::Value;
use tracing::info;

use super::{require, to_json};
use crate::config::StoreSettings;
use crate::{auth, db};

#[tauri::command]
pub async fn settings_get_store(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    to_json(&StoreSettings::load(&conn))
}

/// Partial update: only the keys present in the payload change.
#[tauri::command]
pub async fn settings_update_store(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let staff_id = require(&auth_state, "manage_settings")?;
    let patch = arg0.unwrap_or_else(|| serde_json::json!({}));
    if !patch.is_object() {
        return Err("Settings payload must be an object".into());
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let updated = StoreSettings::load(&conn).merged_with(&patch)?;
    updated.save(&conn)?;
    info!(staff_id = %staff_id, "Store settings updated from Admin Portal");
    to_json(&updated)
}
