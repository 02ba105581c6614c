use serde_json::Value;
use zeroize::Zeroizing;

use super::{emit, require};
use crate::{auth, db};

fn parse_permission_payload(arg0: Option<Value>) -> Option<String> {
    match arg0? {
        Value::String(permission) => {
            let trimmed = permission.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        payload @ Value::Object(_) => crate::value_str(&payload, &["permission", "name", "key"]),
        _ => None,
    }
}

fn pin_field(payload: &Value, keys: &[&str]) -> Option<Zeroizing<String>> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|pin| !pin.is_empty())
        .map(|pin| Zeroizing::new(pin.to_string()))
}

fn parse_setup_pin_payload(
    arg0: Option<Value>,
) -> (Option<Zeroizing<String>>, Option<Zeroizing<String>>) {
    let payload = arg0.unwrap_or(Value::Null);
    (
        pin_field(&payload, &["adminPin", "admin_pin"]),
        pin_field(&payload, &["operatorPin", "operator_pin", "userPin"]),
    )
}

#[tauri::command]
pub async fn auth_login(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let pin = arg0
        .as_ref()
        .and_then(auth::extract_pin)
        .ok_or("PIN is required")?;
    auth::login(pin, &db, &auth_state).map_err(String::from)
}

#[tauri::command]
pub async fn auth_logout(
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<(), String> {
    auth::logout(&auth_state)?;
    emit(&app, "session_ended", serde_json::json!({ "reason": "logout" }));
    Ok(())
}

#[tauri::command]
pub async fn auth_get_current_session(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::get_session_json(&auth_state)?)
}

#[tauri::command]
pub async fn auth_validate_session(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::validate_session(&auth_state)?)
}

#[tauri::command]
pub async fn auth_has_permission(
    arg0: Option<Value>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<bool, String> {
    Ok(parse_permission_payload(arg0)
        .map(|permission| auth::has_permission(&auth_state, &permission))
        .unwrap_or(false))
}

#[tauri::command]
pub async fn auth_get_session_stats(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::get_session_stats(&auth_state)?)
}

/// First run sets PINs freely; after that only an admin may change them.
#[tauri::command]
pub async fn auth_setup_pin(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let status = auth::pin_status(&db)?;
    let first_run = status.get("adminConfigured").and_then(Value::as_bool) != Some(true);
    if !first_run {
        require(&auth_state, "manage_settings")?;
    }
    let (admin_pin, operator_pin) = parse_setup_pin_payload(arg0);
    auth::setup_pin(&db, admin_pin, operator_pin)?;
    Ok(serde_json::json!({ "success": true }))
}

#[tauri::command]
pub async fn auth_pin_status(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    Ok(auth::pin_status(&db)?)
}

#[tauri::command]
pub async fn auth_track_activity(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<(), String> {
    Ok(auth::track_activity(&auth_state)?)
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn permission_payload_accepts_string_and_object() {
        assert_eq!(
            parse_permission_payload(Some(json!(" void_sales "))).as_deref(),
            Some("void_sales")
        );
        assert_eq!(
            parse_permission_payload(Some(json!({ "permission": "view_reports" }))).as_deref(),
            Some("view_reports")
        );
        assert_eq!(parse_permission_payload(Some(json!(""))), None);
        assert_eq!(parse_permission_payload(None), None);
    }

    #[test]
    fn setup_pin_payload_reads_both_aliases() {
        let (admin, operator) =
            parse_setup_pin_payload(Some(json!({ "admin_pin": "9876", "operatorPin": "1234" })));
        assert_eq!(admin.as_deref().map(String::as_str), Some("9876"));
        assert_eq!(operator.as_deref().map(String::as_str), Some("1234"));

        let (admin, operator) = parse_setup_pin_payload(Some(json!({ "adminPin": "  " })));
        assert!(admin.is_none());
        assert!(operator.is_none());
    }
}
