//! Tauri IPC handlers.
//!
//! Every handler takes a loose `arg0` JSON payload, calls into the domain
//! modules, and renders `PosError` to its display string at the boundary.

use serde::Serialize;
use serde_json::Value;
use tauri::Emitter;
use tracing::warn;

pub mod auth;
pub mod customers;
pub mod installments;
pub mod inventory;
pub mod reports;
pub mod sales;
pub mod settings;
pub mod storefront;
pub mod system;

pub(crate) const EVENT_PRODUCT_UPDATED: &str = "product_updated";
pub(crate) const EVENT_SALE_CREATED: &str = "sale_created";
pub(crate) const EVENT_INSTALLMENT_PAYMENT: &str = "installment_payment_recorded";

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Admin Portal gate. Returns the acting staff id.
pub(crate) fn require(auth_state: &crate::auth::AuthState, permission: &str) -> Result<String, String> {
    crate::auth::require_permission(auth_state, permission)
        .map(|session| session.staff_id)
        .map_err(String::from)
}

/// Staff id of whoever is signed in, for audit columns.
pub(crate) fn session_staff_id(auth_state: &crate::auth::AuthState) -> Option<String> {
    crate::auth::current_session(auth_state)
        .ok()
        .flatten()
        .map(|s| s.staff_id)
}

pub(crate) fn emit(app: &tauri::AppHandle, event: &str, payload: Value) {
    if let Err(e) = app.emit(event, payload) {
        warn!(event, "emit failed: {e}");
    }
}
