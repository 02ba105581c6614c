use serde_json::{json, Value};

use super::to_json;
use crate::core_helpers::{parse_payload, payload_arg0_as_string, payload_body, require_id};
use crate::customers::{self, CustomerInput};
use crate::db;
use crate::guarantors::{self, GuarantorInput};

const CUSTOMER_ID_KEYS: &[&str] = &["customerId", "customer_id", "id"];
const GUARANTOR_ID_KEYS: &[&str] = &["guarantorId", "guarantor_id", "id"];
const UPDATE_BODY_KEYS: &[&str] = &["updates", "data", "customer", "guarantor"];

// -- Customers ---------------------------------------------------------------

#[tauri::command]
pub async fn customers_search(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let query = payload_arg0_as_string(arg0.as_ref(), &["query", "q", "search"]).unwrap_or_default();
    to_json(&customers::search_customers(&db, &query)?)
}

#[tauri::command]
pub async fn customers_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), CUSTOMER_ID_KEYS, "customer id")?;
    to_json(&customers::get_customer(&db, &id)?)
}

/// `null` when no customer has that number.
#[tauri::command]
pub async fn customers_find_by_phone(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let phone = require_id(arg0.as_ref(), &["phone", "mobile"], "phone number")?;
    to_json(&customers::find_by_phone(&db, &phone)?)
}

#[tauri::command]
pub async fn customers_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let input: CustomerInput = parse_payload(arg0.unwrap_or(Value::Null))?;
    to_json(&customers::create_customer(&db, input)?)
}

#[tauri::command]
pub async fn customers_update(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing customer update payload")?;
    let id = require_id(Some(&payload), CUSTOMER_ID_KEYS, "customer id")?;
    let input: CustomerInput = parse_payload(payload_body(&payload, UPDATE_BODY_KEYS))?;
    to_json(&customers::update_customer(&db, &id, input)?)
}

#[tauri::command]
pub async fn customers_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), CUSTOMER_ID_KEYS, "customer id")?;
    let outcome = customers::delete_customer(&db, &id)?;
    Ok(json!({ "success": true, "outcome": outcome }))
}

#[tauri::command]
pub async fn customers_history(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), CUSTOMER_ID_KEYS, "customer id")?;
    to_json(&customers::customer_history(&db, &id)?)
}

// -- Guarantors --------------------------------------------------------------

#[tauri::command]
pub async fn guarantors_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let customer_id = payload_arg0_as_string(arg0.as_ref(), &["customerId", "customer_id"]);
    to_json(&guarantors::list_guarantors(&db, customer_id.as_deref())?)
}

#[tauri::command]
pub async fn guarantors_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), GUARANTOR_ID_KEYS, "guarantor id")?;
    to_json(&guarantors::get_guarantor(&db, &id)?)
}

#[tauri::command]
pub async fn guarantors_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let input: GuarantorInput = parse_payload(arg0.unwrap_or(Value::Null))?;
    to_json(&guarantors::create_guarantor(&db, input)?)
}

#[tauri::command]
pub async fn guarantors_update(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing guarantor update payload")?;
    let id = require_id(Some(&payload), GUARANTOR_ID_KEYS, "guarantor id")?;
    let input: GuarantorInput = parse_payload(payload_body(&payload, UPDATE_BODY_KEYS))?;
    to_json(&guarantors::update_guarantor(&db, &id, input)?)
}

#[tauri::command]
pub async fn guarantors_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), GUARANTOR_ID_KEYS, "guarantor id")?;
    guarantors::delete_guarantor(&db, &id)?;
    Ok(json!({ "success": true }))
}
