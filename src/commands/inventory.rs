use serde_json::{json, Value};

use super::{emit, require, to_json, EVENT_PRODUCT_UPDATED};
use crate::catalog::{self, ProductFilter, ProductInput, ProductUpdate};
use crate::config::StoreSettings;
use crate::core_helpers::{parse_payload, payload_arg0_as_string, payload_body, require_id};
use crate::suppliers::{self, SupplierInput};
use crate::{auth, db};

const PRODUCT_ID_KEYS: &[&str] = &["productId", "product_id", "id"];
const SUPPLIER_ID_KEYS: &[&str] = &["supplierId", "supplier_id", "id"];
const UPDATE_BODY_KEYS: &[&str] = &["updates", "data", "product", "supplier"];

struct StockAdjustment {
    product_id: String,
    delta: i64,
    reason: String,
}

fn parse_stock_adjustment(arg0: Option<Value>) -> Result<StockAdjustment, String> {
    let payload = arg0.ok_or("Missing stock adjustment payload")?;
    let product_id = require_id(Some(&payload), PRODUCT_ID_KEYS, "product id")?;
    let delta = crate::value_i64(&payload, &["delta", "quantity", "change"])
        .ok_or("Missing stock delta")?;
    let reason = crate::value_str(&payload, &["reason", "note"]).unwrap_or_default();
    Ok(StockAdjustment {
        product_id,
        delta,
        reason,
    })
}

fn product_event(app: &tauri::AppHandle, action: &str, product_id: &str, product: Value) {
    emit(
        app,
        EVENT_PRODUCT_UPDATED,
        json!({ "action": action, "productId": product_id, "product": product }),
    );
}

// -- Products ----------------------------------------------------------------

#[tauri::command]
pub async fn products_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let filter: ProductFilter = match arg0 {
        Some(Value::String(query)) => ProductFilter {
            query: Some(query),
            ..ProductFilter::default()
        },
        other => parse_payload(other.unwrap_or(Value::Null))?,
    };
    to_json(&catalog::list_products(&db, &filter)?)
}

#[tauri::command]
pub async fn products_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), PRODUCT_ID_KEYS, "product id")?;
    to_json(&catalog::get_product(&db, &id)?)
}

#[tauri::command]
pub async fn products_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    require(&auth_state, "manage_products")?;
    let input: ProductInput = parse_payload(arg0.unwrap_or(Value::Null))?;
    let product = catalog::create_product(&db, input)?;
    let value = to_json(&product)?;
    product_event(&app, "created", &product.id, value.clone());
    Ok(value)
}

#[tauri::command]
pub async fn products_update(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    require(&auth_state, "manage_products")?;
    let payload = arg0.ok_or("Missing product update payload")?;
    let id = require_id(Some(&payload), PRODUCT_ID_KEYS, "product id")?;
    let update: ProductUpdate = parse_payload(payload_body(&payload, UPDATE_BODY_KEYS))?;
    let product = catalog::update_product(&db, &id, update)?;
    let value = to_json(&product)?;
    product_event(&app, "updated", &id, value.clone());
    Ok(value)
}

#[tauri::command]
pub async fn products_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    require(&auth_state, "manage_products")?;
    let id = require_id(arg0.as_ref(), PRODUCT_ID_KEYS, "product id")?;
    let outcome = catalog::delete_product(&db, &id)?;
    let value = json!({ "success": true, "outcome": outcome });
    product_event(&app, "deleted", &id, Value::Null);
    Ok(value)
}

#[tauri::command]
pub async fn products_adjust_stock(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    require(&auth_state, "manage_products")?;
    let adj = parse_stock_adjustment(arg0)?;
    let product = catalog::adjust_stock(&db, &adj.product_id, adj.delta, &adj.reason)?;
    let value = to_json(&product)?;
    product_event(&app, "stock_adjusted", &adj.product_id, value.clone());
    Ok(value)
}

#[tauri::command]
pub async fn products_categories(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    to_json(&catalog::list_categories(&db)?)
}

/// Threshold from the payload, else the store's configured level.
#[tauri::command]
pub async fn products_low_stock(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let explicit = match &arg0 {
        Some(Value::Number(n)) => n.as_i64(),
        Some(payload) => crate::value_i64(payload, &["threshold", "limit"]),
        None => None,
    };
    let threshold = match explicit {
        Some(t) => t,
        None => {
            let conn = db.conn.lock().map_err(|e| e.to_string())?;
            StoreSettings::load(&conn).low_stock_threshold
        }
    };
    to_json(&catalog::low_stock(&db, threshold)?)
}

// -- Suppliers ---------------------------------------------------------------

#[tauri::command]
pub async fn suppliers_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let query = payload_arg0_as_string(arg0.as_ref(), &["query", "q", "search"]);
    to_json(&suppliers::list_suppliers(&db, query.as_deref())?)
}

#[tauri::command]
pub async fn suppliers_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), SUPPLIER_ID_KEYS, "supplier id")?;
    to_json(&suppliers::get_supplier(&db, &id)?)
}

#[tauri::command]
pub async fn suppliers_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "manage_suppliers")?;
    let input: SupplierInput = parse_payload(arg0.unwrap_or(Value::Null))?;
    to_json(&suppliers::create_supplier(&db, input)?)
}

#[tauri::command]
pub async fn suppliers_update(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "manage_suppliers")?;
    let payload = arg0.ok_or("Missing supplier update payload")?;
    let id = require_id(Some(&payload), SUPPLIER_ID_KEYS, "supplier id")?;
    let input: SupplierInput = parse_payload(payload_body(&payload, UPDATE_BODY_KEYS))?;
    to_json(&suppliers::update_supplier(&db, &id, input)?)
}

#[tauri::command]
pub async fn suppliers_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "manage_suppliers")?;
    let id = require_id(arg0.as_ref(), SUPPLIER_ID_KEYS, "supplier id")?;
    suppliers::delete_supplier(&db, &id)?;
    Ok(json!({ "success": true }))
}

#[tauri::command]
pub async fn suppliers_products(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), SUPPLIER_ID_KEYS, "supplier id")?;
    to_json(&suppliers::supplier_products(&db, &id)?)
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn stock_adjustment_reads_aliases() {
        let adj = parse_stock_adjustment(Some(json!({
            "product_id": "p-1",
            "quantity": -2,
            "note": "damaged in transit"
        })))
        .expect("adjustment should parse");
        assert_eq!(adj.product_id, "p-1");
        assert_eq!(adj.delta, -2);
        assert_eq!(adj.reason, "damaged in transit");
    }

    #[test]
    fn stock_adjustment_requires_id_and_delta() {
        assert!(parse_stock_adjustment(None).is_err());
        assert!(parse_stock_adjustment(Some(json!({ "productId": "p-1" }))).is_err());
        assert!(parse_stock_adjustment(Some(json!({ "delta": 3 }))).is_err());
    }

    #[test]
    fn product_update_accepts_flat_and_nested_bodies() {
        let flat = json!({ "productId": "p-1", "price": 45000.0, "is_active": false });
        let update: ProductUpdate = parse_payload(payload_body(&flat, UPDATE_BODY_KEYS)).unwrap();
        assert_eq!(update.price, Some(45_000.0));
        assert_eq!(update.is_active, Some(false));

        let nested = json!({ "id": "p-1", "updates": { "stock": 4, "name": "LED 43\"" } });
        let update: ProductUpdate = parse_payload(payload_body(&nested, UPDATE_BODY_KEYS)).unwrap();
        assert_eq!(update.name.as_deref(), Some("LED 43\""));
        assert!(update.price.is_none());
    }
}
