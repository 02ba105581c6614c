use serde_json::{json, Value};

use super::{emit, require, session_staff_id, to_json, EVENT_PRODUCT_UPDATED, EVENT_SALE_CREATED};
use crate::cart::{self, CheckoutInput};
use crate::core_helpers::{parse_channel_payload, parse_payload, require_id};
use crate::sales::{self, CashSaleInput, Sale, SaleFilter};
use crate::{auth, db};

const DEFAULT_CART_ID: &str = "counter";
const CART_ID_KEYS: &[&str] = &["cartId", "cart_id"];
const SALE_ID_KEYS: &[&str] = &["saleId", "sale_id", "invoiceNo", "invoice_no", "id"];

struct CartLineRequest {
    cart_id: String,
    product_id: String,
    quantity: i64,
}

fn cart_id_of(payload: &Value) -> String {
    crate::value_str(payload, CART_ID_KEYS).unwrap_or_else(|| DEFAULT_CART_ID.to_string())
}

fn parse_cart_line(arg0: Option<Value>, arg1: Option<Value>, default_qty: Option<i64>) -> Result<CartLineRequest, String> {
    let payload = parse_channel_payload(arg0, arg1, "cartId");
    let product_id = crate::value_str(&payload, &["productId", "product_id"])
        .ok_or("Missing product id")?;
    let quantity = crate::value_i64(&payload, &["quantity", "qty"])
        .or(default_qty)
        .ok_or("Missing quantity")?;
    Ok(CartLineRequest {
        cart_id: cart_id_of(&payload),
        product_id,
        quantity,
    })
}

fn announce_sale(app: &tauri::AppHandle, sale: &Sale) {
    emit(
        app,
        EVENT_SALE_CREATED,
        json!({
            "saleId": sale.id,
            "invoiceNo": sale.invoice_no,
            "total": sale.total,
            "kind": sale.kind,
        }),
    );
    for item in &sale.items {
        emit(
            app,
            EVENT_PRODUCT_UPDATED,
            json!({ "action": "stock_changed", "productId": item.product_id }),
        );
    }
}

// -- Cart --------------------------------------------------------------------

#[tauri::command]
pub async fn cart_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = parse_channel_payload(arg0, None, "cartId");
    to_json(&cart::summary(&db, &cart_id_of(&payload))?)
}

#[tauri::command]
pub async fn cart_add_item(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let req = parse_cart_line(arg0, arg1, Some(1))?;
    to_json(&cart::add_item(&db, &req.cart_id, &req.product_id, req.quantity)?)
}

#[tauri::command]
pub async fn cart_update_quantity(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let req = parse_cart_line(arg0, arg1, None)?;
    to_json(&cart::update_quantity(&db, &req.cart_id, &req.product_id, req.quantity)?)
}

#[tauri::command]
pub async fn cart_remove_item(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let req = parse_cart_line(arg0, arg1, Some(0))?;
    to_json(&cart::remove_item(&db, &req.cart_id, &req.product_id)?)
}

#[tauri::command]
pub async fn cart_clear(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = parse_channel_payload(arg0, None, "cartId");
    cart::clear(&db, &cart_id_of(&payload))?;
    Ok(json!({ "success": true }))
}

#[tauri::command]
pub async fn cart_checkout(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let payload = parse_channel_payload(arg0, arg1, "cartId");
    let cart_id = cart_id_of(&payload);
    let mut input: CheckoutInput = parse_payload(payload)?;
    if input.staff_id.is_none() {
        input.staff_id = session_staff_id(&auth_state);
    }
    let sale = cart::checkout(&db, &cart_id, input)?;
    announce_sale(&app, &sale);
    to_json(&sale)
}

// -- Sales -------------------------------------------------------------------

#[tauri::command]
pub async fn sales_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let mut input: CashSaleInput = parse_payload(arg0.unwrap_or(Value::Null))?;
    if input.staff_id.is_none() {
        input.staff_id = session_staff_id(&auth_state);
    }
    let sale = sales::create_cash_sale(&db, input)?;
    announce_sale(&app, &sale);
    to_json(&sale)
}

#[tauri::command]
pub async fn sales_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), SALE_ID_KEYS, "sale id")?;
    to_json(&sales::get_sale(&db, &id)?)
}

#[tauri::command]
pub async fn sales_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let filter: SaleFilter = parse_payload(arg0.unwrap_or(Value::Null))?;
    to_json(&sales::list_sales(&db, &filter)?)
}

#[tauri::command]
pub async fn sales_void(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let staff_id = require(&auth_state, "void_sales")?;
    let payload = arg0.ok_or("Missing void payload")?;
    let id = require_id(Some(&payload), SALE_ID_KEYS, "sale id")?;
    let reason = crate::value_str(&payload, &["reason", "voidReason", "void_reason"]).unwrap_or_default();
    let sale = sales::void_sale(&db, &id, &reason, Some(&staff_id))?;
    for item in &sale.items {
        emit(
            &app,
            EVENT_PRODUCT_UPDATED,
            json!({ "action": "stock_changed", "productId": item.product_id }),
        );
    }
    to_json(&sale)
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn cart_line_supports_legacy_tuple_and_default_cart() {
        let req = parse_cart_line(
            Some(json!("till-2")),
            Some(json!({ "productId": "p-9", "qty": 3 })),
            Some(1),
        )
        .expect("tuple payload should parse");
        assert_eq!(req.cart_id, "till-2");
        assert_eq!(req.product_id, "p-9");
        assert_eq!(req.quantity, 3);

        let req = parse_cart_line(Some(json!({ "product_id": "p-1" })), None, Some(1)).unwrap();
        assert_eq!(req.cart_id, DEFAULT_CART_ID);
        assert_eq!(req.quantity, 1);
    }

    #[test]
    fn update_quantity_needs_explicit_quantity() {
        assert!(parse_cart_line(Some(json!({ "productId": "p-1" })), None, None).is_err());
        assert!(parse_cart_line(Some(json!({ "qty": 2 })), None, Some(1)).is_err());
    }

    #[test]
    fn checkout_payload_reads_method_alias() {
        let payload = parse_channel_payload(
            Some(json!("till-1")),
            Some(json!({ "method": "card", "customer_id": "c-1" })),
            "cartId",
        );
        let input: CheckoutInput = parse_payload(payload).unwrap();
        assert_eq!(input.payment_method, sales::PaymentMethod::Card);
        assert_eq!(input.customer_id.as_deref(), Some("c-1"));
    }
}
