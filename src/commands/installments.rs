use serde_json::{json, Value};

use super::{
    emit, require, session_staff_id, to_json, EVENT_INSTALLMENT_PAYMENT, EVENT_PRODUCT_UPDATED,
    EVENT_SALE_CREATED,
};
use crate::config::StoreSettings;
use crate::core_helpers::{parse_payload, payload_date_or_today, require_id};
use crate::installments::{self, InstallmentSaleInput, PaymentInput, PlanFilter, PlanInput};
use crate::{auth, db};

const PLAN_ID_KEYS: &[&str] = &["planId", "plan_id", "invoiceNo", "invoice_no", "id"];
const TODAY_KEYS: &[&str] = &["today", "asOf", "as_of", "date"];

/// Fill store defaults into a quote request: markup and today's start date.
fn quote_payload(payload: Value, settings: &StoreSettings, today: chrono::NaiveDate) -> Value {
    let mut obj = match payload {
        Value::Object(obj) => obj,
        _ => serde_json::Map::new(),
    };
    if !["markupPercent", "markup_percent", "markup"]
        .iter()
        .any(|k| obj.contains_key(*k))
    {
        obj.insert("markupPercent".into(), json!(settings.default_markup_percent));
    }
    if !["startDate", "start_date"].iter().any(|k| obj.contains_key(*k)) {
        obj.insert("startDate".into(), json!(today.format("%Y-%m-%d").to_string()));
    }
    Value::Object(obj)
}

#[tauri::command]
pub async fn installments_calculate(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let settings = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        StoreSettings::load(&conn)
    };
    let today = chrono::Local::now().date_naive();
    let input: PlanInput = parse_payload(quote_payload(arg0.unwrap_or(Value::Null), &settings, today))?;
    to_json(&installments::calculate_plan(&input, settings.max_installment_months)?)
}

#[tauri::command]
pub async fn installments_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let mut input: InstallmentSaleInput = parse_payload(arg0.unwrap_or(Value::Null))?;
    if input.staff_id.is_none() {
        input.staff_id = session_staff_id(&auth_state);
    }
    let plan = installments::create_installment_sale(&db, input)?;
    emit(
        &app,
        EVENT_SALE_CREATED,
        json!({
            "saleId": plan.sale_id,
            "planId": plan.id,
            "invoiceNo": plan.invoice_no,
            "total": plan.installment_price,
            "kind": "installment",
        }),
    );
    for item in &plan.items {
        emit(
            &app,
            EVENT_PRODUCT_UPDATED,
            json!({ "action": "stock_changed", "productId": item.product_id }),
        );
    }
    to_json(&plan)
}

#[tauri::command]
pub async fn installments_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), PLAN_ID_KEYS, "plan id")?;
    to_json(&installments::get_plan(&db, &id)?)
}

#[tauri::command]
pub async fn installments_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let filter: PlanFilter = match arg0 {
        Some(Value::String(status)) => PlanFilter {
            status: Some(status),
            ..PlanFilter::default()
        },
        other => parse_payload(other.unwrap_or(Value::Null))?,
    };
    to_json(&installments::list_plans(&db, &filter)?)
}

#[tauri::command]
pub async fn installments_record_payment(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let mut input: PaymentInput = parse_payload(arg0.unwrap_or(Value::Null))?;
    if input.staff_id.is_none() {
        input.staff_id = session_staff_id(&auth_state);
    }
    let payment = installments::record_installment_payment(&db, input)?;
    emit(
        &app,
        EVENT_INSTALLMENT_PAYMENT,
        json!({
            "paymentId": payment.id,
            "planId": payment.plan_id,
            "amount": payment.amount,
            "balanceAfter": payment.balance_after,
        }),
    );
    to_json(&payment)
}

#[tauri::command]
pub async fn installments_timeline(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), PLAN_ID_KEYS, "plan id")?;
    let today = payload_date_or_today(arg0.as_ref(), TODAY_KEYS)?;
    to_json(&installments::payment_timeline(&db, &id, today)?)
}

#[tauri::command]
pub async fn installments_overdue(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let today = payload_date_or_today(arg0.as_ref(), TODAY_KEYS)?;
    to_json(&installments::overdue_installments(&db, today)?)
}

#[tauri::command]
pub async fn installments_cancel(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let staff_id = require(&auth_state, "cancel_plans")?;
    let payload = arg0.ok_or("Missing cancel payload")?;
    let id = require_id(Some(&payload), PLAN_ID_KEYS, "plan id")?;
    let reason = crate::value_str(&payload, &["reason", "cancelReason", "cancel_reason"]).unwrap_or_default();
    let plan = installments::cancel_plan(&db, &id, &reason, Some(&staff_id))?;
    for item in &plan.items {
        emit(
            &app,
            EVENT_PRODUCT_UPDATED,
            json!({ "action": "stock_changed", "productId": item.product_id }),
        );
    }
    to_json(&plan)
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn quote_payload_fills_store_defaults() {
        let settings = StoreSettings {
            default_markup_percent: 15.0,
            ..StoreSettings::default()
        };
        let today = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        let payload = quote_payload(json!({ "price": 60000, "tenure": 6 }), &settings, today);
        let input: PlanInput = parse_payload(payload).unwrap();
        assert_eq!(input.markup_percent, 15.0);
        assert_eq!(input.start_date, today);
        assert_eq!(input.months, 6);
    }

    #[test]
    fn quote_payload_keeps_explicit_values() {
        let settings = StoreSettings::default();
        let today = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        let payload = quote_payload(
            json!({ "cashPrice": 1000, "markup": 0, "months": 2, "start_date": "2026-01-31" }),
            &settings,
            today,
        );
        let input: PlanInput = parse_payload(payload).unwrap();
        assert_eq!(input.markup_percent, 0.0);
        assert_eq!(input.start_date, NaiveDate::from_ymd_opt(2026, 1, 31).unwrap());
    }

    #[test]
    fn payment_payload_defaults_to_cash() {
        let input: PaymentInput =
            parse_payload(json!({ "plan_id": "INS-20260115-0001", "amount": 5000 })).unwrap();
        assert_eq!(input.method, crate::sales::PaymentMethod::Cash);
        assert!(input.paid_on.is_none());
    }
}
