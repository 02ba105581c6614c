use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};

use super::{require, to_json};
use crate::analytics;
use crate::core_helpers::{payload_date_or_today, require_id};
use crate::receipts;
use crate::{auth, db};

const TODAY_KEYS: &[&str] = &["today", "asOf", "as_of", "date"];

struct TopProductsRequest {
    from: NaiveDate,
    to: NaiveDate,
    limit: u32,
}

fn parse_window(arg0: Option<&Value>, key: &[&str], default: u32) -> u32 {
    match arg0 {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as u32).unwrap_or(default),
        Some(payload) => crate::value_i64(payload, key)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(default),
        None => default,
    }
}

/// Defaults to the last 30 days and the top 10 products.
fn parse_top_products(arg0: Option<&Value>) -> Result<TopProductsRequest, String> {
    let to = payload_date_or_today(arg0, &["to", "dateTo", "date_to"])?;
    let from = match arg0.and_then(|p| crate::value_str(p, &["from", "dateFrom", "date_from"])) {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| format!("Invalid date '{raw}', expected YYYY-MM-DD"))?,
        None => to - Duration::days(29),
    };
    Ok(TopProductsRequest {
        from,
        to,
        limit: parse_window(arg0, &["limit"], 10),
    })
}

// -- Receipts ----------------------------------------------------------------

#[tauri::command]
pub async fn receipts_sale(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), &["saleId", "sale_id", "invoiceNo", "id"], "sale id")?;
    Ok(json!({ "html": receipts::sale_receipt(&db, &id)? }))
}

#[tauri::command]
pub async fn receipts_installment_payment(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), &["paymentId", "payment_id", "id"], "payment id")?;
    Ok(json!({ "html": receipts::installment_payment_receipt(&db, &id)? }))
}

#[tauri::command]
pub async fn receipts_plan_statement(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(
        arg0.as_ref(),
        &["planId", "plan_id", "invoiceNo", "id"],
        "plan id",
    )?;
    let today = payload_date_or_today(arg0.as_ref(), TODAY_KEYS)?;
    Ok(json!({ "html": receipts::plan_statement(&db, &id, today)? }))
}

// -- Dashboard ---------------------------------------------------------------

#[tauri::command]
pub async fn reports_dashboard(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "view_reports")?;
    let today = payload_date_or_today(arg0.as_ref(), TODAY_KEYS)?;
    to_json(&analytics::dashboard_summary(&db, today)?)
}

#[tauri::command]
pub async fn reports_sales_trend(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "view_reports")?;
    let days = parse_window(arg0.as_ref(), &["days"], 30);
    let today = payload_date_or_today(arg0.as_ref(), TODAY_KEYS)?;
    to_json(&analytics::sales_trend(&db, days, today)?)
}

#[tauri::command]
pub async fn reports_top_products(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "view_reports")?;
    let req = parse_top_products(arg0.as_ref())?;
    to_json(&analytics::top_products(&db, req.from, req.to, req.limit)?)
}

#[tauri::command]
pub async fn reports_monthly_revenue(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "view_reports")?;
    let months = parse_window(arg0.as_ref(), &["months"], 12);
    let today = payload_date_or_today(arg0.as_ref(), TODAY_KEYS)?;
    to_json(&analytics::monthly_revenue(&db, months, today)?)
}

#[tauri::command]
pub async fn reports_collections(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    require(&auth_state, "view_reports")?;
    let today = payload_date_or_today(arg0.as_ref(), TODAY_KEYS)?;
    to_json(&analytics::installment_collection_summary(&db, today)?)
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn window_accepts_bare_number_and_object() {
        assert_eq!(parse_window(Some(&json!(7)), &["days"], 30), 7);
        assert_eq!(parse_window(Some(&json!({ "days": 90 })), &["days"], 30), 90);
        assert_eq!(parse_window(Some(&json!({ "days": -1 })), &["days"], 30), 30);
        assert_eq!(parse_window(None, &["days"], 30), 30);
    }

    #[test]
    fn top_products_defaults_to_last_thirty_days() {
        let req = parse_top_products(Some(&json!({ "to": "2026-04-30" }))).unwrap();
        assert_eq!(req.from, NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
        assert_eq!(req.limit, 10);

        let req = parse_top_products(Some(&json!({
            "dateFrom": "2026-01-01",
            "dateTo": "2026-01-31",
            "limit": 5
        })))
        .unwrap();
        assert_eq!(req.from, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(req.limit, 5);
        assert!(parse_top_products(Some(&json!({ "from": "yesterday" }))).is_err());
    }
}
