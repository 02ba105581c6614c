//! Cash sales: pricing, invoice numbering, stock movement and voids.
//!
//! A sale, its line items and the stock decrement are written in a single
//! `BEGIN IMMEDIATE` transaction. Installment sales reuse the same line
//! pricing and insert their own `sales` row of kind `installment`.

use chrono::{DateTime, Local, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{self, Product};
use crate::config::StoreSettings;
use crate::customers::load_current_customer;
use crate::data_helpers::{clean_opt, require_text, round_money};
use crate::db::{self, DbState};
use crate::error::{not_found_or, PosError, PosResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    #[serde(alias = "bank", alias = "transfer")]
    BankTransfer,
    Installment,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Installment => "installment",
        }
    }

    pub fn label(method: &str) -> &'static str {
        match method {
            "cash" => "Cash",
            "card" => "Card",
            "bank_transfer" => "Bank transfer",
            "installment" => "Installment",
            _ => "Other",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItemInput {
    #[serde(alias = "product_id", alias = "id")]
    pub product_id: String,
    #[serde(alias = "qty")]
    pub quantity: i64,
    #[serde(default, alias = "unit_price", alias = "price")]
    pub unit_price: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscountInput {
    pub amount: Option<f64>,
    #[serde(alias = "percentage")]
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashSaleInput {
    pub items: Vec<SaleItemInput>,
    #[serde(default, alias = "customer_id")]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub discount: Option<DiscountInput>,
    #[serde(alias = "payment_method", alias = "method")]
    pub payment_method: PaymentMethod,
    #[serde(default, alias = "amount_received", alias = "cashReceived")]
    pub amount_received: Option<f64>,
    #[serde(default, alias = "staff_id")]
    pub staff_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub product_id: String,
    pub product_name: String,
    pub sku: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub cost_price: f64,
    pub line_total: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    pub invoice_no: String,
    pub kind: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub subtotal: f64,
    pub discount_amount: f64,
    pub total: f64,
    pub payment_method: String,
    pub amount_received: f64,
    pub change_given: f64,
    pub status: String,
    pub staff_id: Option<String>,
    pub notes: Option<String>,
    pub plan_id: Option<String>,
    pub sale_date: String,
    pub voided_at: Option<String>,
    pub voided_by: Option<String>,
    pub void_reason: Option<String>,
    pub created_at: String,
    pub items: Vec<SaleItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleSummary {
    pub id: String,
    pub invoice_no: String,
    pub kind: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub total: f64,
    pub payment_method: String,
    pub status: String,
    pub sale_date: String,
    pub item_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaleFilter {
    #[serde(alias = "date_from", alias = "from")]
    pub date_from: Option<String>,
    #[serde(alias = "date_to", alias = "to")]
    pub date_to: Option<String>,
    #[serde(alias = "customer_id")]
    pub customer_id: Option<String>,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// A validated cart line with its product snapshot.
#[derive(Debug, Clone)]
pub(crate) struct PricedLine {
    pub product: Product,
    pub quantity: i64,
    pub unit_price: f64,
    pub line_total: f64,
}

/// Merge duplicate products, check availability and price each line.
pub(crate) fn price_lines(conn: &Connection, items: &[SaleItemInput]) -> PosResult<Vec<PricedLine>> {
    if items.is_empty() {
        return Err(PosError::validation("A sale needs at least one item"));
    }

    let mut merged: Vec<(String, i64, Option<f64>)> = Vec::new();
    for item in items {
        let product_id = item.product_id.trim();
        if product_id.is_empty() {
            return Err(PosError::validation("Item is missing productId"));
        }
        if item.quantity < 1 {
            return Err(PosError::validation(format!(
                "Quantity must be at least 1 (got {})",
                item.quantity
            )));
        }
        if let Some(price) = item.unit_price {
            if !price.is_finite() || price <= 0.0 {
                return Err(PosError::validation("Unit price must be positive"));
            }
        }
        match merged.iter_mut().find(|(id, _, _)| id.as_str() == product_id) {
            Some(entry) => {
                entry.1 = entry
                    .1
                    .checked_add(item.quantity)
                    .ok_or_else(|| PosError::validation("Quantity too large"))?;
                if entry.2.is_none() {
                    entry.2 = item.unit_price;
                }
            }
            None => merged.push((product_id.to_string(), item.quantity, item.unit_price)),
        }
    }

    let mut lines = Vec::with_capacity(merged.len());
    for (product_id, quantity, unit_price) in merged {
        let product = catalog::load_product(conn, &product_id)?;
        if !product.is_active {
            return Err(PosError::validation(format!(
                "{} is no longer sold",
                product.name
            )));
        }
        if product.stock < quantity {
            return Err(PosError::InsufficientStock {
                product: product.name.clone(),
                requested: quantity,
                available: product.stock,
            });
        }
        let unit_price = round_money(unit_price.unwrap_or(product.price));
        let line_total = round_money(unit_price * quantity as f64);
        lines.push(PricedLine {
            product,
            quantity,
            unit_price,
            line_total,
        });
    }
    Ok(lines)
}

pub(crate) fn lines_subtotal(lines: &[PricedLine]) -> f64 {
    round_money(lines.iter().map(|l| l.line_total).sum())
}

fn resolve_discount(subtotal: f64, discount: Option<&DiscountInput>) -> PosResult<f64> {
    let Some(d) = discount else {
        return Ok(0.0);
    };
    let amount = match (d.amount, d.percent) {
        (Some(_), Some(_)) => {
            return Err(PosError::validation(
                "Give either a discount amount or a percent, not both",
            ))
        }
        (Some(amount), None) => amount,
        (None, Some(percent)) => {
            if !(0.0..=100.0).contains(&percent) {
                return Err(PosError::validation(
                    "Discount percent must be between 0 and 100",
                ));
            }
            subtotal * percent / 100.0
        }
        (None, None) => 0.0,
    };
    let amount = round_money(amount);
    if !amount.is_finite() || amount < 0.0 {
        return Err(PosError::validation("Discount cannot be negative"));
    }
    if amount > subtotal {
        return Err(PosError::validation("Discount cannot exceed the subtotal"));
    }
    Ok(amount)
}

// ---------------------------------------------------------------------------
// Invoice numbers
// ---------------------------------------------------------------------------

/// `{prefix}-{YYYYMMDD}-{NNNN}`, one past the highest sequence for that day.
///
/// Must run inside the write transaction that inserts the sale.
pub(crate) fn next_invoice_no(conn: &Connection, prefix: &str, date: NaiveDate) -> PosResult<String> {
    let stem = format!("{prefix}-{}-", date.format("%Y%m%d"));
    let last: i64 = conn.query_row(
        "SELECT COALESCE(MAX(CAST(substr(invoice_no, ?1) AS INTEGER)), 0)
         FROM sales WHERE invoice_no LIKE ?2",
        params![stem.len() as i64 + 1, format!("{stem}%")],
        |row| row.get(0),
    )?;
    Ok(format!("{stem}{:04}", last + 1))
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub(crate) struct NewSale<'a> {
    pub invoice_no: &'a str,
    pub kind: &'a str,
    pub customer_id: Option<&'a str>,
    pub lines: &'a [PricedLine],
    pub subtotal: f64,
    pub discount_amount: f64,
    pub total: f64,
    pub payment_method: PaymentMethod,
    pub amount_received: f64,
    pub change_given: f64,
    pub staff_id: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub plan_id: Option<&'a str>,
    pub at: DateTime<Local>,
}

/// Insert the sale row and its items, and take the units out of stock.
pub(crate) fn insert_sale(conn: &Connection, sale: &NewSale<'_>) -> PosResult<String> {
    let sale_id = Uuid::new_v4().to_string();
    let created_at = sale.at.with_timezone(&Utc).to_rfc3339();
    let sale_date = sale.at.date_naive().format("%Y-%m-%d").to_string();

    conn.execute(
        "INSERT INTO sales (id, invoice_no, kind, customer_id, subtotal, discount_amount, total,
                            payment_method, amount_received, change_given, status, staff_id, notes,
                            plan_id, sale_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'completed', ?11, ?12, ?13, ?14, ?15, ?15)",
        params![
            sale_id,
            sale.invoice_no,
            sale.kind,
            sale.customer_id,
            sale.subtotal,
            sale.discount_amount,
            sale.total,
            sale.payment_method.as_str(),
            sale.amount_received,
            sale.change_given,
            sale.staff_id,
            sale.notes,
            sale.plan_id,
            sale_date,
            created_at,
        ],
    )?;

    for line in sale.lines {
        conn.execute(
            "INSERT INTO sale_items (sale_id, product_id, product_name, sku, quantity,
                                     unit_price, cost_price, line_total)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sale_id,
                line.product.id,
                line.product.name,
                line.product.sku,
                line.quantity,
                line.unit_price,
                line.product.cost_price,
                line.line_total,
            ],
        )?;
        catalog::apply_stock_delta(conn, &line.product, -line.quantity)?;
    }

    Ok(sale_id)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

pub fn create_cash_sale(db: &DbState, input: CashSaleInput) -> PosResult<Sale> {
    let conn = db.conn.lock()?;
    create_cash_sale_at(&conn, input, Local::now())
}

pub(crate) fn create_cash_sale_at(
    conn: &Connection,
    input: CashSaleInput,
    at: DateTime<Local>,
) -> PosResult<Sale> {
    let sale_id = db::with_transaction(conn, |tx| insert_cash_sale(tx, input, at))?;
    load_recorded_sale(conn, &sale_id)
}

/// Load a just-committed sale and log it.
pub(crate) fn load_recorded_sale(conn: &Connection, sale_id: &str) -> PosResult<Sale> {
    let sale = load_sale(conn, sale_id)?;
    info!(
        sale_id = %sale.id,
        invoice_no = %sale.invoice_no,
        total = sale.total,
        method = %sale.payment_method,
        "Cash sale recorded"
    );
    Ok(sale)
}

/// Price, validate and write a cash sale inside the caller's open transaction.
pub(crate) fn insert_cash_sale(
    tx: &Connection,
    input: CashSaleInput,
    at: DateTime<Local>,
) -> PosResult<String> {
    if input.payment_method == PaymentMethod::Installment {
        return Err(PosError::validation(
            "Use the installment sale flow for installment payments",
        ));
    }
    let settings = StoreSettings::load(tx);
    let customer_id = clean_opt(input.customer_id);
    let staff_id = clean_opt(input.staff_id);
    let notes = clean_opt(input.notes);

    if let Some(ref cid) = customer_id {
        load_current_customer(tx, cid)?;
    }
    let lines = price_lines(tx, &input.items)?;
    let subtotal = lines_subtotal(&lines);
    let discount_amount = resolve_discount(subtotal, input.discount.as_ref())?;
    let total = round_money(subtotal - discount_amount);

    let (amount_received, change_given) = match input.payment_method {
        PaymentMethod::Cash => {
            let received = round_money(
                input
                    .amount_received
                    .ok_or_else(|| PosError::validation("Cash received is required"))?,
            );
            if received < total {
                return Err(PosError::validation(format!(
                    "Cash received {received:.2} is less than the total {total:.2}"
                )));
            }
            (received, round_money(received - total))
        }
        _ => (total, 0.0),
    };

    let invoice_no = next_invoice_no(tx, &settings.invoice_prefix, at.date_naive())?;
    insert_sale(
        tx,
        &NewSale {
            invoice_no: &invoice_no,
            kind: "cash",
            customer_id: customer_id.as_deref(),
            lines: &lines,
            subtotal,
            discount_amount,
            total,
            payment_method: input.payment_method,
            amount_received,
            change_given,
            staff_id: staff_id.as_deref(),
            notes: notes.as_deref(),
            plan_id: None,
            at,
        },
    )
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

fn sale_item_from_row(row: &Row<'_>) -> rusqlite::Result<SaleItem> {
    Ok(SaleItem {
        product_id: row.get(0)?,
        product_name: row.get(1)?,
        sku: row.get(2)?,
        quantity: row.get(3)?,
        unit_price: row.get(4)?,
        cost_price: row.get(5)?,
        line_total: row.get(6)?,
    })
}

pub(crate) fn load_sale_items(conn: &Connection, sale_id: &str) -> PosResult<Vec<SaleItem>> {
    let mut stmt = conn.prepare(
        "SELECT product_id, product_name, sku, quantity, unit_price, cost_price, line_total
         FROM sale_items WHERE sale_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![sale_id], sale_item_from_row)?;
    let mut items = Vec::new();
    for row in rows {
        match row {
            Ok(item) => items.push(item),
            Err(e) => warn!("skipping malformed sale item row: {e}"),
        }
    }
    Ok(items)
}

pub(crate) fn load_sale(conn: &Connection, sale_id: &str) -> PosResult<Sale> {
    let mut sale = conn
        .query_row(
            "SELECT s.id, s.invoice_no, s.kind, s.customer_id, c.name, s.subtotal, s.discount_amount,
                    s.total, s.payment_method, s.amount_received, s.change_given, s.status,
                    s.staff_id, s.notes, s.plan_id, s.sale_date, s.voided_at, s.voided_by,
                    s.void_reason, s.created_at
             FROM sales s LEFT JOIN customers c ON c.id = s.customer_id
             WHERE s.id = ?1 OR s.invoice_no = ?1",
            params![sale_id],
            |row| {
                Ok(Sale {
                    id: row.get(0)?,
                    invoice_no: row.get(1)?,
                    kind: row.get(2)?,
                    customer_id: row.get(3)?,
                    customer_name: row.get(4)?,
                    subtotal: row.get(5)?,
                    discount_amount: row.get(6)?,
                    total: row.get(7)?,
                    payment_method: row.get(8)?,
                    amount_received: row.get(9)?,
                    change_given: row.get(10)?,
                    status: row.get(11)?,
                    staff_id: row.get(12)?,
                    notes: row.get(13)?,
                    plan_id: row.get(14)?,
                    sale_date: row.get(15)?,
                    voided_at: row.get(16)?,
                    voided_by: row.get(17)?,
                    void_reason: row.get(18)?,
                    created_at: row.get(19)?,
                    items: Vec::new(),
                })
            },
        )
        .map_err(not_found_or("Sale", sale_id))?;
    sale.items = load_sale_items(conn, &sale.id)?;
    Ok(sale)
}

/// Look up by id or invoice number.
pub fn get_sale(db: &DbState, sale_id: &str) -> PosResult<Sale> {
    let conn = db.conn.lock()?;
    load_sale(&conn, sale_id)
}

pub(crate) fn query_sales(conn: &Connection, filter: &SaleFilter) -> PosResult<Vec<SaleSummary>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.invoice_no, s.kind, s.customer_id, c.name, s.total, s.payment_method,
                s.status, s.sale_date,
                (SELECT COALESCE(SUM(quantity), 0) FROM sale_items i WHERE i.sale_id = s.id),
                s.created_at
         FROM sales s LEFT JOIN customers c ON c.id = s.customer_id
         WHERE (?1 IS NULL OR s.sale_date >= ?1)
           AND (?2 IS NULL OR s.sale_date <= ?2)
           AND (?3 IS NULL OR s.customer_id = ?3)
           AND (?4 IS NULL OR s.status = ?4)
           AND (?5 IS NULL OR s.kind = ?5)
         ORDER BY s.created_at DESC, s.invoice_no DESC
         LIMIT ?6",
    )?;
    let rows = stmt.query_map(
        params![
            clean_opt(filter.date_from.clone()),
            clean_opt(filter.date_to.clone()),
            clean_opt(filter.customer_id.clone()),
            clean_opt(filter.status.clone()),
            clean_opt(filter.kind.clone()),
            filter.limit.filter(|l| *l > 0).unwrap_or(500),
        ],
        |row| {
            Ok(SaleSummary {
                id: row.get(0)?,
                invoice_no: row.get(1)?,
                kind: row.get(2)?,
                customer_id: row.get(3)?,
                customer_name: row.get(4)?,
                total: row.get(5)?,
                payment_method: row.get(6)?,
                status: row.get(7)?,
                sale_date: row.get(8)?,
                item_count: row.get(9)?,
                created_at: row.get(10)?,
            })
        },
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn list_sales(db: &DbState, filter: &SaleFilter) -> PosResult<Vec<SaleSummary>> {
    let conn = db.conn.lock()?;
    query_sales(&conn, filter)
}

// ---------------------------------------------------------------------------
// Void
// ---------------------------------------------------------------------------

/// Void a cash sale and put its units back on the shelf.
pub fn void_sale(
    db: &DbState,
    sale_id: &str,
    reason: &str,
    voided_by: Option<&str>,
) -> PosResult<Sale> {
    let reason = require_text(reason, "Void reason", 300)?;
    let conn = db.conn.lock()?;
    let sale = load_sale(&conn, sale_id)?;
    if sale.status == "voided" {
        return Err(PosError::Conflict(format!(
            "Sale {} is already voided",
            sale.invoice_no
        )));
    }
    if sale.kind != "cash" {
        return Err(PosError::Conflict(format!(
            "Sale {} belongs to an installment plan; cancel the plan instead",
            sale.invoice_no
        )));
    }

    db::with_transaction(&conn, |tx| {
        restock_items(tx, &sale.items)?;
        tx.execute(
            "UPDATE sales SET status = 'voided', voided_at = ?1, voided_by = ?2, void_reason = ?3,
                    updated_at = ?1
             WHERE id = ?4",
            params![Utc::now().to_rfc3339(), voided_by, reason, sale.id],
        )?;
        Ok(())
    })?;

    warn!(
        sale_id = %sale.id,
        invoice_no = %sale.invoice_no,
        reason = %reason,
        "Sale voided"
    );
    load_sale(&conn, &sale.id)
}

pub(crate) fn restock_items(conn: &Connection, items: &[SaleItem]) -> PosResult<()> {
    for item in items {
        conn.execute(
            "UPDATE products SET stock = stock + ?1, updated_at = ?2 WHERE id = ?3",
            params![item.quantity, Utc::now().to_rfc3339(), item.product_id],
        )?;
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::tests::seed_product;
    use crate::customers::tests::seed_customer;
    use crate::db;
    use chrono::TimeZone;

    pub(crate) fn local_at(y: i32, m: u32, d: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, 12, 0, 0)
            .single()
            .expect("valid local time")
    }

    pub(crate) fn cash_input(product_id: &str, quantity: i64, received: f64) -> CashSaleInput {
        CashSaleInput {
            items: vec![SaleItemInput {
                product_id: product_id.into(),
                quantity,
                unit_price: None,
            }],
            customer_id: None,
            discount: None,
            payment_method: PaymentMethod::Cash,
            amount_received: Some(received),
            staff_id: None,
            notes: None,
        }
    }

    #[test]
    fn cash_sale_totals_change_and_stock() {
        let db = db::test_db_state();
        let tv = seed_product(&db, "TV-32", 45_000.0, 5);
        let conn = db.conn.lock().unwrap();

        let mut input = cash_input(&tv.id, 2, 100_000.0);
        input.discount = Some(DiscountInput {
            amount: Some(1_000.0),
            percent: None,
        });
        let sale = create_cash_sale_at(&conn, input, local_at(2026, 3, 14)).unwrap();

        assert_eq!(sale.invoice_no, "INV-20260314-0001");
        assert_eq!(sale.subtotal, 90_000.0);
        assert_eq!(sale.discount_amount, 1_000.0);
        assert_eq!(sale.total, 89_000.0);
        assert_eq!(sale.change_given, 11_000.0);
        assert_eq!(sale.items.len(), 1);
        assert_eq!(sale.items[0].cost_price, 36_000.0);
        assert_eq!(catalog::load_product(&conn, &tv.id).unwrap().stock, 3);
    }

    #[test]
    fn invoice_sequence_is_per_day() {
        let db = db::test_db_state();
        let p = seed_product(&db, "BULB", 300.0, 100);
        let conn = db.conn.lock().unwrap();

        let a = create_cash_sale_at(&conn, cash_input(&p.id, 1, 300.0), local_at(2026, 3, 14)).unwrap();
        let b = create_cash_sale_at(&conn, cash_input(&p.id, 1, 300.0), local_at(2026, 3, 14)).unwrap();
        let c = create_cash_sale_at(&conn, cash_input(&p.id, 1, 300.0), local_at(2026, 3, 15)).unwrap();
        assert_eq!(a.invoice_no, "INV-20260314-0001");
        assert_eq!(b.invoice_no, "INV-20260314-0002");
        assert_eq!(c.invoice_no, "INV-20260315-0001");
    }

    #[test]
    fn duplicate_lines_merge_and_stock_is_checked_on_total() {
        let db = db::test_db_state();
        let p = seed_product(&db, "FAN", 10_000.0, 3);
        let conn = db.conn.lock().unwrap();

        let mut input = cash_input(&p.id, 2, 50_000.0);
        input.items.push(SaleItemInput {
            product_id: p.id.clone(),
            quantity: 2,
            unit_price: None,
        });
        let err = create_cash_sale_at(&conn, input, local_at(2026, 3, 14)).unwrap_err();
        assert!(matches!(
            err,
            PosError::InsufficientStock {
                requested: 4,
                available: 3,
                ..
            }
        ));
        // Nothing was written.
        assert_eq!(catalog::load_product(&conn, &p.id).unwrap().stock, 3);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn oversized_duplicate_lines_are_rejected() {
        let db = db::test_db_state();
        let p = seed_product(&db, "AMP", 15_000.0, 3);
        {
            let conn = db.conn.lock().unwrap();
            let mut input = cash_input(&p.id, i64::MAX, 50_000.0);
            input.items.push(SaleItemInput {
                product_id: p.id.clone(),
                quantity: 2,
                unit_price: None,
            });
            let err = create_cash_sale_at(&conn, input, local_at(2026, 3, 14)).unwrap_err();
            assert!(matches!(err, PosError::Validation(_)));
        }
        // The connection stays usable afterwards.
        assert_eq!(catalog::get_product(&db, &p.id).unwrap().stock, 3);
    }

    #[test]
    fn cash_requires_enough_received_and_card_needs_none() {
        let db = db::test_db_state();
        let p = seed_product(&db, "IRON", 6_500.0, 10);
        let conn = db.conn.lock().unwrap();

        assert!(create_cash_sale_at(&conn, cash_input(&p.id, 1, 6_000.0), local_at(2026, 3, 14)).is_err());

        let mut card = cash_input(&p.id, 1, 0.0);
        card.payment_method = PaymentMethod::Card;
        card.amount_received = None;
        card.discount = Some(DiscountInput {
            amount: None,
            percent: Some(10.0),
        });
        let sale = create_cash_sale_at(&conn, card, local_at(2026, 3, 14)).unwrap();
        assert_eq!(sale.total, 5_850.0);
        assert_eq!(sale.amount_received, 5_850.0);
        assert_eq!(sale.change_given, 0.0);
    }

    #[test]
    fn discount_rules() {
        assert_eq!(resolve_discount(1_000.0, None).unwrap(), 0.0);
        assert!(resolve_discount(
            1_000.0,
            Some(&DiscountInput {
                amount: Some(1_500.0),
                percent: None
            })
        )
        .is_err());
        assert!(resolve_discount(
            1_000.0,
            Some(&DiscountInput {
                amount: Some(10.0),
                percent: Some(5.0)
            })
        )
        .is_err());
        assert!(resolve_discount(
            1_000.0,
            Some(&DiscountInput {
                amount: None,
                percent: Some(120.0)
            })
        )
        .is_err());
    }

    #[test]
    fn inactive_products_cannot_be_sold() {
        let db = db::test_db_state();
        let p = seed_product(&db, "OLD", 1_000.0, 5);
        let conn = db.conn.lock().unwrap();
        conn.execute("UPDATE products SET is_active = 0 WHERE id = ?1", params![p.id])
            .unwrap();
        assert!(create_cash_sale_at(&conn, cash_input(&p.id, 1, 1_000.0), local_at(2026, 3, 14)).is_err());
    }

    #[test]
    fn void_restores_stock_once() {
        let db = db::test_db_state();
        let p = seed_product(&db, "SPK", 8_000.0, 4);
        let customer = seed_customer(&db, "Ali", "03001234567");
        let sale = {
            let conn = db.conn.lock().unwrap();
            let mut input = cash_input(&p.id, 3, 24_000.0);
            input.customer_id = Some(customer.id.clone());
            create_cash_sale_at(&conn, input, local_at(2026, 3, 14)).unwrap()
        };
        assert_eq!(sale.customer_name.as_deref(), Some("Ali"));

        assert!(void_sale(&db, &sale.id, "  ", None).is_err());
        let voided = void_sale(&db, &sale.invoice_no, "Wrong item rung up", Some("admin")).unwrap();
        assert_eq!(voided.status, "voided");
        assert_eq!(voided.void_reason.as_deref(), Some("Wrong item rung up"));
        assert_eq!(catalog::get_product(&db, &p.id).unwrap().stock, 4);

        assert!(matches!(
            void_sale(&db, &sale.id, "again", None),
            Err(PosError::Conflict(_))
        ));
        assert_eq!(catalog::get_product(&db, &p.id).unwrap().stock, 4);
    }

    #[test]
    fn list_filters_by_date_and_status() {
        let db = db::test_db_state();
        let p = seed_product(&db, "CBL", 500.0, 100);
        let first = {
            let conn = db.conn.lock().unwrap();
            let first =
                create_cash_sale_at(&conn, cash_input(&p.id, 2, 1_000.0), local_at(2026, 3, 1)).unwrap();
            create_cash_sale_at(&conn, cash_input(&p.id, 1, 500.0), local_at(2026, 3, 10)).unwrap();
            first
        };
        void_sale(&db, &first.id, "test", None).unwrap();

        let march_first_week = list_sales(
            &db,
            &SaleFilter {
                date_from: Some("2026-03-01".into()),
                date_to: Some("2026-03-07".into()),
                ..SaleFilter::default()
            },
        )
        .unwrap();
        assert_eq!(march_first_week.len(), 1);
        assert_eq!(march_first_week[0].item_count, 2);

        let completed = list_sales(
            &db,
            &SaleFilter {
                status: Some("completed".into()),
                ..SaleFilter::default()
            },
        )
        .unwrap();
        assert_eq!(completed.len(), 1);
    }

    #[test]
    fn payload_deserializes_with_aliases() {
        let input: CashSaleInput = serde_json::from_value(serde_json::json!({
            "items": [{ "product_id": "p1", "qty": 2 }],
            "method": "bank",
            "discount": { "percentage": 5 }
        }))
        .unwrap();
        assert_eq!(input.payment_method, PaymentMethod::BankTransfer);
        assert_eq!(input.items[0].quantity, 2);
        assert_eq!(input.discount.unwrap().percent, Some(5.0));
    }
}
