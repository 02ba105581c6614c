//! Counter cart persisted in the local key/value store.
//!
//! One cart per portal session, stored as a JSON array under `cart:{id}` so
//! an accidental window reload does not lose a half-rung sale.

use chrono::Local;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog;
use crate::data_helpers::{delete_local_json, read_local_json_array, round_money, write_local_json};
use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::sales::{self, CashSaleInput, DiscountInput, PaymentMethod, Sale, SaleItemInput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
    pub line_total: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub cart_id: String,
    pub lines: Vec<CartLine>,
    pub subtotal: f64,
    pub item_count: i64,
    pub line_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInput {
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

fn cart_key(cart_id: &str) -> PosResult<String> {
    let id = cart_id.trim();
    if id.is_empty() || id.len() > 64 {
        return Err(PosError::validation("Cart id must be 1-64 characters"));
    }
    Ok(format!("cart:{id}"))
}

fn load_lines(conn: &Connection, key: &str) -> Vec<CartLine> {
    read_local_json_array(conn, key)
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<CartLine>(v) {
            Ok(line) => Some(line),
            Err(e) => {
                warn!(key = %key, "dropping malformed cart line: {e}");
                None
            }
        })
        .collect()
}

fn save_lines(conn: &Connection, key: &str, lines: &[CartLine]) -> PosResult<()> {
    if lines.is_empty() {
        return delete_local_json(conn, key);
    }
    write_local_json(conn, key, &serde_json::to_value(lines)?)
}

fn summarize(cart_id: &str, lines: Vec<CartLine>) -> CartSummary {
    CartSummary {
        cart_id: cart_id.trim().to_string(),
        subtotal: round_money(lines.iter().map(|l| l.line_total).sum()),
        item_count: lines.iter().map(|l| l.quantity).sum(),
        line_count: lines.len(),
        lines,
    }
}

fn set_quantity(line: &mut CartLine, quantity: i64) {
    line.quantity = quantity;
    line.line_total = round_money(line.unit_price * quantity as f64);
}

/// Add units of a product, merging with an existing line.
pub fn add_item(db: &DbState, cart_id: &str, product_id: &str, quantity: i64) -> PosResult<CartSummary> {
    if quantity < 1 {
        return Err(PosError::validation("Quantity must be at least 1"));
    }
    let key = cart_key(cart_id)?;
    let conn = db.conn.lock()?;
    let product = catalog::load_product(&conn, product_id.trim())?;
    if !product.is_active {
        return Err(PosError::validation(format!(
            "{} is no longer sold",
            product.name
        )));
    }

    let mut lines = load_lines(&conn, &key);
    let existing = lines
        .iter()
        .find(|l| l.product_id == product.id)
        .map(|l| l.quantity)
        .unwrap_or(0);
    let wanted = existing
        .checked_add(quantity)
        .ok_or_else(|| PosError::validation("Quantity too large"))?;
    if wanted > product.stock {
        return Err(PosError::InsufficientStock {
            product: product.name.clone(),
            requested: wanted,
            available: product.stock,
        });
    }

    match lines.iter_mut().find(|l| l.product_id == product.id) {
        Some(line) => set_quantity(line, wanted),
        None => lines.push(CartLine {
            product_id: product.id.clone(),
            sku: product.sku.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            quantity,
            line_total: round_money(product.price * quantity as f64),
        }),
    }
    save_lines(&conn, &key, &lines)?;
    debug!(cart = %key, product_id = %product.id, quantity = wanted, "Cart line set");
    Ok(summarize(cart_id, lines))
}

/// Set a line's quantity; zero removes it.
pub fn update_quantity(
    db: &DbState,
    cart_id: &str,
    product_id: &str,
    quantity: i64,
) -> PosResult<CartSummary> {
    if quantity < 0 {
        return Err(PosError::validation("Quantity cannot be negative"));
    }
    let key = cart_key(cart_id)?;
    let product_id = product_id.trim();
    let conn = db.conn.lock()?;
    let mut lines = load_lines(&conn, &key);
    let idx = lines
        .iter()
        .position(|l| l.product_id == product_id)
        .ok_or_else(|| PosError::not_found("Cart item", product_id))?;

    if quantity == 0 {
        lines.remove(idx);
    } else {
        let product = catalog::load_product(&conn, product_id)?;
        if quantity > product.stock {
            return Err(PosError::InsufficientStock {
                product: product.name,
                requested: quantity,
                available: product.stock,
            });
        }
        set_quantity(&mut lines[idx], quantity);
    }
    save_lines(&conn, &key, &lines)?;
    Ok(summarize(cart_id, lines))
}

pub fn remove_item(db: &DbState, cart_id: &str, product_id: &str) -> PosResult<CartSummary> {
    let key = cart_key(cart_id)?;
    let product_id = product_id.trim();
    let conn = db.conn.lock()?;
    let mut lines = load_lines(&conn, &key);
    lines.retain(|l| l.product_id != product_id);
    save_lines(&conn, &key, &lines)?;
    Ok(summarize(cart_id, lines))
}

pub fn clear(db: &DbState, cart_id: &str) -> PosResult<()> {
    let key = cart_key(cart_id)?;
    let conn = db.conn.lock()?;
    delete_local_json(&conn, &key)
}

pub fn summary(db: &DbState, cart_id: &str) -> PosResult<CartSummary> {
    let key = cart_key(cart_id)?;
    let conn = db.conn.lock()?;
    Ok(summarize(cart_id, load_lines(&conn, &key)))
}

/// Ring the cart up as a cash sale and empty it.
pub fn checkout(db: &DbState, cart_id: &str, payment: CheckoutInput) -> PosResult<Sale> {
    let key = cart_key(cart_id)?;
    let conn = db.conn.lock()?;
    let lines = load_lines(&conn, &key);
    if lines.is_empty() {
        return Err(PosError::validation("Cart is empty"));
    }

    let input = CashSaleInput {
        items: lines
            .iter()
            .map(|l| SaleItemInput {
                product_id: l.product_id.clone(),
                quantity: l.quantity,
                unit_price: Some(l.unit_price),
            })
            .collect(),
        customer_id: payment.customer_id,
        discount: payment.discount,
        payment_method: payment.payment_method,
        amount_received: payment.amount_received,
        staff_id: payment.staff_id,
        notes: payment.notes,
    };
    let sale_id = db::with_transaction(&conn, |tx| {
        let sale_id = sales::insert_cash_sale(tx, input, Local::now())?;
        delete_local_json(tx, &key)?;
        Ok(sale_id)
    })?;
    let sale = sales::load_recorded_sale(&conn, &sale_id)?;
    info!(cart = %key, invoice_no = %sale.invoice_no, "Cart checked out");
    Ok(sale)
}
