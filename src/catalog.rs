//! Product catalog: products, stock levels, categories.
//!
//! Products referenced by past sales are never hard-deleted; they are
//! deactivated so receipts and reports keep resolving.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::data_helpers::{clean_opt, require_text, round_money};
use crate::db::DbState;
use crate::error::{not_found_or, PosError, PosResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: f64,
    pub cost_price: f64,
    pub stock: i64,
    pub supplier_id: Option<String>,
    pub is_active: bool,
    pub is_featured: bool,
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default, alias = "cost_price", alias = "cost")]
    pub cost_price: f64,
    #[serde(default, alias = "quantity")]
    pub stock: i64,
    #[serde(default, alias = "supplier_id")]
    pub supplier_id: Option<String>,
    #[serde(default, alias = "is_featured", alias = "featured")]
    pub is_featured: bool,
    #[serde(default, alias = "image_url")]
    pub image_url: Option<String>,
}

/// Partial update. An empty string clears an optional text field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductUpdate {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    #[serde(alias = "cost_price")]
    pub cost_price: Option<f64>,
    #[serde(alias = "supplier_id")]
    pub supplier_id: Option<String>,
    #[serde(alias = "is_active")]
    pub is_active: Option<bool>,
    #[serde(alias = "is_featured")]
    pub is_featured: Option<bool>,
    #[serde(alias = "image_url")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductFilter {
    #[serde(alias = "q", alias = "search")]
    pub query: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "supplier_id")]
    pub supplier_id: Option<String>,
    #[serde(alias = "active_only")]
    pub active_only: bool,
    #[serde(alias = "featured_only")]
    pub featured_only: bool,
    /// Only products at or below this stock level.
    #[serde(alias = "max_stock")]
    pub max_stock: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    Deactivated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub product_count: i64,
    pub units_in_stock: i64,
}

pub(crate) const PRODUCT_COLUMNS: &str = "id, sku, name, brand, category, description, price, cost_price, stock, \
     supplier_id, is_active, is_featured, image_url, created_at, updated_at";

pub(crate) fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        sku: row.get(1)?,
        name: row.get(2)?,
        brand: row.get(3)?,
        category: row.get(4)?,
        description: row.get(5)?,
        price: row.get(6)?,
        cost_price: row.get(7)?,
        stock: row.get(8)?,
        supplier_id: row.get(9)?,
        is_active: row.get::<_, i64>(10)? != 0,
        is_featured: row.get::<_, i64>(11)? != 0,
        image_url: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn normalize_sku(raw: &str) -> PosResult<String> {
    let sku = raw.trim().to_ascii_uppercase();
    if sku.is_empty() || sku.len() > 32 {
        return Err(PosError::validation("SKU must be 1-32 characters"));
    }
    if !sku
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PosError::validation(
            "SKU may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(sku)
}

fn validate_prices(price: f64, cost_price: f64) -> PosResult<()> {
    if !price.is_finite() || price <= 0.0 {
        return Err(PosError::validation("Price must be positive"));
    }
    if !cost_price.is_finite() || cost_price < 0.0 {
        return Err(PosError::validation("Cost price cannot be negative"));
    }
    Ok(())
}

fn ensure_supplier(conn: &Connection, supplier_id: &str) -> PosResult<()> {
    conn.query_row(
        "SELECT 1 FROM suppliers WHERE id = ?1",
        params![supplier_id],
        |_| Ok(()),
    )
    .map_err(not_found_or("Supplier", supplier_id))
}

fn sku_taken(conn: &Connection, sku: &str, except_id: Option<&str>) -> PosResult<bool> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM products WHERE sku = ?1",
            params![sku],
            |row| row.get(0),
        )
        .optional()?;
    Ok(matches!(existing, Some(id) if Some(id.as_str()) != except_id))
}

pub(crate) fn load_product(conn: &Connection, product_id: &str) -> PosResult<Product> {
    conn.query_row(
        &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
        params![product_id],
        product_from_row,
    )
    .map_err(not_found_or("Product", product_id))
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

pub fn create_product(db: &DbState, input: ProductInput) -> PosResult<Product> {
    let sku = normalize_sku(&input.sku)?;
    let name = require_text(&input.name, "Product name", 120)?;
    validate_prices(input.price, input.cost_price)?;
    if input.stock < 0 {
        return Err(PosError::validation("Stock cannot be negative"));
    }
    let supplier_id = clean_opt(input.supplier_id);

    let conn = db.conn.lock()?;
    if let Some(ref sid) = supplier_id {
        ensure_supplier(&conn, sid)?;
    }
    if sku_taken(&conn, &sku, None)? {
        return Err(PosError::Conflict(format!("SKU already exists: {sku}")));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO products (id, sku, name, brand, category, description, price, cost_price,
                               stock, supplier_id, is_active, is_featured, image_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?12, ?13, ?13)",
        params![
            id,
            sku,
            name,
            clean_opt(input.brand),
            clean_opt(input.category),
            clean_opt(input.description),
            round_money(input.price),
            round_money(input.cost_price),
            input.stock,
            supplier_id,
            input.is_featured as i64,
            clean_opt(input.image_url),
            now,
        ],
    )?;

    info!(product_id = %id, sku = %sku, stock = input.stock, "Product created");
    load_product(&conn, &id)
}

pub fn update_product(db: &DbState, product_id: &str, update: ProductUpdate) -> PosResult<Product> {
    let conn = db.conn.lock()?;
    let mut product = load_product(&conn, product_id)?;

    if let Some(sku) = update.sku {
        let sku = normalize_sku(&sku)?;
        if sku_taken(&conn, &sku, Some(product_id))? {
            return Err(PosError::Conflict(format!("SKU already exists: {sku}")));
        }
        product.sku = sku;
    }
    if let Some(name) = update.name {
        product.name = require_text(&name, "Product name", 120)?;
    }
    if let Some(brand) = update.brand {
        product.brand = clean_opt(Some(brand));
    }
    if let Some(category) = update.category {
        product.category = clean_opt(Some(category));
    }
    if let Some(description) = update.description {
        product.description = clean_opt(Some(description));
    }
    if let Some(price) = update.price {
        product.price = round_money(price);
    }
    if let Some(cost) = update.cost_price {
        product.cost_price = round_money(cost);
    }
    validate_prices(product.price, product.cost_price)?;
    if let Some(supplier_id) = update.supplier_id {
        product.supplier_id = clean_opt(Some(supplier_id));
        if let Some(ref sid) = product.supplier_id {
            ensure_supplier(&conn, sid)?;
        }
    }
    if let Some(active) = update.is_active {
        product.is_active = active;
    }
    if let Some(featured) = update.is_featured {
        product.is_featured = featured;
    }
    if let Some(image_url) = update.image_url {
        product.image_url = clean_opt(Some(image_url));
    }

    conn.execute(
        "UPDATE products SET sku = ?1, name = ?2, brand = ?3, category = ?4, description = ?5,
                price = ?6, cost_price = ?7, supplier_id = ?8, is_active = ?9, is_featured = ?10,
                image_url = ?11, updated_at = ?12
         WHERE id = ?13",
        params![
            product.sku,
            product.name,
            product.brand,
            product.category,
            product.description,
            product.price,
            product.cost_price,
            product.supplier_id,
            product.is_active as i64,
            product.is_featured as i64,
            product.image_url,
            Utc::now().to_rfc3339(),
            product_id,
        ],
    )?;

    info!(product_id = %product_id, "Product updated");
    load_product(&conn, product_id)
}

pub fn get_product(db: &DbState, product_id: &str) -> PosResult<Product> {
    let conn = db.conn.lock()?;
    load_product(&conn, product_id)
}

pub(crate) fn query_products(conn: &Connection, filter: &ProductFilter) -> PosResult<Vec<Product>> {
    let query = filter
        .query
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .unwrap_or_default();
    let pattern = format!("%{query}%");
    let category = filter.category.as_deref().map(str::trim).unwrap_or("");
    let supplier = filter.supplier_id.as_deref().map(str::trim).unwrap_or("");

    let mut stmt = conn.prepare(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products
         WHERE (?1 = '' OR lower(name) LIKE ?2 OR lower(sku) LIKE ?2 OR lower(COALESCE(brand, '')) LIKE ?2)
           AND (?3 = '' OR category = ?3 COLLATE NOCASE)
           AND (?4 = '' OR supplier_id = ?4)
           AND (?5 = 0 OR is_active = 1)
           AND (?6 = 0 OR is_featured = 1)
           AND (?7 IS NULL OR stock <= ?7)
         ORDER BY lower(name), sku"
    ))?;
    let rows = stmt.query_map(
        params![
            query,
            pattern,
            category,
            supplier,
            filter.active_only as i64,
            filter.featured_only as i64,
            filter.max_stock,
        ],
        product_from_row,
    )?;

    let mut products = Vec::new();
    for row in rows {
        match row {
            Ok(p) => products.push(p),
            Err(e) => warn!("skipping malformed product row: {e}"),
        }
    }
    Ok(products)
}

pub fn list_products(db: &DbState, filter: &ProductFilter) -> PosResult<Vec<Product>> {
    let conn = db.conn.lock()?;
    query_products(&conn, filter)
}

pub fn delete_product(db: &DbState, product_id: &str) -> PosResult<DeleteOutcome> {
    let conn = db.conn.lock()?;
    load_product(&conn, product_id)?;

    let referenced: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sale_items WHERE product_id = ?1",
        params![product_id],
        |row| row.get(0),
    )?;

    if referenced > 0 {
        conn.execute(
            "UPDATE products SET is_active = 0, is_featured = 0, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), product_id],
        )?;
        info!(product_id = %product_id, "Product deactivated (referenced by sales)");
        return Ok(DeleteOutcome::Deactivated);
    }

    conn.execute("DELETE FROM products WHERE id = ?1", params![product_id])?;
    info!(product_id = %product_id, "Product deleted");
    Ok(DeleteOutcome::Deleted)
}

// ---------------------------------------------------------------------------
// Stock
// ---------------------------------------------------------------------------

/// Apply a manual stock correction (delivery received, damaged unit, count).
pub fn adjust_stock(db: &DbState, product_id: &str, delta: i64, reason: &str) -> PosResult<Product> {
    let reason = require_text(reason, "Adjustment reason", 200)?;
    if delta == 0 {
        return Err(PosError::validation("Stock adjustment cannot be zero"));
    }
    let conn = db.conn.lock()?;
    let product = load_product(&conn, product_id)?;
    let new_stock = product
        .stock
        .checked_add(delta)
        .ok_or_else(|| PosError::validation("Stock adjustment too large"))?;
    if new_stock < 0 {
        return Err(PosError::validation(format!(
            "Adjustment would leave {} with negative stock ({new_stock})",
            product.name
        )));
    }
    conn.execute(
        "UPDATE products SET stock = ?1, updated_at = ?2 WHERE id = ?3",
        params![new_stock, Utc::now().to_rfc3339(), product_id],
    )?;
    info!(
        product_id = %product_id,
        delta,
        new_stock,
        reason = %reason,
        "Stock adjusted"
    );
    load_product(&conn, product_id)
}

/// Move stock by `delta` inside an open transaction, failing on shortfall.
pub(crate) fn apply_stock_delta(conn: &Connection, product: &Product, delta: i64) -> PosResult<()> {
    let remaining = product
        .stock
        .checked_add(delta)
        .ok_or_else(|| PosError::validation("Quantity too large"))?;
    if remaining < 0 {
        return Err(PosError::InsufficientStock {
            product: product.name.clone(),
            requested: delta.saturating_neg(),
            available: product.stock,
        });
    }
    conn.execute(
        "UPDATE products SET stock = stock + ?1, updated_at = ?2 WHERE id = ?3",
        params![delta, Utc::now().to_rfc3339(), product.id],
    )?;
    Ok(())
}

pub fn list_categories(db: &DbState) -> PosResult<Vec<CategoryCount>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT COALESCE(NULLIF(category, ''), 'Uncategorized') AS c,
                COUNT(*), COALESCE(SUM(stock), 0)
         FROM products
         WHERE is_active = 1
         GROUP BY c
         ORDER BY lower(c)",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(CategoryCount {
            category: row.get(0)?,
            product_count: row.get(1)?,
            units_in_stock: row.get(2)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn low_stock(db: &DbState, threshold: i64) -> PosResult<Vec<Product>> {
    let conn = db.conn.lock()?;
    query_products(
        &conn,
        &ProductFilter {
            active_only: true,
            max_stock: Some(threshold.max(0)),
            ..ProductFilter::default()
        },
    )
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;

    pub(crate) fn seed_product(db: &DbState, sku: &str, price: f64, stock: i64) -> Product {
        create_product(
            db,
            ProductInput {
                sku: sku.into(),
                name: format!("Product {sku}"),
                category: Some("Televisions".into()),
                price,
                cost_price: price * 0.8,
                stock,
                ..ProductInput::default()
            },
        )
        .expect("seed product")
    }

    #[test]
    fn create_normalizes_and_rejects_duplicates() {
        let db = db::test_db_state();
        let p = create_product(
            &db,
            ProductInput {
                sku: " tv-43-led ".into(),
                name: "  Samsung 43\" LED  ".into(),
                brand: Some("Samsung".into()),
                price: 89_999.0,
                cost_price: 76_500.0,
                stock: 4,
                ..ProductInput::default()
            },
        )
        .unwrap();
        assert_eq!(p.sku, "TV-43-LED");
        assert_eq!(p.name, "Samsung 43\" LED");
        assert!(p.is_active);

        let dup = create_product(
            &db,
            ProductInput {
                sku: "TV-43-led".into(),
                name: "Other".into(),
                price: 1.0,
                ..ProductInput::default()
            },
        );
        assert!(matches!(dup, Err(PosError::Conflict(_))));
    }

    #[test]
    fn create_validates_fields() {
        let db = db::test_db_state();
        let base = ProductInput {
            sku: "FAN-1".into(),
            name: "Pedestal fan".into(),
            price: 12_000.0,
            ..ProductInput::default()
        };
        assert!(create_product(
            &db,
            ProductInput {
                price: 0.0,
                ..base.clone()
            }
        )
        .is_err());
        assert!(create_product(
            &db,
            ProductInput {
                stock: -1,
                ..base.clone()
            }
        )
        .is_err());
        assert!(create_product(
            &db,
            ProductInput {
                sku: "bad sku!".into(),
                ..base.clone()
            }
        )
        .is_err());
        let missing_supplier = create_product(
            &db,
            ProductInput {
                supplier_id: Some("nope".into()),
                ..base
            },
        );
        assert!(matches!(missing_supplier, Err(PosError::NotFound { .. })));
    }

    #[test]
    fn partial_update_keeps_untouched_fields() {
        let db = db::test_db_state();
        let p = seed_product(&db, "AC-15", 150_000.0, 3);
        let updated = update_product(
            &db,
            &p.id,
            ProductUpdate {
                price: Some(145_000.0),
                category: Some(String::new()),
                is_featured: Some(true),
                ..ProductUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(updated.price, 145_000.0);
        assert_eq!(updated.category, None);
        assert!(updated.is_featured);
        assert_eq!(updated.name, p.name);
        assert_eq!(updated.stock, 3);
    }

    #[test]
    fn list_filters_by_query_category_and_stock() {
        let db = db::test_db_state();
        seed_product(&db, "TV-32", 45_000.0, 10);
        let low = seed_product(&db, "TV-55", 180_000.0, 1);
        create_product(
            &db,
            ProductInput {
                sku: "IRON-1".into(),
                name: "Steam iron".into(),
                brand: Some("Philips".into()),
                category: Some("Home".into()),
                price: 6_500.0,
                stock: 20,
                ..ProductInput::default()
            },
        )
        .unwrap();

        let philips = list_products(
            &db,
            &ProductFilter {
                query: Some("PHIL".into()),
                ..ProductFilter::default()
            },
        )
        .unwrap();
        assert_eq!(philips.len(), 1);

        let tvs = list_products(
            &db,
            &ProductFilter {
                category: Some("televisions".into()),
                ..ProductFilter::default()
            },
        )
        .unwrap();
        assert_eq!(tvs.len(), 2);

        let lows = low_stock(&db, 2).unwrap();
        assert_eq!(lows.len(), 1);
        assert_eq!(lows[0].id, low.id);

        let cats = list_categories(&db).unwrap();
        assert_eq!(cats.len(), 2);
        assert_eq!(cats[1].category, "Televisions");
        assert_eq!(cats[1].units_in_stock, 11);
    }

    #[test]
    fn adjust_stock_refuses_negative_result() {
        let db = db::test_db_state();
        let p = seed_product(&db, "MW-20", 28_000.0, 2);
        let after = adjust_stock(&db, &p.id, 5, "Delivery from supplier").unwrap();
        assert_eq!(after.stock, 7);
        assert!(adjust_stock(&db, &p.id, -8, "Count correction").is_err());
        assert!(adjust_stock(&db, &p.id, -1, "   ").is_err());
        assert!(matches!(
            adjust_stock(&db, &p.id, i64::MAX, "Bulk import"),
            Err(PosError::Validation(_))
        ));
        assert_eq!(get_product(&db, &p.id).unwrap().stock, 7);
    }

    #[test]
    fn delete_deactivates_when_referenced() {
        let db = db::test_db_state();
        let unused = seed_product(&db, "USB-C", 1_500.0, 10);
        assert_eq!(delete_product(&db, &unused.id).unwrap(), DeleteOutcome::Deleted);
        assert!(get_product(&db, &unused.id).is_err());

        let sold = seed_product(&db, "HDMI", 900.0, 10);
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO sales (id, invoice_no, payment_method, sale_date, created_at, updated_at)
                 VALUES ('s-1', 'INV-20260101-0001', 'cash', '2026-01-01', datetime('now'), datetime('now'))",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO sale_items (sale_id, product_id, product_name, sku, quantity, unit_price, line_total)
                 VALUES ('s-1', ?1, 'HDMI', 'HDMI', 1, 900.0, 900.0)",
                params![sold.id],
            )
            .unwrap();
        }
        assert_eq!(
            delete_product(&db, &sold.id).unwrap(),
            DeleteOutcome::Deactivated
        );
        assert!(!get_product(&db, &sold.id).unwrap().is_active);
    }
}
