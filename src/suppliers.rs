//! Supplier directory (Admin Portal).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::catalog::{self, Product, ProductFilter};
use crate::data_helpers::{clean_opt, is_plausible_email, normalize_phone, require_text};
use crate::db::DbState;
use crate::error::{not_found_or, PosError, PosResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub product_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupplierInput {
    pub name: String,
    #[serde(alias = "contact_person", alias = "contact")]
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

const SUPPLIER_SELECT: &str = "SELECT s.id, s.name, s.contact_person, s.phone, s.email, s.address, s.notes,
            (SELECT COUNT(*) FROM products p WHERE p.supplier_id = s.id),
            s.created_at, s.updated_at
     FROM suppliers s";

fn supplier_from_row(row: &Row<'_>) -> rusqlite::Result<Supplier> {
    Ok(Supplier {
        id: row.get(0)?,
        name: row.get(1)?,
        contact_person: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        address: row.get(5)?,
        notes: row.get(6)?,
        product_count: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

struct CleanSupplier {
    name: String,
    contact_person: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    address: Option<String>,
    notes: Option<String>,
}

fn clean_input(input: SupplierInput) -> PosResult<CleanSupplier> {
    let name = require_text(&input.name, "Supplier name", 120)?;
    let phone = clean_opt(input.phone)
        .map(|p| normalize_phone(&p))
        .filter(|p| !p.is_empty());
    let email = clean_opt(input.email);
    if let Some(ref e) = email {
        if !is_plausible_email(e) {
            return Err(PosError::validation(format!("Invalid email: {e}")));
        }
    }
    Ok(CleanSupplier {
        name,
        contact_person: clean_opt(input.contact_person),
        phone,
        email,
        address: clean_opt(input.address),
        notes: clean_opt(input.notes),
    })
}

fn name_taken(conn: &Connection, name: &str, except_id: Option<&str>) -> PosResult<bool> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM suppliers WHERE lower(name) = lower(?1)",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(matches!(existing, Some(id) if Some(id.as_str()) != except_id))
}

fn load_supplier(conn: &Connection, supplier_id: &str) -> PosResult<Supplier> {
    conn.query_row(
        &format!("{SUPPLIER_SELECT} WHERE s.id = ?1"),
        params![supplier_id],
        supplier_from_row,
    )
    .map_err(not_found_or("Supplier", supplier_id))
}

pub fn create_supplier(db: &DbState, input: SupplierInput) -> PosResult<Supplier> {
    let s = clean_input(input)?;
    let conn = db.conn.lock()?;
    if name_taken(&conn, &s.name, None)? {
        return Err(PosError::Conflict(format!(
            "Supplier already exists: {}",
            s.name
        )));
    }
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO suppliers (id, name, contact_person, phone, email, address, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            s.name,
            s.contact_person,
            s.phone,
            s.email,
            s.address,
            s.notes,
            now
        ],
    )?;
    info!(supplier_id = %id, name = %s.name, "Supplier created");
    load_supplier(&conn, &id)
}

/// Full replace of the editable fields.
pub fn update_supplier(db: &DbState, supplier_id: &str, input: SupplierInput) -> PosResult<Supplier> {
    let s = clean_input(input)?;
    let conn = db.conn.lock()?;
    load_supplier(&conn, supplier_id)?;
    if name_taken(&conn, &s.name, Some(supplier_id))? {
        return Err(PosError::Conflict(format!(
            "Supplier already exists: {}",
            s.name
        )));
    }
    conn.execute(
        "UPDATE suppliers SET name = ?1, contact_person = ?2, phone = ?3, email = ?4,
                address = ?5, notes = ?6, updated_at = ?7
         WHERE id = ?8",
        params![
            s.name,
            s.contact_person,
            s.phone,
            s.email,
            s.address,
            s.notes,
            Utc::now().to_rfc3339(),
            supplier_id
        ],
    )?;
    info!(supplier_id = %supplier_id, "Supplier updated");
    load_supplier(&conn, supplier_id)
}

pub fn get_supplier(db: &DbState, supplier_id: &str) -> PosResult<Supplier> {
    let conn = db.conn.lock()?;
    load_supplier(&conn, supplier_id)
}

pub fn list_suppliers(db: &DbState, query: Option<&str>) -> PosResult<Vec<Supplier>> {
    let q = query.map(|q| q.trim().to_lowercase()).unwrap_or_default();
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "{SUPPLIER_SELECT}
         WHERE (?1 = '' OR lower(s.name) LIKE ?2 OR lower(COALESCE(s.contact_person, '')) LIKE ?2
                OR COALESCE(s.phone, '') LIKE ?2)
         ORDER BY lower(s.name)"
    ))?;
    let rows = stmt.query_map(params![q, format!("%{q}%")], supplier_from_row)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn delete_supplier(db: &DbState, supplier_id: &str) -> PosResult<()> {
    let conn = db.conn.lock()?;
    let supplier = load_supplier(&conn, supplier_id)?;
    if supplier.product_count > 0 {
        return Err(PosError::Conflict(format!(
            "Supplier {} still has {} product(s)",
            supplier.name, supplier.product_count
        )));
    }
    conn.execute("DELETE FROM suppliers WHERE id = ?1", params![supplier_id])?;
    info!(supplier_id = %supplier_id, "Supplier deleted");
    Ok(())
}

pub fn supplier_products(db: &DbState, supplier_id: &str) -> PosResult<Vec<Product>> {
    let conn = db.conn.lock()?;
    load_supplier(&conn, supplier_id)?;
    catalog::query_products(
        &conn,
        &ProductFilter {
            supplier_id: Some(supplier_id.to_string()),
            ..ProductFilter::default()
        },
    )
}
