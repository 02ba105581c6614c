//! Guarantors vouching for installment customers.

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::customers::{load_current_customer, validate_national_id, validate_phone};
use crate::data_helpers::{clean_opt, require_text};
use crate::db::DbState;
use crate::error::{not_found_or, PosError, PosResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Guarantor {
    pub id: String,
    pub customer_id: Option<String>,
    pub name: String,
    pub phone: String,
    pub national_id: Option<String>,
    pub address: Option<String>,
    pub relation: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuarantorInput {
    #[serde(alias = "customer_id")]
    pub customer_id: Option<String>,
    pub name: String,
    pub phone: String,
    #[serde(alias = "national_id", alias = "cnic")]
    pub national_id: Option<String>,
    pub address: Option<String>,
    #[serde(alias = "relationship")]
    pub relation: Option<String>,
}

const GUARANTOR_COLUMNS: &str =
    "id, customer_id, name, phone, national_id, address, relation, created_at, updated_at";

fn guarantor_from_row(row: &Row<'_>) -> rusqlite::Result<Guarantor> {
    Ok(Guarantor {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        name: row.get(2)?,
        phone: row.get(3)?,
        national_id: row.get(4)?,
        address: row.get(5)?,
        relation: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub(crate) fn load_guarantor(conn: &Connection, guarantor_id: &str) -> PosResult<Guarantor> {
    conn.query_row(
        &format!("SELECT {GUARANTOR_COLUMNS} FROM guarantors WHERE id = ?1"),
        params![guarantor_id],
        guarantor_from_row,
    )
    .map_err(not_found_or("Guarantor", guarantor_id))
}

struct CleanGuarantor {
    customer_id: Option<String>,
    name: String,
    phone: String,
    national_id: Option<String>,
    address: Option<String>,
    relation: Option<String>,
}

fn clean_input(conn: &Connection, input: GuarantorInput) -> PosResult<CleanGuarantor> {
    let customer_id = clean_opt(input.customer_id);
    if let Some(ref cid) = customer_id {
        load_current_customer(conn, cid)?;
    }
    Ok(CleanGuarantor {
        customer_id,
        name: require_text(&input.name, "Guarantor name", 120)?,
        phone: validate_phone(&input.phone)?,
        national_id: validate_national_id(input.national_id)?,
        address: clean_opt(input.address),
        relation: clean_opt(input.relation),
    })
}

pub fn create_guarantor(db: &DbState, input: GuarantorInput) -> PosResult<Guarantor> {
    let conn = db.conn.lock()?;
    let g = clean_input(&conn, input)?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO guarantors (id, customer_id, name, phone, national_id, address, relation, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            g.customer_id,
            g.name,
            g.phone,
            g.national_id,
            g.address,
            g.relation,
            now
        ],
    )?;
    info!(guarantor_id = %id, customer_id = ?g.customer_id, "Guarantor created");
    load_guarantor(&conn, &id)
}

pub fn update_guarantor(
    db: &DbState,
    guarantor_id: &str,
    input: GuarantorInput,
) -> PosResult<Guarantor> {
    let conn = db.conn.lock()?;
    load_guarantor(&conn, guarantor_id)?;
    let g = clean_input(&conn, input)?;
    conn.execute(
        "UPDATE guarantors SET customer_id = ?1, name = ?2, phone = ?3, national_id = ?4,
                address = ?5, relation = ?6, updated_at = ?7
         WHERE id = ?8",
        params![
            g.customer_id,
            g.name,
            g.phone,
            g.national_id,
            g.address,
            g.relation,
            Utc::now().to_rfc3339(),
            guarantor_id
        ],
    )?;
    info!(guarantor_id = %guarantor_id, "Guarantor updated");
    load_guarantor(&conn, guarantor_id)
}

pub fn get_guarantor(db: &DbState, guarantor_id: &str) -> PosResult<Guarantor> {
    let conn = db.conn.lock()?;
    load_guarantor(&conn, guarantor_id)
}

pub fn list_guarantors(db: &DbState, customer_id: Option<&str>) -> PosResult<Vec<Guarantor>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {GUARANTOR_COLUMNS} FROM guarantors
         WHERE (?1 IS NULL OR customer_id = ?1)
         ORDER BY lower(name)"
    ))?;
    let rows = stmt.query_map(params![customer_id], guarantor_from_row)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Guarantors attached to an installment plan.
pub(crate) fn plan_guarantors(conn: &Connection, plan_id: &str) -> PosResult<Vec<Guarantor>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.customer_id, g.name, g.phone, g.national_id, g.address, g.relation,
                g.created_at, g.updated_at
         FROM guarantors g
         JOIN installment_plan_guarantors pg ON pg.guarantor_id = g.id
         WHERE pg.plan_id = ?1
         ORDER BY lower(g.name)",
    )?;
    let rows = stmt.query_map(params![plan_id], guarantor_from_row)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn delete_guarantor(db: &DbState, guarantor_id: &str) -> PosResult<()> {
    let conn = db.conn.lock()?;
    let guarantor = load_guarantor(&conn, guarantor_id)?;
    let plans: i64 = conn.query_row(
        "SELECT COUNT(*) FROM installment_plan_guarantors pg
         JOIN installment_plans p ON p.id = pg.plan_id
         WHERE pg.guarantor_id = ?1",
        params![guarantor_id],
        |row| row.get(0),
    )?;
    if plans > 0 {
        return Err(PosError::Conflict(format!(
            "{} is a guarantor on {plans} installment plan(s)",
            guarantor.name
        )));
    }
    conn.execute("DELETE FROM guarantors WHERE id = ?1", params![guarantor_id])?;
    info!(guarantor_id = %guarantor_id, "Guarantor deleted");
    Ok(())
}
