//! Customer records (User Portal).
//!
//! Phone numbers are stored digits-only and act as the natural key the
//! counter staff search by.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::data_helpers::{clean_opt, is_plausible_email, normalize_phone, require_text, round_money};
use crate::db::{self, DbState};
use crate::error::{not_found_or, PosError, PosResult};
use crate::installments::{self, PlanFilter, PlanSummary};
use crate::sales::{self, SaleFilter, SaleSummary};

const MIN_PHONE_DIGITS: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub national_id: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerInput {
    pub name: String,
    #[serde(alias = "mobile", alias = "customerPhone")]
    pub phone: String,
    #[serde(alias = "national_id", alias = "cnic")]
    pub national_id: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerHistory {
    pub customer: Customer,
    pub sales: Vec<SaleSummary>,
    pub plans: Vec<PlanSummary>,
    pub total_spent: f64,
    pub outstanding_balance: f64,
}

const CUSTOMER_COLUMNS: &str =
    "id, name, phone, national_id, address, email, notes, created_at, updated_at, deleted_at";

const DELETED_CUSTOMER_NAME: &str = "Deleted customer";

/// Outcome of `delete_customer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerDeletion {
    Deleted,
    /// Past sales or plans reference the row, so its personal data was wiped instead.
    Anonymized,
}

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        national_id: row.get(3)?,
        address: row.get(4)?,
        email: row.get(5)?,
        notes: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        deleted_at: row.get(9)?,
    })
}

pub(crate) fn validate_national_id(raw: Option<String>) -> PosResult<Option<String>> {
    let Some(id) = clean_opt(raw) else {
        return Ok(None);
    };
    if !id.chars().all(|c| c.is_ascii_digit() || c == '-') || !id.chars().any(|c| c.is_ascii_digit())
    {
        return Err(PosError::validation(format!(
            "National ID may only contain digits and dashes: {id}"
        )));
    }
    Ok(Some(id))
}

pub(crate) fn validate_phone(raw: &str) -> PosResult<String> {
    let phone = normalize_phone(raw);
    if phone.len() < MIN_PHONE_DIGITS {
        return Err(PosError::validation(format!(
            "Phone must have at least {MIN_PHONE_DIGITS} digits"
        )));
    }
    Ok(phone)
}

struct CleanCustomer {
    name: String,
    phone: String,
    national_id: Option<String>,
    address: Option<String>,
    email: Option<String>,
    notes: Option<String>,
}

fn clean_input(input: CustomerInput) -> PosResult<CleanCustomer> {
    let email = clean_opt(input.email);
    if let Some(ref e) = email {
        if !is_plausible_email(e) {
            return Err(PosError::validation(format!("Invalid email: {e}")));
        }
    }
    Ok(CleanCustomer {
        name: require_text(&input.name, "Customer name", 120)?,
        phone: validate_phone(&input.phone)?,
        national_id: validate_national_id(input.national_id)?,
        address: clean_opt(input.address),
        email,
        notes: clean_opt(input.notes),
    })
}

fn phone_taken(conn: &Connection, phone: &str, except_id: Option<&str>) -> PosResult<bool> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM customers WHERE phone = ?1 AND deleted_at IS NULL",
            params![phone],
            |row| row.get(0),
        )
        .optional()?;
    Ok(matches!(existing, Some(id) if Some(id.as_str()) != except_id))
}

pub(crate) fn load_customer(conn: &Connection, customer_id: &str) -> PosResult<Customer> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"),
        params![customer_id],
        customer_from_row,
    )
    .map_err(not_found_or("Customer", customer_id))
}

/// Like `load_customer`, but anonymized customers count as missing.
pub(crate) fn load_current_customer(conn: &Connection, customer_id: &str) -> PosResult<Customer> {
    let customer = load_customer(conn, customer_id)?;
    if customer.deleted_at.is_some() {
        return Err(PosError::not_found("Customer", customer_id));
    }
    Ok(customer)
}

pub fn create_customer(db: &DbState, input: CustomerInput) -> PosResult<Customer> {
    let c = clean_input(input)?;
    let conn = db.conn.lock()?;
    if phone_taken(&conn, &c.phone, None)? {
        return Err(PosError::Conflict(format!(
            "A customer with phone {} already exists",
            c.phone
        )));
    }
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO customers (id, name, phone, national_id, address, email, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            c.name,
            c.phone,
            c.national_id,
            c.address,
            c.email,
            c.notes,
            now
        ],
    )?;
    info!(customer_id = %id, "Customer created");
    load_customer(&conn, &id)
}

pub fn update_customer(db: &DbState, customer_id: &str, input: CustomerInput) -> PosResult<Customer> {
    let c = clean_input(input)?;
    let conn = db.conn.lock()?;
    load_current_customer(&conn, customer_id)?;
    if phone_taken(&conn, &c.phone, Some(customer_id))? {
        return Err(PosError::Conflict(format!(
            "A customer with phone {} already exists",
            c.phone
        )));
    }
    conn.execute(
        "UPDATE customers SET name = ?1, phone = ?2, national_id = ?3, address = ?4,
                email = ?5, notes = ?6, updated_at = ?7
         WHERE id = ?8",
        params![
            c.name,
            c.phone,
            c.national_id,
            c.address,
            c.email,
            c.notes,
            Utc::now().to_rfc3339(),
            customer_id
        ],
    )?;
    info!(customer_id = %customer_id, "Customer updated");
    load_customer(&conn, customer_id)
}

pub fn get_customer(db: &DbState, customer_id: &str) -> PosResult<Customer> {
    let conn = db.conn.lock()?;
    load_customer(&conn, customer_id)
}

/// Search by name, phone digits or national id. An empty query lists everyone.
pub fn search_customers(db: &DbState, query: &str) -> PosResult<Vec<Customer>> {
    let q = query.trim().to_lowercase();
    let digits = normalize_phone(&q);
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers
         WHERE deleted_at IS NULL
           AND (?1 = ''
                OR lower(name) LIKE ?2
                OR (?3 != '' AND phone LIKE ?4)
                OR COALESCE(national_id, '') LIKE ?2)
         ORDER BY lower(name)
         LIMIT 200"
    ))?;
    let rows = stmt.query_map(
        params![q, format!("%{q}%"), digits, format!("%{digits}%")],
        customer_from_row,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_by_phone(db: &DbState, phone: &str) -> PosResult<Option<Customer>> {
    let phone = normalize_phone(phone);
    if phone.is_empty() {
        return Ok(None);
    }
    let conn = db.conn.lock()?;
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE phone = ?1 AND deleted_at IS NULL"
            ),
            params![phone],
            customer_from_row,
        )
        .optional()?)
}

/// Delete a customer. Refused while an installment plan is still active.
///
/// Customers referenced by past sales or plans are anonymized in place so
/// invoices and statements keep resolving.
pub fn delete_customer(db: &DbState, customer_id: &str) -> PosResult<CustomerDeletion> {
    let conn = db.conn.lock()?;
    let customer = load_current_customer(&conn, customer_id)?;

    let active_plans: i64 = conn.query_row(
        "SELECT COUNT(*) FROM installment_plans WHERE customer_id = ?1 AND status = 'active'",
        params![customer_id],
        |row| row.get(0),
    )?;
    if active_plans > 0 {
        return Err(PosError::Conflict(format!(
            "{} has {active_plans} active installment plan(s)",
            customer.name
        )));
    }
    let history: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM sales WHERE customer_id = ?1)
              + (SELECT COUNT(*) FROM installment_plans WHERE customer_id = ?1)",
        params![customer_id],
        |row| row.get(0),
    )?;

    if history == 0 {
        conn.execute("DELETE FROM customers WHERE id = ?1", params![customer_id])?;
        info!(customer_id = %customer_id, "Customer deleted");
        return Ok(CustomerDeletion::Deleted);
    }

    db::with_transaction(&conn, |tx| {
        let now = Utc::now().to_rfc3339();
        // Phone is UNIQUE NOT NULL, so free the number with a per-row placeholder.
        tx.execute(
            "UPDATE customers SET name = ?1, phone = 'deleted:' || id, national_id = NULL,
                    address = NULL, email = NULL, notes = NULL, updated_at = ?2, deleted_at = ?2
             WHERE id = ?3",
            params![DELETED_CUSTOMER_NAME, now, customer_id],
        )?;
        tx.execute(
            "UPDATE guarantors SET customer_id = NULL WHERE customer_id = ?1",
            params![customer_id],
        )?;
        Ok(())
    })?;
    info!(customer_id = %customer_id, history, "Customer anonymized");
    Ok(CustomerDeletion::Anonymized)
}

pub fn customer_history(db: &DbState, customer_id: &str) -> PosResult<CustomerHistory> {
    let conn = db.conn.lock()?;
    let customer = load_customer(&conn, customer_id)?;
    let sales = sales::query_sales(
        &conn,
        &SaleFilter {
            customer_id: Some(customer_id.to_string()),
            ..SaleFilter::default()
        },
    )?;
    let plans = installments::query_plans(
        &conn,
        &PlanFilter {
            customer_id: Some(customer_id.to_string()),
            ..PlanFilter::default()
        },
    )?;

    let total_spent = round_money(
        sales
            .iter()
            .filter(|s| s.status == "completed")
            .map(|s| s.total)
            .sum(),
    );
    let outstanding_balance = round_money(
        plans
            .iter()
            .filter(|p| p.status == "active")
            .map(|p| p.remaining)
            .sum(),
    );

    Ok(CustomerHistory {
        customer,
        sales,
        plans,
        total_spent,
        outstanding_balance,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn seed_customer(db: &DbState, name: &str, phone: &str) -> Customer {
        create_customer(
            db,
            CustomerInput {
                name: name.into(),
                phone: phone.into(),
                national_id: Some("35202-1234567-1".into()),
                ..CustomerInput::default()
            },
        )
        .expect("seed customer")
    }

    #[test]
    fn create_validates_phone_and_national_id() {
        let db = db::test_db_state();
        let c = seed_customer(&db, "Ayesha Khan", "+92 321 5550001");
        assert_eq!(c.phone, "923215550001");

        let short = create_customer(
            &db,
            CustomerInput {
                name: "Bilal".into(),
                phone: "12-34".into(),
                ..CustomerInput::default()
            },
        );
        assert!(short.is_err());

        let bad_id = create_customer(
            &db,
            CustomerInput {
                name: "Bilal".into(),
                phone: "03001234567".into(),
                national_id: Some("ABC".into()),
                ..CustomerInput::default()
            },
        );
        assert!(bad_id.is_err());

        let dup = create_customer(
            &db,
            CustomerInput {
                name: "Someone else".into(),
                phone: "92-321-5550001".into(),
                ..CustomerInput::default()
            },
        );
        assert!(matches!(dup, Err(PosError::Conflict(_))));
    }

    #[test]
    fn search_matches_name_phone_and_national_id() {
        let db = db::test_db_state();
        seed_customer(&db, "Ayesha Khan", "03215550001");
        seed_customer(&db, "Hamza Ali", "03335550002");

        assert_eq!(search_customers(&db, "ayesha").unwrap().len(), 1);
        assert_eq!(search_customers(&db, "0333-555").unwrap().len(), 1);
        assert_eq!(search_customers(&db, "35202").unwrap().len(), 2);
        assert_eq!(search_customers(&db, "").unwrap().len(), 2);
        assert!(find_by_phone(&db, "0321 5550001").unwrap().is_some());
        assert!(find_by_phone(&db, "").unwrap().is_none());
    }

    #[test]
    fn update_and_delete() {
        let db = db::test_db_state();
        let c = seed_customer(&db, "Usman", "03005550003");
        let updated = update_customer(
            &db,
            &c.id,
            CustomerInput {
                name: "Usman Tariq".into(),
                phone: "03005550003".into(),
                address: Some("Model Town, Lahore".into()),
                ..CustomerInput::default()
            },
        )
        .unwrap();
        assert_eq!(updated.name, "Usman Tariq");
        assert_eq!(updated.national_id, None);

        assert_eq!(delete_customer(&db, &c.id).unwrap(), CustomerDeletion::Deleted);
        assert!(matches!(
            get_customer(&db, &c.id),
            Err(PosError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_refused_while_plan_is_active() {
        let db = db::test_db_state();
        let plan = crate::installments::tests::seed_plan(&db);

        let err = delete_customer(&db, &plan.customer_id).unwrap_err();
        assert!(matches!(err, PosError::Conflict(_)));
        assert_eq!(get_customer(&db, &plan.customer_id).unwrap().name, "Kamran Akmal");
    }

    #[test]
    fn delete_after_cancelled_plan_anonymizes() {
        let db = db::test_db_state();
        let plan = crate::installments::tests::seed_plan(&db);
        crate::installments::cancel_plan(&db, &plan.id, "Customer changed mind", None).unwrap();

        let outcome = delete_customer(&db, &plan.customer_id).unwrap();
        assert_eq!(outcome, CustomerDeletion::Anonymized);

        let gone = get_customer(&db, &plan.customer_id).unwrap();
        assert_eq!(gone.name, DELETED_CUSTOMER_NAME);
        assert!(gone.deleted_at.is_some());
        assert!(gone.national_id.is_none());
        assert!(search_customers(&db, "").unwrap().is_empty());
        assert!(find_by_phone(&db, "03001112233").unwrap().is_none());
        assert_eq!(
            crate::installments::get_plan(&db, &plan.id).unwrap().customer_name,
            DELETED_CUSTOMER_NAME
        );

        // The number is free again, and the anonymized row cannot be reused.
        seed_customer(&db, "Kamran Akmal", "03001112233");
        assert!(matches!(
            delete_customer(&db, &plan.customer_id),
            Err(PosError::NotFound { .. })
        ));
    }

    #[test]
    fn history_of_new_customer_is_empty() {
        let db = db::test_db_state();
        let c = seed_customer(&db, "Sana", "03005550004");
        let history = customer_history(&db, &c.id).unwrap();
        assert!(history.sales.is_empty());
        assert!(history.plans.is_empty());
        assert_eq!(history.outstanding_balance, 0.0);
    }
}
