//! Installment plans: quotes, schedules, FIFO payment allocation, timelines.
//!
//! Amounts are rounded to cents at every step and the last installment
//! absorbs the rounding, so a schedule always sums to the financed amount.

use chrono::{DateTime, Local, Months, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StoreSettings;
use crate::customers::load_current_customer;
use crate::data_helpers::{clean_opt, require_text, round_money};
use crate::db::{self, DbState};
use crate::error::{not_found_or, PosError, PosResult};
use crate::guarantors::{load_guarantor, plan_guarantors, Guarantor};
use crate::sales::{self, NewSale, PaymentMethod, SaleItem, SaleItemInput};

/// Hard ceiling regardless of store settings.
pub const MAX_PLAN_MONTHS: u32 = 120;
pub const MAX_GUARANTORS: usize = 2;

/// Below a cent counts as settled.
const CENT_EPSILON: f64 = 0.004;

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInput {
    #[serde(alias = "cash_price", alias = "price")]
    pub cash_price: f64,
    #[serde(default, alias = "markup_percent", alias = "markup")]
    pub markup_percent: f64,
    #[serde(default, alias = "down_payment", alias = "downPayment")]
    pub advance: f64,
    #[serde(alias = "tenure", alias = "duration")]
    pub months: u32,
    #[serde(alias = "start_date")]
    pub start_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledInstallment {
    pub number: u32,
    pub due_date: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanQuote {
    pub cash_price: f64,
    pub markup_percent: f64,
    pub markup_amount: f64,
    pub installment_price: f64,
    pub advance: f64,
    pub financed: f64,
    pub months: u32,
    pub monthly_amount: f64,
    pub last_amount: f64,
    pub schedule: Vec<ScheduledInstallment>,
}

/// Due date of installment `number`, clamped to the end of shorter months.
pub fn due_date_for(start: NaiveDate, number: u32) -> PosResult<NaiveDate> {
    start
        .checked_add_months(Months::new(number))
        .ok_or_else(|| PosError::validation("Schedule runs past the supported date range"))
}

/// Price a plan and lay out its schedule. No I/O.
pub fn calculate_plan(input: &PlanInput, max_months: u32) -> PosResult<PlanQuote> {
    let max_months = max_months.clamp(1, MAX_PLAN_MONTHS);
    if !input.cash_price.is_finite() || input.cash_price <= 0.0 {
        return Err(PosError::validation("Cash price must be positive"));
    }
    if !(0.0..=100.0).contains(&input.markup_percent) {
        return Err(PosError::validation("Markup must be between 0 and 100 percent"));
    }
    if !input.advance.is_finite() || input.advance < 0.0 {
        return Err(PosError::validation("Advance cannot be negative"));
    }
    if input.months < 1 || input.months > max_months {
        return Err(PosError::validation(format!(
            "Plan length must be between 1 and {max_months} months"
        )));
    }

    let cash_price = round_money(input.cash_price);
    let advance = round_money(input.advance);
    let markup_amount = round_money(cash_price * input.markup_percent / 100.0);
    let installment_price = round_money(cash_price + markup_amount);
    if advance >= installment_price {
        return Err(PosError::validation(format!(
            "Advance {advance:.2} must be less than the installment price {installment_price:.2}"
        )));
    }
    let financed = round_money(installment_price - advance);
    let months = input.months;
    let monthly_amount = round_money(financed / f64::from(months));
    let last_amount = round_money(financed - monthly_amount * f64::from(months - 1));
    if monthly_amount <= 0.0 || last_amount <= 0.0 {
        return Err(PosError::validation(
            "Financed amount is too small for that many months",
        ));
    }

    let mut schedule = Vec::with_capacity(months as usize);
    for number in 1..=months {
        schedule.push(ScheduledInstallment {
            number,
            due_date: due_date_for(input.start_date, number)?,
            amount: if number == months {
                last_amount
            } else {
                monthly_amount
            },
        });
    }

    Ok(PlanQuote {
        cash_price,
        markup_percent: input.markup_percent,
        markup_amount,
        installment_price,
        advance,
        financed,
        months,
        monthly_amount,
        last_amount,
        schedule,
    })
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentSaleInput {
    #[serde(alias = "customer_id")]
    pub customer_id: String,
    pub items: Vec<SaleItemInput>,
    #[serde(default, alias = "markup_percent", alias = "markup")]
    pub markup_percent: Option<f64>,
    #[serde(default, alias = "down_payment", alias = "downPayment")]
    pub advance: f64,
    #[serde(alias = "tenure", alias = "duration")]
    pub months: u32,
    #[serde(default, alias = "guarantor_ids", alias = "guarantors")]
    pub guarantor_ids: Vec<String>,
    #[serde(default, alias = "start_date")]
    pub start_date: Option<String>,
    #[serde(default, alias = "staff_id")]
    pub staff_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInput {
    #[serde(alias = "plan_id")]
    pub plan_id: String,
    pub amount: f64,
    #[serde(default = "default_payment_method")]
    pub method: PaymentMethod,
    #[serde(default, alias = "paid_on", alias = "date")]
    pub paid_on: Option<String>,
    #[serde(default, alias = "staff_id")]
    pub staff_id: Option<String>,
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Cash
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEntry {
    pub number: u32,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentPayment {
    pub id: String,
    pub plan_id: String,
    pub amount: f64,
    pub method: String,
    pub paid_on: String,
    pub allocation: Vec<AllocationEntry>,
    pub balance_after: f64,
    pub staff_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub number: u32,
    pub due_date: String,
    pub amount: f64,
    pub paid: f64,
    pub paid_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentPlan {
    pub id: String,
    pub invoice_no: String,
    pub sale_id: Option<String>,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub cash_price: f64,
    pub markup_percent: f64,
    pub markup_amount: f64,
    pub installment_price: f64,
    pub advance: f64,
    pub financed: f64,
    pub months: u32,
    pub monthly_amount: f64,
    pub start_date: String,
    pub status: String,
    pub staff_id: Option<String>,
    pub notes: Option<String>,
    pub cancelled_at: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: String,
    pub paid: f64,
    pub remaining: f64,
    pub items: Vec<SaleItem>,
    pub guarantors: Vec<Guarantor>,
    pub schedule: Vec<ScheduleRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub id: String,
    pub invoice_no: String,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub installment_price: f64,
    pub financed: f64,
    pub monthly_amount: f64,
    pub months: u32,
    pub status: String,
    pub paid: f64,
    pub remaining: f64,
    pub next_due_date: Option<String>,
    pub start_date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanFilter {
    pub status: Option<String>,
    #[serde(alias = "customer_id")]
    pub customer_id: Option<String>,
    #[serde(alias = "q", alias = "search")]
    pub query: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Paid,
    Partial,
    Overdue,
    Due,
    Upcoming,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRow {
    pub number: u32,
    pub due_date: String,
    pub amount: f64,
    pub paid: f64,
    pub remaining: f64,
    pub status: InstallmentStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextDue {
    pub number: u32,
    pub due_date: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineTotals {
    pub paid: f64,
    pub remaining: f64,
    pub next_due: Option<NextDue>,
    pub overdue_amount: f64,
    pub overdue_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTimeline {
    pub plan: PlanSummary,
    pub rows: Vec<TimelineRow>,
    pub payments: Vec<InstallmentPayment>,
    pub totals: TimelineTotals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueInstallment {
    pub plan_id: String,
    pub invoice_no: String,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub number: u32,
    pub due_date: String,
    pub amount_due: f64,
    pub days_overdue: i64,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn parse_date(raw: &str, label: &str) -> PosResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| PosError::validation(format!("{label} must be YYYY-MM-DD, got '{raw}'")))
}

fn load_schedule(conn: &Connection, plan_id: &str) -> PosResult<Vec<ScheduleRow>> {
    let mut stmt = conn.prepare(
        "SELECT number, due_date, amount, paid, paid_at FROM installment_schedule
         WHERE plan_id = ?1 ORDER BY number",
    )?;
    let rows = stmt.query_map(params![plan_id], |row| {
        Ok(ScheduleRow {
            number: row.get(0)?,
            due_date: row.get(1)?,
            amount: row.get(2)?,
            paid: row.get(3)?,
            paid_at: row.get(4)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<InstallmentPayment> {
    let allocation: String = row.get(5)?;
    Ok(InstallmentPayment {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        amount: row.get(2)?,
        method: row.get(3)?,
        paid_on: row.get(4)?,
        allocation: serde_json::from_str(&allocation).unwrap_or_default(),
        balance_after: row.get(6)?,
        staff_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const PAYMENT_COLUMNS: &str =
    "id, plan_id, amount, method, paid_on, allocation, balance_after, staff_id, created_at";

fn load_payments(conn: &Connection, plan_id: &str) -> PosResult<Vec<InstallmentPayment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM installment_payments
         WHERE plan_id = ?1 ORDER BY paid_on, created_at"
    ))?;
    let rows = stmt.query_map(params![plan_id], payment_from_row)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub(crate) fn load_payment(conn: &Connection, payment_id: &str) -> PosResult<InstallmentPayment> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM installment_payments WHERE id = ?1"),
        params![payment_id],
        payment_from_row,
    )
    .map_err(not_found_or("Installment payment", payment_id))
}

pub(crate) fn load_plan(conn: &Connection, plan_id: &str) -> PosResult<InstallmentPlan> {
    let mut plan = conn
        .query_row(
            "SELECT p.id, p.invoice_no, p.sale_id, p.customer_id, c.name, c.phone, p.cash_price,
                    p.markup_percent, p.markup_amount, p.installment_price, p.advance, p.financed,
                    p.months, p.monthly_amount, p.start_date, p.status, p.staff_id, p.notes,
                    p.cancelled_at, p.cancel_reason, p.created_at
             FROM installment_plans p JOIN customers c ON c.id = p.customer_id
             WHERE p.id = ?1 OR p.invoice_no = ?1",
            params![plan_id],
            |row| {
                Ok(InstallmentPlan {
                    id: row.get(0)?,
                    invoice_no: row.get(1)?,
                    sale_id: row.get(2)?,
                    customer_id: row.get(3)?,
                    customer_name: row.get(4)?,
                    customer_phone: row.get(5)?,
                    cash_price: row.get(6)?,
                    markup_percent: row.get(7)?,
                    markup_amount: row.get(8)?,
                    installment_price: row.get(9)?,
                    advance: row.get(10)?,
                    financed: row.get(11)?,
                    months: row.get(12)?,
                    monthly_amount: row.get(13)?,
                    start_date: row.get(14)?,
                    status: row.get(15)?,
                    staff_id: row.get(16)?,
                    notes: row.get(17)?,
                    cancelled_at: row.get(18)?,
                    cancel_reason: row.get(19)?,
                    created_at: row.get(20)?,
                    paid: 0.0,
                    remaining: 0.0,
                    items: Vec::new(),
                    guarantors: Vec::new(),
                    schedule: Vec::new(),
                })
            },
        )
        .map_err(not_found_or("Installment plan", plan_id))?;

    plan.schedule = load_schedule(conn, &plan.id)?;
    plan.paid = round_money(plan.schedule.iter().map(|r| r.paid).sum());
    plan.remaining = round_money(plan.financed - plan.paid);
    plan.guarantors = plan_guarantors(conn, &plan.id)?;
    if let Some(ref sale_id) = plan.sale_id {
        plan.items = sales::load_sale_items(conn, sale_id)?;
    }
    Ok(plan)
}

pub fn get_plan(db: &DbState, plan_id: &str) -> PosResult<InstallmentPlan> {
    let conn = db.conn.lock()?;
    load_plan(&conn, plan_id)
}

pub(crate) fn query_plans(conn: &Connection, filter: &PlanFilter) -> PosResult<Vec<PlanSummary>> {
    let q = filter
        .query
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .unwrap_or_default();
    let mut stmt = conn.prepare(
        "SELECT p.id, p.invoice_no, p.customer_id, c.name, c.phone, p.installment_price,
                p.financed, p.monthly_amount, p.months, p.status, p.start_date, p.created_at,
                (SELECT COALESCE(SUM(s.paid), 0) FROM installment_schedule s WHERE s.plan_id = p.id),
                (SELECT MIN(s.due_date) FROM installment_schedule s
                  WHERE s.plan_id = p.id AND s.amount - s.paid > 0.004)
         FROM installment_plans p JOIN customers c ON c.id = p.customer_id
         WHERE (?1 IS NULL OR p.status = ?1)
           AND (?2 IS NULL OR p.customer_id = ?2)
           AND (?3 = '' OR lower(c.name) LIKE ?4 OR c.phone LIKE ?4 OR lower(p.invoice_no) LIKE ?4)
         ORDER BY p.created_at DESC, p.invoice_no DESC
         LIMIT ?5",
    )?;
    let rows = stmt.query_map(
        params![
            clean_opt(filter.status.clone()),
            clean_opt(filter.customer_id.clone()),
            q,
            format!("%{q}%"),
            filter.limit.filter(|l| *l > 0).unwrap_or(500),
        ],
        |row| {
            let financed: f64 = row.get(6)?;
            let status: String = row.get(9)?;
            let paid: f64 = row.get(12)?;
            let next_due_date: Option<String> = row.get(13)?;
            Ok(PlanSummary {
                id: row.get(0)?,
                invoice_no: row.get(1)?,
                customer_id: row.get(2)?,
                customer_name: row.get(3)?,
                customer_phone: row.get(4)?,
                installment_price: row.get(5)?,
                financed,
                monthly_amount: row.get(7)?,
                months: row.get(8)?,
                next_due_date: if status == "active" { next_due_date } else { None },
                status,
                paid: round_money(paid),
                remaining: round_money(financed - paid),
                start_date: row.get(10)?,
                created_at: row.get(11)?,
            })
        },
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn list_plans(db: &DbState, filter: &PlanFilter) -> PosResult<Vec<PlanSummary>> {
    let conn = db.conn.lock()?;
    query_plans(&conn, filter)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

pub fn create_installment_sale(db: &DbState, input: InstallmentSaleInput) -> PosResult<InstallmentPlan> {
    let conn = db.conn.lock()?;
    create_installment_sale_at(&conn, input, Local::now())
}

pub(crate) fn create_installment_sale_at(
    conn: &Connection,
    input: InstallmentSaleInput,
    at: DateTime<Local>,
) -> PosResult<InstallmentPlan> {
    let settings = StoreSettings::load(conn);
    let customer_id = input.customer_id.trim().to_string();
    if customer_id.is_empty() {
        return Err(PosError::validation("An installment sale needs a customer"));
    }

    let mut guarantor_ids: Vec<String> = Vec::new();
    for raw in &input.guarantor_ids {
        let id = raw.trim();
        if !id.is_empty() && !guarantor_ids.iter().any(|g| g == id) {
            guarantor_ids.push(id.to_string());
        }
    }
    if guarantor_ids.len() > MAX_GUARANTORS {
        return Err(PosError::validation(format!(
            "At most {MAX_GUARANTORS} guarantors per plan"
        )));
    }

    let start_date = match clean_opt(input.start_date) {
        Some(raw) => parse_date(&raw, "Start date")?,
        None => at.date_naive(),
    };
    let markup_percent = input
        .markup_percent
        .unwrap_or(settings.default_markup_percent);
    let staff_id = clean_opt(input.staff_id);
    let notes = clean_opt(input.notes);

    let plan_id = db::with_transaction(conn, |tx| {
        load_current_customer(tx, &customer_id)?;
        for gid in &guarantor_ids {
            load_guarantor(tx, gid)?;
        }

        let lines = sales::price_lines(tx, &input.items)?;
        let quote = calculate_plan(
            &PlanInput {
                cash_price: sales::lines_subtotal(&lines),
                markup_percent,
                advance: input.advance,
                months: input.months,
                start_date,
            },
            settings.max_installment_months,
        )?;

        let plan_id = Uuid::new_v4().to_string();
        let invoice_no = sales::next_invoice_no(tx, &settings.installment_prefix, at.date_naive())?;
        let sale_id = sales::insert_sale(
            tx,
            &NewSale {
                invoice_no: &invoice_no,
                kind: "installment",
                customer_id: Some(&customer_id),
                lines: &lines,
                subtotal: quote.cash_price,
                discount_amount: 0.0,
                total: quote.installment_price,
                payment_method: PaymentMethod::Installment,
                amount_received: quote.advance,
                change_given: 0.0,
                staff_id: staff_id.as_deref(),
                notes: notes.as_deref(),
                plan_id: Some(&plan_id),
                at,
            },
        )?;

        let now = at.with_timezone(&Utc).to_rfc3339();
        tx.execute(
            "INSERT INTO installment_plans (id, invoice_no, sale_id, customer_id, cash_price,
                    markup_percent, markup_amount, installment_price, advance, financed, months,
                    monthly_amount, start_date, status, staff_id, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'active', ?14, ?15, ?16, ?16)",
            params![
                plan_id,
                invoice_no,
                sale_id,
                customer_id,
                quote.cash_price,
                quote.markup_percent,
                quote.markup_amount,
                quote.installment_price,
                quote.advance,
                quote.financed,
                quote.months,
                quote.monthly_amount,
                start_date.format("%Y-%m-%d").to_string(),
                staff_id,
                notes,
                now,
            ],
        )?;

        for row in &quote.schedule {
            tx.execute(
                "INSERT INTO installment_schedule (plan_id, number, due_date, amount)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    plan_id,
                    row.number,
                    row.due_date.format("%Y-%m-%d").to_string(),
                    row.amount
                ],
            )?;
        }
        for gid in &guarantor_ids {
            tx.execute(
                "INSERT INTO installment_plan_guarantors (plan_id, guarantor_id) VALUES (?1, ?2)",
                params![plan_id, gid],
            )?;
        }
        Ok(plan_id)
    })?;

    let plan = load_plan(conn, &plan_id)?;
    info!(
        plan_id = %plan.id,
        invoice_no = %plan.invoice_no,
        customer_id = %plan.customer_id,
        financed = plan.financed,
        months = plan.months,
        "Installment sale recorded"
    );
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// Spread `amount` over the earliest unpaid rows.
fn allocate_fifo(schedule: &[ScheduleRow], amount: f64) -> Vec<AllocationEntry> {
    let mut left = round_money(amount);
    let mut allocation = Vec::new();
    for row in schedule {
        if left <= 0.0 {
            break;
        }
        let open = round_money(row.amount - row.paid);
        if open <= 0.0 {
            continue;
        }
        let applied = if left < open { left } else { open };
        allocation.push(AllocationEntry {
            number: row.number,
            amount: applied,
        });
        left = round_money(left - applied);
    }
    allocation
}

pub fn record_installment_payment(db: &DbState, input: PaymentInput) -> PosResult<InstallmentPayment> {
    if input.method == PaymentMethod::Installment {
        return Err(PosError::validation("Payment method must be cash, card or bank transfer"));
    }
    if !input.amount.is_finite() || input.amount <= 0.0 {
        return Err(PosError::validation("Payment amount must be positive"));
    }
    let amount = round_money(input.amount);
    let paid_on = match clean_opt(input.paid_on) {
        Some(raw) => parse_date(&raw, "Payment date")?,
        None => Local::now().date_naive(),
    };
    let staff_id = clean_opt(input.staff_id);

    let conn = db.conn.lock()?;
    let payment_id = db::with_transaction(&conn, |tx| {
        let plan = load_plan(tx, &input.plan_id)?;
        if plan.status == "cancelled" {
            return Err(PosError::Conflict(format!(
                "Plan {} is cancelled",
                plan.invoice_no
            )));
        }
        if amount > plan.remaining + CENT_EPSILON {
            return Err(PosError::validation(format!(
                "Payment {amount:.2} exceeds remaining balance {:.2}",
                plan.remaining
            )));
        }

        let allocation = allocate_fifo(&plan.schedule, amount);
        let now = Utc::now().to_rfc3339();
        for entry in &allocation {
            tx.execute(
                "UPDATE installment_schedule
                 SET paid = ROUND(paid + ?1, 2),
                     paid_at = CASE WHEN ROUND(paid + ?1, 2) >= amount THEN ?2 ELSE paid_at END
                 WHERE plan_id = ?3 AND number = ?4",
                params![entry.amount, paid_on.format("%Y-%m-%d").to_string(), plan.id, entry.number],
            )?;
        }

        let balance_after = round_money(plan.remaining - amount).max(0.0);
        let payment_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO installment_payments (id, plan_id, amount, method, paid_on, allocation,
                    balance_after, staff_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                payment_id,
                plan.id,
                amount,
                input.method.as_str(),
                paid_on.format("%Y-%m-%d").to_string(),
                serde_json::to_string(&allocation)?,
                balance_after,
                staff_id,
                now,
            ],
        )?;

        if balance_after <= CENT_EPSILON {
            tx.execute(
                "UPDATE installment_plans SET status = 'completed', updated_at = ?1 WHERE id = ?2",
                params![now, plan.id],
            )?;
            info!(plan_id = %plan.id, invoice_no = %plan.invoice_no, "Installment plan completed");
        } else {
            tx.execute(
                "UPDATE installment_plans SET updated_at = ?1 WHERE id = ?2",
                params![now, plan.id],
            )?;
        }
        Ok(payment_id)
    })?;

    let payment = load_payment(&conn, &payment_id)?;
    info!(
        payment_id = %payment.id,
        plan_id = %payment.plan_id,
        amount = payment.amount,
        balance_after = payment.balance_after,
        "Installment payment recorded"
    );
    Ok(payment)
}

// ---------------------------------------------------------------------------
// Timeline & overdue
// ---------------------------------------------------------------------------

fn row_status(row: &ScheduleRow, remaining: f64, today: NaiveDate) -> InstallmentStatus {
    if remaining <= CENT_EPSILON {
        return InstallmentStatus::Paid;
    }
    let due = NaiveDate::parse_from_str(&row.due_date, "%Y-%m-%d").unwrap_or(today);
    if due < today {
        InstallmentStatus::Overdue
    } else if row.paid > 0.0 {
        InstallmentStatus::Partial
    } else if due == today {
        InstallmentStatus::Due
    } else {
        InstallmentStatus::Upcoming
    }
}

pub(crate) fn build_timeline(conn: &Connection, plan_id: &str, today: NaiveDate) -> PosResult<PaymentTimeline> {
    let plan = load_plan(conn, plan_id)?;
    let summary = query_plans(
        conn,
        &PlanFilter {
            customer_id: Some(plan.customer_id.clone()),
            ..PlanFilter::default()
        },
    )?
    .into_iter()
    .find(|p| p.id == plan.id)
    .ok_or_else(|| PosError::not_found("Installment plan", plan_id))?;

    let mut rows = Vec::with_capacity(plan.schedule.len());
    let mut overdue_amount = 0.0;
    let mut overdue_count = 0;
    let mut next_due = None;
    for row in &plan.schedule {
        let remaining = round_money(row.amount - row.paid).max(0.0);
        let status = if plan.status == "cancelled" && remaining > CENT_EPSILON {
            // Cancelled plans stop accruing arrears.
            InstallmentStatus::Upcoming
        } else {
            row_status(row, remaining, today)
        };
        if status == InstallmentStatus::Overdue {
            overdue_amount += remaining;
            overdue_count += 1;
        }
        if next_due.is_none() && remaining > CENT_EPSILON && plan.status == "active" {
            next_due = Some(NextDue {
                number: row.number,
                due_date: row.due_date.clone(),
                amount: remaining,
            });
        }
        rows.push(TimelineRow {
            number: row.number,
            due_date: row.due_date.clone(),
            amount: row.amount,
            paid: row.paid,
            remaining,
            status,
        });
    }

    Ok(PaymentTimeline {
        totals: TimelineTotals {
            paid: plan.paid,
            remaining: plan.remaining,
            next_due,
            overdue_amount: round_money(overdue_amount),
            overdue_count,
        },
        payments: load_payments(conn, &plan.id)?,
        plan: summary,
        rows,
    })
}

pub fn payment_timeline(db: &DbState, plan_id: &str, today: NaiveDate) -> PosResult<PaymentTimeline> {
    let conn = db.conn.lock()?;
    build_timeline(&conn, plan_id, today)
}

pub(crate) fn query_overdue(conn: &Connection, today: NaiveDate) -> PosResult<Vec<OverdueInstallment>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.invoice_no, p.customer_id, c.name, c.phone, s.number, s.due_date,
                s.amount - s.paid
         FROM installment_schedule s
         JOIN installment_plans p ON p.id = s.plan_id
         JOIN customers c ON c.id = p.customer_id
         WHERE p.status = 'active' AND s.amount - s.paid > 0.004 AND s.due_date < ?1
         ORDER BY s.due_date, p.invoice_no, s.number",
    )?;
    let today_str = today.format("%Y-%m-%d").to_string();
    let rows = stmt.query_map(params![today_str], |row| {
        let due_date: String = row.get(6)?;
        let amount_due: f64 = row.get(7)?;
        Ok((
            OverdueInstallment {
                plan_id: row.get(0)?,
                invoice_no: row.get(1)?,
                customer_id: row.get(2)?,
                customer_name: row.get(3)?,
                customer_phone: row.get(4)?,
                number: row.get(5)?,
                due_date: due_date.clone(),
                amount_due: round_money(amount_due),
                days_overdue: 0,
            },
            due_date,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (mut item, due_date) = match row {
            Ok(r) => r,
            Err(e) => {
                warn!("skipping malformed schedule row: {e}");
                continue;
            }
        };
        if let Ok(due) = NaiveDate::parse_from_str(&due_date, "%Y-%m-%d") {
            item.days_overdue = (today - due).num_days();
        }
        out.push(item);
    }
    Ok(out)
}

pub fn overdue_installments(db: &DbState, today: NaiveDate) -> PosResult<Vec<OverdueInstallment>> {
    let conn = db.conn.lock()?;
    query_overdue(&conn, today)
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// Cancel an active plan that has no payments beyond its advance.
///
/// The plan's sale row is voided and its units go back into stock.
pub fn cancel_plan(
    db: &DbState,
    plan_id: &str,
    reason: &str,
    cancelled_by: Option<&str>,
) -> PosResult<InstallmentPlan> {
    let reason = require_text(reason, "Cancel reason", 300)?;
    let conn = db.conn.lock()?;
    let plan = load_plan(&conn, plan_id)?;
    if plan.status != "active" {
        return Err(PosError::Conflict(format!(
            "Plan {} is {} and cannot be cancelled",
            plan.invoice_no, plan.status
        )));
    }
    let payments: i64 = conn.query_row(
        "SELECT COUNT(*) FROM installment_payments WHERE plan_id = ?1",
        params![plan.id],
        |row| row.get(0),
    )?;
    if payments > 0 {
        return Err(PosError::Conflict(format!(
            "Plan {} already has {payments} payment(s) recorded",
            plan.invoice_no
        )));
    }

    db::with_transaction(&conn, |tx| {
        let now = Utc::now().to_rfc3339();
        sales::restock_items(tx, &plan.items)?;
        if let Some(ref sale_id) = plan.sale_id {
            tx.execute(
                "UPDATE sales SET status = 'voided', voided_at = ?1, voided_by = ?2,
                        void_reason = ?3, updated_at = ?1
                 WHERE id = ?4",
                params![now, cancelled_by, reason, sale_id],
            )?;
        }
        tx.execute(
            "UPDATE installment_plans SET status = 'cancelled', cancelled_at = ?1,
                    cancel_reason = ?2, updated_at = ?1
             WHERE id = ?3",
            params![now, reason, plan.id],
        )?;
        Ok(())
    })?;

    warn!(plan_id = %plan.id, invoice_no = %plan.invoice_no, reason = %reason, "Installment plan cancelled");
    load_plan(&conn, &plan.id)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{self, tests::seed_product};
    use crate::customers::tests::seed_customer;
    use crate::db;
    use crate::guarantors::{create_guarantor, GuarantorInput};
    use crate::sales::tests::local_at;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn input(cash: f64, markup: f64, advance: f64, months: u32) -> PlanInput {
        PlanInput {
            cash_price: cash,
            markup_percent: markup,
            advance,
            months,
            start_date: ymd(2026, 1, 15),
        }
    }

    pub(crate) fn sale_input(customer_id: &str, product_id: &str) -> InstallmentSaleInput {
        InstallmentSaleInput {
            customer_id: customer_id.into(),
            items: vec![SaleItemInput {
                product_id: product_id.into(),
                quantity: 1,
                unit_price: None,
            }],
            markup_percent: Some(20.0),
            advance: 6_000.0,
            months: 3,
            guarantor_ids: Vec::new(),
            start_date: Some("2026-01-15".into()),
            staff_id: None,
            notes: None,
        }
    }

    fn pay(db: &DbState, plan_id: &str, amount: f64, on: &str) -> PosResult<InstallmentPayment> {
        record_installment_payment(
            db,
            PaymentInput {
                plan_id: plan_id.into(),
                amount,
                method: PaymentMethod::Cash,
                paid_on: Some(on.into()),
                staff_id: None,
            },
        )
    }

    /// Customer, a 30,000 product with 5 in stock and a 3-month plan on it.
    pub(crate) fn seed_plan(db: &DbState) -> InstallmentPlan {
        let customer = seed_customer(db, "Kamran Akmal", "03001112233");
        let product = seed_product(db, "LED-55", 30_000.0, 5);
        let conn = db.conn.lock().unwrap();
        create_installment_sale_at(&conn, sale_input(&customer.id, &product.id), local_at(2026, 1, 15))
            .unwrap()
    }

    #[test]
    fn quote_with_markup_and_advance() {
        let q = calculate_plan(&input(50_000.0, 10.0, 10_000.0, 6), 36).unwrap();
        assert_eq!(q.markup_amount, 5_000.0);
        assert_eq!(q.installment_price, 55_000.0);
        assert_eq!(q.financed, 45_000.0);
        assert_eq!(q.monthly_amount, 7_500.0);
        assert_eq!(q.schedule.len(), 6);
        assert_eq!(q.schedule[0].due_date, ymd(2026, 2, 15));
        assert_eq!(q.schedule[5].due_date, ymd(2026, 7, 15));
    }

    #[test]
    fn last_installment_absorbs_rounding() {
        let q = calculate_plan(&input(10_000.0, 0.0, 0.0, 3), 36).unwrap();
        assert_eq!(q.monthly_amount, 3_333.33);
        assert_eq!(q.last_amount, 3_333.34);
        let total: f64 = q.schedule.iter().map(|s| s.amount).sum();
        assert_eq!(round_money(total), q.financed);
    }

    #[test]
    fn due_dates_clamp_to_month_end() {
        let mut i = input(9_000.0, 0.0, 0.0, 3);
        i.start_date = ymd(2026, 1, 31);
        let q = calculate_plan(&i, 36).unwrap();
        let dates: Vec<_> = q.schedule.iter().map(|s| s.due_date).collect();
        assert_eq!(dates, vec![ymd(2026, 2, 28), ymd(2026, 3, 31), ymd(2026, 4, 30)]);
    }

    #[test]
    fn quote_rejects_bad_terms() {
        assert!(calculate_plan(&input(0.0, 0.0, 0.0, 3), 36).is_err());
        assert!(calculate_plan(&input(1_000.0, 101.0, 0.0, 3), 36).is_err());
        assert!(calculate_plan(&input(1_000.0, 0.0, 1_000.0, 3), 36).is_err());
        assert!(calculate_plan(&input(1_000.0, 0.0, 0.0, 0), 36).is_err());
        assert!(calculate_plan(&input(1_000.0, 0.0, 0.0, 37), 36).is_err());
        // 0.05 over 10 months leaves a non-positive last installment.
        assert!(calculate_plan(&input(0.05, 0.0, 0.0, 10), 36).is_err());
    }

    #[test]
    fn create_installment_sale_writes_plan_sale_and_stock() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);

        assert_eq!(plan.invoice_no, "INS-20260115-0001");
        assert_eq!(plan.installment_price, 36_000.0);
        assert_eq!(plan.financed, 30_000.0);
        assert_eq!(plan.schedule.len(), 3);
        assert_eq!(plan.schedule[0].due_date, "2026-02-15");
        assert_eq!(plan.remaining, 30_000.0);
        assert_eq!(plan.items.len(), 1);

        let conn = db.conn.lock().unwrap();
        let sale = sales::load_sale(&conn, plan.sale_id.as_deref().unwrap()).unwrap();
        assert_eq!(sale.kind, "installment");
        assert_eq!(sale.payment_method, "installment");
        assert_eq!(sale.amount_received, 6_000.0);
        assert_eq!(sale.plan_id.as_deref(), Some(plan.id.as_str()));
        assert_eq!(catalog::load_product(&conn, &plan.items[0].product_id).unwrap().stock, 4);
    }

    #[test]
    fn guarantors_are_attached_and_limited() {
        let db = db::test_db_state();
        let customer = seed_customer(&db, "Nadia", "03004445566");
        let product = seed_product(&db, "AC-1T", 90_000.0, 2);
        let mut ids = Vec::new();
        for (name, phone) in [("G1", "03110000001"), ("G2", "03110000002"), ("G3", "03110000003")] {
            ids.push(
                create_guarantor(
                    &db,
                    GuarantorInput {
                        name: name.into(),
                        phone: phone.into(),
                        ..GuarantorInput::default()
                    },
                )
                .unwrap()
                .id,
            );
        }

        let mut too_many = sale_input(&customer.id, &product.id);
        too_many.guarantor_ids = ids.clone();
        assert!(create_installment_sale(&db, too_many).is_err());

        let mut ok = sale_input(&customer.id, &product.id);
        ok.guarantor_ids = vec![ids[0].clone(), ids[1].clone(), ids[0].clone()];
        let plan = create_installment_sale(&db, ok).unwrap();
        assert_eq!(plan.guarantors.len(), 2);

        assert!(matches!(
            crate::guarantors::delete_guarantor(&db, &ids[0]),
            Err(PosError::Conflict(_))
        ));
    }

    #[test]
    fn missing_customer_rolls_back() {
        let db = db::test_db_state();
        let product = seed_product(&db, "MW-20", 25_000.0, 3);
        let err = create_installment_sale(&db, sale_input("nobody", &product.id)).unwrap_err();
        assert!(matches!(err, PosError::NotFound { .. }));
        assert_eq!(catalog::get_product(&db, &product.id).unwrap().stock, 3);
    }

    #[test]
    fn payments_allocate_fifo_and_complete_the_plan() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);

        let first = pay(&db, &plan.id, 15_000.0, "2026-02-20").unwrap();
        assert_eq!(
            first.allocation,
            vec![
                AllocationEntry {
                    number: 1,
                    amount: 10_000.0
                },
                AllocationEntry {
                    number: 2,
                    amount: 5_000.0
                },
            ]
        );
        assert_eq!(first.balance_after, 15_000.0);

        let err = pay(&db, &plan.id, 15_000.01, "2026-03-01").unwrap_err();
        assert!(err.to_string().contains("exceeds remaining balance"));
        assert!(pay(&db, &plan.id, 0.0, "2026-03-01").is_err());

        let last = pay(&db, &plan.id, 15_000.0, "2026-03-01").unwrap();
        assert_eq!(last.balance_after, 0.0);
        let done = get_plan(&db, &plan.id).unwrap();
        assert_eq!(done.status, "completed");
        assert!(done.schedule.iter().all(|r| r.paid_at.is_some()));
    }

    #[test]
    fn timeline_marks_overdue_partial_and_upcoming() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);
        pay(&db, &plan.id, 15_000.0, "2026-02-20").unwrap();

        let t = payment_timeline(&db, &plan.id, ymd(2026, 3, 20)).unwrap();
        let statuses: Vec<_> = t.rows.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                InstallmentStatus::Paid,
                InstallmentStatus::Overdue,
                InstallmentStatus::Upcoming
            ]
        );
        assert_eq!(t.totals.overdue_amount, 5_000.0);
        assert_eq!(t.totals.remaining, 15_000.0);
        let next = t.totals.next_due.unwrap();
        assert_eq!(next.number, 2);
        assert_eq!(next.amount, 5_000.0);
        assert_eq!(t.payments.len(), 1);

        let early = payment_timeline(&db, &plan.id, ymd(2026, 3, 1)).unwrap();
        assert_eq!(early.rows[1].status, InstallmentStatus::Partial);

        let on_day = payment_timeline(&db, &plan.id, ymd(2026, 4, 15)).unwrap();
        assert_eq!(on_day.rows[2].status, InstallmentStatus::Due);
    }

    #[test]
    fn overdue_report_lists_arrears_with_days() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);
        pay(&db, &plan.id, 15_000.0, "2026-02-20").unwrap();

        let overdue = overdue_installments(&db, ymd(2026, 3, 20)).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].number, 2);
        assert_eq!(overdue[0].amount_due, 5_000.0);
        assert_eq!(overdue[0].days_overdue, 5);
        assert_eq!(overdue[0].customer_phone, "03001112233");
    }

    #[test]
    fn cancel_restores_stock_and_blocks_payments() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);
        let product_id = plan.items[0].product_id.clone();

        let cancelled = cancel_plan(&db, &plan.id, "Customer backed out", Some("admin")).unwrap();
        assert_eq!(cancelled.status, "cancelled");
        assert_eq!(catalog::get_product(&db, &product_id).unwrap().stock, 5);
        let sale = sales::get_sale(&db, plan.sale_id.as_deref().unwrap()).unwrap();
        assert_eq!(sale.status, "voided");

        assert!(matches!(
            pay(&db, &plan.id, 1_000.0, "2026-02-01"),
            Err(PosError::Conflict(_))
        ));
        assert!(matches!(
            cancel_plan(&db, &plan.id, "again", None),
            Err(PosError::Conflict(_))
        ));
    }

    #[test]
    fn cancel_refused_after_payments() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);
        pay(&db, &plan.id, 1_000.0, "2026-02-01").unwrap();
        assert!(matches!(
            cancel_plan(&db, &plan.id, "changed mind", None),
            Err(PosError::Conflict(_))
        ));
    }

    #[test]
    fn list_and_customer_history_reflect_balances() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);
        pay(&db, &plan.id, 4_000.0, "2026-02-10").unwrap();

        let active = list_plans(
            &db,
            &PlanFilter {
                status: Some("active".into()),
                ..PlanFilter::default()
            },
        )
        .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].remaining, 26_000.0);
        assert_eq!(active[0].next_due_date.as_deref(), Some("2026-02-15"));

        let by_name = list_plans(
            &db,
            &PlanFilter {
                query: Some("kamran".into()),
                ..PlanFilter::default()
            },
        )
        .unwrap();
        assert_eq!(by_name.len(), 1);

        let history = crate::customers::customer_history(&db, &plan.customer_id).unwrap();
        assert_eq!(history.plans.len(), 1);
        assert_eq!(history.sales.len(), 1);
        assert_eq!(history.outstanding_balance, 26_000.0);
    }

    #[test]
    fn payment_payload_defaults_to_cash() {
        let input: PaymentInput = serde_json::from_value(serde_json::json!({
            "plan_id": "p1",
            "amount": 2500
        }))
        .unwrap();
        assert_eq!(input.method, PaymentMethod::Cash);
        assert!(input.paid_on.is_none());
    }
}
