//! Dashboard figures and reports (Admin Portal).
//!
//! Voided sales never count. Dates are the store's local calendar days as
//! stored in `sales.sale_date` and `installment_payments.paid_on`.

use std::collections::HashMap;

use chrono::{Datelike, Duration, Months, NaiveDate};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::StoreSettings;
use crate::data_helpers::round_money;
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::installments;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesTally {
    pub count: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub date: String,
    pub today_sales: SalesTally,
    pub month_sales: SalesTally,
    pub collections_today: f64,
    pub product_count: i64,
    pub customer_count: i64,
    pub low_stock_count: i64,
    pub active_plans: i64,
    pub outstanding_balance: f64,
    pub overdue_count: usize,
    pub overdue_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: String,
    pub sale_count: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub product_id: String,
    pub product_name: String,
    pub sku: String,
    pub quantity: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyRevenue {
    pub month: String,
    pub sale_count: i64,
    pub revenue: f64,
    pub cost: f64,
    pub gross_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub month: String,
    pub expected: f64,
    pub collected: f64,
    pub collection_rate: f64,
    pub overdue_amount: f64,
}

fn ymd(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn month_end(date: NaiveDate) -> NaiveDate {
    month_start(date)
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .unwrap_or(date)
}

fn tally(conn: &Connection, from: NaiveDate, to: NaiveDate) -> PosResult<SalesTally> {
    let (count, revenue): (i64, f64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(total), 0) FROM sales
         WHERE status = 'completed' AND sale_date BETWEEN ?1 AND ?2",
        params![ymd(from), ymd(to)],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(SalesTally {
        count,
        revenue: round_money(revenue),
    })
}

fn count(conn: &Connection, sql: &str) -> PosResult<i64> {
    Ok(conn.query_row(sql, [], |row| row.get(0))?)
}

pub fn dashboard_summary(db: &DbState, today: NaiveDate) -> PosResult<DashboardSummary> {
    let conn = db.conn.lock()?;
    let settings = StoreSettings::load(&conn);

    let today_sales = tally(&conn, today, today)?;
    let month_sales = tally(&conn, month_start(today), today)?;

    // Money in the drawer: sale takings net of change (advances for
    // installment sales) plus installment collections.
    let takings: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_received - change_given), 0) FROM sales
         WHERE status = 'completed' AND sale_date = ?1",
        params![ymd(today)],
        |row| row.get(0),
    )?;
    let collected: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM installment_payments WHERE paid_on = ?1",
        params![ymd(today)],
        |row| row.get(0),
    )?;

    let low_stock_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM products WHERE is_active = 1 AND stock <= ?1",
        params![settings.low_stock_threshold],
        |row| row.get(0),
    )?;

    let (active_plans, outstanding): (i64, f64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(p.financed - (SELECT COALESCE(SUM(s.paid), 0)
                                           FROM installment_schedule s WHERE s.plan_id = p.id)), 0)
         FROM installment_plans p WHERE p.status = 'active'",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let overdue = installments::query_overdue(&conn, today)?;
    let overdue_amount = round_money(overdue.iter().map(|o| o.amount_due).sum());

    Ok(DashboardSummary {
        date: ymd(today),
        today_sales,
        month_sales,
        collections_today: round_money(takings + collected),
        product_count: count(&conn, "SELECT COUNT(*) FROM products WHERE is_active = 1")?,
        customer_count: count(&conn, "SELECT COUNT(*) FROM customers WHERE deleted_at IS NULL")?,
        low_stock_count,
        active_plans,
        outstanding_balance: round_money(outstanding),
        overdue_count: overdue.len(),
        overdue_amount,
    })
}

/// One point per day, oldest first, ending at `today`.
pub fn sales_trend(db: &DbState, days: u32, today: NaiveDate) -> PosResult<Vec<TrendPoint>> {
    if !(1..=365).contains(&days) {
        return Err(PosError::validation("Trend window must be 1-365 days"));
    }
    let from = today - Duration::days(i64::from(days) - 1);
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT sale_date, COUNT(*), COALESCE(SUM(total), 0) FROM sales
         WHERE status = 'completed' AND sale_date BETWEEN ?1 AND ?2
         GROUP BY sale_date",
    )?;
    let by_day: HashMap<String, (i64, f64)> = stmt
        .query_map(params![ymd(from), ymd(today)], |row| {
            Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(from
        .iter_days()
        .take(days as usize)
        .map(|day| {
            let key = ymd(day);
            let (sale_count, revenue) = by_day.get(&key).copied().unwrap_or((0, 0.0));
            TrendPoint {
                date: key,
                sale_count,
                revenue: round_money(revenue),
            }
        })
        .collect())
}

pub fn top_products(
    db: &DbState,
    from: NaiveDate,
    to: NaiveDate,
    limit: u32,
) -> PosResult<Vec<TopProduct>> {
    if from > to {
        return Err(PosError::validation("Report start date is after the end date"));
    }
    let limit = limit.clamp(1, 100);
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT i.product_id, MAX(i.product_name), MAX(i.sku), SUM(i.quantity), SUM(i.line_total)
         FROM sale_items i JOIN sales s ON s.id = i.sale_id
         WHERE s.status = 'completed' AND s.sale_date BETWEEN ?1 AND ?2
         GROUP BY i.product_id
         ORDER BY SUM(i.quantity) DESC, SUM(i.line_total) DESC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![ymd(from), ymd(to), limit], |row| {
        Ok(TopProduct {
            product_id: row.get(0)?,
            product_name: row.get(1)?,
            sku: row.get(2)?,
            quantity: row.get(3)?,
            revenue: round_money(row.get(4)?),
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Revenue and cost-based gross profit per calendar month, oldest first.
pub fn monthly_revenue(db: &DbState, months: u32, today: NaiveDate) -> PosResult<Vec<MonthlyRevenue>> {
    if !(1..=24).contains(&months) {
        return Err(PosError::validation("Report window must be 1-24 months"));
    }
    let first = month_start(today)
        .checked_sub_months(Months::new(months - 1))
        .ok_or_else(|| PosError::validation("Report window is out of range"))?;

    let conn = db.conn.lock()?;
    let mut revenue_stmt = conn.prepare(
        "SELECT substr(sale_date, 1, 7) AS m, COUNT(*), COALESCE(SUM(total), 0)
         FROM sales
         WHERE status = 'completed' AND sale_date BETWEEN ?1 AND ?2
         GROUP BY m",
    )?;
    let revenue: HashMap<String, (i64, f64)> = revenue_stmt
        .query_map(params![ymd(first), ymd(month_end(today))], |row| {
            Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut cost_stmt = conn.prepare(
        "SELECT substr(s.sale_date, 1, 7) AS m, COALESCE(SUM(i.quantity * i.cost_price), 0)
         FROM sale_items i JOIN sales s ON s.id = i.sale_id
         WHERE s.status = 'completed' AND s.sale_date BETWEEN ?1 AND ?2
         GROUP BY m",
    )?;
    let cost: HashMap<String, f64> = cost_stmt
        .query_map(params![ymd(first), ymd(month_end(today))], |row| {
            Ok((row.get::<_, String>(0)?, row.get(1)?))
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut out = Vec::with_capacity(months as usize);
    for k in 0..months {
        let Some(month) = first.checked_add_months(Months::new(k)) else {
            break;
        };
        let key = format!("{:04}-{:02}", month.year(), month.month());
        let (sale_count, rev) = revenue.get(&key).copied().unwrap_or((0, 0.0));
        let cost = cost.get(&key).copied().unwrap_or(0.0);
        out.push(MonthlyRevenue {
            month: key,
            sale_count,
            revenue: round_money(rev),
            cost: round_money(cost),
            gross_profit: round_money(rev - cost),
        });
    }
    Ok(out)
}

/// Expected vs collected installments for the month containing `today`.
pub fn installment_collection_summary(db: &DbState, today: NaiveDate) -> PosResult<CollectionSummary> {
    let from = month_start(today);
    let to = month_end(today);
    let conn = db.conn.lock()?;

    let expected: f64 = conn.query_row(
        "SELECT COALESCE(SUM(s.amount), 0)
         FROM installment_schedule s JOIN installment_plans p ON p.id = s.plan_id
         WHERE p.status != 'cancelled' AND s.due_date BETWEEN ?1 AND ?2",
        params![ymd(from), ymd(to)],
        |row| row.get(0),
    )?;
    let collected: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM installment_payments WHERE paid_on BETWEEN ?1 AND ?2",
        params![ymd(from), ymd(to)],
        |row| row.get(0),
    )?;
    let overdue = installments::query_overdue(&conn, today)?;

    let collection_rate = if expected > 0.0 {
        (collected / expected * 1000.0).round() / 10.0
    } else {
        0.0
    };
    Ok(CollectionSummary {
        month: format!("{:04}-{:02}", from.year(), from.month()),
        expected: round_money(expected),
        collected: round_money(collected),
        collection_rate,
        overdue_amount: round_money(overdue.iter().map(|o| o.amount_due).sum()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::seed_product;
    use crate::db;
    use crate::installments::{record_installment_payment, tests::seed_plan, PaymentInput};
    use crate::sales::{self, tests::cash_input, tests::local_at, PaymentMethod};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn dashboard_excludes_voided_and_counts_collections() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);
        let p = seed_product(&db, "IRON-2", 4_000.0, 10);
        let (keep, void) = {
            let conn = db.conn.lock().unwrap();
            let keep = sales::create_cash_sale_at(&conn, cash_input(&p.id, 1, 5_000.0), local_at(2026, 1, 15))
                .unwrap();
            let void = sales::create_cash_sale_at(&conn, cash_input(&p.id, 2, 8_000.0), local_at(2026, 1, 15))
                .unwrap();
            (keep, void)
        };
        sales::void_sale(&db, &void.id, "mistake", None).unwrap();
        record_installment_payment(
            &db,
            PaymentInput {
                plan_id: plan.id.clone(),
                amount: 2_500.0,
                method: PaymentMethod::Cash,
                paid_on: Some("2026-01-15".into()),
                staff_id: None,
            },
        )
        .unwrap();

        let s = dashboard_summary(&db, d(2026, 1, 15)).unwrap();
        // Installment sale (36,000) plus the kept cash sale (4,000).
        assert_eq!(s.today_sales, SalesTally { count: 2, revenue: 40_000.0 });
        assert_eq!(keep.total, 4_000.0);
        // Cash sale 4,000 + advance 6,000 + collection 2,500.
        assert_eq!(s.collections_today, 12_500.0);
        assert_eq!(s.active_plans, 1);
        assert_eq!(s.outstanding_balance, 27_500.0);
        assert_eq!(s.product_count, 2);
        assert_eq!(s.customer_count, 1);
        assert_eq!(s.low_stock_count, 1);
        assert_eq!(s.overdue_count, 0);

        let later = dashboard_summary(&db, d(2026, 2, 20)).unwrap();
        assert_eq!(later.today_sales.count, 0);
        assert_eq!(later.overdue_count, 1);
        assert_eq!(later.overdue_amount, 7_500.0);
    }

    #[test]
    fn trend_is_zero_filled() {
        let db = db::test_db_state();
        let p = seed_product(&db, "LAMP", 1_000.0, 10);
        {
            let conn = db.conn.lock().unwrap();
            sales::create_cash_sale_at(&conn, cash_input(&p.id, 1, 1_000.0), local_at(2026, 4, 8)).unwrap();
            sales::create_cash_sale_at(&conn, cash_input(&p.id, 2, 2_000.0), local_at(2026, 4, 10)).unwrap();
        }
        let trend = sales_trend(&db, 7, d(2026, 4, 10)).unwrap();
        assert_eq!(trend.len(), 7);
        assert_eq!(trend[0].date, "2026-04-04");
        assert_eq!(trend[4].revenue, 1_000.0);
        assert_eq!(trend[5].sale_count, 0);
        assert_eq!(trend[6].revenue, 2_000.0);
        assert!(sales_trend(&db, 0, d(2026, 4, 10)).is_err());
        assert!(sales_trend(&db, 366, d(2026, 4, 10)).is_err());
    }

    #[test]
    fn top_products_rank_by_quantity() {
        let db = db::test_db_state();
        let a = seed_product(&db, "A1", 100.0, 50);
        let b = seed_product(&db, "B1", 900.0, 50);
        {
            let conn = db.conn.lock().unwrap();
            sales::create_cash_sale_at(&conn, cash_input(&a.id, 5, 500.0), local_at(2026, 4, 1)).unwrap();
            sales::create_cash_sale_at(&conn, cash_input(&b.id, 2, 1_800.0), local_at(2026, 4, 2)).unwrap();
            sales::create_cash_sale_at(&conn, cash_input(&b.id, 9, 8_100.0), local_at(2026, 5, 2)).unwrap();
        }
        let top = top_products(&db, d(2026, 4, 1), d(2026, 4, 30), 10).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].sku, "A1");
        assert_eq!(top[0].quantity, 5);
        assert_eq!(top[1].revenue, 1_800.0);
        assert!(top_products(&db, d(2026, 5, 1), d(2026, 4, 1), 10).is_err());
    }

    #[test]
    fn monthly_revenue_reports_gross_profit() {
        let db = db::test_db_state();
        let p = seed_product(&db, "OVEN", 10_000.0, 10);
        {
            let conn = db.conn.lock().unwrap();
            sales::create_cash_sale_at(&conn, cash_input(&p.id, 1, 10_000.0), local_at(2026, 2, 10)).unwrap();
            sales::create_cash_sale_at(&conn, cash_input(&p.id, 2, 20_000.0), local_at(2026, 4, 3)).unwrap();
        }
        let months = monthly_revenue(&db, 3, d(2026, 4, 15)).unwrap();
        let keys: Vec<_> = months.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(keys, vec!["2026-02", "2026-03", "2026-04"]);
        assert_eq!(months[0].gross_profit, 2_000.0);
        assert_eq!(months[1].revenue, 0.0);
        assert_eq!(months[2].revenue, 20_000.0);
        assert_eq!(months[2].cost, 16_000.0);
    }

    #[test]
    fn collection_summary_for_month() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);
        record_installment_payment(
            &db,
            PaymentInput {
                plan_id: plan.id.clone(),
                amount: 5_000.0,
                method: PaymentMethod::BankTransfer,
                paid_on: Some("2026-02-10".into()),
                staff_id: None,
            },
        )
        .unwrap();
        let s = installment_collection_summary(&db, d(2026, 2, 20)).unwrap();
        assert_eq!(s.month, "2026-02");
        assert_eq!(s.expected, 10_000.0);
        assert_eq!(s.collected, 5_000.0);
        assert_eq!(s.collection_rate, 50.0);
        assert_eq!(s.overdue_amount, 5_000.0);
    }
}
