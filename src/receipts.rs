//! HTML receipts and statements for print-to-window rendering.

use chrono::NaiveDate;

use crate::config::StoreSettings;
use crate::db::DbState;
use crate::error::PosResult;
use crate::installments::{self, InstallmentPayment, InstallmentPlan, InstallmentStatus, PaymentTimeline};
use crate::sales::{self, PaymentMethod, Sale};

fn esc(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn money(currency: &str, value: f64) -> String {
    format!("{} {value:.2}", esc(currency))
}

fn line(label: &str, value: &str) -> String {
    format!("<div class=\"line\"><span>{label}</span><span>{value}</span></div>")
}

fn strong_line(label: &str, value: &str) -> String {
    format!("<div class=\"line\"><strong>{label}</strong><strong>{value}</strong></div>")
}

fn html_shell(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width, initial-scale=1.0"/>
<title>{}</title>
<style>
body {{ font-family: ui-monospace, SFMono-Regular, Menlo, monospace; margin: 0; padding: 12px; background: #fff; color: #111; }}
.line {{ display: flex; justify-content: space-between; gap: 8px; font-size: 11px; }}
.line strong {{ font-size: 12px; }}
.section {{ margin-top: 8px; border-top: 1px dashed #111; padding-top: 6px; }}
.section h3 {{ margin: 0 0 4px 0; font-size: 11px; text-transform: uppercase; }}
.note {{ color: #666; font-size: 9px; }}
.center {{ text-align: center; }}
.void {{ text-align: center; font-size: 20px; font-weight: bold; border: 2px solid #b00; color: #b00; margin: 6px 0; }}
table {{ width: 100%; border-collapse: collapse; font-size: 10px; }}
th, td {{ text-align: left; padding: 2px 4px; border-bottom: 1px solid #ddd; }}
td.num, th.num {{ text-align: right; }}
.status-overdue {{ color: #b00; font-weight: bold; }}
.status-paid {{ color: #070; }}
@media print {{ body {{ padding: 0; }} }}
</style>
</head>
<body>{}</body>
</html>"#,
        esc(title),
        body
    )
}

fn store_header(settings: &StoreSettings) -> String {
    let mut out = format!("<div class=\"center\"><strong>{}</strong></div>", esc(&settings.store_name));
    for extra in [&settings.store_address, &settings.store_phone] {
        if !extra.trim().is_empty() {
            out.push_str(&format!("<div class=\"center note\">{}</div>", esc(extra)));
        }
    }
    out
}

fn store_footer(settings: &StoreSettings) -> String {
    if settings.receipt_footer.trim().is_empty() {
        return String::new();
    }
    format!(
        "<div class=\"section center note\">{}</div>",
        esc(&settings.receipt_footer)
    )
}

/// Date part of an RFC 3339 timestamp, or the raw value.
fn display_date(ts: &str) -> &str {
    ts.get(..10).unwrap_or(ts)
}

// ---------------------------------------------------------------------------
// Sale receipt
// ---------------------------------------------------------------------------

pub fn render_sale_receipt(sale: &Sale, settings: &StoreSettings) -> String {
    let cur = &settings.currency;
    let mut body = store_header(settings);
    if sale.status == "voided" {
        body.push_str("<div class=\"void\">VOID</div>");
    }

    body.push_str("<div class=\"section\">");
    body.push_str(&line("Invoice", &esc(&sale.invoice_no)));
    body.push_str(&line("Date", &esc(&sale.sale_date)));
    if let Some(ref name) = sale.customer_name {
        body.push_str(&line("Customer", &esc(name)));
    }
    body.push_str("</div>");

    body.push_str("<div class=\"section\"><h3>Items</h3>");
    for item in &sale.items {
        body.push_str(&line(
            &format!("{}x {}", item.quantity, esc(&item.product_name)),
            &money(cur, item.line_total),
        ));
        if item.quantity > 1 {
            body.push_str(&format!(
                "<div class=\"note\">@ {} ({})</div>",
                money(cur, item.unit_price),
                esc(&item.sku)
            ));
        }
    }
    body.push_str("</div>");

    body.push_str("<div class=\"section\">");
    body.push_str(&line("Subtotal", &money(cur, sale.subtotal)));
    if sale.discount_amount > 0.0 {
        body.push_str(&line("Discount", &format!("-{}", money(cur, sale.discount_amount))));
    }
    body.push_str(&strong_line("Total", &money(cur, sale.total)));
    body.push_str("</div>");

    body.push_str("<div class=\"section\">");
    body.push_str(&line("Payment", PaymentMethod::label(&sale.payment_method)));
    if sale.kind == "installment" {
        body.push_str(&line("Advance received", &money(cur, sale.amount_received)));
        body.push_str(&line(
            "Financed",
            &money(cur, (sale.total - sale.amount_received).max(0.0)),
        ));
    } else {
        body.push_str(&line("Received", &money(cur, sale.amount_received)));
        body.push_str(&line("Change", &money(cur, sale.change_given)));
    }
    body.push_str("</div>");

    if let Some(ref reason) = sale.void_reason {
        body.push_str(&format!(
            "<div class=\"section note\">Voided: {}</div>",
            esc(reason)
        ));
    }
    body.push_str(&store_footer(settings));
    html_shell(&format!("Receipt {}", sale.invoice_no), &body)
}

pub fn sale_receipt(db: &DbState, sale_id: &str) -> PosResult<String> {
    let conn = db.conn.lock()?;
    let sale = sales::load_sale(&conn, sale_id)?;
    let settings = StoreSettings::load(&conn);
    Ok(render_sale_receipt(&sale, &settings))
}

// ---------------------------------------------------------------------------
// Installment payment receipt
// ---------------------------------------------------------------------------

pub fn render_payment_receipt(
    payment: &InstallmentPayment,
    plan: &InstallmentPlan,
    settings: &StoreSettings,
) -> String {
    let cur = &settings.currency;
    let mut body = store_header(settings);
    body.push_str("<div class=\"center\"><strong>Installment payment</strong></div>");

    body.push_str("<div class=\"section\">");
    body.push_str(&line("Plan", &esc(&plan.invoice_no)));
    body.push_str(&line("Customer", &esc(&plan.customer_name)));
    body.push_str(&line("Phone", &esc(&plan.customer_phone)));
    body.push_str(&line("Paid on", &esc(&payment.paid_on)));
    body.push_str(&line("Method", PaymentMethod::label(&payment.method)));
    body.push_str("</div>");

    body.push_str("<div class=\"section\"><h3>Installments covered</h3>");
    for entry in &payment.allocation {
        body.push_str(&line(&format!("#{}", entry.number), &money(cur, entry.amount)));
    }
    body.push_str("</div>");

    body.push_str("<div class=\"section\">");
    body.push_str(&strong_line("Amount paid", &money(cur, payment.amount)));
    body.push_str(&line("Remaining balance", &money(cur, payment.balance_after)));
    if payment.balance_after <= 0.0 {
        body.push_str("<div class=\"center\"><strong>PLAN FULLY PAID</strong></div>");
    }
    body.push_str("</div>");

    body.push_str(&store_footer(settings));
    html_shell(&format!("Payment {}", plan.invoice_no), &body)
}

pub fn installment_payment_receipt(db: &DbState, payment_id: &str) -> PosResult<String> {
    let conn = db.conn.lock()?;
    let payment = installments::load_payment(&conn, payment_id)?;
    let plan = installments::load_plan(&conn, &payment.plan_id)?;
    let settings = StoreSettings::load(&conn);
    Ok(render_payment_receipt(&payment, &plan, &settings))
}

// ---------------------------------------------------------------------------
// Plan statement
// ---------------------------------------------------------------------------

fn status_label(status: InstallmentStatus) -> (&'static str, &'static str) {
    match status {
        InstallmentStatus::Paid => ("Paid", "status-paid"),
        InstallmentStatus::Partial => ("Partial", ""),
        InstallmentStatus::Overdue => ("Overdue", "status-overdue"),
        InstallmentStatus::Due => ("Due today", ""),
        InstallmentStatus::Upcoming => ("Upcoming", ""),
    }
}

pub fn render_plan_statement(
    plan: &InstallmentPlan,
    timeline: &PaymentTimeline,
    today: NaiveDate,
    settings: &StoreSettings,
) -> String {
    let cur = &settings.currency;
    let mut body = store_header(settings);
    body.push_str("<div class=\"center\"><strong>Installment statement</strong></div>");

    body.push_str("<div class=\"section\">");
    body.push_str(&line("Plan", &esc(&plan.invoice_no)));
    body.push_str(&line("Status", &esc(&plan.status)));
    body.push_str(&line("Customer", &esc(&plan.customer_name)));
    body.push_str(&line("Phone", &esc(&plan.customer_phone)));
    for g in &plan.guarantors {
        body.push_str(&line("Guarantor", &format!("{} ({})", esc(&g.name), esc(&g.phone))));
    }
    body.push_str(&line("Statement date", &today.format("%Y-%m-%d").to_string()));
    body.push_str("</div>");

    body.push_str("<div class=\"section\"><h3>Items</h3>");
    for item in &plan.items {
        body.push_str(&line(
            &format!("{}x {}", item.quantity, esc(&item.product_name)),
            &money(cur, item.line_total),
        ));
    }
    body.push_str("</div>");

    body.push_str("<div class=\"section\">");
    body.push_str(&line("Cash price", &money(cur, plan.cash_price)));
    body.push_str(&line(
        &format!("Markup ({}%)", plan.markup_percent),
        &money(cur, plan.markup_amount),
    ));
    body.push_str(&line("Installment price", &money(cur, plan.installment_price)));
    body.push_str(&line("Advance", &money(cur, plan.advance)));
    body.push_str(&strong_line("Financed", &money(cur, plan.financed)));
    body.push_str(&line(
        &format!("{} months", plan.months),
        &format!("{} / month", money(cur, plan.monthly_amount)),
    ));
    body.push_str("</div>");

    body.push_str(
        "<div class=\"section\"><h3>Schedule</h3><table><thead><tr><th>#</th><th>Due</th>\
         <th class=\"num\">Amount</th><th class=\"num\">Paid</th><th class=\"num\">Balance</th>\
         <th>Status</th></tr></thead><tbody>",
    );
    for row in &timeline.rows {
        let (label, class) = status_label(row.status);
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td class=\"num\">{:.2}</td><td class=\"num\">{:.2}</td>\
             <td class=\"num\">{:.2}</td><td class=\"{class}\">{label}</td></tr>",
            row.number,
            esc(&row.due_date),
            row.amount,
            row.paid,
            row.remaining
        ));
    }
    body.push_str("</tbody></table></div>");

    if !timeline.payments.is_empty() {
        body.push_str("<div class=\"section\"><h3>Payments</h3>");
        for p in &timeline.payments {
            body.push_str(&line(
                &format!("{} ({})", esc(&p.paid_on), PaymentMethod::label(&p.method)),
                &money(cur, p.amount),
            ));
        }
        body.push_str("</div>");
    }

    body.push_str("<div class=\"section\">");
    body.push_str(&line("Total paid", &money(cur, timeline.totals.paid)));
    body.push_str(&strong_line("Remaining", &money(cur, timeline.totals.remaining)));
    if timeline.totals.overdue_amount > 0.0 {
        body.push_str(&line(
            "<span class=\"status-overdue\">Overdue</span>",
            &money(cur, timeline.totals.overdue_amount),
        ));
    }
    if let Some(ref next) = timeline.totals.next_due {
        body.push_str(&line(
            "Next due",
            &format!("{} on {}", money(cur, next.amount), esc(&next.due_date)),
        ));
    }
    if let Some(ref reason) = plan.cancel_reason {
        body.push_str(&format!(
            "<div class=\"note\">Cancelled {}: {}</div>",
            esc(display_date(plan.cancelled_at.as_deref().unwrap_or(""))),
            esc(reason)
        ));
    }
    body.push_str("</div>");

    body.push_str(&store_footer(settings));
    html_shell(&format!("Statement {}", plan.invoice_no), &body)
}

pub fn plan_statement(db: &DbState, plan_id: &str, today: NaiveDate) -> PosResult<String> {
    let conn = db.conn.lock()?;
    let plan = installments::load_plan(&conn, plan_id)?;
    let timeline = installments::build_timeline(&conn, &plan.id, today)?;
    let settings = StoreSettings::load(&conn);
    Ok(render_plan_statement(&plan, &timeline, today, &settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::seed_product;
    use crate::customers::{create_customer, CustomerInput};
    use crate::db;
    use crate::installments::tests::seed_plan;
    use crate::installments::PaymentInput;
    use crate::sales::tests::{cash_input, local_at};

    #[test]
    fn escapes_markup() {
        assert_eq!(
            esc("<b>\"Tom\" & 'Jerry'</b>"),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn sale_receipt_shows_totals_and_escapes_customer() {
        let db = db::test_db_state();
        let p = seed_product(&db, "TV-24", 30_000.0, 3);
        let customer = create_customer(
            &db,
            CustomerInput {
                name: "<script>alert(1)</script>".into(),
                phone: "03009998877".into(),
                ..CustomerInput::default()
            },
        )
        .unwrap();
        let sale = {
            let conn = db.conn.lock().unwrap();
            let mut input = cash_input(&p.id, 2, 60_000.0);
            input.customer_id = Some(customer.id.clone());
            sales::create_cash_sale_at(&conn, input, local_at(2026, 5, 2)).unwrap()
        };

        let html = sale_receipt(&db, &sale.id).unwrap();
        assert!(html.contains("INV-20260502-0001"));
        assert!(html.contains("PKR 60000.00"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("Thank you for shopping with us!"));
        assert!(!html.contains("VOID"));

        sales::void_sale(&db, &sale.id, "Duplicate", None).unwrap();
        let voided = sale_receipt(&db, &sale.id).unwrap();
        assert!(voided.contains("VOID"));
        assert!(voided.contains("Voided: Duplicate"));
    }

    #[test]
    fn payment_receipt_lists_covered_installments() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);
        let payment = installments::record_installment_payment(
            &db,
            PaymentInput {
                plan_id: plan.id.clone(),
                amount: 12_000.0,
                method: PaymentMethod::Cash,
                paid_on: Some("2026-02-14".into()),
                staff_id: None,
            },
        )
        .unwrap();

        let html = installment_payment_receipt(&db, &payment.id).unwrap();
        assert!(html.contains(&plan.invoice_no));
        assert!(html.contains("#1"));
        assert!(html.contains("#2"));
        assert!(html.contains("PKR 12000.00"));
        assert!(html.contains("PKR 18000.00"));
    }

    #[test]
    fn statement_includes_schedule_table() {
        let db = db::test_db_state();
        let plan = seed_plan(&db);
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let html = plan_statement(&db, &plan.id, today).unwrap();
        assert_eq!(html.matches("<tr><td>").count(), 3);
        assert!(html.contains("Overdue"));
        assert!(html.contains("Next due"));
        assert!(html.contains("2026-03-01"));
    }
}
