//! Public storefront: the customer-facing catalog and the contact form.
//!
//! The catalog only exposes what a shopper may see (no cost prices, no
//! inactive products). Contact-form submissions are relayed to a hosted form
//! service; only allowlisted hosts are accepted.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::{self, Product, ProductFilter};
use crate::config::StoreSettings;
use crate::data_helpers::{clean_opt, is_plausible_email, normalize_phone, require_text, validate_external_url};
use crate::db::DbState;
use crate::error::{PosError, PosResult};

/// Timeout for the form relay.
const FORM_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorefrontProduct {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: f64,
    pub image_url: Option<String>,
    pub is_featured: bool,
    pub in_stock: bool,
}

impl From<Product> for StorefrontProduct {
    fn from(p: Product) -> Self {
        Self {
            in_stock: p.stock > 0,
            id: p.id,
            sku: p.sku,
            name: p.name,
            brand: p.brand,
            category: p.category,
            description: p.description,
            price: p.price,
            image_url: p.image_url,
            is_featured: p.is_featured,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorefrontFilter {
    #[serde(alias = "q", alias = "search")]
    pub query: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "featured_only", alias = "featured")]
    pub featured_only: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: String,
}

/// Payload relayed to the form service.
#[derive(Debug, Clone, Serialize)]
struct ContactSubmission {
    name: String,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
    #[serde(rename = "_subject")]
    subject: String,
    message: String,
    source: String,
    #[serde(rename = "submittedAt")]
    submitted_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactResult {
    pub delivered: bool,
    pub status: u16,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub fn storefront_catalog(db: &DbState, filter: &StorefrontFilter) -> PosResult<Vec<StorefrontProduct>> {
    let conn = db.conn.lock()?;
    let products = catalog::query_products(
        &conn,
        &ProductFilter {
            query: filter.query.clone(),
            category: filter.category.clone(),
            active_only: true,
            featured_only: filter.featured_only,
            ..ProductFilter::default()
        },
    )?;
    Ok(products.into_iter().map(StorefrontProduct::from).collect())
}

pub fn storefront_product(db: &DbState, product_id: &str) -> PosResult<StorefrontProduct> {
    let conn = db.conn.lock()?;
    let product = catalog::load_product(&conn, product_id)?;
    if !product.is_active {
        return Err(PosError::not_found("Product", product_id));
    }
    Ok(product.into())
}

// ---------------------------------------------------------------------------
// Contact form
// ---------------------------------------------------------------------------

fn validate_form(form: ContactForm, store_name: &str) -> PosResult<ContactSubmission> {
    let name = require_text(&form.name, "Name", 100)?;
    let email = form.email.trim().to_string();
    if !is_plausible_email(&email) {
        return Err(PosError::validation("Please enter a valid email address"));
    }
    let phone = match clean_opt(form.phone) {
        Some(raw) => {
            let digits = normalize_phone(&raw);
            if digits.len() < 7 || digits.len() > 15 {
                return Err(PosError::validation("Please enter a valid phone number"));
            }
            Some(raw)
        }
        None => None,
    };
    let message = require_text(&form.message, "Message", 2000)?;
    let subject = clean_opt(form.subject)
        .unwrap_or_else(|| format!("New enquiry from the {store_name} website"));

    Ok(ContactSubmission {
        name,
        email,
        phone,
        subject,
        message,
        source: format!("{store_name} storefront"),
        submitted_at: Utc::now().to_rfc3339(),
    })
}

fn friendly_error(err: reqwest::Error) -> PosError {
    if err.is_connect() {
        return PosError::validation("Cannot reach the contact form service");
    }
    if err.is_timeout() {
        return PosError::validation("The contact form service timed out");
    }
    PosError::Http(err)
}

fn status_error(status: StatusCode, body: &str) -> PosError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();
    let code = status.as_u16();
    let msg = match code {
        422 | 400 => "The form service rejected the submission",
        404 => "Contact form endpoint not found",
        429 => "Too many submissions; please try again later",
        s if s >= 500 => "The contact form service is unavailable",
        _ => "Unexpected response from the contact form service",
    };
    if detail.is_empty() {
        PosError::validation(format!("{msg} (HTTP {code})"))
    } else {
        PosError::validation(format!("{msg} (HTTP {code}): {detail}"))
    }
}

async fn post_submission(endpoint: &str, submission: &ContactSubmission) -> PosResult<ContactResult> {
    let url = validate_external_url(endpoint)?;
    let client = Client::builder().timeout(FORM_TIMEOUT).build()?;
    let resp = client
        .post(url)
        .header("Accept", "application/json")
        .json(submission)
        .send()
        .await
        .map_err(friendly_error)?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Contact form relay rejected");
        return Err(status_error(status, &body));
    }
    Ok(ContactResult {
        delivered: true,
        status: status.as_u16(),
    })
}

/// Validate a storefront enquiry and relay it to the configured form service.
pub async fn submit_contact_form(db: &DbState, form: ContactForm) -> PosResult<ContactResult> {
    let settings = {
        let conn = db.conn.lock()?;
        StoreSettings::load(&conn)
    };
    let endpoint = settings
        .form_endpoint
        .clone()
        .ok_or_else(|| PosError::validation("The contact form is not configured"))?;
    let submission = validate_form(form, &settings.store_name)?;
    let result = post_submission(&endpoint, &submission).await?;
    info!(status = result.status, "Contact form delivered");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{tests::seed_product, ProductUpdate};
    use crate::db;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn form() -> ContactForm {
        ContactForm {
            name: "Hina".into(),
            email: "hina@example.com".into(),
            phone: Some("0300 1234567".into()),
            subject: None,
            message: "Is the 55\" LED available on installments?".into(),
        }
    }

    /// One-shot HTTP responder returning the raw request it received.
    async fn spawn_responder(status_line: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(split) = text.find("\r\n\r\n") {
                    let content_length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());
        });
        (format!("http://127.0.0.1:{}/f/test", addr.port()), rx)
    }

    #[test]
    fn catalog_hides_inactive_products_and_cost() {
        let db = db::test_db_state();
        let tv = seed_product(&db, "TV-1", 50_000.0, 0);
        let fan = seed_product(&db, "FAN-1", 7_000.0, 4);
        catalog::update_product(
            &db,
            &fan.id,
            ProductUpdate {
                is_active: Some(false),
                ..ProductUpdate::default()
            },
        )
        .unwrap();

        let items = storefront_catalog(&db, &StorefrontFilter::default()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, tv.id);
        assert!(!items[0].in_stock);
        let json = serde_json::to_value(&items[0]).unwrap();
        assert!(json.get("costPrice").is_none());

        assert!(storefront_product(&db, &tv.id).is_ok());
        assert!(matches!(
            storefront_product(&db, &fan.id),
            Err(PosError::NotFound { .. })
        ));
    }

    #[test]
    fn form_validation() {
        assert!(validate_form(form(), "ElectroMart").is_ok());
        assert!(validate_form(
            ContactForm {
                email: "nope".into(),
                ..form()
            },
            "ElectroMart"
        )
        .is_err());
        assert!(validate_form(
            ContactForm {
                name: " ".into(),
                ..form()
            },
            "ElectroMart"
        )
        .is_err());
        assert!(validate_form(
            ContactForm {
                message: "x".repeat(2001),
                ..form()
            },
            "ElectroMart"
        )
        .is_err());
        assert!(validate_form(
            ContactForm {
                phone: Some("12".into()),
                ..form()
            },
            "ElectroMart"
        )
        .is_err());
        let s = validate_form(
            ContactForm {
                phone: None,
                ..form()
            },
            "ElectroMart",
        )
        .unwrap();
        assert_eq!(s.subject, "New enquiry from the ElectroMart website");
    }

    #[tokio::test]
    async fn unconfigured_endpoint_is_rejected() {
        let db = db::test_db_state();
        let err = submit_contact_form(&db, form()).await.unwrap_err();
        assert!(matches!(err, PosError::Validation(_)));
    }

    #[tokio::test]
    async fn disallowed_host_is_rejected_before_sending() {
        let submission = validate_form(form(), "ElectroMart").unwrap();
        let err = post_submission("https://evil.example.com/collect", &submission)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not allowlisted"));
    }

    #[tokio::test]
    async fn posts_json_with_accept_header() {
        let (endpoint, request) = spawn_responder("200 OK", r#"{"ok":true}"#).await;
        let submission = validate_form(form(), "ElectroMart").unwrap();
        let result = post_submission(&endpoint, &submission).await.unwrap();
        assert!(result.delivered);
        assert_eq!(result.status, 200);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /f/test"));
        assert!(raw.to_ascii_lowercase().contains("accept: application/json"));
        assert!(raw.contains("\"email\":\"hina@example.com\""));
        assert!(raw.contains("\"_subject\""));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (endpoint, _request) =
            spawn_responder("422 Unprocessable Entity", r#"{"error":"Invalid email"}"#).await;
        let submission = validate_form(form(), "ElectroMart").unwrap();
        let err = post_submission(&endpoint, &submission).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("HTTP 422"));
        assert!(msg.contains("Invalid email"));
    }
}
