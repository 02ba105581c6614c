//! Public storefront handlers. No session required.

use serde_json::Value;

use super::to_json;
use crate::core_helpers::{parse_payload, require_id};
use crate::db;
use crate::storefront::{self, ContactForm, StorefrontFilter};

#[tauri::command]
pub async fn storefront_catalog(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let filter: StorefrontFilter = match arg0 {
        Some(Value::String(query)) => StorefrontFilter {
            query: Some(query),
            ..StorefrontFilter::default()
        },
        other => parse_payload(other.unwrap_or(Value::Null))?,
    };
    to_json(&storefront::storefront_catalog(&db, &filter)?)
}

#[tauri::command]
pub async fn storefront_product(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = require_id(arg0.as_ref(), &["productId", "product_id", "id"], "product id")?;
    to_json(&storefront::storefront_product(&db, &id)?)
}

#[tauri::command]
pub async fn storefront_submit_contact(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let form: ContactForm = parse_payload(arg0.unwrap_or(Value::Null))?;
    let result = storefront::submit_contact_form(&db, form).await?;
    to_json(&result)
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contact_form_tolerates_missing_optionals() {
        let form: ContactForm = parse_payload(json!({
            "name": "Sana",
            "email": "sana@example.com",
            "message": "Do you deliver to Lahore?"
        }))
        .unwrap();
        assert!(form.phone.is_none());
        assert!(form.subject.is_none());
    }

    #[test]
    fn catalog_filter_reads_featured_alias() {
        let filter: StorefrontFilter = parse_payload(json!({ "featured": true })).unwrap();
        assert!(filter.featured_only);
    }
}
