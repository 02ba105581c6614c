use chrono::{Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A string id passed either bare (`"abc"`) or inside an object under one of `keys`.
pub(crate) fn payload_arg0_as_string(arg0: Option<&Value>, keys: &[&str]) -> Option<String> {
    match arg0 {
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Some(payload @ Value::Object(_)) => crate::value_str(payload, keys),
        _ => None,
    }
}

/// Merge a legacy `(arg0, arg1)` pair into one object payload.
///
/// A bare string `arg0` lands under `id_key` so `("cart-1", {"qty": 2})`
/// reads the same as `{"cartId": "cart-1", "qty": 2}`.
pub(crate) fn parse_channel_payload(arg0: Option<Value>, arg1: Option<Value>, id_key: &str) -> Value {
    let mut merged = match arg0 {
        Some(Value::Object(obj)) => obj,
        Some(Value::String(s)) => {
            let mut obj = serde_json::Map::new();
            obj.insert(id_key.to_string(), Value::String(s));
            obj
        }
        _ => serde_json::Map::new(),
    };
    match arg1 {
        Some(Value::Object(obj1)) => {
            for (k, v) in obj1 {
                merged.insert(k, v);
            }
        }
        Some(other) if !other.is_null() => {
            merged.entry("value".to_string()).or_insert(other);
        }
        _ => {}
    }
    Value::Object(merged)
}

pub(crate) fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, String> {
    let payload = if payload.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(|e| format!("Invalid payload: {e}"))
}

/// The nested `{"updates": {...}}` object when present, else the payload itself.
pub(crate) fn payload_body(payload: &Value, keys: &[&str]) -> Value {
    keys.iter()
        .find_map(|key| payload.get(*key).filter(|v| v.is_object()))
        .unwrap_or(payload)
        .clone()
}

pub(crate) fn require_id(payload: Option<&Value>, keys: &[&str], label: &str) -> Result<String, String> {
    payload_arg0_as_string(payload, keys).ok_or_else(|| format!("Missing {label}"))
}

/// Optional `YYYY-MM-DD` under one of `keys`, defaulting to today (local time).
pub(crate) fn payload_date_or_today(payload: Option<&Value>, keys: &[&str]) -> Result<NaiveDate, String> {
    let raw = payload.and_then(|p| crate::value_str(p, keys));
    match raw {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map_err(|_| format!("Invalid date '{s}', expected YYYY-MM-DD")),
        None => Ok(Local::now().date_naive()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arg0_string_accepts_bare_and_object_forms() {
        let bare = json!("  p-1 ");
        let obj = json!({ "product_id": "p-2" });
        let keys = ["productId", "product_id", "id"];
        assert_eq!(payload_arg0_as_string(Some(&bare), &keys).as_deref(), Some("p-1"));
        assert_eq!(payload_arg0_as_string(Some(&obj), &keys).as_deref(), Some("p-2"));
        assert_eq!(payload_arg0_as_string(Some(&json!("")), &keys), None);
        assert_eq!(payload_arg0_as_string(Some(&json!(42)), &keys), None);
        assert_eq!(payload_arg0_as_string(None, &keys), None);
    }

    #[test]
    fn channel_payload_merges_legacy_tuple() {
        let merged = parse_channel_payload(Some(json!("cart-1")), Some(json!({ "qty": 2 })), "cartId");
        assert_eq!(merged, json!({ "cartId": "cart-1", "qty": 2 }));

        let merged = parse_channel_payload(
            Some(json!({ "cartId": "a", "qty": 1 })),
            Some(json!({ "qty": 3 })),
            "cartId",
        );
        assert_eq!(merged["qty"], json!(3));
        assert_eq!(parse_channel_payload(None, None, "id"), json!({}));
    }

    #[test]
    fn parse_payload_treats_null_as_empty_object() {
        #[derive(serde::Deserialize, Default)]
        struct Filter {
            limit: Option<i64>,
        }
        let f: Filter = parse_payload(Value::Null).unwrap();
        assert!(f.limit.is_none());
        let err = parse_payload::<Filter>(json!({ "limit": "ten" })).err().unwrap();
        assert!(err.starts_with("Invalid payload"));
    }

    #[test]
    fn body_prefers_nested_updates() {
        let nested = json!({ "id": "p-1", "updates": { "price": 10 } });
        let flat = json!({ "id": "p-1", "price": 12 });
        assert_eq!(payload_body(&nested, &["updates", "data"]), json!({ "price": 10 }));
        assert_eq!(payload_body(&flat, &["updates", "data"])["price"], json!(12));
    }

    #[test]
    fn date_defaults_to_today_and_rejects_garbage() {
        let explicit = json!({ "today": "2026-03-01" });
        assert_eq!(
            payload_date_or_today(Some(&explicit), &["today", "date"]).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
        );
        assert_eq!(
            payload_date_or_today(None, &["today"]).unwrap(),
            Local::now().date_naive()
        );
        assert!(payload_date_or_today(Some(&json!({ "date": "03/01/2026" })), &["date"]).is_err());
        assert!(require_id(None, &["id"], "product id").is_err());
    }
}
