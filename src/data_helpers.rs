use reqwest::Url;
use rusqlite::Connection;

use crate::error::{PosError, PosResult};
use crate::{db, ALLOWED_FORM_HOSTS, ALLOWED_FORM_HOST_SUFFIXES, EXTERNAL_URL_MAX_LEN};

/// Key/value category standing in for the browser's local storage.
const LOCAL_CATEGORY: &str = "local";

pub(crate) fn read_local_json(conn: &Connection, key: &str) -> serde_json::Value {
    db::get_setting(conn, LOCAL_CATEGORY, key)
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
        .unwrap_or(serde_json::Value::Null)
}

pub(crate) fn read_local_json_array(conn: &Connection, key: &str) -> Vec<serde_json::Value> {
    read_local_json(conn, key)
        .as_array()
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn write_local_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> PosResult<()> {
    db::set_setting(conn, LOCAL_CATEGORY, key, &value.to_string())
}

pub(crate) fn delete_local_json(conn: &Connection, key: &str) -> PosResult<()> {
    db::delete_setting(conn, LOCAL_CATEGORY, key)
}

pub(crate) fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
}

/// Round to cents, half away from zero.
pub(crate) fn round_money(value: f64) -> f64 {
    let scaled = value * 100.0;
    // Nudge past binary representation error (10.005 * 100 = 1000.4999...).
    (scaled + scaled.signum() * 1e-7).round() / 100.0
}

/// Trimmed, non-empty optional string.
pub(crate) fn clean_opt(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn require_text(value: &str, label: &str, max_len: usize) -> PosResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PosError::validation(format!("{label} is required")));
    }
    if trimmed.chars().count() > max_len {
        return Err(PosError::validation(format!(
            "{label} must be at most {max_len} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Loose email shape check: one `@`, non-empty local part, dotted domain.
pub(crate) fn is_plausible_email(value: &str) -> bool {
    let mut parts = value.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !value.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

pub(crate) fn validate_external_url(url_raw: &str) -> PosResult<Url> {
    let trimmed = url_raw.trim();
    if trimmed.is_empty() {
        return Err(PosError::validation("External URL cannot be empty"));
    }
    if trimmed.len() > EXTERNAL_URL_MAX_LEN {
        return Err(PosError::validation("External URL is too long"));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| PosError::validation(format!("Invalid external URL: {e}")))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "https" && scheme != "http" {
        return Err(PosError::validation("Only http/https URLs are allowed"));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(PosError::validation("Credentialed URLs are not allowed"));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| PosError::validation("External URL is missing a host"))?
        .to_ascii_lowercase();
    let localhost = matches!(host.as_str(), "localhost" | "127.0.0.1");

    if scheme == "http" && !localhost {
        return Err(PosError::validation(
            "Plain http is only allowed for localhost",
        ));
    }

    if !localhost {
        let exact_allowed = ALLOWED_FORM_HOSTS.iter().any(|h| host == *h);
        let suffix_allowed = ALLOWED_FORM_HOST_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix));
        if !exact_allowed && !suffix_allowed {
            return Err(PosError::validation(format!(
                "External host is not allowlisted: {host}"
            )));
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_json_round_trips_and_tolerates_garbage() {
        let db = db::test_db_state();
        let conn = db.conn.lock().unwrap();

        assert!(read_local_json(&conn, "cart:missing").is_null());
        write_local_json(&conn, "cart:a", &serde_json::json!([{ "qty": 1 }])).unwrap();
        assert_eq!(read_local_json_array(&conn, "cart:a").len(), 1);

        db::set_setting(&conn, "local", "broken", "{not json").unwrap();
        assert!(read_local_json(&conn, "broken").is_null());
        assert!(read_local_json_array(&conn, "broken").is_empty());

        delete_local_json(&conn, "cart:a").unwrap();
        assert!(read_local_json(&conn, "cart:a").is_null());
    }

    #[test]
    fn money_rounding() {
        assert_eq!(round_money(10.005), 10.01);
        assert_eq!(round_money(3333.3333), 3333.33);
        assert_eq!(round_money(-2.345), -2.35);
    }

    #[test]
    fn phone_and_email_helpers() {
        assert_eq!(normalize_phone("+92 (300) 123-4567"), "923001234567");
        assert!(is_plausible_email("ali@example.pk"));
        assert!(!is_plausible_email("ali@example"));
        assert!(!is_plausible_email("a@b@c.com"));
        assert!(!is_plausible_email("ali @example.com"));
        assert!(!is_plausible_email("@example.com"));
    }

    #[test]
    fn external_url_allowlist() {
        assert!(validate_external_url("https://formspree.io/f/abc123").is_ok());
        assert!(validate_external_url("https://eu.formspree.io/f/abc").is_ok());
        assert!(validate_external_url("http://127.0.0.1:8080/submit").is_ok());
        assert!(validate_external_url("http://formspree.io/f/abc").is_err());
        assert!(validate_external_url("https://evil.example.com/f").is_err());
        assert!(validate_external_url("https://user:pw@formspree.io/f").is_err());
        assert!(validate_external_url("ftp://formspree.io/f").is_err());
        assert!(validate_external_url("   ").is_err());
    }

    #[test]
    fn require_text_trims_and_limits() {
        assert_eq!(require_text("  Haier  ", "Name", 10).unwrap(), "Haier");
        assert!(require_text("   ", "Name", 10).is_err());
        assert!(require_text("abcdefghijk", "Name", 10).is_err());
    }
}
