//! Application and store configuration.
//!
//! `AppConfig` decides where the database and logs live. `StoreSettings` is
//! the operator-editable store profile kept in `local_settings` under the
//! `store` category; every field falls back to its default when missing or
//! malformed.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::data_helpers::{clean_opt, validate_external_url};
use crate::db;
use crate::error::{PosError, PosResult};

pub const DATA_DIR_ENV: &str = "ELECTROMART_DATA_DIR";
pub const APP_IDENTIFIER: &str = "com.electromart.pos";
const STORE_CATEGORY: &str = "store";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Resolve from `ELECTROMART_DATA_DIR`, else the platform data directory.
    pub fn from_env() -> Self {
        let data_dir = std::env::var(DATA_DIR_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| platform_data_base().join(APP_IDENTIFIER));
        Self { data_dir }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

pub(crate) fn platform_data_base() -> PathBuf {
    std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub store_name: String,
    pub store_address: String,
    pub store_phone: String,
    pub currency: String,
    pub invoice_prefix: String,
    pub installment_prefix: String,
    pub low_stock_threshold: i64,
    pub default_markup_percent: f64,
    pub max_installment_months: u32,
    pub form_endpoint: Option<String>,
    pub receipt_footer: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            store_name: "ElectroMart".into(),
            store_address: String::new(),
            store_phone: String::new(),
            currency: "PKR".into(),
            invoice_prefix: "INV".into(),
            installment_prefix: "INS".into(),
            low_stock_threshold: 5,
            default_markup_percent: 0.0,
            max_installment_months: 36,
            form_endpoint: None,
            receipt_footer: "Thank you for shopping with us!".into(),
        }
    }
}

fn valid_prefix(prefix: &str) -> bool {
    (1..=8).contains(&prefix.len())
        && prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

impl StoreSettings {
    pub fn load(conn: &Connection) -> Self {
        let defaults = Self::default();
        let get = |key: &str| db::get_setting(conn, STORE_CATEGORY, key);
        let text = |key: &str, fallback: &str| get(key).unwrap_or_else(|| fallback.to_string());

        Self {
            store_name: get("store_name")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.store_name),
            store_address: text("store_address", &defaults.store_address),
            store_phone: text("store_phone", &defaults.store_phone),
            currency: get("currency")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.currency),
            invoice_prefix: get("invoice_prefix")
                .filter(|v| valid_prefix(v))
                .unwrap_or(defaults.invoice_prefix),
            installment_prefix: get("installment_prefix")
                .filter(|v| valid_prefix(v))
                .unwrap_or(defaults.installment_prefix),
            low_stock_threshold: get("low_stock_threshold")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v >= 0)
                .unwrap_or(defaults.low_stock_threshold),
            default_markup_percent: get("default_markup_percent")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| (0.0..=100.0).contains(v))
                .unwrap_or(defaults.default_markup_percent),
            max_installment_months: get("max_installment_months")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| (1..=120).contains(v))
                .unwrap_or(defaults.max_installment_months),
            form_endpoint: clean_opt(get("form_endpoint")),
            receipt_footer: text("receipt_footer", &defaults.receipt_footer),
        }
    }

    pub fn validate(&self) -> PosResult<()> {
        if self.store_name.trim().is_empty() {
            return Err(PosError::validation("Store name is required"));
        }
        if !valid_prefix(&self.invoice_prefix) || !valid_prefix(&self.installment_prefix) {
            return Err(PosError::validation(
                "Invoice prefixes must be 1-8 uppercase letters or digits",
            ));
        }
        if self.invoice_prefix == self.installment_prefix {
            return Err(PosError::validation(
                "Cash and installment invoice prefixes must differ",
            ));
        }
        if self.low_stock_threshold < 0 {
            return Err(PosError::validation("Low stock threshold cannot be negative"));
        }
        if !(0.0..=100.0).contains(&self.default_markup_percent) {
            return Err(PosError::validation("Markup must be between 0 and 100"));
        }
        if !(1..=120).contains(&self.max_installment_months) {
            return Err(PosError::validation(
                "Maximum installment months must be between 1 and 120",
            ));
        }
        if let Some(endpoint) = self.form_endpoint.as_deref() {
            validate_external_url(endpoint)?;
        }
        Ok(())
    }

    pub fn save(&self, conn: &Connection) -> PosResult<()> {
        self.validate()?;
        db::with_transaction(conn, |tx| {
            let set = |key: &str, value: &str| db::set_setting(tx, STORE_CATEGORY, key, value);
            set("store_name", self.store_name.trim())?;
            set("store_address", self.store_address.trim())?;
            set("store_phone", self.store_phone.trim())?;
            set("currency", self.currency.trim())?;
            set("invoice_prefix", &self.invoice_prefix)?;
            set("installment_prefix", &self.installment_prefix)?;
            set("low_stock_threshold", &self.low_stock_threshold.to_string())?;
            set(
                "default_markup_percent",
                &self.default_markup_percent.to_string(),
            )?;
            set(
                "max_installment_months",
                &self.max_installment_months.to_string(),
            )?;
            match self.form_endpoint.as_deref().map(str::trim) {
                Some(endpoint) if !endpoint.is_empty() => set("form_endpoint", endpoint)?,
                _ => db::delete_setting(tx, STORE_CATEGORY, "form_endpoint")?,
            }
            set("receipt_footer", &self.receipt_footer)?;
            Ok(())
        })?;
        info!(store_name = %self.store_name, "Store settings saved");
        Ok(())
    }

    /// Apply a partial JSON update on top of the current settings.
    pub fn merged_with(&self, updates: &serde_json::Value) -> PosResult<Self> {
        let mut base = serde_json::to_value(self)?;
        if let (Some(target), Some(patch)) = (base.as_object_mut(), updates.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(base)
            .map_err(|e| PosError::validation(format!("Invalid settings payload: {e}")))
    }
}
