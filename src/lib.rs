//! ElectroMart POS - storefront, Admin Portal and User Portal backend.
//!
//! The domain modules are plain Rust over SQLite and build headless. With the
//! `desktop` feature the Tauri shell registers the IPC handlers in
//! [`commands`] that the web frontend calls via `invoke()`. Command names are
//! snake_case `<area>_<verb>` (e.g. `sales_create`, `installments_record_payment`).

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod analytics;
pub mod auth;
pub mod backup;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod customers;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod guarantors;
pub mod installments;
pub mod receipts;
pub mod sales;
pub mod storefront;
pub mod suppliers;

#[cfg(feature = "desktop")]
mod commands;
#[cfg_attr(not(feature = "desktop"), allow(dead_code))]
mod core_helpers;
mod data_helpers;

pub use error::{PosError, PosResult};

const EXTERNAL_URL_MAX_LEN: usize = 2048;
/// Form-relay services the storefront contact form may post to.
const ALLOWED_FORM_HOSTS: &[&str] = &[
    "formspree.io",
    "getform.io",
    "formsubmit.co",
    "web3forms.com",
    "api.web3forms.com",
];
const ALLOWED_FORM_HOST_SUFFIXES: &[&str] = &[".formspree.io"];

#[cfg_attr(not(feature = "desktop"), allow(dead_code))]
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

#[cfg_attr(not(feature = "desktop"), allow(dead_code))]
pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}

#[cfg_attr(not(feature = "desktop"), allow(dead_code))]
pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}

/// Console plus daily rolling file logging under `log_dir`.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process. Returns `None` when a subscriber is already installed.
pub fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,electromart_pos_lib=debug"));

    let pruned = diagnostics::prune_old_logs(log_dir);
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("Cannot create log dir {}: {e}", log_dir.display());
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok()?;

    tracing::debug!(pruned, log_dir = %log_dir.display(), "Logging initialised");
    Some(guard)
}

// ============================================================================
// App entry point
// ============================================================================

#[cfg(feature = "desktop")]
pub fn run() -> anyhow::Result<()> {
    use anyhow::Context;
    use tauri::Manager;
    use tracing::info;

    let config = config::AppConfig::from_env();
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let _log_guard = init_logging(&config.log_dir());

    info!("Starting ElectroMart POS v{}", env!("CARGO_PKG_VERSION"));

    let db_state = db::init(&config.data_dir).context("initializing database")?;

    tauri::Builder::default()
        .setup(move |app| {
            app.manage(db_state);
            app.manage(auth::AuthState::new());
            info!(data_dir = %config.data_dir.display(), "Database and auth registered");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Auth
            commands::auth::auth_login,
            commands::auth::auth_logout,
            commands::auth::auth_get_current_session,
            commands::auth::auth_validate_session,
            commands::auth::auth_has_permission,
            commands::auth::auth_get_session_stats,
            commands::auth::auth_setup_pin,
            commands::auth::auth_pin_status,
            commands::auth::auth_track_activity,
            // Settings
            commands::settings::settings_get_store,
            commands::settings::settings_update_store,
            // Products and suppliers
            commands::inventory::products_list,
            commands::inventory::products_get,
            commands::inventory::products_create,
            commands::inventory::products_update,
            commands::inventory::products_delete,
            commands::inventory::products_adjust_stock,
            commands::inventory::products_categories,
            commands::inventory::products_low_stock,
            commands::inventory::suppliers_list,
            commands::inventory::suppliers_get,
            commands::inventory::suppliers_create,
            commands::inventory::suppliers_update,
            commands::inventory::suppliers_delete,
            commands::inventory::suppliers_products,
            // Customers and guarantors
            commands::customers::customers_search,
            commands::customers::customers_get,
            commands::customers::customers_find_by_phone,
            commands::customers::customers_create,
            commands::customers::customers_update,
            commands::customers::customers_delete,
            commands::customers::customers_history,
            commands::customers::guarantors_list,
            commands::customers::guarantors_get,
            commands::customers::guarantors_create,
            commands::customers::guarantors_update,
            commands::customers::guarantors_delete,
            // Cart and cash sales
            commands::sales::cart_get,
            commands::sales::cart_add_item,
            commands::sales::cart_update_quantity,
            commands::sales::cart_remove_item,
            commands::sales::cart_clear,
            commands::sales::cart_checkout,
            commands::sales::sales_create,
            commands::sales::sales_get,
            commands::sales::sales_list,
            commands::sales::sales_void,
            // Installments
            commands::installments::installments_calculate,
            commands::installments::installments_create,
            commands::installments::installments_get,
            commands::installments::installments_list,
            commands::installments::installments_record_payment,
            commands::installments::installments_timeline,
            commands::installments::installments_overdue,
            commands::installments::installments_cancel,
            // Storefront
            commands::storefront::storefront_catalog,
            commands::storefront::storefront_product,
            commands::storefront::storefront_submit_contact,
            // Receipts and reports
            commands::reports::receipts_sale,
            commands::reports::receipts_installment_payment,
            commands::reports::receipts_plan_statement,
            commands::reports::reports_dashboard,
            commands::reports::reports_sales_trend,
            commands::reports::reports_top_products,
            commands::reports::reports_monthly_revenue,
            commands::reports::reports_collections,
            // System
            commands::system::diagnostics_get_about,
            commands::system::diagnostics_get_system_health,
            commands::system::diagnostics_export,
            commands::system::backup_export,
            commands::system::database_reset,
        ])
        .run(tauri::generate_context!())
        .context("error while running ElectroMart POS")
}
