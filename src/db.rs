//! Local SQLite database layer for ElectroMart POS.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, the
//! category/key/value settings store, a transaction helper, and the managed
//! state shared by the IPC commands.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{PosError, PosResult};

/// Managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
pub const CURRENT_SCHEMA_VERSION: i32 = 5;

/// Initialize the database at `{data_dir}/pos.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> PosResult<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("pos.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> PosResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current = schema_version(conn);
    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }
    if current < 4 {
        migrate_v4(conn)?;
    }
    if current < 5 {
        migrate_v5(conn)?;
    }

    Ok(())
}

pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

fn migration_failed(version: i32) -> impl FnOnce(rusqlite::Error) -> PosError {
    move |e| {
        error!("Migration v{version} failed: {e}");
        PosError::Database(e)
    }
}

/// Migration v1: settings store and master data.
fn migrate_v1(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        CREATE TABLE IF NOT EXISTS suppliers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            contact_person TEXT,
            phone TEXT,
            email TEXT,
            address TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_suppliers_name ON suppliers(lower(name));

        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            sku TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            brand TEXT,
            category TEXT,
            description TEXT,
            price REAL NOT NULL,
            cost_price REAL NOT NULL DEFAULT 0,
            stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
            supplier_id TEXT REFERENCES suppliers(id),
            is_active INTEGER NOT NULL DEFAULT 1,
            image_url TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT UNIQUE NOT NULL,
            national_id TEXT,
            address TEXT,
            email TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS guarantors (
            id TEXT PRIMARY KEY,
            customer_id TEXT REFERENCES customers(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            phone TEXT NOT NULL,
            national_id TEXT,
            address TEXT,
            relation TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(migration_failed(1))?;

    info!("Applied migration v1 (settings, suppliers, products, customers, guarantors)");
    Ok(())
}

/// Migration v2: cash sales.
fn migrate_v2(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sales (
            id TEXT PRIMARY KEY,
            invoice_no TEXT UNIQUE NOT NULL,
            kind TEXT NOT NULL DEFAULT 'cash',
            customer_id TEXT REFERENCES customers(id),
            subtotal REAL NOT NULL DEFAULT 0,
            discount_amount REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            payment_method TEXT NOT NULL,
            amount_received REAL NOT NULL DEFAULT 0,
            change_given REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'completed',
            staff_id TEXT,
            notes TEXT,
            plan_id TEXT,
            sale_date TEXT NOT NULL,
            voided_at TEXT,
            voided_by TEXT,
            void_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sale_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sale_id TEXT NOT NULL REFERENCES sales(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL REFERENCES products(id),
            product_name TEXT NOT NULL,
            sku TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            unit_price REAL NOT NULL,
            cost_price REAL NOT NULL DEFAULT 0,
            line_total REAL NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(migration_failed(2))?;

    info!("Applied migration v2 (sales, sale_items)");
    Ok(())
}

/// Migration v3: installment plans, schedules and payments.
fn migrate_v3(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS installment_plans (
            id TEXT PRIMARY KEY,
            invoice_no TEXT UNIQUE NOT NULL,
            sale_id TEXT REFERENCES sales(id),
            customer_id TEXT NOT NULL REFERENCES customers(id),
            cash_price REAL NOT NULL,
            markup_percent REAL NOT NULL DEFAULT 0,
            markup_amount REAL NOT NULL DEFAULT 0,
            installment_price REAL NOT NULL,
            advance REAL NOT NULL DEFAULT 0,
            financed REAL NOT NULL,
            months INTEGER NOT NULL,
            monthly_amount REAL NOT NULL,
            start_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            staff_id TEXT,
            notes TEXT,
            cancelled_at TEXT,
            cancel_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS installment_plan_guarantors (
            plan_id TEXT NOT NULL REFERENCES installment_plans(id) ON DELETE CASCADE,
            guarantor_id TEXT NOT NULL REFERENCES guarantors(id),
            PRIMARY KEY (plan_id, guarantor_id)
        );

        CREATE TABLE IF NOT EXISTS installment_schedule (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id TEXT NOT NULL REFERENCES installment_plans(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            due_date TEXT NOT NULL,
            amount REAL NOT NULL,
            paid REAL NOT NULL DEFAULT 0,
            paid_at TEXT,
            UNIQUE(plan_id, number)
        );

        CREATE TABLE IF NOT EXISTS installment_payments (
            id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL REFERENCES installment_plans(id) ON DELETE CASCADE,
            amount REAL NOT NULL,
            method TEXT NOT NULL,
            paid_on TEXT NOT NULL,
            allocation TEXT NOT NULL DEFAULT '[]',
            balance_after REAL NOT NULL DEFAULT 0,
            staff_id TEXT,
            created_at TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(migration_failed(3))?;

    info!("Applied migration v3 (installment plans)");
    Ok(())
}

/// Check whether a column exists on a table.
fn column_exists(conn: &Connection, table: &str, column: &str) -> PosResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Migration v4: storefront flag and reporting indexes.
fn migrate_v4(conn: &Connection) -> PosResult<()> {
    if !column_exists(conn, "products", "is_featured")? {
        conn.execute_batch(
            "ALTER TABLE products ADD COLUMN is_featured INTEGER NOT NULL DEFAULT 0;",
        )
        .map_err(migration_failed(4))?;
    }

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
        CREATE INDEX IF NOT EXISTS idx_products_supplier ON products(supplier_id);
        CREATE INDEX IF NOT EXISTS idx_sales_sale_date ON sales(sale_date);
        CREATE INDEX IF NOT EXISTS idx_sales_status ON sales(status);
        CREATE INDEX IF NOT EXISTS idx_sales_customer ON sales(customer_id);
        CREATE INDEX IF NOT EXISTS idx_sale_items_sale ON sale_items(sale_id);
        CREATE INDEX IF NOT EXISTS idx_plans_status ON installment_plans(status);
        CREATE INDEX IF NOT EXISTS idx_plans_customer ON installment_plans(customer_id);
        CREATE INDEX IF NOT EXISTS idx_schedule_due ON installment_schedule(due_date);
        CREATE INDEX IF NOT EXISTS idx_payments_plan ON installment_payments(plan_id);
        CREATE INDEX IF NOT EXISTS idx_guarantors_customer ON guarantors(customer_id);

        INSERT INTO schema_version (version) VALUES (4);
        ",
    )
    .map_err(migration_failed(4))?;

    info!("Applied migration v4 (is_featured, reporting indexes)");
    Ok(())
}

/// Migration v5: soft-deleted customers keep their sales history.
fn migrate_v5(conn: &Connection) -> PosResult<()> {
    if !column_exists(conn, "customers", "deleted_at")? {
        conn.execute_batch("ALTER TABLE customers ADD COLUMN deleted_at TEXT;")
            .map_err(migration_failed(5))?;
    }
    conn.execute_batch("INSERT INTO schema_version (version) VALUES (5);")
        .map_err(migration_failed(5))?;

    info!("Applied migration v5 (customers.deleted_at)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Run `f` inside `BEGIN IMMEDIATE`, committing on `Ok` and rolling back on `Err`.
pub fn with_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> PosResult<T>,
) -> PosResult<T> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> PosResult<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Remove a single setting. Missing keys are not an error.
pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> PosResult<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )?;
    Ok(())
}

/// Get all settings grouped by category as JSON.
pub fn get_all_settings(conn: &Connection) -> serde_json::Value {
    let mut stmt = match conn.prepare(
        "SELECT setting_category, setting_key, setting_value FROM local_settings ORDER BY setting_category, setting_key",
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("get_all_settings prepare: {e}");
            return serde_json::json!({});
        }
    };

    let mut result = serde_json::Map::new();

    let rows = match stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    }) {
        Ok(r) => r,
        Err(e) => {
            error!("get_all_settings query: {e}");
            return serde_json::json!({});
        }
    };

    for (cat, key, val) in rows.flatten() {
        let category = result.entry(cat).or_insert_with(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = category {
            // Never hand PIN hashes to the frontend.
            if key.ends_with("_pin_hash") {
                continue;
            }
            map.insert(key, serde_json::Value::String(val));
        }
    }

    serde_json::Value::Object(result)
}

/// Delete all settings in a category.
pub fn delete_all_settings(conn: &Connection, category: &str) -> PosResult<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// In-memory, fully migrated database for module tests.
#[cfg(test)]
pub fn test_db_state() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
