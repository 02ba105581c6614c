//! PIN-based local authentication with bcrypt.
//!
//! Two roles share one terminal: `admin` opens the Admin Portal and
//! `operator` opens the User Portal. PIN hashes live in `local_settings`
//! (category "staff", keys "admin_pin_hash" / "operator_pin_hash"). Sessions
//! are kept in memory; the lockout counter is persisted so restarting the app
//! does not reset it.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::db;
use crate::error::{PosError, PosResult};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const SESSION_INACTIVITY_MINUTES: i64 = 30;
const SESSION_MAX_DURATION_HOURS: i64 = 8;
const MIN_PIN_DIGITS: usize = 4;
const STAFF_CATEGORY: &str = "staff";
const ADMIN_PIN_KEY: &str = "admin_pin_hash";
const OPERATOR_PIN_KEY: &str = "operator_pin_hash";
const LOCKOUT_ATTEMPTS_KEY: &str = "lockout_attempts";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "lockout_last_attempt";

#[cfg(not(test))]
const PIN_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PIN_HASH_COST: u32 = 4;

/// Permissions granted to counter operators.
const OPERATOR_PERMISSIONS: &[&str] = &[
    "create_sale",
    "create_installment_sale",
    "record_payment",
    "manage_customers",
    "manage_guarantors",
    "view_inventory",
    "print_receipts",
];

/// Extra permissions only administrators hold.
const ADMIN_ONLY_PERMISSIONS: &[&str] = &[
    "manage_products",
    "manage_suppliers",
    "void_sales",
    "cancel_plans",
    "view_reports",
    "manage_settings",
    "export_data",
    "reset_data",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
        }
    }

    fn pin_key(&self) -> &'static str {
        match self {
            Self::Admin => ADMIN_PIN_KEY,
            Self::Operator => OPERATOR_PIN_KEY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Portal {
    AdminPortal,
    UserPortal,
}

pub fn portal_for_role(role: Role) -> Portal {
    match role {
        Role::Admin => Portal::AdminPortal,
        Role::Operator => Portal::UserPortal,
    }
}

pub fn permissions_for(role: Role) -> Vec<String> {
    let mut perms: Vec<String> = OPERATOR_PERMISSIONS.iter().map(|s| s.to_string()).collect();
    if role == Role::Admin {
        perms.extend(ADMIN_ONLY_PERMISSIONS.iter().map(|s| s.to_string()));
    }
    perms
}

/// An active portal session.
#[derive(Debug, Clone)]
pub struct StaffSession {
    pub session_id: String,
    pub staff_id: String,
    pub role: Role,
    pub permissions: Vec<String>,
    login_time: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StaffSession {
    /// Expired by inactivity or by maximum duration.
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
            || now - self.last_activity > Duration::minutes(SESSION_INACTIVITY_MINUTES)
    }

    /// JSON shape the portal frontend expects.
    fn to_user_json(&self) -> Value {
        serde_json::json!({
            "staffId": self.staff_id,
            "staffName": if self.role == Role::Admin { "Administrator" } else { "Operator" },
            "role": {
                "name": self.role.as_str(),
                "permissions": self.permissions,
            },
            "portal": portal_for_role(self.role),
            "sessionId": self.session_id,
            "expiresAt": self.expires_at.to_rfc3339(),
        })
    }
}

struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

/// Tauri managed state for authentication.
pub struct AuthState {
    sessions: Mutex<HashMap<String, StaffSession>>,
    current_session_id: Mutex<Option<String>>,
    lockout: Mutex<LockoutEntry>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            current_session_id: Mutex::new(None),
            lockout: Mutex::new(LockoutEntry {
                attempts: 0,
                last_attempt: Utc::now(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the PIN from arg0, either `"1234"` or `{"pin":"1234"}`.
pub fn extract_pin(arg: &Value) -> Option<Zeroizing<String>> {
    if let Some(s) = arg.as_str() {
        return Some(Zeroizing::new(s.to_string()));
    }
    arg.get("pin")
        .and_then(Value::as_str)
        .map(|p| Zeroizing::new(p.to_string()))
}

fn validate_pin(pin: &str, label: &str) -> PosResult<()> {
    if pin.len() < MIN_PIN_DIGITS {
        return Err(PosError::validation(format!(
            "{label} must be at least {MIN_PIN_DIGITS} digits"
        )));
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(PosError::validation(format!(
            "{label} must contain only digits"
        )));
    }
    Ok(())
}

fn check_lockout(lockout: &LockoutEntry) -> PosResult<()> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = Utc::now() - lockout.last_attempt;
        if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
            let remaining = LOCKOUT_MINUTES - elapsed.num_minutes();
            return Err(PosError::Unauthorized(format!(
                "Too many failed attempts. Try again in {remaining} minute(s)."
            )));
        }
    }
    Ok(())
}

fn record_failure(lockout: &mut LockoutEntry) {
    lockout.attempts += 1;
    lockout.last_attempt = Utc::now();
    warn!(attempts = lockout.attempts, "failed login attempt");
}

fn reset_lockout(lockout: &mut LockoutEntry) {
    lockout.attempts = 0;
    lockout.last_attempt = Utc::now();
}

fn load_lockout_from_db(conn: &rusqlite::Connection) -> LockoutEntry {
    let attempts = db::get_setting(conn, STAFF_CATEGORY, LOCKOUT_ATTEMPTS_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = db::get_setting(conn, STAFF_CATEGORY, LOCKOUT_LAST_ATTEMPT_KEY)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    LockoutEntry {
        attempts,
        last_attempt,
    }
}

fn persist_lockout_to_db(conn: &rusqlite::Connection, lockout: &LockoutEntry) -> PosResult<()> {
    db::set_setting(
        conn,
        STAFF_CATEGORY,
        LOCKOUT_ATTEMPTS_KEY,
        &lockout.attempts.to_string(),
    )?;
    db::set_setting(
        conn,
        STAFF_CATEGORY,
        LOCKOUT_LAST_ATTEMPT_KEY,
        &lockout.last_attempt.to_rfc3339(),
    )
}

fn create_session(auth: &AuthState, role: Role) -> PosResult<Value> {
    let now = Utc::now();
    let session = StaffSession {
        session_id: Uuid::new_v4().to_string(),
        staff_id: format!("{}-user", role.as_str()),
        role,
        permissions: permissions_for(role),
        login_time: now,
        last_activity: now,
        expires_at: now + Duration::hours(SESSION_MAX_DURATION_HOURS),
    };
    let user_json = session.to_user_json();
    let sid = session.session_id.clone();

    auth.sessions.lock()?.insert(sid.clone(), session);
    *auth.current_session_id.lock()? = Some(sid);

    Ok(serde_json::json!({
        "success": true,
        "user": user_json,
    }))
}

/// The current session, dropping it if it has expired.
pub fn current_session(auth: &AuthState) -> PosResult<Option<StaffSession>> {
    let mut current = auth.current_session_id.lock()?;
    let Some(sid) = current.clone() else {
        return Ok(None);
    };
    let mut sessions = auth.sessions.lock()?;
    match sessions.get(&sid) {
        Some(s) if !s.is_expired_at(Utc::now()) => Ok(Some(s.clone())),
        _ => {
            sessions.remove(&sid);
            *current = None;
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Public operations
// ---------------------------------------------------------------------------

/// Verify a PIN against the admin hash, then the operator hash.
pub fn login(pin: Zeroizing<String>, db: &db::DbState, auth: &AuthState) -> PosResult<Value> {
    if pin.trim().is_empty() {
        return Err(PosError::validation("PIN is required"));
    }

    let conn = db.conn.lock()?;
    {
        let mut lockout = auth.lockout.lock()?;
        *lockout = load_lockout_from_db(&conn);
        check_lockout(&lockout)?;
    }

    for role in [Role::Admin, Role::Operator] {
        let Some(hash) = db::get_setting(&conn, STAFF_CATEGORY, role.pin_key()) else {
            continue;
        };
        if bcrypt::verify(pin.as_str(), &hash).unwrap_or(false) {
            let mut lockout = auth.lockout.lock()?;
            reset_lockout(&mut lockout);
            persist_lockout_to_db(&conn, &lockout)?;
            info!(role = role.as_str(), "login successful");
            return create_session(auth, role);
        }
    }

    let mut lockout = auth.lockout.lock()?;
    record_failure(&mut lockout);
    persist_lockout_to_db(&conn, &lockout)?;
    Err(PosError::Unauthorized("Invalid PIN".into()))
}

pub fn logout(auth: &AuthState) -> PosResult<()> {
    let mut current = auth.current_session_id.lock()?;
    if let Some(sid) = current.take() {
        auth.sessions.lock()?.remove(&sid);
        info!(session_id = %sid, "session logged out");
    }
    Ok(())
}

/// The current user JSON, or null.
pub fn get_session_json(auth: &AuthState) -> PosResult<Value> {
    Ok(current_session(auth)?
        .map(|s| s.to_user_json())
        .unwrap_or(Value::Null))
}

pub fn validate_session(auth: &AuthState) -> PosResult<Value> {
    Ok(match current_session(auth)? {
        Some(s) => serde_json::json!({ "valid": true, "portal": portal_for_role(s.role) }),
        None => serde_json::json!({ "valid": false, "reason": "Session expired or not found" }),
    })
}

pub fn has_permission(auth: &AuthState, permission: &str) -> bool {
    matches!(
        current_session(auth),
        Ok(Some(s)) if s.permissions.iter().any(|p| p == permission)
    )
}

/// Gate an operation on the current session, refreshing its activity timer.
pub fn require_permission(auth: &AuthState, permission: &str) -> PosResult<StaffSession> {
    let session = current_session(auth)?
        .ok_or_else(|| PosError::Unauthorized("Please sign in first".into()))?;
    if !session.permissions.iter().any(|p| p == permission) {
        warn!(role = session.role.as_str(), permission, "permission denied");
        return Err(PosError::Unauthorized(format!(
            "The {} role cannot {}",
            session.role.as_str(),
            permission.replace('_', " ")
        )));
    }
    track_activity(auth)?;
    Ok(session)
}

pub fn get_session_stats(auth: &AuthState) -> PosResult<Value> {
    Ok(match current_session(auth)? {
        Some(s) => serde_json::json!({
            "sessionId": s.session_id,
            "role": s.role.as_str(),
            "portal": portal_for_role(s.role),
            "loginTime": s.login_time.to_rfc3339(),
            "lastActivity": s.last_activity.to_rfc3339(),
            "expiresAt": s.expires_at.to_rfc3339(),
        }),
        None => serde_json::json!({}),
    })
}

/// Hash and store new PINs. Buffers are wiped when the `Zeroizing` wrappers drop.
pub fn setup_pin(
    db: &db::DbState,
    admin_pin: Option<Zeroizing<String>>,
    operator_pin: Option<Zeroizing<String>>,
) -> PosResult<()> {
    if admin_pin.is_none() && operator_pin.is_none() {
        return Err(PosError::validation(
            "At least one PIN (adminPin or operatorPin) is required",
        ));
    }
    if let (Some(a), Some(o)) = (&admin_pin, &operator_pin) {
        if a.as_str() == o.as_str() {
            return Err(PosError::validation(
                "Admin and operator PINs must be different",
            ));
        }
    }

    let mut hashes = Vec::new();
    for (role, pin, label) in [
        (Role::Admin, admin_pin.as_ref(), "Admin PIN"),
        (Role::Operator, operator_pin.as_ref(), "Operator PIN"),
    ] {
        let Some(pin) = pin else { continue };
        validate_pin(pin, label)?;
        let hash = bcrypt::hash(pin.as_str(), PIN_HASH_COST)
            .map_err(|e| PosError::validation(format!("Failed to hash {label}: {e}")))?;
        hashes.push((role, hash));
    }

    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| {
        for (role, hash) in &hashes {
            db::set_setting(tx, STAFF_CATEGORY, role.pin_key(), hash)?;
        }
        Ok(())
    })?;
    for (role, _) in &hashes {
        info!(role = role.as_str(), "PIN set");
    }
    Ok(())
}

/// Which portals have a PIN configured (first-run setup check).
pub fn pin_status(db: &db::DbState) -> PosResult<Value> {
    let conn = db.conn.lock()?;
    Ok(serde_json::json!({
        "adminConfigured": db::get_setting(&conn, STAFF_CATEGORY, ADMIN_PIN_KEY).is_some(),
        "operatorConfigured": db::get_setting(&conn, STAFF_CATEGORY, OPERATOR_PIN_KEY).is_some(),
    }))
}

/// Refresh the inactivity timer.
pub fn track_activity(auth: &AuthState) -> PosResult<()> {
    let current_id = auth.current_session_id.lock()?.clone();
    if let Some(sid) = current_id {
        if let Some(session) = auth.sessions.lock()?.get_mut(&sid) {
            session.last_activity = Utc::now();
        }
    }
    Ok(())
}
