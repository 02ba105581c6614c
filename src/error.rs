//! Error type shared by the domain modules.
//!
//! IPC handlers flatten these into strings at the command boundary, so the
//! `Display` text is what the frontend shows to the operator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PosError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient stock for {product}: requested {requested}, available {available}")]
    InsufficientStock {
        product: String,
        requested: i64,
        available: i64,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("form submission failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl PosError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for PosError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}

impl From<PosError> for String {
    fn from(err: PosError) -> Self {
        err.to_string()
    }
}

pub type PosResult<T> = Result<T, PosError>;

/// Map `QueryReturnedNoRows` to a typed `NotFound`.
pub(crate) fn not_found_or<'a>(
    entity: &'static str,
    id: &'a str,
) -> impl FnOnce(rusqlite::Error) -> PosError + 'a {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => PosError::not_found(entity, id),
        other => PosError::Database(other),
    }
}
