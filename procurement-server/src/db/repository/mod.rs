//! Repository Module
//!
//! Free functions over a SQLite connection. Callers pass `&mut *tx` inside a
//! transaction or a pooled connection for standalone reads; the transaction is
//! the unit of work.

pub mod order;
pub mod order_item;
pub mod price_history;
pub mod purchase;

use thiserror::Error;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// SQLITE_BUSY / SQLITE_LOCKED, including extended codes
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl RepoError {
    pub fn is_busy(&self) -> bool {
        matches!(self, RepoError::Busy(_))
    }
}

/// Primary result code of an SQLite error is the low byte of the extended code
fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6))
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return RepoError::Duplicate(db_err.message().to_string());
                }
                if is_busy_code(db_err.code().as_deref()) {
                    return RepoError::Busy(db_err.message().to_string());
                }
                RepoError::Database(err.to_string())
            }
            sqlx::Error::RowNotFound => RepoError::NotFound(err.to_string()),
            _ => RepoError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        RepoError::Serialization(err.to_string())
    }
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;
