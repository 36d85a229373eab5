//! Crate-wide error type

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AltwatchError>;

#[derive(Debug, Error)]
pub enum AltwatchError {
    /// SQLite failure, including busy/locked after retries are exhausted
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Date filter expression that is not a date, range, or include/exclude list
    #[error("Invalid date filter: {0}")]
    InvalidDateFilter(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AltwatchError {
    /// True when SQLite reported lock contention (SQLITE_BUSY / SQLITE_LOCKED)
    pub fn is_lock_contention(&self) -> bool {
        match self {
            AltwatchError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
