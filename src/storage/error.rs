use thiserror::Error;

/// Storage failures, classified so the engine can decide whether to retry.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite reported the database busy or locked.
    #[error("database is busy: {0}")]
    Busy(#[source] sqlx::Error),

    #[error("timed out waiting for a database connection")]
    PoolTimeout,

    #[error("duplicate value: {0}")]
    Duplicate(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Unavailable(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::PoolTimedOut) {
            return StoreError::PoolTimeout;
        }
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return StoreError::Duplicate(db_err.message().to_string());
            }
            if is_busy_code(db_err.code().as_deref()) {
                return StoreError::Busy(err);
            }
        }
        StoreError::Unavailable(err)
    }
}

/// SQLite extended result codes carry the primary code in the low byte.
/// 5 is SQLITE_BUSY, 6 is SQLITE_LOCKED.
fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6))
}
