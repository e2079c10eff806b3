//! Crate-wide error taxonomy.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Search expression refers to unsupported message fields.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Client-supplied revision guard did not match the stored folder revision.
    #[error("out of sync: expected revision {expected}, found {actual}")]
    OutOfSync { expected: i64, actual: i64 },

    /// Operation targets a missing folder.
    #[error("no such folder: {0}")]
    NoSuchFolder(String),

    /// Semantic violation, e.g. deleting Unmatched or writing to a virtual folder.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Engine reports unrecoverable file corruption after the one-shot rename/reopen.
    #[error("database storage corrupt: {0}")]
    StorageCorrupt(String),

    /// Exhausted the busy-retry budget (~15s).
    #[error("database storage busy")]
    StorageBusy,

    /// Engine-level out-of-memory at open.
    #[error("insufficient memory opening database")]
    InsufficientMemory,

    /// Catch-all wrapping the engine's message plus its numeric result code.
    #[error("database error ({code}): {message}")]
    Generic { message: String, code: i32 },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err
                    .code()
                    .and_then(|c| c.parse::<i32>().ok())
                    .unwrap_or(-1);
                let message = db_err.message().to_string();
                if message.contains("malformed") || message.contains("not a database") {
                    StoreError::StorageCorrupt(message)
                } else if message.contains("locked") || message.contains("busy") {
                    StoreError::StorageBusy
                } else {
                    StoreError::Generic { message, code }
                }
            }
            sqlx::Error::RowNotFound => StoreError::Generic {
                message: "row not found".to_string(),
                code: 0,
            },
            other => StoreError::Generic {
                message: other.to_string(),
                code: -1,
            },
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Generic {
            message: err.to_string(),
            code: err.raw_os_error().unwrap_or(-1),
        }
    }
}

/// True if `msg` looks like sqlite's "no such table" complaint, used to
/// suppress that specific failure during bulk per-folder operations.
pub fn is_no_such_table(err: &StoreError) -> bool {
    match err {
        StoreError::Generic { message, .. } => message.contains("no such table"),
        _ => false,
    }
}
