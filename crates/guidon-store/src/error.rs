use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A JSON column could not be (de)serialized.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// The blocking task running a query panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Task(String),

    /// A previous holder of the connection lock panicked.
    #[error("Database lock poisoned")]
    Poisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
