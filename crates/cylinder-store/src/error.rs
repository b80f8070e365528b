//! Error types for the persistence layer

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File watcher could not be started
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Session not found: {0}")]
    NotFound(String),

    /// The write would break a storage invariant (e.g. a second active session)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Whether the error says the backend itself is unreachable or broken,
    /// as opposed to rejecting a particular request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::Database(_) | StoreError::Unavailable(_)
        )
    }

    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, ref message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(
                    message
                        .clone()
                        .unwrap_or_else(|| "constraint violation".to_string()),
                )
            }
            other => StoreError::Database(other),
        }
    }
}
