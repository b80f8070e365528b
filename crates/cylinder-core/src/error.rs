use cylinder_sessions::SessionError;
use cylinder_store::StoreError;
use thiserror::Error;

use crate::inflight::Operation;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed session data or a broken single-active invariant
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} is closed")]
    SessionClosed(String),

    #[error("No active session")]
    NoActiveSession,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{operation} already in progress for {key}")]
    Busy { operation: Operation, key: String },
}
