use thiserror::Error;

/// Why a session failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    #[error("log sequence is empty")]
    EmptyLogs,

    #[error("first log at {first} does not match start date {start}")]
    StartMismatch { start: i64, first: i64 },

    #[error("log {index} at {timestamp} precedes the previous log at {previous}")]
    OutOfOrder {
        index: usize,
        timestamp: i64,
        previous: i64,
    },

    #[error("end date {end} precedes the last log at {last}")]
    EndsBeforeLastLog { end: i64, last: i64 },

    #[error("interval from {from} to {to} is out of range")]
    SpanOverflow { from: i64, to: i64 },

    #[error("active flag {is_active} disagrees with end date {end:?}")]
    ActiveFlagMismatch { is_active: bool, end: Option<i64> },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid session {id}: {reason}")]
    InvalidSession { id: String, reason: InvalidReason },

    #[error("Concurrent active sessions detected: {}", ids.join(", "))]
    ConcurrentActiveSessionConflict { ids: Vec<String> },
}

impl SessionError {
    pub fn invalid(id: impl Into<String>, reason: InvalidReason) -> Self {
        Self::InvalidSession {
            id: id.into(),
            reason,
        }
    }
}
