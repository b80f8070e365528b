use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InvalidReason, SessionError};

/// Consumption intensity. Level `k` costs `k` units per hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HeatLevel {
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
}

impl HeatLevel {
    /// Units consumed per hour at this level.
    pub fn weight(self) -> f64 {
        self as u8 as f64
    }
}

impl From<HeatLevel> for u8 {
    fn from(level: HeatLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for HeatLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HeatLevel::Level1),
            2 => Ok(HeatLevel::Level2),
            3 => Ok(HeatLevel::Level3),
            _ => Err(format!("Unknown heat level: {}", value)),
        }
    }
}

impl std::fmt::Display for HeatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", *self as u8)
    }
}

impl std::str::FromStr for HeatLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches(['l', 'L']);
        let value: u8 = digits
            .parse()
            .map_err(|_| format!("Unknown heat level: {}", s))?;
        HeatLevel::try_from(value)
    }
}

/// A switch to `level` at `timestamp` (epoch millis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLog {
    pub timestamp: i64,
    pub level: HeatLevel,
}

impl UsageLog {
    pub fn new(timestamp: i64, level: HeatLevel) -> Self {
        Self { timestamp, level }
    }
}

/// One cylinder's usage period, from install to closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CylinderSession {
    pub id: String,
    pub start_date: i64,
    pub end_date: Option<i64>,
    pub logs: Vec<UsageLog>,
    pub is_active: bool,
}

impl CylinderSession {
    pub fn last_log(&self) -> Option<&UsageLog> {
        self.logs.last()
    }

    /// Level of the most recent log entry.
    pub fn current_level(&self) -> Option<HeatLevel> {
        self.last_log().map(|log| log.level)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.start_date).single()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.end_date
            .and_then(|end| Utc.timestamp_millis_opt(end).single())
    }

    /// Check the per-session invariants.
    ///
    /// Cross-session invariants (a single active session) are checked by
    /// [`crate::view::partition`].
    pub fn validate(&self) -> Result<(), SessionError> {
        let invalid = |reason: InvalidReason| -> Result<(), SessionError> {
            Err(SessionError::invalid(&self.id, reason))
        };

        let Some(first) = self.logs.first() else {
            return invalid(InvalidReason::EmptyLogs);
        };

        if first.timestamp != self.start_date {
            return invalid(InvalidReason::StartMismatch {
                start: self.start_date,
                first: first.timestamp,
            });
        }

        if self.is_active != self.end_date.is_none() {
            return invalid(InvalidReason::ActiveFlagMismatch {
                is_active: self.is_active,
                end: self.end_date,
            });
        }

        check_log_order(&self.id, &self.logs)?;

        if let (Some(end), Some(last)) = (self.end_date, self.logs.last()) {
            if end < last.timestamp {
                return invalid(InvalidReason::EndsBeforeLastLog {
                    end,
                    last: last.timestamp,
                });
            }
        }

        Ok(())
    }
}

/// Fails if any log precedes the one before it.
pub(crate) fn check_log_order(id: &str, logs: &[UsageLog]) -> Result<(), SessionError> {
    for (index, pair) in logs.windows(2).enumerate() {
        if pair[1].timestamp < pair[0].timestamp {
            return Err(SessionError::invalid(
                id,
                InvalidReason::OutOfOrder {
                    index: index + 1,
                    timestamp: pair[1].timestamp,
                    previous: pair[0].timestamp,
                },
            ));
        }
    }
    Ok(())
}

/// A session that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDraft {
    pub start_date: i64,
    pub end_date: Option<i64>,
    pub logs: Vec<UsageLog>,
    pub is_active: bool,
}

impl SessionDraft {
    /// A fresh active session seeded with a single level 1 log at `now`.
    pub fn starting_at(now: i64) -> Self {
        Self {
            start_date: now,
            end_date: None,
            logs: vec![UsageLog::new(now, HeatLevel::Level1)],
            is_active: true,
        }
    }

    pub fn into_session(self, id: impl Into<String>) -> CylinderSession {
        CylinderSession {
            id: id.into(),
            start_date: self.start_date,
            end_date: self.end_date,
            logs: self.logs,
            is_active: self.is_active,
        }
    }
}

/// Partial update of a stored session. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<UsageLog>>,
}

impl SessionPatch {
    /// Marks the session closed at `now`.
    pub fn close(now: i64) -> Self {
        Self {
            end_date: Some(Some(now)),
            is_active: Some(false),
            logs: None,
        }
    }

    /// Replaces the full log sequence (last write wins).
    pub fn logs(logs: Vec<UsageLog>) -> Self {
        Self {
            logs: Some(logs),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end_date.is_none() && self.is_active.is_none() && self.logs.is_none()
    }

    pub fn apply(&self, session: &mut CylinderSession) {
        if let Some(end_date) = self.end_date {
            session.end_date = end_date;
        }
        if let Some(is_active) = self.is_active {
            session.is_active = is_active;
        }
        if let Some(ref logs) = self.logs {
            session.logs = logs.clone();
        }
    }
}
