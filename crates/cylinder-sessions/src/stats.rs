//! Time-weighted usage statistics derived from a session's log sequence.

use serde::{Deserialize, Serialize};

use crate::error::{InvalidReason, SessionError};
use crate::types::{check_log_order, CylinderSession, HeatLevel};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Hours spent at each level and the weighted unit total.
///
/// Never persisted: this is a projection of a session at an instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub hours_l1: f64,
    pub hours_l2: f64,
    pub hours_l3: f64,
    pub total_hours: f64,
    pub total_units: f64,
}

impl SessionStats {
    fn from_hours(hours_l1: f64, hours_l2: f64, hours_l3: f64) -> Self {
        Self {
            hours_l1,
            hours_l2,
            hours_l3,
            total_hours: hours_l1 + hours_l2 + hours_l3,
            total_units: hours_l1 * HeatLevel::Level1.weight()
                + hours_l2 * HeatLevel::Level2.weight()
                + hours_l3 * HeatLevel::Level3.weight(),
        }
    }

    pub fn hours_at(&self, level: HeatLevel) -> f64 {
        match level {
            HeatLevel::Level1 => self.hours_l1,
            HeatLevel::Level2 => self.hours_l2,
            HeatLevel::Level3 => self.hours_l3,
        }
    }

    /// Sum stats over several sessions, e.g. for a history total.
    pub fn aggregate<'a>(stats: impl IntoIterator<Item = &'a SessionStats>) -> Self {
        let (l1, l2, l3) = stats.into_iter().fold((0.0, 0.0, 0.0), |acc, s| {
            (acc.0 + s.hours_l1, acc.1 + s.hours_l2, acc.2 + s.hours_l3)
        });
        Self::from_hours(l1, l2, l3)
    }

    /// Render hours as `"{m}m"` or `"{h}h {m}m"`, truncated to whole minutes.
    pub fn format_duration(hours: f64) -> String {
        let total_minutes = (hours * 60.0).floor().max(0.0) as u64;
        let h = total_minutes / 60;
        let m = total_minutes % 60;
        if h == 0 {
            format!("{}m", m)
        } else {
            format!("{}h {}m", h, m)
        }
    }
}

/// Compute usage statistics for `session` evaluated at `now` (epoch millis).
///
/// A closed session ends at its `end_date`; an open one at `now`. Each log
/// lasts until the next log or the end. Backwards intervals between stored
/// timestamps are rejected. The open tail of an active session is clamped at
/// zero when `now` precedes the last log.
pub fn compute_stats(session: &CylinderSession, now: i64) -> Result<SessionStats, SessionError> {
    let logs = &session.logs;
    let Some(last) = logs.last() else {
        return Err(SessionError::invalid(&session.id, InvalidReason::EmptyLogs));
    };

    check_log_order(&session.id, logs)?;

    let end_time = match session.end_date {
        Some(end) if end < last.timestamp => {
            return Err(SessionError::invalid(
                &session.id,
                InvalidReason::EndsBeforeLastLog {
                    end,
                    last: last.timestamp,
                },
            ));
        }
        Some(end) => end,
        None => now.max(last.timestamp),
    };

    let mut hours = [0.0_f64; 3];
    for (i, log) in logs.iter().enumerate() {
        let next = logs.get(i + 1).map_or(end_time, |next| next.timestamp);
        let span = next.checked_sub(log.timestamp).ok_or_else(|| {
            SessionError::invalid(
                &session.id,
                InvalidReason::SpanOverflow {
                    from: log.timestamp,
                    to: next,
                },
            )
        })?;
        let duration_hours = span as f64 / MILLIS_PER_HOUR;
        hours[log.level as usize - 1] += duration_hours;
    }

    Ok(SessionStats::from_hours(hours[0], hours[1], hours[2]))
}
