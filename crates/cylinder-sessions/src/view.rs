use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::types::CylinderSession;

/// The active session and the closed history, derived from a full collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPartition {
    pub active: Option<CylinderSession>,
    /// Closed sessions, most recent `start_date` first.
    pub history: Vec<CylinderSession>,
}

/// Split an unordered collection into the active session and the history.
///
/// More than one active session is reported, never resolved.
pub fn partition(sessions: &[CylinderSession]) -> Result<SessionPartition, SessionError> {
    let (active, mut history): (Vec<&CylinderSession>, Vec<&CylinderSession>) =
        sessions.iter().partition(|s| s.is_active);

    if active.len() > 1 {
        let mut ids: Vec<String> = active.iter().map(|s| s.id.clone()).collect();
        ids.sort();
        return Err(SessionError::ConcurrentActiveSessionConflict { ids });
    }

    history.sort_by(|a, b| b.start_date.cmp(&a.start_date).then_with(|| a.id.cmp(&b.id)));

    Ok(SessionPartition {
        active: active.first().map(|s| (*s).clone()),
        history: history.into_iter().cloned().collect(),
    })
}
