use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{CoreError, CoreResult};

/// Kinds of mutation guarded against double submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    StartNewCylinder,
    ChangeLevel,
    CloseSession,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::StartNewCylinder => write!(f, "start_new_cylinder"),
            Operation::ChangeLevel => write!(f, "change_level"),
            Operation::CloseSession => write!(f, "close_session"),
        }
    }
}

/// Admits one in-flight mutation per `(operation, key)` at a time.
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<(Operation, String)>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `(operation, key)` or fail with [`CoreError::Busy`]. The claim
    /// is released when the guard drops.
    pub fn try_acquire(&self, operation: Operation, key: &str) -> CoreResult<InFlightGuard<'_>> {
        let entry = (operation, key.to_string());
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(entry.clone()) {
            return Err(CoreError::Busy {
                operation,
                key: key.to_string(),
            });
        }
        Ok(InFlightGuard { latch: self, entry })
    }

    pub fn is_busy(&self, operation: Operation, key: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(operation, key.to_string()))
    }
}

#[derive(Debug)]
pub struct InFlightGuard<'a> {
    latch: &'a InFlight,
    entry: (Operation, String),
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.latch
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.entry);
    }
}
