use std::sync::Arc;

use cylinder_logging::{LogEvent, Logger};
use cylinder_sessions::{
    compute_stats, HeatLevel, InvalidReason, SessionDraft, SessionError, SessionPatch, UsageLog,
};
use cylinder_store::SessionStore;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::inflight::{InFlight, Operation};

/// `start_new_cylinder` is claimed under one key for the whole collection.
const NEW_CYLINDER_KEY: &str = "*";

/// Outcome of [`LifecycleManager::change_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelChange {
    /// A new log entry was persisted
    Applied(UsageLog),
    /// Already at the requested level; nothing was written
    Unchanged,
}

/// Creates, mutates and closes sessions through a [`SessionStore`].
///
/// Mutations are never applied locally: callers see the result through the
/// store's change notifications, so a failed write leaves every derived
/// view as it was.
pub struct LifecycleManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
    logger: Option<Arc<Logger>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            in_flight: InFlight::new(),
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn is_busy(&self, operation: Operation, key: &str) -> bool {
        let key = match operation {
            Operation::StartNewCylinder => NEW_CYLINDER_KEY,
            _ => key,
        };
        self.in_flight.is_busy(operation, key)
    }

    /// Close `previous_active_id` (if given), then create a fresh active
    /// session seeded at level 1 and return its id.
    ///
    /// If the close fails nothing is created. If any session is still active
    /// afterwards the call fails with a conflict instead of adding another.
    pub async fn start_new_cylinder(&self, previous_active_id: Option<&str>) -> CoreResult<String> {
        let _guard = self
            .in_flight
            .try_acquire(Operation::StartNewCylinder, NEW_CYLINDER_KEY)?;

        let result = self.start_new_cylinder_inner(previous_active_id).await;
        self.report_failure(Operation::StartNewCylinder, previous_active_id, &result);
        result
    }

    async fn start_new_cylinder_inner(&self, previous_active_id: Option<&str>) -> CoreResult<String> {
        // Failures are reported once, by the caller, as this operation.
        if let Some(previous) = previous_active_id {
            let _close = self
                .in_flight
                .try_acquire(Operation::CloseSession, previous)?;
            self.close_session_inner(previous).await?;
        }

        let still_active: Vec<String> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .map(|s| s.id)
            .collect();
        if !still_active.is_empty() {
            return Err(SessionError::ConcurrentActiveSessionConflict { ids: still_active }.into());
        }

        let now = self.clock.now_millis();
        let id = self.store.create(SessionDraft::starting_at(now)).await?;

        info!(%id, previous = ?previous_active_id, "started new cylinder");
        self.emit(LogEvent::SessionStarted {
            id: id.clone(),
            closed_previous: previous_active_id.map(String::from),
        });
        Ok(id)
    }

    /// Append a switch to `new_level` after `current_logs` and persist the
    /// whole sequence. Asking for the current level is a no-op.
    pub async fn change_level(
        &self,
        session_id: &str,
        new_level: HeatLevel,
        current_logs: &[UsageLog],
    ) -> CoreResult<LevelChange> {
        let Some(last) = current_logs.last() else {
            return Err(SessionError::invalid(session_id, InvalidReason::EmptyLogs).into());
        };
        if last.level == new_level {
            debug!(session_id, level = %new_level, "level unchanged, nothing to write");
            return Ok(LevelChange::Unchanged);
        }

        let _guard = self
            .in_flight
            .try_acquire(Operation::ChangeLevel, session_id)?;

        let result = self
            .change_level_inner(session_id, new_level, current_logs)
            .await;
        self.report_failure(Operation::ChangeLevel, Some(session_id), &result);
        result
    }

    async fn change_level_inner(
        &self,
        session_id: &str,
        new_level: HeatLevel,
        current_logs: &[UsageLog],
    ) -> CoreResult<LevelChange> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
        if !session.is_active {
            return Err(CoreError::SessionClosed(session_id.to_string()));
        }

        let previous = current_logs[current_logs.len() - 1];
        // Never step back in time, even if the clock did.
        let timestamp = self.clock.now_millis().max(previous.timestamp);
        let log = UsageLog::new(timestamp, new_level);

        let mut logs = current_logs.to_vec();
        logs.push(log);
        let log_count = logs.len();
        self.store
            .update(session_id, SessionPatch::logs(logs))
            .await?;

        info!(session_id, from = %previous.level, to = %new_level, "level changed");
        self.emit(LogEvent::LevelChanged {
            id: session_id.to_string(),
            from: previous.level.into(),
            to: new_level.into(),
            log_count,
        });
        Ok(LevelChange::Applied(log))
    }

    /// Mark the session closed now. Closing a closed session does nothing.
    pub async fn close_session(&self, session_id: &str) -> CoreResult<()> {
        let _guard = self
            .in_flight
            .try_acquire(Operation::CloseSession, session_id)?;

        let result = self.close_session_inner(session_id).await;
        self.report_failure(Operation::CloseSession, Some(session_id), &result);
        result
    }

    async fn close_session_inner(&self, session_id: &str) -> CoreResult<()> {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
        if !session.is_active {
            debug!(session_id, "session already closed");
            return Ok(());
        }

        let now = self.clock.now_millis().max(
            session
                .last_log()
                .map_or(session.start_date, |log| log.timestamp),
        );
        let patch = SessionPatch::close(now);
        self.store.update(session_id, patch.clone()).await?;

        patch.apply(&mut session);
        match compute_stats(&session, now) {
            Ok(stats) => {
                info!(
                    session_id,
                    total_hours = stats.total_hours,
                    total_units = stats.total_units,
                    "session closed"
                );
                self.emit(LogEvent::SessionClosed {
                    id: session_id.to_string(),
                    total_hours: stats.total_hours,
                    total_units: stats.total_units,
                });
            }
            Err(e) => warn!(session_id, error = %e, "closed session has invalid logs"),
        }
        Ok(())
    }

    fn report_failure<T>(&self, operation: Operation, id: Option<&str>, result: &CoreResult<T>) {
        if let Err(e) = result {
            warn!(%operation, id = ?id, error = %e, "mutation failed");
            self.emit(LogEvent::MutationFailed {
                operation: operation.to_string(),
                id: id.map(String::from),
                error: e.to_string(),
            });
        }
    }

    fn emit(&self, event: LogEvent) {
        if let Some(ref logger) = self.logger {
            logger.log(&event);
        }
    }
}
