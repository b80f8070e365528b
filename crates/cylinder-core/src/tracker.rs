use std::sync::Arc;
use std::time::Duration;

use cylinder_logging::{LogEvent, Logger};
use cylinder_sessions::{compute_stats, HeatLevel, SessionError, SessionStats};
use cylinder_store::{BackendMode, FailoverStore, OpenedStore, SessionStore, StoreFactory};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::{LevelChange, LifecycleManager};
use crate::live::live_stats;
use crate::view_model::{ViewCallback, ViewHandle, ViewModel};

/// Everything a presentation layer needs: the lifecycle manager, the live
/// view of the session collection, and handlers that act on the currently
/// displayed active session.
pub struct Tracker {
    manager: Arc<LifecycleManager>,
    view: ViewHandle,
    tick_interval: Duration,
    opened: Option<OpenedStore>,
    mode_task: Option<JoinHandle<()>>,
}

impl Tracker {
    /// Open the configured store and start following it.
    pub async fn open(config: &TrackerConfig, callback: Option<ViewCallback>) -> CoreResult<Self> {
        let opened = StoreFactory::from_config(&config.storage).await?;
        let logger = Arc::new(
            config
                .logging
                .logger()
                .map_err(|e| CoreError::Config(format!("{e:#}")))?,
        );

        let mut tracker = Self::build(
            opened.store.clone(),
            Arc::new(SystemClock),
            Some(logger.clone()),
            callback,
            config,
        );
        tracker.mode_task = opened
            .mode_changes()
            .map(|rx| tokio::spawn(log_mode_changes(rx, logger)));
        tracker.opened = Some(opened);

        info!(store = tracker.manager.store().name(), "tracker ready");
        Ok(tracker)
    }

    /// Follow an already constructed store.
    pub fn with_store(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        logger: Option<Arc<Logger>>,
        callback: Option<ViewCallback>,
    ) -> Self {
        Self::build(store, clock, logger, callback, &TrackerConfig::default())
    }

    fn build(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        logger: Option<Arc<Logger>>,
        callback: Option<ViewCallback>,
        config: &TrackerConfig,
    ) -> Self {
        let mut manager = LifecycleManager::new(store.clone(), clock);
        let mut view = ViewModel::new(store).with_resubscribe_delay(config.view.resubscribe_delay);
        if let Some(logger) = logger {
            manager = manager.with_logger(logger.clone());
            view = view.with_logger(logger);
        }
        if let Some(callback) = callback {
            view = view.with_callback(callback);
        }

        Self {
            manager: Arc::new(manager),
            view: view.spawn(),
            tick_interval: config.view.tick_interval,
            opened: None,
            mode_task: None,
        }
    }

    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    pub fn view(&self) -> &ViewHandle {
        &self.view
    }

    /// The failover wrapper, when one was configured
    pub fn failover(&self) -> Option<&Arc<FailoverStore>> {
        self.opened.as_ref().and_then(|o| o.failover.as_ref())
    }

    /// Close the displayed active session (if any) and start a new one.
    pub async fn start_new_cylinder(&self) -> CoreResult<String> {
        let previous = self.view.state().active.map(|s| s.id);
        self.manager.start_new_cylinder(previous.as_deref()).await
    }

    /// Switch the displayed active session to `level`.
    pub async fn change_level(&self, level: HeatLevel) -> CoreResult<LevelChange> {
        let active = self.view.state().active.ok_or(CoreError::NoActiveSession)?;
        self.manager
            .change_level(&active.id, level, &active.logs)
            .await
    }

    pub async fn close_active(&self) -> CoreResult<()> {
        let active = self.view.state().active.ok_or(CoreError::NoActiveSession)?;
        self.manager.close_session(&active.id).await
    }

    /// Stats of the displayed active session as of now.
    pub fn active_stats(&self) -> Option<Result<SessionStats, SessionError>> {
        let now = self.manager.clock().now_millis();
        self.view
            .state()
            .active
            .map(|session| compute_stats(&session, now))
    }

    /// Summed stats over every closed session in the view.
    pub fn history_stats(&self) -> Result<SessionStats, SessionError> {
        let now = self.manager.clock().now_millis();
        let per_session = self
            .view
            .state()
            .history
            .iter()
            .map(|session| compute_stats(session, now))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SessionStats::aggregate(&per_session))
    }

    /// Ticking stats for the active session as displayed right now.
    pub fn live_active(
        &self,
    ) -> Option<impl Stream<Item = Result<SessionStats, SessionError>>> {
        let session = self.view.state().active?;
        Some(live_stats(
            session,
            self.manager.clock().clone(),
            self.tick_interval,
        ))
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Some(task) = self.mode_task.take() {
            task.abort();
        }
    }
}

async fn log_mode_changes(mut rx: watch::Receiver<BackendMode>, logger: Arc<Logger>) {
    let mut current = *rx.borrow_and_update();
    while rx.changed().await.is_ok() {
        let next = *rx.borrow_and_update();
        if next != current {
            logger.log(&LogEvent::BackendModeChanged {
                from: current.to_string(),
                to: next.to_string(),
            });
            current = next;
        }
    }
}
