//! Active/history view kept current from store notifications.

use std::sync::Arc;
use std::time::Duration;

use cylinder_logging::{LogEvent, Logger};
use cylinder_sessions::{partition, CylinderSession, SessionError};
use cylinder_store::{SessionStore, StoreEvent};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Presentation callback, invoked with every new state.
pub type ViewCallback = Arc<dyn Fn(&ViewState) + Send + Sync>;

/// What the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub active: Option<CylinderSession>,
    /// Closed sessions, most recent first
    pub history: Vec<CylinderSession>,
    /// Set while the store cannot be read; `active`/`history` are then the
    /// last known good values.
    pub degraded: Option<String>,
    /// Ids of simultaneously active sessions in the latest snapshot. The
    /// partition is left at its last good value.
    pub conflict: Option<Vec<String>>,
    /// Count of snapshots received
    pub revision: u64,
}

impl ViewState {
    /// Derive the next state from a store event. Snapshots are partitioned
    /// from scratch; nothing is patched incrementally.
    pub fn reduce(&self, event: &StoreEvent) -> ViewState {
        match event {
            StoreEvent::Snapshot(sessions) => {
                let revision = self.revision + 1;
                match partition(sessions) {
                    Ok(p) => ViewState {
                        active: p.active,
                        history: p.history,
                        degraded: None,
                        conflict: None,
                        revision,
                    },
                    Err(SessionError::ConcurrentActiveSessionConflict { ids }) => ViewState {
                        degraded: None,
                        conflict: Some(ids),
                        revision,
                        ..self.clone()
                    },
                    Err(e) => ViewState {
                        degraded: Some(e.to_string()),
                        revision,
                        ..self.clone()
                    },
                }
            }
            StoreEvent::Degraded { reason } => ViewState {
                degraded: Some(reason.clone()),
                ..self.clone()
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Handle to a running view model. Dropping it unsubscribes.
pub struct ViewHandle {
    rx: watch::Receiver<ViewState>,
    task: JoinHandle<()>,
}

impl ViewHandle {
    /// The current state
    pub fn state(&self) -> ViewState {
        self.rx.borrow().clone()
    }

    /// Wait for the next published state. Returns `None` once the view
    /// model has stopped.
    pub async fn changed(&mut self) -> Option<ViewState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// A receiver that can await state changes independently.
    pub fn watch(&self) -> watch::Receiver<ViewState> {
        self.rx.clone()
    }

    /// Wait until a state satisfying `pred` is published, then return it.
    pub async fn wait_for(&self, pred: impl Fn(&ViewState) -> bool) -> Option<ViewState> {
        let mut rx = self.rx.clone();
        let state = rx.wait_for(|state| pred(state)).await.ok().map(|s| s.clone());
        state
    }

    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct ViewModel {
    store: Arc<dyn SessionStore>,
    logger: Option<Arc<Logger>>,
    callback: Option<ViewCallback>,
    resubscribe_delay: Duration,
}

impl ViewModel {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            logger: None,
            callback: None,
            resubscribe_delay: Duration::from_secs(2),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_callback(mut self, callback: ViewCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Start following the store. Must be called inside a tokio runtime.
    pub fn spawn(self) -> ViewHandle {
        let (tx, rx) = watch::channel(ViewState::default());
        let task = tokio::spawn(self.run(tx));
        ViewHandle { rx, task }
    }

    async fn run(self, tx: watch::Sender<ViewState>) {
        loop {
            match self.store.subscribe().await {
                Ok(mut subscription) => {
                    while let Some(event) = subscription.next().await {
                        self.apply(&tx, &event);
                    }
                    debug!(store = self.store.name(), "subscription ended");
                }
                Err(e) => {
                    error!(store = self.store.name(), error = %e, "subscribe failed");
                    self.apply(
                        &tx,
                        &StoreEvent::Degraded {
                            reason: e.to_string(),
                        },
                    );
                }
            }

            if tx.is_closed() && self.callback.is_none() {
                return;
            }
            tokio::time::sleep(self.resubscribe_delay).await;
        }
    }

    fn apply(&self, tx: &watch::Sender<ViewState>, event: &StoreEvent) {
        let previous = tx.borrow().clone();
        let next = previous.reduce(event);

        if next.conflict.is_some() && next.conflict != previous.conflict {
            let ids = next.conflict.clone().unwrap_or_default();
            error!(ids = ?ids, "multiple active sessions in store");
            self.emit(LogEvent::ConflictDetected { ids });
        }
        if next.degraded.is_some() && next.degraded != previous.degraded {
            let reason = next.degraded.clone().unwrap_or_default();
            warn!(%reason, "view degraded, keeping last known sessions");
            self.emit(LogEvent::StoreDegraded { reason });
        }

        if let Some(ref callback) = self.callback {
            callback(&next);
        }
        tx.send_replace(next);
    }

    fn emit(&self, event: LogEvent) {
        if let Some(ref logger) = self.logger {
            logger.log(&event);
        }
    }
}
