//! Explicit failover between a primary and a local fallback store.
//!
//! ```text
//! Connected --failure--> Degraded --max_failures--> LocalOnly
//!     ^                      |                          |
//!     +-------success--------+                          |
//!     +----------------------reconnect()----------------+
//! ```
//!
//! A primary failure is always returned to the caller; the write is never
//! silently redirected. Only after the switch to `LocalOnly` do operations
//! go to the fallback, and that switch is published on
//! [`FailoverStore::mode_changes`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cylinder_sessions::{CylinderSession, SessionDraft, SessionPatch};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::channel::{ChangeNotifier, StoreEvent, Subscription};
use crate::error::StoreResult;
use crate::traits::SessionStore;

/// Which backend serves requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Primary healthy
    Connected,
    /// Primary failing, still tried
    Degraded,
    /// Fallback only, until `reconnect()`
    LocalOnly,
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendMode::Connected => write!(f, "connected"),
            BackendMode::Degraded => write!(f, "degraded"),
            BackendMode::LocalOnly => write!(f, "local-only"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Primary,
    Fallback,
}

impl Role {
    fn serves(self, mode: BackendMode) -> bool {
        match self {
            Role::Primary => mode != BackendMode::LocalOnly,
            Role::Fallback => mode == BackendMode::LocalOnly,
        }
    }
}

struct Inner {
    primary: Arc<dyn SessionStore>,
    fallback: Arc<dyn SessionStore>,
    max_failures: u32,
    failures: Mutex<u32>,
    mode_tx: watch::Sender<BackendMode>,
    notifier: ChangeNotifier,
    resubscribe_delay: Duration,
    /// Cuts a forwarding task's retry wait short
    resubscribe: Notify,
}

/// Pause before a forwarding task subscribes to its backend again.
const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

impl Inner {
    fn mode(&self) -> BackendMode {
        *self.mode_tx.borrow()
    }

    fn set_mode(&self, mode: BackendMode) -> bool {
        let previous = self.mode_tx.send_replace(mode);
        if previous != mode {
            tracing::warn!(from = %previous, to = %mode, "storage backend mode changed");
        }
        previous != mode
    }

    fn reset_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            *failures = 0;
        }
    }

    /// Track a primary outcome. Returns true when the store just switched to
    /// `LocalOnly`.
    fn record<T>(&self, result: &StoreResult<T>) -> bool {
        match result {
            Err(e) if e.is_unavailable() => self.record_failure(e),
            // Any answer at all means the primary is reachable.
            _ => {
                self.record_success();
                false
            }
        }
    }

    fn record_success(&self) {
        self.reset_failures();
        if self.mode() == BackendMode::Degraded && self.set_mode(BackendMode::Connected) {
            self.resubscribe.notify_waiters();
        }
    }

    fn record_failure(&self, error: &dyn std::fmt::Display) -> bool {
        if self.mode() == BackendMode::LocalOnly {
            return false;
        }

        let count = match self.failures.lock() {
            Ok(mut failures) => {
                *failures += 1;
                *failures
            }
            Err(_) => self.max_failures,
        };
        tracing::warn!(failures = count, error = %error, "primary store failure");

        if count >= self.max_failures {
            self.set_mode(BackendMode::LocalOnly)
        } else {
            self.set_mode(BackendMode::Degraded);
            false
        }
    }

    fn selected(&self) -> &Arc<dyn SessionStore> {
        match self.mode() {
            BackendMode::LocalOnly => &self.fallback,
            _ => &self.primary,
        }
    }

    /// Push the selected backend's collection to subscribers.
    async fn resync(&self) {
        match self.selected().list().await {
            Ok(sessions) => self.notifier.publish_snapshot(sessions),
            Err(e) => self.notifier.publish(StoreEvent::Degraded {
                reason: e.to_string(),
            }),
        }
    }

    /// Relay one backend's events for as long as the store lives,
    /// subscribing again whenever the subscription fails or ends.
    async fn forward(self: Arc<Self>, role: Role) {
        let store = match role {
            Role::Primary => self.primary.clone(),
            Role::Fallback => self.fallback.clone(),
        };

        loop {
            match store.subscribe().await {
                Ok(subscription) => {
                    if role == Role::Primary {
                        self.record_success();
                    }
                    self.relay(role, subscription).await;
                    tracing::debug!(store = store.name(), "subscription ended");
                }
                Err(e) => {
                    tracing::error!(store = store.name(), error = %e, "subscription failed");
                    if role == Role::Primary && self.record_failure(&e) {
                        self.resync().await;
                    } else if role.serves(self.mode()) {
                        self.notifier.publish(StoreEvent::Degraded {
                            reason: e.to_string(),
                        });
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
                _ = self.resubscribe.notified() => {}
            }
        }
    }

    async fn relay(&self, role: Role, mut subscription: Subscription) {
        while let Some(event) = subscription.next().await {
            if role == Role::Primary {
                if let StoreEvent::Degraded { ref reason } = event {
                    if self.record_failure(reason) {
                        self.resync().await;
                        continue;
                    }
                }
            }

            if role.serves(self.mode()) {
                self.notifier.publish(event);
            }
        }
    }
}

/// A [`SessionStore`] that fails over from `primary` to `fallback` through
/// explicit, observable states.
pub struct FailoverStore {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl FailoverStore {
    /// Must be called inside a tokio runtime: subscriptions to both
    /// backends are forwarded by background tasks.
    pub fn new(
        primary: Arc<dyn SessionStore>,
        fallback: Arc<dyn SessionStore>,
        max_failures: u32,
    ) -> Self {
        Self::with_resubscribe_delay(primary, fallback, max_failures, DEFAULT_RESUBSCRIBE_DELAY)
    }

    pub fn with_resubscribe_delay(
        primary: Arc<dyn SessionStore>,
        fallback: Arc<dyn SessionStore>,
        max_failures: u32,
        resubscribe_delay: Duration,
    ) -> Self {
        let (mode_tx, _) = watch::channel(BackendMode::Connected);
        let inner = Arc::new(Inner {
            primary,
            fallback,
            max_failures: max_failures.max(1),
            failures: Mutex::new(0),
            mode_tx,
            notifier: ChangeNotifier::new(),
            resubscribe_delay,
            resubscribe: Notify::new(),
        });

        let tasks = vec![
            tokio::spawn(inner.clone().forward(Role::Primary)),
            tokio::spawn(inner.clone().forward(Role::Fallback)),
        ];

        Self { inner, tasks }
    }

    pub fn mode(&self) -> BackendMode {
        self.inner.mode()
    }

    /// Observe mode transitions.
    pub fn mode_changes(&self) -> watch::Receiver<BackendMode> {
        self.inner.mode_tx.subscribe()
    }

    /// Leave `LocalOnly` and try the primary again. Sessions written to the
    /// fallback meanwhile stay there; there is no merge.
    pub async fn reconnect(&self) {
        self.inner.reset_failures();
        if self.inner.set_mode(BackendMode::Connected) {
            self.inner.resubscribe.notify_waiters();
            self.inner.resync().await;
        }
    }

    async fn after_primary<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if self.inner.record(&result) {
            self.inner.resync().await;
        }
        result
    }
}

impl Drop for FailoverStore {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl SessionStore for FailoverStore {
    fn name(&self) -> &str {
        "failover"
    }

    async fn subscribe(&self) -> StoreResult<Subscription> {
        let rx = self.inner.notifier.receiver();
        let current = self.list().await?;
        Ok(Subscription::new(current, rx))
    }

    async fn list(&self) -> StoreResult<Vec<CylinderSession>> {
        if self.mode() == BackendMode::LocalOnly {
            return self.inner.fallback.list().await;
        }
        let result = self.inner.primary.list().await;
        self.after_primary(result).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<CylinderSession>> {
        if self.mode() == BackendMode::LocalOnly {
            return self.inner.fallback.get(id).await;
        }
        let result = self.inner.primary.get(id).await;
        self.after_primary(result).await
    }

    async fn create(&self, draft: SessionDraft) -> StoreResult<String> {
        if self.mode() == BackendMode::LocalOnly {
            return self.inner.fallback.create(draft).await;
        }
        let result = self.inner.primary.create(draft).await;
        self.after_primary(result).await
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> StoreResult<()> {
        if self.mode() == BackendMode::LocalOnly {
            return self.inner.fallback.update(id, patch).await;
        }
        let result = self.inner.primary.update(id, patch).await;
        self.after_primary(result).await
    }
}

