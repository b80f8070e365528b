use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cylinder_sessions::{CylinderSession, HeatLevel, SessionDraft, SessionPatch, UsageLog};
use cylinder_store::{
    BackendKind, BackendMode, FailoverConfig, FailoverStore, JsonFileStore, MemoryStore,
    SessionStore, SqliteStore, StoreConfig, StoreError, StoreEvent, StoreFactory, StoreResult,
    Subscription,
};
use tempfile::TempDir;

/// A store that can be switched off to simulate an unreachable backend.
struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
    refuse_subscribe: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            down: AtomicBool::new(false),
            refuse_subscribe: AtomicBool::new(false),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("network partition".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn subscribe(&self) -> StoreResult<Subscription> {
        if self.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("network partition".to_string()));
        }
        self.inner.subscribe().await
    }

    async fn list(&self) -> StoreResult<Vec<CylinderSession>> {
        self.check()?;
        self.inner.list().await
    }

    async fn create(&self, draft: SessionDraft) -> StoreResult<String> {
        self.check()?;
        self.inner.create(draft).await
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> StoreResult<()> {
        self.check()?;
        self.inner.update(id, patch).await
    }
}

/// Wait for a snapshot matching `pred`, skipping anything else.
async fn snapshot_where(
    sub: &mut Subscription,
    pred: impl Fn(&[CylinderSession]) -> bool,
) -> Vec<CylinderSession> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match sub.next().await {
                Some(StoreEvent::Snapshot(sessions)) if pred(&sessions) => return sessions,
                Some(_) => continue,
                None => panic!("subscription closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

// ============================================================
// JSON file store
// ============================================================

#[tokio::test]
async fn test_json_store_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let id = {
        let store = JsonFileStore::with_dir(dir.path().to_path_buf());
        let id = store.create(SessionDraft::starting_at(1_000)).await.unwrap();
        let logs = vec![
            UsageLog::new(1_000, HeatLevel::Level1),
            UsageLog::new(5_000, HeatLevel::Level2),
        ];
        store.update(&id, SessionPatch::logs(logs)).await.unwrap();
        id
    };

    let reopened = JsonFileStore::with_dir(dir.path().to_path_buf());
    let session = reopened.get(&id).await.unwrap().unwrap();
    assert_eq!(session.logs.len(), 2);
    assert_eq!(session.current_level(), Some(HeatLevel::Level2));
    assert!(session.is_active);
}

#[tokio::test]
async fn test_json_store_notifies_after_write() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::with_dir(dir.path().to_path_buf());
    let mut sub = store.subscribe().await.unwrap();

    snapshot_where(&mut sub, |s| s.is_empty()).await;
    let id = store.create(SessionDraft::starting_at(1)).await.unwrap();
    let sessions = snapshot_where(&mut sub, |s| s.len() == 1).await;
    assert_eq!(sessions[0].id, id);
}

#[tokio::test]
async fn test_json_watcher_picks_up_external_writes() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::with_dir(dir.path().to_path_buf());
    let _watcher = store.watch().unwrap();
    let mut sub = store.subscribe().await.unwrap();
    snapshot_where(&mut sub, |s| s.is_empty()).await;

    // Another process writes the same file.
    let other = JsonFileStore::with_dir(dir.path().to_path_buf());
    let id = other.create(SessionDraft::starting_at(42)).await.unwrap();

    let sessions = snapshot_where(&mut sub, |s| s.len() == 1).await;
    assert_eq!(sessions[0].id, id);
}

// ============================================================
// SQLite store
// ============================================================

#[tokio::test]
async fn test_sqlite_store_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cylinder.db");

    let id = {
        let store = SqliteStore::open_at(&path).unwrap();
        let id = store.create(SessionDraft::starting_at(10)).await.unwrap();
        store.update(&id, SessionPatch::close(20)).await.unwrap();
        id
    };

    let store = SqliteStore::open_at(&path).unwrap();
    let sessions = store.list().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, id);
    assert_eq!(sessions[0].end_date, Some(20));

    // With the first one closed, a new active session is allowed.
    store.create(SessionDraft::starting_at(30)).await.unwrap();
    assert_eq!(store.list().await.unwrap().len(), 2);
}

// ============================================================
// Failover
// ============================================================

async fn failover_pair(max_failures: u32) -> (Arc<FlakyStore>, Arc<MemoryStore>, FailoverStore) {
    let primary = Arc::new(FlakyStore::new());
    let fallback = Arc::new(MemoryStore::new());
    let store = FailoverStore::new(primary.clone(), fallback.clone(), max_failures);
    // Let the forwarding tasks subscribe.
    tokio::time::sleep(Duration::from_millis(20)).await;
    (primary, fallback, store)
}

#[tokio::test]
async fn test_failover_surfaces_errors_before_switching() {
    let (primary, fallback, store) = failover_pair(2).await;
    let mut modes = store.mode_changes();
    assert_eq!(store.mode(), BackendMode::Connected);

    primary.set_down(true);

    let err = store.create(SessionDraft::starting_at(1)).await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(store.mode(), BackendMode::Degraded);
    assert!(fallback.list().await.unwrap().is_empty());

    let err = store.create(SessionDraft::starting_at(2)).await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(store.mode(), BackendMode::LocalOnly);
    assert!(modes.has_changed().unwrap());
    assert_eq!(*modes.borrow_and_update(), BackendMode::LocalOnly);

    // Only now do writes land in the fallback.
    store.create(SessionDraft::starting_at(3)).await.unwrap();
    let local = fallback.list().await.unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].start_date, 3);
}

#[tokio::test]
async fn test_failover_recovers_from_degraded_on_success() {
    let (primary, _fallback, store) = failover_pair(3).await;

    primary.set_down(true);
    assert!(store.list().await.is_err());
    assert_eq!(store.mode(), BackendMode::Degraded);

    primary.set_down(false);
    store.create(SessionDraft::starting_at(1)).await.unwrap();
    assert_eq!(store.mode(), BackendMode::Connected);
    assert_eq!(primary.inner.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failover_ignores_request_errors() {
    let (_primary, _fallback, store) = failover_pair(1).await;

    let err = store.update("missing", SessionPatch::close(1)).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert_eq!(store.mode(), BackendMode::Connected);
}

#[tokio::test]
async fn test_failover_local_only_is_sticky_until_reconnect() {
    let (primary, fallback, store) = failover_pair(1).await;

    primary.set_down(true);
    assert!(store.list().await.is_err());
    assert_eq!(store.mode(), BackendMode::LocalOnly);

    primary.set_down(false);
    store.create(SessionDraft::starting_at(5)).await.unwrap();
    assert_eq!(store.mode(), BackendMode::LocalOnly);
    assert_eq!(fallback.list().await.unwrap().len(), 1);

    store.reconnect().await;
    assert_eq!(store.mode(), BackendMode::Connected);
    store.create(SessionDraft::starting_at(6)).await.unwrap();
    assert_eq!(primary.inner.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failover_subscription_follows_selected_backend() {
    let (primary, _fallback, store) = failover_pair(1).await;
    let mut sub = store.subscribe().await.unwrap();
    snapshot_where(&mut sub, |s| s.is_empty()).await;

    store.create(SessionDraft::starting_at(1)).await.unwrap();
    snapshot_where(&mut sub, |s| s.len() == 1 && s[0].start_date == 1).await;

    primary.set_down(true);
    assert!(store.create(SessionDraft::starting_at(2)).await.is_err());

    // Switching to local-only republishes the (empty) fallback collection.
    snapshot_where(&mut sub, |s| s.is_empty()).await;

    store.create(SessionDraft::starting_at(3)).await.unwrap();
    snapshot_where(&mut sub, |s| s.len() == 1 && s[0].start_date == 3).await;
}

#[tokio::test]
async fn test_failover_resubscribes_to_primary_down_at_startup() {
    let primary = Arc::new(FlakyStore::new());
    primary.refuse_subscribe.store(true, Ordering::SeqCst);
    let fallback = Arc::new(MemoryStore::new());
    let store = FailoverStore::with_resubscribe_delay(
        primary.clone(),
        fallback,
        10,
        Duration::from_millis(50),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.mode(), BackendMode::Degraded);

    primary.refuse_subscribe.store(false, Ordering::SeqCst);
    let mut sub = store.subscribe().await.unwrap();
    snapshot_where(&mut sub, |s| s.is_empty()).await;

    store.create(SessionDraft::starting_at(1)).await.unwrap();
    assert_eq!(store.mode(), BackendMode::Connected);
    snapshot_where(&mut sub, |s| s.len() == 1).await;

    // Later primary writes keep flowing through.
    store.create(SessionDraft::starting_at(2)).await.unwrap();
    let sessions = snapshot_where(&mut sub, |s| s.len() == 2).await;
    assert!(sessions.iter().any(|s| s.start_date == 2));
}

#[tokio::test]
async fn test_failover_reconnect_resumes_primary_notifications() {
    let primary = Arc::new(FlakyStore::new());
    primary.refuse_subscribe.store(true, Ordering::SeqCst);
    let fallback = Arc::new(MemoryStore::new());
    let store = FailoverStore::with_resubscribe_delay(
        primary.clone(),
        fallback.clone(),
        1,
        Duration::from_secs(60),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.mode(), BackendMode::LocalOnly);

    primary.refuse_subscribe.store(false, Ordering::SeqCst);
    store.reconnect().await;
    assert_eq!(store.mode(), BackendMode::Connected);

    let mut sub = store.subscribe().await.unwrap();
    snapshot_where(&mut sub, |s| s.is_empty()).await;
    // Well inside the 60s retry delay, so only reconnect() can have
    // restarted the primary subscription.
    tokio::time::sleep(Duration::from_millis(20)).await;
    primary
        .inner
        .create(SessionDraft::starting_at(7))
        .await
        .unwrap();
    let sessions = snapshot_where(&mut sub, |s| s.len() == 1).await;
    assert_eq!(sessions[0].start_date, 7);
    assert!(fallback.list().await.unwrap().is_empty());
}

// ============================================================
// Factory
// ============================================================

#[tokio::test]
async fn test_factory_opens_configured_backend() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        backend: BackendKind::Sqlite,
        path: Some(dir.path().join("nested").join("sessions.db")),
        ..Default::default()
    };

    let opened = StoreFactory::from_config(&config).await.unwrap();
    assert_eq!(opened.store.name(), "sqlite");
    assert!(opened.failover.is_none());
    assert!(opened.mode_changes().is_none());
    assert!(dir.path().join("nested").join("sessions.db").exists());
}

#[tokio::test]
async fn test_factory_wraps_primary_with_failover() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        backend: BackendKind::Memory,
        path: None,
        watch: false,
        failover: FailoverConfig {
            enabled: true,
            fallback_path: Some(dir.path().to_path_buf()),
            max_failures: 2,
        },
    };

    let opened = StoreFactory::from_config(&config).await.unwrap();
    assert_eq!(opened.store.name(), "failover");
    assert_eq!(
        opened.failover.as_ref().map(|f| f.mode()),
        Some(BackendMode::Connected)
    );
}

#[tokio::test]
async fn test_factory_rejects_fallback_equal_to_primary() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        backend: BackendKind::Json,
        path: Some(dir.path().to_path_buf()),
        watch: false,
        failover: FailoverConfig {
            enabled: true,
            fallback_path: Some(dir.path().to_path_buf()),
            max_failures: 3,
        },
    };

    let result = StoreFactory::from_config(&config).await;
    assert!(matches!(result, Err(StoreError::Configuration(_))));
}
