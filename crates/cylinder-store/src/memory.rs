use async_trait::async_trait;
use cylinder_sessions::{CylinderSession, SessionDraft, SessionPatch};
use tokio::sync::RwLock;

use crate::channel::{ChangeNotifier, Subscription};
use crate::error::{StoreError, StoreResult};
use crate::traits::{new_session_id, SessionStore};

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<Vec<CylinderSession>>,
    notifier: ChangeNotifier,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing collection. No validation is applied, so this
    /// can hold deliberately malformed data.
    pub fn with_sessions(sessions: Vec<CylinderSession>) -> Self {
        Self {
            sessions: RwLock::new(sessions),
            notifier: ChangeNotifier::new(),
        }
    }

    /// Replace the whole collection and notify, as an external writer would.
    pub async fn replace_all(&self, sessions: Vec<CylinderSession>) {
        let mut guard = self.sessions.write().await;
        *guard = sessions;
        self.notifier.publish_snapshot(guard.clone());
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn subscribe(&self) -> StoreResult<Subscription> {
        let rx = self.notifier.receiver();
        let current = self.sessions.read().await.clone();
        Ok(Subscription::new(current, rx))
    }

    async fn list(&self) -> StoreResult<Vec<CylinderSession>> {
        Ok(self.sessions.read().await.clone())
    }

    async fn create(&self, draft: SessionDraft) -> StoreResult<String> {
        let id = new_session_id();
        let mut guard = self.sessions.write().await;
        guard.push(draft.into_session(id.clone()));
        self.notifier.publish_snapshot(guard.clone());
        Ok(id)
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> StoreResult<()> {
        let mut guard = self.sessions.write().await;
        let session = guard
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply(session);
        self.notifier.publish_snapshot(guard.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::StoreEvent;

    #[tokio::test]
    async fn test_create_and_update() {
        let store = MemoryStore::new();
        let id = store.create(SessionDraft::starting_at(1_000)).await.unwrap();

        store.update(&id, SessionPatch::close(2_000)).await.unwrap();

        let session = store.get(&id).await.unwrap().unwrap();
        assert!(!session.is_active);
        assert_eq!(session.end_date, Some(2_000));
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let store = MemoryStore::new();
        let err = store
            .update("missing", SessionPatch::close(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_subscription_delivers_initial_then_changes() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe().await.unwrap();

        match sub.next().await {
            Some(StoreEvent::Snapshot(sessions)) => assert!(sessions.is_empty()),
            other => panic!("unexpected event: {:?}", other),
        }

        store.create(SessionDraft::starting_at(5)).await.unwrap();

        match sub.next().await {
            Some(StoreEvent::Snapshot(sessions)) => assert_eq!(sessions.len(), 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_update_does_not_notify() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe().await.unwrap();
        sub.next().await.unwrap();

        let _ = store.update("nope", SessionPatch::close(1)).await;
        store.create(SessionDraft::starting_at(5)).await.unwrap();

        // The next event is the create, not anything from the failed update.
        match sub.next().await {
            Some(StoreEvent::Snapshot(sessions)) => assert_eq!(sessions.len(), 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
