use async_trait::async_trait;
use cylinder_sessions::{CylinderSession, SessionDraft, SessionPatch};
use uuid::Uuid;

use crate::channel::Subscription;
use crate::error::StoreResult;

/// Durable session storage with change notification.
///
/// Every successful write is followed by a [`crate::StoreEvent::Snapshot`]
/// of the full collection to all subscribers. A failed write changes
/// nothing and notifies nobody.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Subscribe to changes. The first event is the current collection.
    async fn subscribe(&self) -> StoreResult<Subscription>;

    /// All stored sessions, unordered
    async fn list(&self) -> StoreResult<Vec<CylinderSession>>;

    async fn get(&self, id: &str) -> StoreResult<Option<CylinderSession>> {
        Ok(self.list().await?.into_iter().find(|s| s.id == id))
    }

    /// Store a new session and return its generated id
    async fn create(&self, draft: SessionDraft) -> StoreResult<String>;

    /// Overwrite the fields present in `patch`. Unknown ids are `NotFound`.
    async fn update(&self, id: &str, patch: SessionPatch) -> StoreResult<()>;
}

/// Generate a collision-resistant session id.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
