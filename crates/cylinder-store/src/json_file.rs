//! Local durable store: the whole collection as one JSON document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cylinder_sessions::{CylinderSession, SessionDraft, SessionPatch};
use tokio::sync::Mutex;

use crate::channel::{ChangeNotifier, Subscription};
use crate::error::{StoreError, StoreResult};
use crate::traits::{new_session_id, SessionStore};
use crate::watcher::FileWatcher;

/// Fixed storage key. The document lives at `<dir>/<STORAGE_KEY>.json`.
pub const STORAGE_KEY: &str = "gpl_monitor_data";

/// Stores every session in a single JSON file.
///
/// Writes are serialised by an async mutex and land atomically (temp file
/// then rename). A missing file reads as an empty collection.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    notifier: ChangeNotifier,
}

impl JsonFileStore {
    /// Create a store in the default data directory.
    pub fn new() -> StoreResult<Self> {
        Ok(Self::with_dir(Self::default_dir()?))
    }

    /// Create a store in a custom directory (useful for testing).
    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            path: dir.join(format!("{}.json", STORAGE_KEY)),
            write_lock: Mutex::new(()),
            notifier: ChangeNotifier::new(),
        }
    }

    /// `~/.local/share/cylinder` on Linux.
    pub fn default_dir() -> StoreResult<PathBuf> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            StoreError::Configuration("Could not determine data directory".to_string())
        })?;
        Ok(data_dir.join("cylinder"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Watch the file for changes made by other processes and rebroadcast
    /// them to subscribers. Keep the returned watcher alive.
    pub fn watch(&self) -> StoreResult<FileWatcher> {
        FileWatcher::start(self.path.clone(), self.notifier.clone())
    }

    fn write_all(&self, sessions: &[CylinderSession]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(sessions)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Read-modify-write under the write lock. Subscribers hear about the new
    /// collection only after it is on disk.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<CylinderSession>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = load(&self.path)?;
        let out = f(&mut sessions)?;
        self.write_all(&sessions)?;
        self.notifier.publish_snapshot(sessions);
        Ok(out)
    }
}

/// Read the collection stored at `path`.
pub(crate) fn load(path: &Path) -> StoreResult<Vec<CylinderSession>> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    fn name(&self) -> &str {
        "json"
    }

    async fn subscribe(&self) -> StoreResult<Subscription> {
        let rx = self.notifier.receiver();
        let current = load(&self.path)?;
        Ok(Subscription::new(current, rx))
    }

    async fn list(&self) -> StoreResult<Vec<CylinderSession>> {
        load(&self.path)
    }

    async fn create(&self, draft: SessionDraft) -> StoreResult<String> {
        let id = new_session_id();
        let session = draft.into_session(id.clone());
        self.mutate(move |sessions| {
            sessions.insert(0, session);
            Ok(())
        })
        .await?;
        tracing::debug!(path = %self.path.display(), %id, "session written");
        Ok(id)
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> StoreResult<()> {
        self.mutate(|sessions| {
            let session = sessions
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            patch.apply(session);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::with_dir(dir.path().to_path_buf());
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_create_persists_to_fixed_key() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::with_dir(dir.path().to_path_buf());

        let id = store.create(SessionDraft::starting_at(1_000)).await.unwrap();

        let path = dir.path().join("gpl_monitor_data.json");
        assert_eq!(store.path(), path.as_path());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0]["id"], id.as_str());
        assert_eq!(raw[0]["startDate"], 1_000);
        assert_eq!(raw[0]["isActive"], true);
        assert!(!dir.path().join("gpl_monitor_data.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::with_dir(dir.path().to_path_buf());
        std::fs::write(store.path(), "{not json").unwrap();

        let err = store
            .create(SessionDraft::starting_at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");
    }
}
