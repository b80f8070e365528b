//! Builds the configured store once at startup.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{BackendKind, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::failover::{BackendMode, FailoverStore};
use crate::json_file::JsonFileStore;
use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::traits::SessionStore;
use crate::watcher::FileWatcher;

/// A ready-to-use store plus whatever must stay alive alongside it.
pub struct OpenedStore {
    pub store: Arc<dyn SessionStore>,
    /// Present when failover is enabled
    pub failover: Option<Arc<FailoverStore>>,
    /// File watchers stop when dropped, so they live as long as the store
    _watchers: Vec<FileWatcher>,
}

impl OpenedStore {
    pub fn mode_changes(&self) -> Option<watch::Receiver<BackendMode>> {
        self.failover.as_ref().map(|f| f.mode_changes())
    }
}

pub struct StoreFactory;

impl StoreFactory {
    /// Create the store described by `config`.
    ///
    /// A primary that fails to open is an error even when failover is
    /// enabled: startup never picks a backend implicitly.
    pub async fn from_config(config: &StoreConfig) -> StoreResult<OpenedStore> {
        let mut watchers = Vec::new();
        let primary = Self::open_backend(config, &mut watchers)?;
        tracing::info!(backend = primary.name(), "storage backend opened");

        if !config.failover.enabled {
            return Ok(OpenedStore {
                store: primary,
                failover: None,
                _watchers: watchers,
            });
        }

        if config.backend == BackendKind::Json
            && config.failover.fallback_path.is_some()
            && config.failover.fallback_path == config.path
        {
            return Err(StoreError::Configuration(
                "failover fallback must not be the primary JSON store".to_string(),
            ));
        }

        let fallback_dir = match config.failover.fallback_path.clone() {
            Some(dir) => dir,
            None => JsonFileStore::default_dir()?.join("fallback"),
        };
        let fallback = JsonFileStore::with_dir(fallback_dir);
        if config.watch {
            watchers.push(fallback.watch()?);
        }
        tracing::info!(
            path = %fallback.path().display(),
            max_failures = config.failover.max_failures,
            "local fallback configured"
        );

        let failover = Arc::new(FailoverStore::new(
            primary,
            Arc::new(fallback),
            config.failover.max_failures,
        ));

        Ok(OpenedStore {
            store: failover.clone(),
            failover: Some(failover),
            _watchers: watchers,
        })
    }

    fn open_backend(
        config: &StoreConfig,
        watchers: &mut Vec<FileWatcher>,
    ) -> StoreResult<Arc<dyn SessionStore>> {
        match config.backend {
            BackendKind::Memory => Ok(Arc::new(MemoryStore::new())),
            BackendKind::Json => {
                let store = match config.path.clone() {
                    Some(dir) => JsonFileStore::with_dir(dir),
                    None => JsonFileStore::new()?,
                };
                if config.watch {
                    watchers.push(store.watch()?);
                }
                Ok(Arc::new(store))
            }
            BackendKind::Sqlite => {
                let store = match config.path {
                    Some(ref path) => {
                        if let Some(parent) = path.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        SqliteStore::open_at(path)?
                    }
                    None => SqliteStore::open()?,
                };
                Ok(Arc::new(store))
            }
        }
    }
}
