//! # cylinder-store
//!
//! Persistence for cylinder sessions.
//!
//! Every backend implements [`SessionStore`]: create and patch sessions, and
//! subscribe to full-collection snapshots pushed after each write.
//!
//! ## Backends
//!
//! - [`MemoryStore`] - In-process, for tests
//! - [`JsonFileStore`] - One JSON document under a fixed storage key
//! - [`SqliteStore`] - SQLite file, single active session enforced by index
//! - [`FailoverStore`] - Primary plus local fallback with explicit modes
//!
//! [`StoreFactory`] builds the backend named in a [`StoreConfig`].

mod channel;
mod config;
mod error;
mod factory;
mod failover;
mod json_file;
mod memory;
mod sqlite;
mod traits;
mod watcher;

pub use channel::{ChangeNotifier, StoreEvent, Subscription};
pub use config::{BackendKind, FailoverConfig, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use factory::{OpenedStore, StoreFactory};
pub use failover::{BackendMode, FailoverStore};
pub use json_file::{JsonFileStore, STORAGE_KEY};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{new_session_id, SessionStore};
pub use watcher::FileWatcher;
