//! SQLite-backed session store.
//!
//! One row per session. The log sequence is a JSON column, replaced as a
//! whole on every level change (last write wins).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use cylinder_sessions::{CylinderSession, SessionDraft, SessionPatch, UsageLog};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::channel::{ChangeNotifier, Subscription};
use crate::error::{StoreError, StoreResult};
use crate::traits::{new_session_id, SessionStore};

const SELECT_COLUMNS: &str = "SELECT id, start_date, end_date, is_active, logs FROM sessions";

/// Session store over a SQLite database file that several clients may share.
///
/// A partial unique index rejects a second active session at the storage
/// layer. Notifications cover writes made through this handle.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    notifier: ChangeNotifier,
}

impl SqliteStore {
    /// Open or create a database at the default location.
    ///
    /// The default location is `~/.local/share/cylinder/cylinder.db`.
    pub fn open() -> StoreResult<Self> {
        let db_path = Self::default_path();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::open_at(&db_path)
    }

    /// Open or create a database at a specific path.
    pub fn open_at(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cylinder")
            .join("cylinder.db")
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            notifier: ChangeNotifier::new(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                start_date INTEGER NOT NULL,
                end_date INTEGER,
                is_active INTEGER NOT NULL,
                logs TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_start_date ON sessions(start_date DESC);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_single_active
                ON sessions(is_active) WHERE is_active = 1;
            "#,
        )
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".to_string()))
    }

    fn row_to_session(row: &Row) -> Result<CylinderSession, rusqlite::Error> {
        let logs_json: String = row.get(4)?;
        let logs: Vec<UsageLog> = serde_json::from_str(&logs_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

        Ok(CylinderSession {
            id: row.get(0)?,
            start_date: row.get(1)?,
            end_date: row.get(2)?,
            is_active: row.get(3)?,
            logs,
        })
    }

    fn list_with(conn: &Connection) -> StoreResult<Vec<CylinderSession>> {
        let mut stmt = conn.prepare(&format!("{} ORDER BY start_date DESC", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], Self::row_to_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn get_with(conn: &Connection, id: &str) -> StoreResult<Option<CylinderSession>> {
        Ok(conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                Self::row_to_session,
            )
            .optional()?)
    }

    fn write_row(conn: &Connection, session: &CylinderSession) -> StoreResult<()> {
        let logs = serde_json::to_string(&session.logs)?;
        conn.execute(
            r#"
            INSERT INTO sessions (id, start_date, end_date, is_active, logs)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                is_active = excluded.is_active,
                logs = excluded.logs
            "#,
            params![
                session.id,
                session.start_date,
                session.end_date,
                session.is_active,
                logs,
            ],
        )
        .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    /// Run a write in a transaction, then broadcast the new collection.
    fn write<T>(
        &self,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        let snapshot = Self::list_with(&conn)?;
        drop(conn);

        self.notifier.publish_snapshot(snapshot);
        Ok(out)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn subscribe(&self) -> StoreResult<Subscription> {
        let rx = self.notifier.receiver();
        let current = Self::list_with(&*self.conn()?)?;
        Ok(Subscription::new(current, rx))
    }

    async fn list(&self) -> StoreResult<Vec<CylinderSession>> {
        Self::list_with(&*self.conn()?)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<CylinderSession>> {
        Self::get_with(&*self.conn()?, id)
    }

    async fn create(&self, draft: SessionDraft) -> StoreResult<String> {
        let session = draft.into_session(new_session_id());
        self.write(|conn| Self::write_row(conn, &session))?;
        Ok(session.id)
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> StoreResult<()> {
        self.write(|conn| {
            let mut session =
                Self::get_with(conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            patch.apply(&mut session);
            Self::write_row(conn, &session)
        })
    }
}
