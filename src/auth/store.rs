//! Persisted session record.
//!
//! Two JSON records live in a flat key/value namespace:
//! - `<session_key>`: the [`Session`] (token, expiry, embedded user)
//! - `<user_key>`: the [`User`]
//!
//! Reads never fail outward: a missing, malformed, mismatched or expired
//! record is cleared and reported as "no session".

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use super::types::{Session, User};
use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to create storage directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable string key/value namespace (the browser's local storage, or a
/// SQLite file on native targets).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ── SQLite backend ──────────────────────────────────────────────

/// SQLite-backed key/value store. Last writer wins.
pub struct SqliteKeyValueStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteKeyValueStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        Self::init(conn)
    }

    /// Non-persistent store, for tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, String>(0),
        );
        match row {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![key, value, epoch_secs() as i64],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }
}

// ── Session store ───────────────────────────────────────────────

/// Reads and writes the persisted {session, user} record.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    session_key: String,
    user_key: String,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: &StorageConfig) -> Self {
        Self {
            kv,
            session_key: config.session_key.clone(),
            user_key: config.user_key.clone(),
        }
    }

    pub fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let json = serde_json::to_string(session)?;
        self.kv.set(&self.session_key, &json)
    }

    pub fn save_user(&self, user: &User) -> Result<(), StorageError> {
        let json = serde_json::to_string(user)?;
        self.kv.set(&self.user_key, &json)
    }

    /// Persist both records for an authenticated session.
    pub fn save(&self, session: &Session) -> Result<(), StorageError> {
        self.save_session(session)?;
        self.save_user(&session.user)
    }

    /// Load the persisted session if it is present, well-formed and unexpired.
    pub fn load(&self) -> Option<Session> {
        self.load_at(Utc::now())
    }

    pub fn load_at(&self, now: DateTime<Utc>) -> Option<Session> {
        let session = match self.read_record::<Session>(&self.session_key) {
            Ok(Some(s)) => s,
            Ok(None) => {
                // Orphaned user record without a session is meaningless.
                self.clear();
                return None;
            }
            Err(reason) => {
                tracing::warn!(key = %self.session_key, "Discarding persisted session: {reason}");
                self.clear();
                return None;
            }
        };

        let user = match self.read_record::<User>(&self.user_key) {
            Ok(Some(u)) => u,
            Ok(None) => {
                tracing::warn!(key = %self.user_key, "Persisted session has no user record");
                self.clear();
                return None;
            }
            Err(reason) => {
                tracing::warn!(key = %self.user_key, "Discarding persisted user: {reason}");
                self.clear();
                return None;
            }
        };

        if user != session.user {
            tracing::warn!("Persisted user does not match session, discarding");
            self.clear();
            return None;
        }

        if !session.is_valid_at(now) {
            tracing::info!(
                address = %session.user.address,
                expired_at = %session.expires_at,
                "Persisted session expired"
            );
            self.clear();
            return None;
        }

        Some(session)
    }

    /// Raw session record without validation or side effects.
    pub fn peek_session(&self) -> Option<Session> {
        self.read_record::<Session>(&self.session_key).ok().flatten()
    }

    /// Remove both records. Failures are logged, never surfaced.
    pub fn clear(&self) {
        for key in [&self.session_key, &self.user_key] {
            if let Err(e) = self.kv.remove(key) {
                tracing::warn!(key = %key, "Failed to clear persisted record: {e}");
            }
        }
    }

    fn read_record<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, String> {
        let raw = match self.kv.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| format!("malformed record: {e}"))
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ───────────────────────────────────────────────────────────
