//! Continuity record storage.
//!
//! One opaque JSON record per identity, keyed by `agent_session:<sha256 hex>`.
//! SQLite access goes through `spawn_blocking`; each call opens its own
//! connection.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use ring::digest;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::migration_runner;

const KEY_PREFIX: &str = "agent_session:";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stored record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Storage key for an identity. The raw identity never reaches storage.
pub fn session_key(identity: &str) -> String {
    let hash = digest::digest(&digest::SHA256, identity.as_bytes());
    let hex: String = hash.as_ref().iter().map(|b| format!("{b:02x}")).collect();
    format!("{KEY_PREFIX}{hex}")
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn save(&self, key: &str, data: &Value) -> Result<(), StoreError>;

    /// Returns whether a record existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open the database at `db_path` and bring its schema up to date.
    pub fn open(db_path: PathBuf) -> anyhow::Result<Self> {
        let mut conn = Connection::open(&db_path)?;
        migration_runner::run_migrations(&mut conn)?;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            migration_runner::configure(&conn)?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT data FROM session_records WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn save(&self, key: &str, data: &Value) -> Result<(), StoreError> {
        let key = key.to_string();
        let raw = serde_json::to_string(data)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO session_records (key, data) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                    data = excluded.data,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![key, raw],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let removed =
                conn.execute("DELETE FROM session_records WHERE key = ?1", params![key])?;
            Ok(removed > 0)
        })
        .await
    }
}

/// In-process store, used when no database is wanted (and in tests).
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, data: &Value) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(key.to_string(), data.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.lock().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_key_hashes_identity() {
        let key = session_key("alice@example.com");
        assert!(key.starts_with(KEY_PREFIX));
        assert!(!key.contains("alice"));
        assert_eq!(key.len(), KEY_PREFIX.len() + 64);
        assert_eq!(key, session_key("alice@example.com"));
        assert_ne!(key, session_key("bob@example.com"));
    }

    #[test]
    fn session_key_matches_known_digest() {
        assert_eq!(
            session_key("abc"),
            "agent_session:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    async fn exercise(store: &dyn SessionStore) {
        let key = session_key("alice@example.com");
        assert_eq!(store.load(&key).await.unwrap(), None);
        assert!(!store.delete(&key).await.unwrap());

        store
            .save(&key, &json!({ "custom_state": { "current": "Outcome" } }))
            .await
            .unwrap();
        store
            .save(&key, &json!({ "custom_state": { "current": "Coverage" } }))
            .await
            .unwrap();
        assert_eq!(
            store.load(&key).await.unwrap(),
            Some(json!({ "custom_state": { "current": "Coverage" } }))
        );

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
        assert_eq!(store.load(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_store_upserts_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("sessions.db")).unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let key = session_key("carol@example.com");

        SqliteStore::open(path.clone())
            .unwrap()
            .save(&key, &json!({ "custom_state": null }))
            .await
            .unwrap();

        let reopened = SqliteStore::open(path).unwrap();
        assert_eq!(
            reopened.load(&key).await.unwrap(),
            Some(json!({ "custom_state": null }))
        );
    }

    #[tokio::test]
    async fn memory_store_upserts_and_deletes() {
        exercise(&MemoryStore::new()).await;
    }
}
