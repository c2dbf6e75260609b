//! Durable key-value storage.
//!
//! The ledger persists every field through a [`KvStore`] before an operation
//! returns. Backends:
//! - [`MemoryStore`]: process-local, for tests and ephemeral wallets
//! - [`SqliteStore`]: single-table SQLite file (feature `sqlite`)
//! - [`NamespacedStore`]: prefixes keys so several wallets share one backend

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Synchronous string key-value store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        (**self).scan_prefix(prefix)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMESPACING
// ═══════════════════════════════════════════════════════════════════════════════

/// Scopes every key under `<namespace>:`.
#[derive(Debug, Clone)]
pub struct NamespacedStore<S> {
    inner: S,
    prefix: String,
}

impl<S: KvStore> NamespacedStore<S> {
    pub fn new(inner: S, namespace: &str) -> Self {
        Self {
            inner,
            prefix: format!("{namespace}:"),
        }
    }

    pub fn namespace(&self) -> &str {
        self.prefix.trim_end_matches(':')
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl<S: KvStore> KvStore for NamespacedStore<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(&self.scoped(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(&self.scoped(key), value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(&self.scoped(key))
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let entries = self.inner.scan_prefix(&self.scoped(prefix))?;
        Ok(entries
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(&self.prefix).map(|k| (k.to_string(), v)))
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SQLITE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "sqlite")]
mod sqlite {
    use std::path::Path;
    use std::sync::Mutex;

    use rusqlite::{params, Connection, OptionalExtension};
    use tracing::info;

    use super::{KvStore, StoreError};

    /// Key-value store backed by a single SQLite table.
    pub struct SqliteStore {
        conn: Mutex<Connection>,
    }

    impl SqliteStore {
        /// Open or create a store at `path`.
        pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
            let conn = Connection::open(path.as_ref())
                .map_err(|e| StoreError::Backend(format!("database open failed: {e}")))?;
            let store = Self::with_connection(conn)?;
            info!(path = ?path.as_ref(), "opened wallet store");
            Ok(store)
        }

        /// In-memory database, mostly for tests.
        pub fn in_memory() -> Result<Self, StoreError> {
            let conn = Connection::open_in_memory()
                .map_err(|e| StoreError::Backend(format!("in-memory db failed: {e}")))?;
            Self::with_connection(conn)
        }

        fn with_connection(conn: Connection) -> Result<Self, StoreError> {
            conn.execute_batch(
                r#"
                PRAGMA synchronous = FULL;

                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
                );
                "#,
            )
            .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;

            Ok(Self {
                conn: Mutex::new(conn),
            })
        }
    }

    impl KvStore for SqliteStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(|e| StoreError::Backend(format!("get {key} failed: {e}")))
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                     updated_at = strftime('%s', 'now')",
                params![key, value],
            )
            .map_err(|e| StoreError::Backend(format!("set {key} failed: {e}")))?;
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|e| StoreError::Backend(format!("remove {key} failed: {e}")))?;
            Ok(())
        }

        fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
            let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
            let mut stmt = conn
                .prepare("SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
                .map_err(|e| StoreError::Backend(format!("scan prepare failed: {e}")))?;
            let rows = stmt
                .query_map(params![prefix], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| StoreError::Backend(format!("scan failed: {e}")))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Backend(format!("scan row failed: {e}")))
        }
    }
}
