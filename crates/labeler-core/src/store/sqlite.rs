//! SQLite-based store implementation.

use super::traits::KeyValueStore;
use crate::error::{LabelerError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Metadata about one document namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceMeta {
    /// Namespace name (document key).
    pub namespace: String,
    /// Number of entries in this namespace.
    pub entry_count: usize,
    /// When the namespace was last modified.
    pub last_modified: Option<DateTime<Utc>>,
}

/// SQLite database holding the stores of every document.
///
/// Thread-safe via an internal mutex on the connection. Hand out per-document
/// views with [`SqliteStore::namespace`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at the specified path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LabelerError::Io {
                message: format!("Failed to create store directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| LabelerError::Database {
            message: format!("Failed to open store database: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| LabelerError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS store_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );

            CREATE TABLE IF NOT EXISTS store_namespaces (
                namespace TEXT PRIMARY KEY,
                entry_count INTEGER DEFAULT 0,
                last_modified TEXT
            );
            "#,
        )
        .map_err(|e| LabelerError::Database {
            message: format!("Failed to initialize store schema: {}", e),
            source: Some(e),
        })?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| LabelerError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    /// Per-document view of this database.
    pub fn namespace(&self, namespace: impl Into<String>) -> SqliteNamespace {
        SqliteNamespace {
            store: self.clone(),
            namespace: namespace.into(),
        }
    }

    /// Metadata for every namespace that has ever been written.
    pub fn namespaces(&self) -> Result<Vec<NamespaceMeta>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT namespace, entry_count, last_modified FROM store_namespaces ORDER BY namespace",
            )
            .map_err(|e| LabelerError::Database {
                message: format!("Failed to prepare namespace query: {}", e),
                source: Some(e),
            })?;

        let namespaces = stmt
            .query_map([], |row| {
                let namespace: String = row.get(0)?;
                let entry_count: i64 = row.get(1)?;
                let last_modified: Option<String> = row.get(2)?;
                Ok(NamespaceMeta {
                    namespace,
                    entry_count: entry_count as usize,
                    last_modified: last_modified
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                })
            })
            .map_err(|e| LabelerError::Database {
                message: format!("Failed to query namespaces: {}", e),
                source: Some(e),
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(namespaces)
    }

    fn update_namespace_meta(conn: &Connection, namespace: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM store_entries WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )
            .unwrap_or(0);

        conn.execute(
            r#"
            INSERT INTO store_namespaces (namespace, entry_count, last_modified)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(namespace) DO UPDATE SET
                entry_count = ?2,
                last_modified = ?3
            "#,
            params![namespace, count, now],
        )
        .map_err(|e| LabelerError::Database {
            message: format!("Failed to update namespace metadata: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }
}

/// One document's slice of a [`SqliteStore`].
#[derive(Clone)]
pub struct SqliteNamespace {
    store: SqliteStore,
    namespace: String,
}

impl SqliteNamespace {
    pub fn name(&self) -> &str {
        &self.namespace
    }
}

#[async_trait::async_trait]
impl KeyValueStore for SqliteNamespace {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.store.lock()?;
        conn.query_row(
            "SELECT value FROM store_entries WHERE namespace = ?1 AND key = ?2",
            params![self.namespace, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| LabelerError::Database {
            message: format!("Failed to query store entry: {}", e),
            source: Some(e),
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.store.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT OR REPLACE INTO store_entries (namespace, key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![self.namespace, key, value, now],
        )
        .map_err(|e| LabelerError::Database {
            message: format!("Failed to set store entry: {}", e),
            source: Some(e),
        })?;

        SqliteStore::update_namespace_meta(&conn, &self.namespace)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.store.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM store_entries WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
            )
            .map_err(|e| LabelerError::Database {
                message: format!("Failed to delete store entry: {}", e),
                source: Some(e),
            })?;

        if deleted > 0 {
            SqliteStore::update_namespace_meta(&conn, &self.namespace)?;
            debug!("Deleted '{}' from namespace '{}'", key, self.namespace);
        }

        Ok(deleted > 0)
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let conn = self.store.lock()?;
        let mut stmt = conn
            .prepare("SELECT key FROM store_entries WHERE namespace = ?1 ORDER BY key")
            .map_err(|e| LabelerError::Database {
                message: format!("Failed to prepare key listing: {}", e),
                source: Some(e),
            })?;

        let keys = stmt
            .query_map(params![self.namespace], |row| row.get(0))
            .map_err(|e| LabelerError::Database {
                message: format!("Failed to list keys: {}", e),
                source: Some(e),
            })?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteStore) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store").join("labeler.sqlite");
        let store = SqliteStore::open(&db_path).unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (_temp, store) = create_test_store();
        let doc = store.namespace("home_screen");

        doc.set("1:2", r#"{"prediction":"Button"}"#).await.unwrap();

        let value = doc.get("1:2").await.unwrap();
        assert_eq!(value.as_deref(), Some(r#"{"prediction":"Button"}"#));
        assert!(doc.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_replaces_value() {
        let (_temp, store) = create_test_store();
        let doc = store.namespace("doc");

        doc.set("imageIndex", "1").await.unwrap();
        doc.set("imageIndex", "2").await.unwrap();

        assert_eq!(doc.get("imageIndex").await.unwrap().as_deref(), Some("2"));
        assert_eq!(doc.list_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_temp, store) = create_test_store();
        let doc = store.namespace("doc");

        doc.set("a", "1").await.unwrap();
        assert!(doc.delete("a").await.unwrap());
        assert!(!doc.delete("a").await.unwrap());
        assert!(doc.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let (_temp, store) = create_test_store();
        let first = store.namespace("first");
        let second = store.namespace("second");

        first.set("shared_key", "value1").await.unwrap();
        second.set("shared_key", "value2").await.unwrap();

        assert_eq!(first.get("shared_key").await.unwrap().as_deref(), Some("value1"));
        assert_eq!(second.get("shared_key").await.unwrap().as_deref(), Some("value2"));
        assert_eq!(first.list_keys().await.unwrap(), vec!["shared_key".to_string()]);
    }

    #[tokio::test]
    async fn test_namespace_meta() {
        let (_temp, store) = create_test_store();
        let doc = store.namespace("doc");
        doc.set("a", "1").await.unwrap();
        doc.set("b", "2").await.unwrap();

        let namespaces = store.namespaces().unwrap();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].entry_count, 2);
        assert!(namespaces[0].last_modified.is_some());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("labeler.sqlite");
        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.namespace("doc").set("k", "v").await.unwrap();
        }
        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(
            store.namespace("doc").get("k").await.unwrap().as_deref(),
            Some("v")
        );
    }
}
