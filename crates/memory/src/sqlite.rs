//! SQLite store.
//!
//! Uses a single SQLite database file with two tables:
//! - `memory_kv`: one JSON value per `(namespace, key)`
//! - `memory_list`: list items ordered by an autoincrement id
//!
//! List mutations that read and write (append, trim) run inside a
//! transaction, so concurrent sessions never see a partial trim.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use wardline_core::error::MemoryError;
use wardline_core::memory::{MemoryStore, Namespace};

/// A durable embedded store backed by SQLite.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let in_memory = matches!(path, ":memory:" | "sqlite::memory:");
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
        } else {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    MemoryError::Storage(format!("Failed to create database directory: {e}"))
                })?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };

        // Every connection to ":memory:" is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(path, "SQLite memory store initialized");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_kv (
                namespace   TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("memory_kv table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_list (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace   TEXT NOT NULL,
                list        TEXT NOT NULL,
                value       TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("memory_list table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memory_list_ns ON memory_list(namespace, list, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("memory_list index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn decode(ns: &Namespace, key: &str, raw: &str) -> Result<Value, MemoryError> {
        serde_json::from_str(raw).map_err(|e| MemoryError::Corrupted {
            namespace: ns.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn encode(value: &Value) -> Result<String, MemoryError> {
        serde_json::to_string(value)
            .map_err(|e| MemoryError::Storage(format!("Value serialization: {e}")))
    }

    fn count_from(row: &sqlx::sqlite::SqliteRow) -> Result<usize, MemoryError> {
        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| MemoryError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(usize::try_from(cnt).unwrap_or(0))
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, ns: &Namespace, key: &str) -> Result<Option<Value>, MemoryError> {
        let row = sqlx::query("SELECT value FROM memory_kv WHERE namespace = ?1 AND key = ?2")
            .bind(ns.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET {ns}/{key}: {e}")))?;

        match row {
            Some(ref r) => {
                let raw: String = r
                    .try_get("value")
                    .map_err(|e| MemoryError::QueryFailed(format!("value column: {e}")))?;
                Ok(Some(Self::decode(ns, key, &raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, ns: &Namespace, key: &str, value: Value) -> Result<(), MemoryError> {
        let raw = Self::encode(&value)?;
        sqlx::query(
            r#"
            INSERT INTO memory_kv (namespace, key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(ns.as_str())
        .bind(key)
        .bind(&raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("SET {ns}/{key}: {e}")))?;
        Ok(())
    }

    async fn delete(&self, ns: &Namespace, key: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM memory_kv WHERE namespace = ?1 AND key = ?2")
            .bind(ns.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("DELETE {ns}/{key}: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self, ns: &Namespace) -> Result<Vec<String>, MemoryError> {
        let rows = sqlx::query("SELECT key FROM memory_kv WHERE namespace = ?1 ORDER BY key")
            .bind(ns.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("KEYS {ns}: {e}")))?;
        rows.iter()
            .map(|r| {
                r.try_get("key")
                    .map_err(|e| MemoryError::QueryFailed(format!("key column: {e}")))
            })
            .collect()
    }

    async fn append(&self, ns: &Namespace, list: &str, value: Value) -> Result<usize, MemoryError> {
        let raw = Self::encode(&value)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("BEGIN failed: {e}")))?;

        sqlx::query(
            "INSERT INTO memory_list (namespace, list, value, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(ns.as_str())
        .bind(list)
        .bind(&raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| MemoryError::Storage(format!("APPEND {ns}/{list}: {e}")))?;

        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM memory_list WHERE namespace = ?1 AND list = ?2",
        )
        .bind(ns.as_str())
        .bind(list)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("COUNT {ns}/{list}: {e}")))?;
        let len = Self::count_from(&row)?;

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("COMMIT failed: {e}")))?;
        Ok(len)
    }

    async fn get_list(&self, ns: &Namespace, list: &str) -> Result<Vec<Value>, MemoryError> {
        let rows = sqlx::query(
            "SELECT value FROM memory_list WHERE namespace = ?1 AND list = ?2 ORDER BY id",
        )
        .bind(ns.as_str())
        .bind(list)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("LIST {ns}/{list}: {e}")))?;

        rows.iter()
            .map(|r| {
                let raw: String = r
                    .try_get("value")
                    .map_err(|e| MemoryError::QueryFailed(format!("value column: {e}")))?;
                Self::decode(ns, list, &raw)
            })
            .collect()
    }

    async fn trim_list(
        &self,
        ns: &Namespace,
        list: &str,
        keep: usize,
    ) -> Result<usize, MemoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("BEGIN failed: {e}")))?;

        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM memory_list WHERE namespace = ?1 AND list = ?2",
        )
        .bind(ns.as_str())
        .bind(list)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("COUNT {ns}/{list}: {e}")))?;
        let excess = Self::count_from(&row)?.saturating_sub(keep);

        if excess > 0 {
            sqlx::query(
                r#"
                DELETE FROM memory_list WHERE id IN (
                    SELECT id FROM memory_list
                    WHERE namespace = ?1 AND list = ?2
                    ORDER BY id
                    LIMIT ?3
                )
                "#,
            )
            .bind(ns.as_str())
            .bind(list)
            .bind(i64::try_from(excess).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::Storage(format!("TRIM {ns}/{list}: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("COMMIT failed: {e}")))?;
        Ok(excess)
    }

    async fn clear_list(&self, ns: &Namespace, list: &str) -> Result<(), MemoryError> {
        sqlx::query("DELETE FROM memory_list WHERE namespace = ?1 AND list = ?2")
            .bind(ns.as_str())
            .bind(list)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("CLEAR {ns}/{list}: {e}")))?;
        Ok(())
    }

    async fn list_length(&self, ns: &Namespace, list: &str) -> Result<usize, MemoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM memory_list WHERE namespace = ?1 AND list = ?2",
        )
        .bind(ns.as_str())
        .bind(list)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("COUNT {ns}/{list}: {e}")))?;
        Self::count_from(&row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn kv_round_trip() {
        let db = test_store().await;
        let ns = Namespace::for_session("bot", "u1");
        db.set(&ns, "long_term", json!({"name": "Ada", "langs": ["rust"]}))
            .await
            .unwrap();
        assert_eq!(
            db.get(&ns, "long_term").await.unwrap(),
            Some(json!({"name": "Ada", "langs": ["rust"]}))
        );
        assert!(db.get(&ns, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites() {
        let db = test_store().await;
        let ns = Namespace::from("a:b");
        db.set(&ns, "k", json!(1)).await.unwrap();
        db.set(&ns, "k", json!(2)).await.unwrap();
        assert_eq!(db.get(&ns, "k").await.unwrap(), Some(json!(2)));
        assert_eq!(db.list_keys(&ns).await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let db = test_store().await;
        let ns = Namespace::from("a:b");
        db.set(&ns, "k", json!(true)).await.unwrap();
        assert!(db.delete(&ns, "k").await.unwrap());
        assert!(!db.delete(&ns, "k").await.unwrap());
    }

    #[tokio::test]
    async fn list_order_and_trim() {
        let db = test_store().await;
        let ns = Namespace::from("a:b");
        for (i, v) in ["a", "b", "c", "d"].iter().enumerate() {
            assert_eq!(db.append(&ns, "short_term", json!(v)).await.unwrap(), i + 1);
        }
        assert_eq!(db.trim_list(&ns, "short_term", 2).await.unwrap(), 2);
        assert_eq!(
            db.get_list(&ns, "short_term").await.unwrap(),
            vec![json!("c"), json!("d")]
        );
        assert_eq!(db.trim_list(&ns, "short_term", 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lists_are_scoped_by_namespace_and_name() {
        let db = test_store().await;
        let a = Namespace::from("bot:a");
        let b = Namespace::from("bot:b");
        db.append(&a, "short_term", json!(1)).await.unwrap();
        db.append(&a, "buffer", json!(2)).await.unwrap();
        db.append(&b, "short_term", json!(3)).await.unwrap();

        db.clear_list(&a, "short_term").await.unwrap();
        assert_eq!(db.list_length(&a, "short_term").await.unwrap(), 0);
        assert_eq!(db.list_length(&a, "buffer").await.unwrap(), 1);
        assert_eq!(db.list_length(&b, "short_term").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        let path = path.to_str().unwrap();
        let ns = Namespace::from("a:b");
        {
            let db = SqliteStore::new(path).await.unwrap();
            db.set(&ns, "working", json!({"step": 2})).await.unwrap();
            db.pool.close().await;
        }
        let db = SqliteStore::new(path).await.unwrap();
        assert_eq!(db.get(&ns, "working").await.unwrap(), Some(json!({"step": 2})));
    }

    #[tokio::test]
    async fn store_name() {
        assert_eq!(test_store().await.name(), "sqlite");
    }
}
