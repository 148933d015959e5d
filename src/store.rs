//! External document store contract.
//!
//! The core assumes an external store with read-by-key, read-by-indexed-
//! field, single-key upsert, remove, and an append-only audit push; no
//! multi-key transactions. Whole records are written last-writer-wins, so
//! both adapters also offer `upsert_checked`: a compare-and-swap keyed on
//! the record's previous `signature`, which the workflows use to turn lost
//! races into surfaced conflicts instead of silent overwrites.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, Connection, PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info_span, Instrument};

pub const USERS: &str = "users";
pub const ELIGIBLES: &str = "eligibles";

#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch one document by its key.
    async fn get_by_key(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Fetch the document whose top-level `field` equals `value`, along with
    /// its key. The field is expected to be unique within the collection.
    async fn get_by_unique_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<(String, Value)>>;

    /// Write a whole document unconditionally.
    async fn upsert(&self, collection: &str, key: &str, document: &Value) -> Result<()>;

    /// Write a whole document only if the stored document's top-level
    /// `signature` still equals `expected_signature`. Returns `false` when
    /// the guard failed (the record changed underneath).
    async fn upsert_checked(
        &self,
        collection: &str,
        key: &str,
        document: &Value,
        expected_signature: &str,
    ) -> Result<bool>;

    /// Delete a document.
    async fn remove(&self, collection: &str, key: &str) -> Result<()>;

    /// Append an entry to the key's audit history. Append-only; never read
    /// back by the workflows.
    async fn push(&self, collection: &str, key: &str, entry: &Value) -> Result<()>;

    /// Reachability check used by the health endpoint.
    async fn ping(&self) -> Result<()>;
}

/// In-memory adapter for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, HashMap<String, Value>>>,
    history: RwLock<Vec<(String, String, Value)>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushed audit entries for one key, in insertion order.
    pub async fn pushed(&self, collection: &str, key: &str) -> Vec<Value> {
        self.history
            .read()
            .await
            .iter()
            .filter(|(c, k, _)| c == collection && k == key)
            .map(|(_, _, entry)| entry.clone())
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_by_key(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .documents
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn get_by_unique_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<(String, Value)>> {
        Ok(self
            .documents
            .read()
            .await
            .get(collection)
            .and_then(|docs| {
                docs.iter()
                    .find(|(_, doc)| doc.get(field).and_then(Value::as_str) == Some(value))
                    .map(|(key, doc)| (key.clone(), doc.clone()))
            }))
    }

    async fn upsert(&self, collection: &str, key: &str, document: &Value) -> Result<()> {
        self.documents
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), document.clone());
        Ok(())
    }

    async fn upsert_checked(
        &self,
        collection: &str,
        key: &str,
        document: &Value,
        expected_signature: &str,
    ) -> Result<bool> {
        let mut documents = self.documents.write().await;
        let docs = documents.entry(collection.to_string()).or_default();
        let stored_signature = docs
            .get(key)
            .and_then(|doc| doc.get("signature"))
            .and_then(Value::as_str);
        if stored_signature != Some(expected_signature) {
            return Ok(false);
        }
        docs.insert(key.to_string(), document.clone());
        Ok(true)
    }

    async fn remove(&self, collection: &str, key: &str) -> Result<()> {
        if let Some(docs) = self.documents.write().await.get_mut(collection) {
            docs.remove(key);
        }
        Ok(())
    }

    async fn push(&self, collection: &str, key: &str, entry: &Value) -> Result<()> {
        self.history
            .write()
            .await
            .push((collection.to_string(), key.to_string(), entry.clone()));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Postgres adapter: one JSONB `documents` table plus an append-only
/// `audit_log` table.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and make sure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot connect or the schema statements
    /// fail.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                doc JSONB NOT NULL,
                PRIMARY KEY (collection, key)
            )",
        )
        .execute(&self.pool)
        .await
        .context("create documents table")?;

        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS audit_log (
                id BIGSERIAL PRIMARY KEY,
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                entry JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await
        .context("create audit_log table")?;

        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_by_key(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let query = "SELECT doc FROM documents WHERE collection = $1 AND key = $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch document by key")?;
        Ok(row.map(|row| row.get("doc")))
    }

    async fn get_by_unique_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<(String, Value)>> {
        let query = "SELECT key, doc FROM documents WHERE collection = $1 AND doc->>$2 = $3";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(collection)
            .bind(field)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch document by field")?;
        Ok(row.map(|row| (row.get("key"), row.get("doc"))))
    }

    async fn upsert(&self, collection: &str, key: &str, document: &Value) -> Result<()> {
        let query = "INSERT INTO documents (collection, key, doc) VALUES ($1, $2, $3)
             ON CONFLICT (collection, key) DO UPDATE SET doc = EXCLUDED.doc";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(collection)
            .bind(key)
            .bind(document)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert document")?;
        Ok(())
    }

    async fn upsert_checked(
        &self,
        collection: &str,
        key: &str,
        document: &Value,
        expected_signature: &str,
    ) -> Result<bool> {
        let query = "UPDATE documents SET doc = $4
             WHERE collection = $1 AND key = $2 AND doc->>'signature' = $3";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(collection)
            .bind(key)
            .bind(expected_signature)
            .bind(document)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert document with signature guard")?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove(&self, collection: &str, key: &str) -> Result<()> {
        let query = "DELETE FROM documents WHERE collection = $1 AND key = $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to remove document")?;
        Ok(())
    }

    async fn push(&self, collection: &str, key: &str, entry: &Value) -> Result<()> {
        let query = "INSERT INTO audit_log (collection, key, entry) VALUES ($1, $2, $3)";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(collection)
            .bind(key)
            .bind(entry)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to append audit entry")?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire database connection")?;
        conn.ping()
            .instrument(span)
            .await
            .context("failed to ping database")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trips_documents() {
        let store = MemoryStore::new();
        let doc = json!({"email": "a@example.com", "signature": "s1"});

        store.upsert(USERS, "uid-1", &doc).await.unwrap();
        assert_eq!(store.get_by_key(USERS, "uid-1").await.unwrap(), Some(doc));
        assert_eq!(store.get_by_key(USERS, "missing").await.unwrap(), None);

        store.remove(USERS, "uid-1").await.unwrap();
        assert_eq!(store.get_by_key(USERS, "uid-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_finds_by_unique_field() {
        let store = MemoryStore::new();
        store
            .upsert(USERS, "uid-1", &json!({"email": "a@example.com"}))
            .await
            .unwrap();
        store
            .upsert(USERS, "uid-2", &json!({"email": "b@example.com"}))
            .await
            .unwrap();

        let hit = store
            .get_by_unique_field(USERS, "email", "b@example.com")
            .await
            .unwrap();
        assert_eq!(hit.map(|(key, _)| key), Some("uid-2".to_string()));

        let miss = store
            .get_by_unique_field(USERS, "email", "c@example.com")
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn checked_upsert_guards_on_signature() {
        let store = MemoryStore::new();
        store
            .upsert(USERS, "uid-1", &json!({"v": 1, "signature": "s1"}))
            .await
            .unwrap();

        let applied = store
            .upsert_checked(USERS, "uid-1", &json!({"v": 2, "signature": "s2"}), "s1")
            .await
            .unwrap();
        assert!(applied);

        // Guard now stale: write must be refused.
        let applied = store
            .upsert_checked(USERS, "uid-1", &json!({"v": 3, "signature": "s3"}), "s1")
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(
            store.get_by_key(USERS, "uid-1").await.unwrap().unwrap()["v"],
            2
        );
    }

    #[tokio::test]
    async fn push_is_append_only_per_key() {
        let store = MemoryStore::new();
        store
            .push(USERS, "uid-1", &json!({"event": "login"}))
            .await
            .unwrap();
        store
            .push(USERS, "uid-1", &json!({"event": "logout"}))
            .await
            .unwrap();
        store
            .push(USERS, "uid-2", &json!({"event": "login"}))
            .await
            .unwrap();

        let entries = store.pushed(USERS, "uid-1").await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["event"], "login");
        assert_eq!(entries[1]["event"], "logout");
    }
}
