//! SQLite storage backend (feature `sqlite`).
//!
//! One database file holds both the document collections and the local
//! key-value settings. Batch commits run inside a single transaction.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::record::Record;

use super::traits::{BatchOp, DocumentStore, KeyValueStore, StorageResult, WriteBatch};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        id         TEXT NOT NULL,
        body       TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    );
    CREATE TABLE IF NOT EXISTS kv (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn encode(record: &Record) -> StorageResult<String> {
    serde_json::to_string(record).map_err(|e| StorageError::backend(e.to_string()))
}

fn decode(key: &str, body: &str) -> StorageResult<Record> {
    serde_json::from_str(body).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Record>> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| decode(&format!("{collection}/{id}"), &b))
            .transpose()
    }

    async fn set(&self, collection: &str, id: &str, record: &Record) -> StorageResult<()> {
        let body = encode(record)?;
        self.conn.lock().execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body",
            params![collection, id, body],
        )?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<()> {
        self.conn.lock().execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(())
    }

    async fn list_all(&self, collection: &str) -> StorageResult<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, body) = row?;
            records.push(decode(&format!("{collection}/{id}"), &body)?);
        }
        Ok(records)
    }

    async fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for op in batch.into_ops() {
            match op {
                BatchOp::Update {
                    collection,
                    id,
                    record,
                } => {
                    let changed = tx.execute(
                        "UPDATE documents SET body = ?3 WHERE collection = ?1 AND id = ?2",
                        params![collection, id, encode(&record)?],
                    )?;
                    if changed == 0 {
                        // Dropping `tx` rolls back everything applied so far
                        return Err(StorageError::BatchRejected(format!(
                            "update of missing document {collection}/{id}"
                        )));
                    }
                }
                BatchOp::Delete { collection, id } => {
                    tx.execute(
                        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                        params![collection, id],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.lock().execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(id: &str, name: &str) -> Record {
        json!({"id": id, "name": name}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            DocumentStore::set(&store, "c", "a", &rec("a", "Ann")).await.unwrap();
            KeyValueStore::set(&store, "salt_u1", "c2FsdA==").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(DocumentStore::get(&store, "c", "a").await.unwrap(), Some(rec("a", "Ann")));
        assert_eq!(
            KeyValueStore::get(&store, "salt_u1").unwrap().as_deref(),
            Some("c2FsdA==")
        );
    }

    #[tokio::test]
    async fn rejected_batch_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        DocumentStore::set(&store, "c", "a", &rec("a", "Ann")).await.unwrap();

        let mut batch = WriteBatch::new();
        batch
            .update("c", "a", rec("a", "Changed"))
            .update("c", "ghost", rec("ghost", "x"));
        assert!(matches!(
            DocumentStore::commit(&store, batch).await,
            Err(StorageError::BatchRejected(_))
        ));
        assert_eq!(DocumentStore::get(&store, "c", "a").await.unwrap(), Some(rec("a", "Ann")));
    }

    #[tokio::test]
    async fn batch_update_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        DocumentStore::set(&store, "c", "a", &rec("a", "Ann")).await.unwrap();
        DocumentStore::set(&store, "c", "b", &rec("b", "Bob")).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.update("c", "a", rec("a", "Anna")).delete("c", "b");
        DocumentStore::commit(&store, batch).await.unwrap();

        assert_eq!(DocumentStore::list_all(&store, "c").await.unwrap(), vec![rec("a", "Anna")]);
    }

    #[test]
    fn kv_remove_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        KeyValueStore::set(&store, "k", "v").unwrap();
        KeyValueStore::remove(&store, "k").unwrap();
        KeyValueStore::remove(&store, "k").unwrap();
        assert_eq!(KeyValueStore::get(&store, "k").unwrap(), None);
    }
}
