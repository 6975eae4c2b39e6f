//! In-memory storage backends.
//!
//! Used for tests and for hosts that keep contacts in process memory. Batch
//! commits validate every operation before touching state, so a rejected
//! batch leaves the store exactly as it was.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::record::Record;

use super::traits::{BatchOp, DocumentStore, KeyValueStore, StorageResult, WriteBatch};

/// collection path → (document id → document)
type Collections = HashMap<String, BTreeMap<String, Record>>;

// ============================================================================
// MemoryDocumentStore
// ============================================================================

#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<Collections>,
    /// When set, every `commit` is rejected without applying anything.
    fail_commits: AtomicBool,
    commits: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent batch commit (failure injection).
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of successful batch commits.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of mutations applied (single writes plus batch operations).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of one collection, ordered by id.
    pub fn snapshot(&self, collection: &str) -> Vec<Record> {
        self.collections
            .lock()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Record>> {
        Ok(self
            .collections
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(id).cloned()))
    }

    async fn set(&self, collection: &str, id: &str, record: &Record) -> StorageResult<()> {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<()> {
        let removed = self
            .collections
            .lock()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        if removed.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn list_all(&self, collection: &str) -> StorageResult<Vec<Record>> {
        Ok(self.snapshot(collection))
    }

    async fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::BatchRejected(
                "commit rejected by failure injection".to_string(),
            ));
        }

        let ops = batch.into_ops();
        let mut collections = self.collections.lock();

        // Validate everything first so a rejection applies nothing
        for op in &ops {
            if let BatchOp::Update { collection, id, .. } = op {
                let exists = collections
                    .get(collection)
                    .is_some_and(|docs| docs.contains_key(id));
                if !exists {
                    return Err(StorageError::BatchRejected(format!(
                        "update of missing document {collection}/{id}"
                    )));
                }
            }
        }

        let applied = ops.len();
        for op in ops {
            match op {
                BatchOp::Update {
                    collection,
                    id,
                    record,
                } => {
                    collections.entry(collection).or_default().insert(id, record);
                }
                BatchOp::Delete { collection, id } => {
                    if let Some(docs) = collections.get_mut(&collection) {
                        docs.remove(&id);
                    }
                }
            }
        }

        self.writes.fetch_add(applied, Ordering::SeqCst);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// MemoryKeyValueStore
// ============================================================================

#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.lock().remove(key);
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
    async fn set_get_delete() {
        let store = MemoryDocumentStore::new();
        store.set("c", "a", &rec("a", "Ann")).await.unwrap();
        assert_eq!(store.get("c", "a").await.unwrap(), Some(rec("a", "Ann")));
        assert_eq!(store.get("c", "b").await.unwrap(), None);

        store.delete("c", "a").await.unwrap();
        store.delete("c", "a").await.unwrap();
        assert!(store.list_all("c").await.unwrap().is_empty());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn batch_applies_all_operations() {
        let store = MemoryDocumentStore::new();
        store.set("c", "a", &rec("a", "Ann")).await.unwrap();
        store.set("c", "b", &rec("b", "Bob")).await.unwrap();

        let mut batch = store.batch();
        batch.update("c", "a", rec("a", "Anna")).delete("c", "b");
        store.commit(batch).await.unwrap();

        assert_eq!(store.list_all("c").await.unwrap(), vec![rec("a", "Anna")]);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_document_rejects_whole_batch() {
        let store = MemoryDocumentStore::new();
        store.set("c", "a", &rec("a", "Ann")).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.update("c", "a", rec("a", "Changed")).update("c", "ghost", rec("ghost", "x"));
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StorageError::BatchRejected(_)));

        assert_eq!(store.get("c", "a").await.unwrap(), Some(rec("a", "Ann")));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn injected_failure_applies_nothing() {
        let store = MemoryDocumentStore::new();
        store.set("c", "a", &rec("a", "Ann")).await.unwrap();
        store.fail_commits(true);

        let mut batch = store.batch();
        batch.delete("c", "a");
        assert!(store.commit(batch).await.is_err());
        assert_eq!(store.list_all("c").await.unwrap().len(), 1);
    }

    #[test]
    fn key_value_round_trip() {
        let kv = MemoryKeyValueStore::new();
        assert!(kv.is_empty());
        kv.set("salt_u1", "abc").unwrap();
        assert_eq!(kv.get("salt_u1").unwrap().as_deref(), Some("abc"));
        kv.remove("salt_u1").unwrap();
        kv.remove("salt_u1").unwrap();
        assert!(!kv.contains("salt_u1"));
    }
}
