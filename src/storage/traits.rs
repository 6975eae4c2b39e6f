//! Storage collaborator contracts.
//!
//! The remote document store and the local key-value store are external
//! collaborators. The core only talks to them through these traits.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::Record;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Collection path holding one identity's contacts.
pub fn contacts_collection(identity: &str) -> String {
    format!("users/{identity}/contacts")
}

// ============================================================================
// DocumentStore
// ============================================================================

/// Keyed collection store with atomic batched writes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Record>>;

    /// Create or replace a document.
    async fn set(&self, collection: &str, id: &str, record: &Record) -> StorageResult<()>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> StorageResult<()>;

    async fn list_all(&self, collection: &str) -> StorageResult<Vec<Record>>;

    /// Any single document of the collection (used to sample its format).
    async fn first(&self, collection: &str) -> StorageResult<Option<Record>> {
        Ok(self.list_all(collection).await?.into_iter().next())
    }

    /// Start an empty write batch.
    fn batch(&self) -> WriteBatch {
        WriteBatch::default()
    }

    /// Apply every operation of `batch`, or none of them.
    async fn commit(&self, batch: WriteBatch) -> StorageResult<()>;
}

/// One buffered write.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Replace an existing document. The batch is rejected if it does not exist.
    Update {
        collection: String,
        id: String,
        record: Record,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Writes buffered in memory until [`DocumentStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, collection: &str, id: &str, record: Record) -> &mut Self {
        self.ops.push(BatchOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            record,
        });
        self
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> &mut Self {
        self.ops.push(BatchOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

// ============================================================================
// KeyValueStore
// ============================================================================

/// String key-value store (local durable settings, or a session-scoped cache).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}
