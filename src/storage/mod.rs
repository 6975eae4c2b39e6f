pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use memory::{MemoryDocumentStore, MemoryKeyValueStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use traits::{
    contacts_collection, BatchOp, DocumentStore, KeyValueStore, StorageResult, WriteBatch,
};
