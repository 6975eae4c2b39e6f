//! Client-side field-level encryption for contact records.
//!
//! Sensitive attributes are encrypted with AES-256-GCM under a per-identity
//! key before they reach storage. Plaintext corpora are migrated in one
//! batch, and keys are rotated on a schedule by re-encrypting every record
//! and committing the new salt only after the batch lands.

pub mod codec;
pub mod config;
pub mod error;
pub mod key_manager;
pub mod migration;
pub mod ports;
pub mod record;
pub mod rotation;
pub mod secure_store;
pub mod settings;
pub mod storage;
pub mod vault;

pub use codec::{FailurePolicy, FieldCodec};
pub use config::VaultConfig;
pub use error::{Result, StorageError, VaultError};
pub use key_manager::{KeyManager, KeyMaterial, KeyOwner, SecretScheme};
pub use migration::{
    MigrationCheck, MigrationEngine, MigrationOutcome, MigrationReport, MigrationState,
};
pub use ports::{
    CancelToken, Confirmation, JobKind, JobOptions, Progress, ProgressCallback, Prompt,
    PromptSeverity, StaticConfirmation,
};
pub use record::{Record, SENSITIVE_FIELDS};
pub use rotation::{
    RotationEngine, RotationOutcome, RotationReminder, RotationReport, RotationState,
};
pub use secure_store::SecureStore;
pub use settings::{
    RotationHistoryEntry, RotationMethod, RotationSettings, SettingsStore, StorageKeys,
};
pub use storage::{DocumentStore, KeyValueStore, MemoryDocumentStore, MemoryKeyValueStore, WriteBatch};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
pub use vault::Vault;

pub use vault_crypto::Key;
