//! Contact storage facade with transparent field encryption.
//!
//! With an identity the facade talks to the remote [`DocumentStore`]; without
//! one it keeps the whole collection as a JSON array in the local
//! [`KeyValueStore`]. Either way sensitive fields are encrypted before they
//! leave the facade and decrypted on the way back.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use vault_crypto::Key;

use crate::codec::FieldCodec;
use crate::error::{Result, StorageError};
use crate::key_manager::KeyManager;
use crate::record::{
    fill_age, is_encrypted, record_id, sort_newest_first, stamp, Record, UPDATED_AT_FIELD,
};
use crate::storage::{contacts_collection, DocumentStore, KeyValueStore};

/// Label reported by [`SecureStore::identity`] in local mode. The local
/// collection's key material is device-scoped, not stored under this name.
pub const LOCAL_IDENTITY: &str = "local";
/// Local entry holding the collection as a JSON array.
pub const LOCAL_COLLECTION_KEY: &str = "persons";
/// Local entry recording the collection's storage format.
pub const LOCAL_FORMAT_KEY: &str = "persons_format";
pub const LOCAL_FORMAT_ENCRYPTED: &str = "encrypted-v1";

enum Backend {
    Remote {
        identity: String,
        documents: Arc<dyn DocumentStore>,
    },
    Local {
        kv: Arc<dyn KeyValueStore>,
    },
}

pub struct SecureStore {
    backend: Backend,
    keys: Arc<KeyManager>,
    codec: FieldCodec,
    now: Option<DateTime<Utc>>,
}

impl SecureStore {
    pub fn remote(
        identity: impl Into<String>,
        documents: Arc<dyn DocumentStore>,
        keys: Arc<KeyManager>,
        codec: FieldCodec,
    ) -> Self {
        Self::with_backend(
            Backend::Remote {
                identity: identity.into(),
                documents,
            },
            keys,
            codec,
        )
    }

    pub fn local(kv: Arc<dyn KeyValueStore>, keys: Arc<KeyManager>, codec: FieldCodec) -> Self {
        Self::with_backend(Backend::Local { kv }, keys, codec)
    }

    /// Remote mode when an identity is present, local mode otherwise.
    pub fn for_identity(
        identity: Option<&str>,
        documents: Arc<dyn DocumentStore>,
        local: Arc<dyn KeyValueStore>,
        keys: Arc<KeyManager>,
        codec: FieldCodec,
    ) -> Self {
        match identity {
            Some(id) => Self::remote(id, documents, keys, codec),
            None => Self::local(local, keys, codec),
        }
    }

    fn with_backend(backend: Backend, keys: Arc<KeyManager>, codec: FieldCodec) -> Self {
        Self {
            backend,
            keys,
            codec,
            now: None,
        }
    }

    /// Pin the clock used for `updatedAt` stamps and age computation.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn is_local(&self) -> bool {
        matches!(self.backend, Backend::Local { .. })
    }

    /// Identity whose key protects this store's records.
    pub fn identity(&self) -> &str {
        match &self.backend {
            Backend::Remote { identity, .. } => identity,
            Backend::Local { .. } => LOCAL_IDENTITY,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn key(&self) -> Result<Key> {
        match &self.backend {
            Backend::Remote { identity, .. } => self.keys.initialize_user_key(identity)?,
            Backend::Local { .. } => self.keys.initialize_device_key()?,
        }
        self.keys.get_key()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Encrypt and persist a record. The record must carry an `id`.
    pub async fn save(&self, record: &Record) -> Result<()> {
        let id = record_id(record)?.to_string();
        let key = self.key()?;
        let mut encrypted = self.codec.encrypt_sensitive_fields(record, &key)?;
        stamp(&mut encrypted, UPDATED_AT_FIELD, self.now());

        match &self.backend {
            Backend::Remote {
                identity,
                documents,
            } => {
                documents
                    .set(&contacts_collection(identity), &id, &encrypted)
                    .await?;
            }
            Backend::Local { kv } => {
                let mut records = self.load_local(kv.as_ref(), &key)?;
                match records
                    .iter_mut()
                    .find(|r| record_id(r).ok() == Some(id.as_str()))
                {
                    Some(existing) => *existing = encrypted,
                    None => records.push(encrypted),
                }
                write_local(kv.as_ref(), &records)?;
            }
        }
        debug!(id = %id, "saved contact");
        Ok(())
    }

    /// One decrypted record, or `None` if it does not exist.
    pub async fn get(&self, id: &str) -> Result<Option<Record>> {
        let key = self.key()?;
        let stored = match &self.backend {
            Backend::Remote {
                identity,
                documents,
            } => documents.get(&contacts_collection(identity), id).await?,
            Backend::Local { kv } => self
                .load_local(kv.as_ref(), &key)?
                .into_iter()
                .find(|r| record_id(r).ok() == Some(id)),
        };
        Ok(stored.map(|r| self.open(&r, &key)))
    }

    /// Every record, decrypted independently.
    ///
    /// A record that cannot be decrypted comes back with its sensitive fields
    /// blanked. Remote results are ordered by `updatedAt`, newest first.
    pub async fn get_all(&self) -> Result<Vec<Record>> {
        let key = self.key()?;
        match &self.backend {
            Backend::Remote {
                identity,
                documents,
            } => {
                let stored = documents.list_all(&contacts_collection(identity)).await?;
                let mut records: Vec<Record> = stored.iter().map(|r| self.open(r, &key)).collect();
                sort_newest_first(&mut records);
                Ok(records)
            }
            Backend::Local { kv } => Ok(self
                .load_local(kv.as_ref(), &key)?
                .iter()
                .map(|r| self.open(r, &key))
                .collect()),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        match &self.backend {
            Backend::Remote {
                identity,
                documents,
            } => {
                documents.delete(&contacts_collection(identity), id).await?;
            }
            Backend::Local { kv } => {
                let key = self.key()?;
                let mut records = self.load_local(kv.as_ref(), &key)?;
                records.retain(|r| record_id(r).ok() != Some(id));
                write_local(kv.as_ref(), &records)?;
            }
        }
        Ok(())
    }

    /// Delete every record.
    ///
    /// Remote deletes go out as one atomic batch. Locally the collection and
    /// the local key material are removed together.
    pub async fn delete_all(&self) -> Result<()> {
        match &self.backend {
            Backend::Remote {
                identity,
                documents,
            } => {
                let collection = contacts_collection(identity);
                let stored = documents.list_all(&collection).await?;
                let mut batch = documents.batch();
                for record in &stored {
                    match record_id(record) {
                        Ok(id) => {
                            batch.delete(&collection, id);
                        }
                        Err(_) => warn!("skipping stored contact without an id"),
                    }
                }
                if !batch.is_empty() {
                    let count = batch.len();
                    documents.commit(batch).await?;
                    info!(count, "deleted all contacts");
                }
            }
            Backend::Local { kv } => {
                kv.remove(LOCAL_COLLECTION_KEY)?;
                kv.remove(LOCAL_FORMAT_KEY)?;
                self.keys.clear_device()?;
                info!("deleted local contacts and key material");
            }
        }
        Ok(())
    }

    /// Re-save a plaintext local collection in encrypted form.
    ///
    /// Returns how many records were encrypted. Safe to call repeatedly; a
    /// collection already in the encrypted format is left alone. No-op in
    /// remote mode.
    pub fn migrate_local_legacy(&self) -> Result<usize> {
        let Backend::Local { kv } = &self.backend else {
            return Ok(0);
        };
        let key = self.key()?;
        self.convert_local(kv.as_ref(), &key)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn open(&self, stored: &Record, key: &Key) -> Record {
        let mut record = self.codec.decrypt_sensitive_fields(stored, key);
        fill_age(&mut record, self.today());
        record
    }

    fn convert_local(&self, kv: &dyn KeyValueStore, key: &Key) -> Result<usize> {
        if kv.get(LOCAL_FORMAT_KEY)?.as_deref() == Some(LOCAL_FORMAT_ENCRYPTED) {
            return Ok(0);
        }
        let records = read_local(kv)?;
        if records.is_empty() {
            kv.set(LOCAL_FORMAT_KEY, LOCAL_FORMAT_ENCRYPTED)?;
            return Ok(0);
        }

        let mut converted = 0;
        let mut encrypted = Vec::with_capacity(records.len());
        for record in records {
            if is_encrypted(&record) {
                encrypted.push(record);
            } else {
                encrypted.push(self.codec.encrypt_sensitive_fields(&record, key)?);
                converted += 1;
            }
        }

        // Collection first: if the format marker write is lost, the next
        // pass finds every record marked and converts nothing
        write_local(kv, &encrypted)?;
        kv.set(LOCAL_FORMAT_KEY, LOCAL_FORMAT_ENCRYPTED)?;
        info!(converted, "encrypted local contacts");
        Ok(converted)
    }

    fn load_local(&self, kv: &dyn KeyValueStore, key: &Key) -> Result<Vec<Record>> {
        self.convert_local(kv, key)?;
        read_local(kv)
    }
}

fn read_local(kv: &dyn KeyValueStore) -> Result<Vec<Record>> {
    let Some(raw) = kv.get(LOCAL_COLLECTION_KEY)? else {
        return Ok(Vec::new());
    };
    let items: Vec<Value> = serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
        key: LOCAL_COLLECTION_KEY.to_string(),
        message: e.to_string(),
    })?;
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(record) => Some(record),
            _ => {
                warn!("skipping non-object entry in local contacts");
                None
            }
        })
        .collect())
}

fn write_local(kv: &dyn KeyValueStore, records: &[Record]) -> Result<()> {
    kv.set(LOCAL_COLLECTION_KEY, &serde_json::to_string(records)?)?;
    Ok(())
}
