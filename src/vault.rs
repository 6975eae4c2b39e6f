//! Wires the components together over one set of storage handles.

use std::sync::Arc;

use crate::codec::FieldCodec;
use crate::config::VaultConfig;
use crate::key_manager::KeyManager;
use crate::migration::MigrationEngine;
use crate::rotation::{RotationEngine, RotationReminder};
use crate::secure_store::SecureStore;
use crate::settings::SettingsStore;
use crate::storage::{DocumentStore, KeyValueStore};

pub struct Vault {
    documents: Arc<dyn DocumentStore>,
    local: Arc<dyn KeyValueStore>,
    keys: Arc<KeyManager>,
    settings: SettingsStore,
    codec: FieldCodec,
}

impl Vault {
    /// `local` is the durable device store (salts, settings, local contacts);
    /// `session` only needs to live as long as the user's session.
    pub fn new(
        config: VaultConfig,
        documents: Arc<dyn DocumentStore>,
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
    ) -> Self {
        let storage_keys = config.storage_keys();
        let codec = config.codec();
        let keys = Arc::new(KeyManager::new(
            local.clone(),
            session,
            config.secret_scheme,
            storage_keys.clone(),
        ));
        let settings = SettingsStore::new(local.clone(), storage_keys);
        Self {
            documents,
            local,
            keys,
            settings,
            codec,
        }
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Facade for `identity`, or the local collection when there is none.
    pub fn store(&self, identity: Option<&str>) -> SecureStore {
        SecureStore::for_identity(
            identity,
            self.documents.clone(),
            self.local.clone(),
            self.keys.clone(),
            self.codec.clone(),
        )
    }

    pub fn migration(&self) -> MigrationEngine {
        MigrationEngine::new(
            self.documents.clone(),
            self.keys.clone(),
            self.settings.clone(),
            self.codec.clone(),
        )
    }

    pub fn rotation(&self) -> RotationEngine {
        RotationEngine::new(
            self.documents.clone(),
            self.keys.clone(),
            self.settings.clone(),
            self.codec.clone(),
        )
    }

    pub fn reminder(&self) -> RotationReminder {
        RotationReminder::new(self.settings.clone())
    }
}
