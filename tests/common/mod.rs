//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use contact_vault::{
    Confirmation, DocumentStore, MemoryDocumentStore, MemoryKeyValueStore, Prompt, Record, Vault,
    VaultConfig,
};
use serde_json::{json, Value};

pub const USER: &str = "user-1";
pub const COLLECTION: &str = "users/user-1/contacts";

pub struct Harness {
    pub documents: Arc<MemoryDocumentStore>,
    pub local: Arc<MemoryKeyValueStore>,
    pub session: Arc<MemoryKeyValueStore>,
    pub vault: Vault,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(VaultConfig::default())
    }

    pub fn with_config(config: VaultConfig) -> Self {
        let documents = Arc::new(MemoryDocumentStore::new());
        let local = Arc::new(MemoryKeyValueStore::new());
        let session = Arc::new(MemoryKeyValueStore::new());
        let vault = Vault::new(config, documents.clone(), local.clone(), session.clone());
        Self {
            documents,
            local,
            session,
            vault,
        }
    }

    /// Same durable stores, fresh session: what a restarted app sees.
    pub fn restart(&self) -> Vault {
        Vault::new(
            VaultConfig::default(),
            self.documents.clone(),
            self.local.clone(),
            Arc::new(MemoryKeyValueStore::new()),
        )
    }

    /// Write plaintext contacts straight to the document store.
    pub async fn seed_plaintext(&self, count: usize) {
        for i in 0..count {
            let record = contact(&format!("p{i}"));
            self.documents
                .set(COLLECTION, &format!("p{i}"), &record)
                .await
                .expect("seed plaintext");
        }
    }

    /// Save contacts through the facade (encrypted under the active key).
    pub async fn seed_encrypted(&self, count: usize) {
        let store = self.vault.store(Some(USER));
        for i in 0..count {
            store
                .save(&contact(&format!("e{i}")))
                .await
                .expect("seed encrypted");
        }
    }
}

pub fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object literal")
}

pub fn contact(id: &str) -> Record {
    record(json!({
        "id": id,
        "name": format!("Name {id}"),
        "phone": format!("090-{id}"),
        "email": format!("{id}@example.com"),
        "notes": "met at the conference",
        "birthday": "1990/04/01",
    }))
}

/// Answers every prompt with a fixed value and remembers what was asked.
pub struct RecordingConfirmation {
    answer: bool,
    pub prompts: Mutex<Vec<Prompt>>,
}

impl RecordingConfirmation {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirmation for RecordingConfirmation {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.answer
    }
}
