//! One-time encryption of a plaintext contact corpus.
//!
//! Every record is transformed in memory and the whole set is written with
//! a single batch commit. Records that already carry the encryption marker
//! are skipped, so an interrupted run can simply be started again.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::FieldCodec;
use crate::error::{Result, VaultError};
use crate::key_manager::KeyManager;
use crate::ports::{report, Confirmation, JobKind, JobOptions, Progress, Prompt};
use crate::record::{is_encrypted, record_id};
use crate::secure_store::SecureStore;
use crate::settings::SettingsStore;
use crate::storage::{contacts_collection, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NotChecked,
    Checked { has_legacy_data: bool },
    Skipped,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCheck {
    AlreadyMigrated,
    NoLegacyData,
    LegacyDataPresent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub total: usize,
    pub migrated: usize,
    /// Records left untouched (already encrypted, or without an id).
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    NotNeeded,
    Completed(MigrationReport),
}

pub struct MigrationEngine {
    documents: Arc<dyn DocumentStore>,
    keys: Arc<KeyManager>,
    settings: SettingsStore,
    codec: FieldCodec,
    state: Mutex<MigrationState>,
}

impl MigrationEngine {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        keys: Arc<KeyManager>,
        settings: SettingsStore,
        codec: FieldCodec,
    ) -> Self {
        Self {
            documents,
            keys,
            settings,
            codec,
            state: Mutex::new(MigrationState::NotChecked),
        }
    }

    pub fn state(&self) -> MigrationState {
        *self.state.lock()
    }

    fn set_state(&self, state: MigrationState) {
        *self.state.lock() = state;
    }

    /// Decide whether `identity` still has plaintext contacts.
    ///
    /// Samples a single record. A marked sample sets the migrated flag; an
    /// empty collection does not.
    pub async fn check(&self, identity: &str) -> Result<MigrationCheck> {
        if self.settings.is_migrated(identity)? {
            self.set_state(MigrationState::Checked {
                has_legacy_data: false,
            });
            return Ok(MigrationCheck::AlreadyMigrated);
        }

        let sample = self
            .documents
            .first(&contacts_collection(identity))
            .await?;
        let check = match sample {
            None => MigrationCheck::NoLegacyData,
            Some(record) if is_encrypted(&record) => {
                self.settings.mark_migrated(identity)?;
                MigrationCheck::NoLegacyData
            }
            Some(_) => MigrationCheck::LegacyDataPresent,
        };

        self.set_state(MigrationState::Checked {
            has_legacy_data: check == MigrationCheck::LegacyDataPresent,
        });
        debug!(identity, ?check, "migration check");
        Ok(check)
    }

    /// Check, ask for confirmation, then migrate.
    ///
    /// Declining returns [`VaultError::UserDeclined`] and leaves the migrated
    /// flag unset, so the question comes back next session.
    pub async fn run(
        &self,
        identity: &str,
        confirm: &dyn Confirmation,
        options: &JobOptions,
    ) -> Result<MigrationOutcome> {
        if self.check(identity).await? != MigrationCheck::LegacyDataPresent {
            return Ok(MigrationOutcome::NotNeeded);
        }

        if !confirm.confirm(&Prompt::Migration).await {
            self.set_state(MigrationState::Skipped);
            info!(identity, "migration declined");
            return Err(VaultError::UserDeclined);
        }

        self.migrate(identity, options)
            .await
            .map(MigrationOutcome::Completed)
    }

    /// Encrypt every unmarked record in one batch and set the migrated flag.
    pub async fn migrate(&self, identity: &str, options: &JobOptions) -> Result<MigrationReport> {
        let previous = self.state();
        self.set_state(MigrationState::InProgress);

        match self.migrate_inner(identity, options).await {
            Ok(report) => {
                self.set_state(MigrationState::Done);
                info!(
                    identity,
                    total = report.total,
                    migrated = report.migrated,
                    skipped = report.skipped,
                    "migration complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(previous);
                warn!(identity, error = %e, "migration aborted");
                Err(e)
            }
        }
    }

    async fn migrate_inner(&self, identity: &str, options: &JobOptions) -> Result<MigrationReport> {
        self.keys.initialize_user_key(identity)?;
        let key = self.keys.get_key()?;

        let collection = contacts_collection(identity);
        let records = self.documents.list_all(&collection).await?;
        let mut report = MigrationReport {
            total: records.len(),
            ..Default::default()
        };
        let mut batch = self.documents.batch();

        for (index, record) in records.iter().enumerate() {
            if options.is_cancelled() {
                return Err(VaultError::Cancelled);
            }

            if is_encrypted(record) {
                report.skipped += 1;
            } else {
                match record_id(record) {
                    Ok(id) => {
                        let encrypted = self.codec.encrypt_sensitive_fields(record, &key)?;
                        batch.update(&collection, id, encrypted);
                        report.migrated += 1;
                    }
                    Err(_) => {
                        warn!("skipping contact without an id");
                        report.skipped += 1;
                    }
                }
            }

            report_progress(options, index + 1, report.total);
            tokio::task::yield_now().await;
        }

        if options.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        if !batch.is_empty() {
            self.documents.commit(batch).await?;
        }
        self.settings.mark_migrated(identity)?;
        Ok(report)
    }

    /// Convert the local collection, if it is still plaintext.
    pub fn migrate_local(&self, store: &SecureStore) -> Result<usize> {
        store.migrate_local_legacy()
    }
}

fn report_progress(options: &JobOptions, processed: usize, total: usize) {
    report(
        options.on_progress.as_ref(),
        Progress {
            job: JobKind::Migration,
            processed,
            total,
        },
    );
}
