//! Scheduled and manual key rotation.
//!
//! A rotation derives a fresh salt and key, re-encrypts every record in
//! memory and writes them back with one batch commit. Only after that commit
//! succeeds does the new salt become authoritative. Before the batch goes out
//! the new salt is staged under a pending entry, so a process that dies
//! between the batch commit and the salt commit can finish the job on the next
//! session instead of leaving the corpus under an unknown key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use vault_crypto::Key;

use crate::codec::FieldCodec;
use crate::error::{Result, VaultError};
use crate::key_manager::KeyManager;
use crate::ports::{report, Confirmation, JobKind, JobOptions, Progress, Prompt, PromptSeverity};
use crate::record::{is_encrypted, record_id, stamp, LAST_KEY_ROTATION_FIELD};
use crate::settings::{RotationMethod, RotationSettings, SettingsStore, FORCE_AFTER_SKIPS};
use crate::storage::{contacts_collection, DocumentStore};

/// Message surfaced when a rotation fails. The cause is only logged.
pub const ROTATION_FAILED_MESSAGE: &str = "Key rotation failed. Your data was not changed.";

/// Reminders start this many days before a rotation is due.
pub const REMINDER_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub total: usize,
    /// Records moved from the old key to the new one.
    pub reencrypted: usize,
    /// Plaintext records encrypted for the first time.
    pub legacy_encrypted: usize,
    /// Records that did not decrypt under the old key and were left as stored.
    pub unreadable: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    NotDue,
    Skipped { skip_count: u32, forced: bool },
    Rotated(RotationReport),
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Idle,
    Prompted { forced: bool },
    Rotating,
}

pub struct RotationEngine {
    documents: Arc<dyn DocumentStore>,
    keys: Arc<KeyManager>,
    settings: SettingsStore,
    codec: FieldCodec,
    state: Mutex<RotationState>,
}

impl RotationEngine {
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
            state: Mutex::new(RotationState::Idle),
        }
    }

    pub fn state(&self) -> RotationState {
        *self.state.lock()
    }

    fn set_state(&self, state: RotationState) {
        *self.state.lock() = state;
    }

    // ------------------------------------------------------------------
    // Schedule
    // ------------------------------------------------------------------

    pub fn check_rotation_required(&self, identity: &str) -> Result<bool> {
        self.check_rotation_required_at(identity, Utc::now())
    }

    /// Whether a rotation is due at `now`.
    ///
    /// The first call for an identity starts its schedule and returns `false`.
    pub fn check_rotation_required_at(&self, identity: &str, now: DateTime<Utc>) -> Result<bool> {
        let Some(last) = self.settings.last_rotation(identity)? else {
            self.settings.stamp_last_rotation(identity, now)?;
            return Ok(false);
        };
        let interval = self.settings.interval_days()?;
        Ok((now - last).num_days() >= i64::from(interval))
    }

    /// Persist a new global interval. Values outside 30..=365 are ignored.
    pub fn set_rotation_interval(&self, days: u32) -> Result<bool> {
        self.settings.set_interval_days(days)
    }

    pub fn rotation_settings(&self, identity: &str) -> Result<RotationSettings> {
        self.settings.snapshot(identity)
    }

    // ------------------------------------------------------------------
    // Flows
    // ------------------------------------------------------------------

    /// Session-start flow: finish any interrupted rotation, then prompt if a
    /// rotation is due.
    ///
    /// A declined prompt counts as a skip. Rotation failures are reported as
    /// [`RotationOutcome::Failed`] with a generic message.
    pub async fn run_scheduled(
        &self,
        identity: &str,
        confirm: &dyn Confirmation,
        options: &JobOptions,
    ) -> Result<RotationOutcome> {
        if self.recover_interrupted_rotation(identity).await? {
            info!(identity, "finished interrupted key rotation");
        }

        if !self.check_rotation_required(identity)? {
            return Ok(RotationOutcome::NotDue);
        }

        let forced = self.settings.is_forced(identity)?;
        let prompt = Prompt::ScheduledRotation {
            severity: if forced {
                PromptSeverity::Forced
            } else {
                PromptSeverity::Recommended
            },
            interval_days: self.settings.interval_days()?,
        };
        self.set_state(RotationState::Prompted { forced });

        if !confirm.confirm(&prompt).await {
            self.set_state(RotationState::Idle);
            let skip_count = self.settings.record_skip(identity)?;
            info!(identity, skip_count, "scheduled rotation declined");
            return Ok(RotationOutcome::Skipped {
                skip_count,
                forced: skip_count >= FORCE_AFTER_SKIPS,
            });
        }

        match self
            .perform_key_rotation(identity, RotationMethod::Automatic, options)
            .await
        {
            Ok(report) => Ok(RotationOutcome::Rotated(report)),
            Err(VaultError::Cancelled) => Err(VaultError::Cancelled),
            Err(e) => {
                error!(identity, error = %e, "scheduled key rotation failed");
                Ok(RotationOutcome::Failed {
                    message: ROTATION_FAILED_MESSAGE.to_string(),
                })
            }
        }
    }

    /// User-initiated rotation. Declining does not count as a skip.
    pub async fn manual_rotation(
        &self,
        identity: &str,
        confirm: &dyn Confirmation,
        options: &JobOptions,
    ) -> Result<RotationReport> {
        if !confirm.confirm(&Prompt::ManualRotation).await {
            return Err(VaultError::UserDeclined);
        }
        self.perform_key_rotation(identity, RotationMethod::Manual, options)
            .await
    }

    /// Re-encrypt every record under a fresh key.
    ///
    /// Any error before the batch commit leaves the old salt and key
    /// authoritative and the stored records untouched.
    pub async fn perform_key_rotation(
        &self,
        identity: &str,
        method: RotationMethod,
        options: &JobOptions,
    ) -> Result<RotationReport> {
        self.set_state(RotationState::Rotating);
        let result = self.rotate(identity, method, options).await;
        self.set_state(RotationState::Idle);
        result
    }

    async fn rotate(
        &self,
        identity: &str,
        method: RotationMethod,
        options: &JobOptions,
    ) -> Result<RotationReport> {
        // A pending salt may be the only way to read part of the corpus;
        // settle it before staging a new one over it.
        if self.recover_interrupted_rotation(identity).await? {
            info!(identity, "finished interrupted key rotation before rotating");
        }

        self.keys.initialize_user_key(identity)?;
        let old_key = self.keys.get_key()?;
        let fresh = self.keys.derive_with_fresh_salt(identity)?;
        self.keys.stage(identity, &fresh)?;

        let report = match self
            .reencrypt_all(identity, &old_key, &fresh.key, options)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                if let Err(discard) = self.keys.discard_staged(identity) {
                    warn!(identity, error = %discard, "could not discard staged salt");
                }
                return Err(e);
            }
        };

        self.keys.commit_key_material(identity, fresh)?;
        let now = Utc::now();
        self.settings.stamp_last_rotation(identity, now)?;
        self.settings.push_history(identity, method, now)?;
        self.settings.clear_skips(identity)?;

        info!(
            identity,
            ?method,
            total = report.total,
            reencrypted = report.reencrypted,
            legacy_encrypted = report.legacy_encrypted,
            unreadable = report.unreadable,
            "key rotation complete"
        );
        Ok(report)
    }

    async fn reencrypt_all(
        &self,
        identity: &str,
        old_key: &Key,
        new_key: &Key,
        options: &JobOptions,
    ) -> Result<RotationReport> {
        let collection = contacts_collection(identity);
        let records = self.documents.list_all(&collection).await?;
        let rotated_at = Utc::now();
        let mut tally = RotationReport {
            total: records.len(),
            ..Default::default()
        };
        let mut batch = self.documents.batch();

        for (index, record) in records.iter().enumerate() {
            if options.is_cancelled() {
                return Err(VaultError::Cancelled);
            }

            let Ok(id) = record_id(record) else {
                warn!("skipping contact without an id");
                tally.unreadable += 1;
                continue;
            };

            let plaintext = if is_encrypted(record) {
                match self.codec.decrypt_strict(record, old_key) {
                    Ok(plaintext) => {
                        tally.reencrypted += 1;
                        Some(plaintext)
                    }
                    Err(e @ (VaultError::AuthenticationFailure | VaultError::DecodeFailure(_))) => {
                        warn!(id, error = %e, "record does not decrypt under the active key; leaving it as stored");
                        tally.unreadable += 1;
                        None
                    }
                    Err(e) => return Err(e),
                }
            } else {
                tally.legacy_encrypted += 1;
                Some(record.clone())
            };

            if let Some(plaintext) = plaintext {
                let mut encrypted = self.codec.encrypt_sensitive_fields(&plaintext, new_key)?;
                stamp(&mut encrypted, LAST_KEY_ROTATION_FIELD, rotated_at);
                batch.update(&collection, id, encrypted);
            }

            report(
                options.on_progress.as_ref(),
                Progress {
                    job: JobKind::Rotation,
                    processed: index + 1,
                    total: tally.total,
                },
            );
            tokio::task::yield_now().await;
        }

        if options.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        if !batch.is_empty() {
            self.documents.commit(batch).await?;
        }
        Ok(tally)
    }

    /// Finish or discard a rotation whose salt was staged but never committed.
    ///
    /// Every stored record is checked. If any decrypts under the staged key,
    /// the batch made it out: records still under the active key (saved
    /// after the crash) are moved to the staged key in one batch, then the
    /// staged salt is committed. The stage is dropped only when no record
    /// depends on it. Returns whether a rotation was finished.
    pub async fn recover_interrupted_rotation(&self, identity: &str) -> Result<bool> {
        let Some(staged) = self.keys.staged_material(identity)? else {
            return Ok(false);
        };
        self.keys.initialize_user_key(identity)?;
        let active = self.keys.get_key()?;

        let collection = contacts_collection(identity);
        let records = self.documents.list_all(&collection).await?;
        let rotated_at = Utc::now();
        let mut under_staged = 0usize;
        let mut unreadable = 0usize;
        let mut batch = self.documents.batch();

        for record in &records {
            match self.codec.decrypts_under(record, &staged.key) {
                Some(true) => {
                    under_staged += 1;
                    continue;
                }
                // Plaintext, or nothing to test against
                None => continue,
                Some(false) => {}
            }
            let Ok(id) = record_id(record) else {
                unreadable += 1;
                continue;
            };
            match self.codec.decrypt_strict(record, &active) {
                Ok(plaintext) => {
                    let mut reencrypted =
                        self.codec.encrypt_sensitive_fields(&plaintext, &staged.key)?;
                    stamp(&mut reencrypted, LAST_KEY_ROTATION_FIELD, rotated_at);
                    batch.update(&collection, id, reencrypted);
                }
                Err(VaultError::AuthenticationFailure | VaultError::DecodeFailure(_)) => {
                    unreadable += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if under_staged == 0 {
            debug!(identity, "discarding staged salt from an unfinished rotation");
            self.keys.discard_staged(identity)?;
            return Ok(false);
        }

        let moved = batch.len();
        if !batch.is_empty() {
            self.documents.commit(batch).await?;
        }
        self.keys.commit_key_material(identity, staged)?;
        self.settings.stamp_last_rotation(identity, rotated_at)?;
        self.settings.clear_skips(identity)?;
        if unreadable > 0 {
            warn!(identity, unreadable, "records readable under neither key were left as stored");
        }
        info!(identity, under_staged, moved, "recovered interrupted key rotation");
        Ok(true)
    }
}

// ============================================================================
// RotationReminder
// ============================================================================

/// Decides when to remind the user that a rotation is coming up.
pub struct RotationReminder {
    settings: SettingsStore,
}

impl RotationReminder {
    pub fn new(settings: SettingsStore) -> Self {
        Self { settings }
    }

    /// Days left until the next rotation is due, if a schedule exists.
    pub fn days_until_due(&self, identity: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
        let Some(last) = self.settings.last_rotation(identity)? else {
            return Ok(None);
        };
        let interval = i64::from(self.settings.interval_days()?);
        Ok(Some(interval - (now - last).num_days()))
    }

    /// True at most once per day while the rotation is due within
    /// [`REMINDER_WINDOW_DAYS`]. Records the day a reminder is shown.
    pub fn should_notify(&self, identity: &str, now: DateTime<Utc>) -> Result<bool> {
        let Some(days) = self.days_until_due(identity, now)? else {
            return Ok(false);
        };
        if days <= 0 || days > REMINDER_WINDOW_DAYS {
            return Ok(false);
        }

        let today = now.date_naive();
        if self.settings.last_notification(identity)? == Some(today) {
            return Ok(false);
        }
        self.settings.set_last_notification(identity, today)?;
        Ok(true)
    }
}
