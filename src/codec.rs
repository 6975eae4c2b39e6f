//! Selective field encryption.
//!
//! Only the sensitive attributes are encrypted; everything else (name,
//! birthday, timestamps) stays queryable. An encrypted record carries the
//! literal field list it was encrypted with, and decryption always uses
//! that list rather than the codec's current one, so records written under
//! an older whitelist still decrypt correctly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use vault_crypto::{FieldCipher, Key};

use crate::error::{Result, VaultError};
use crate::record::{
    encrypted_field_list, strip_markers, Record, ENCRYPTED_FIELDS_MARKER, ENCRYPTED_MARKER,
    SENSITIVE_FIELDS,
};

/// What to do when a single field fails to encrypt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Log and keep that field's plaintext; the rest of the record is still encrypted.
    #[default]
    FailOpen,
    /// Fail the whole record.
    FailClosed,
}

/// Encrypts and decrypts the sensitive fields of a record.
#[derive(Debug, Clone)]
pub struct FieldCodec {
    fields: Vec<String>,
    policy: FailurePolicy,
}

impl Default for FieldCodec {
    fn default() -> Self {
        Self::new(FailurePolicy::default())
    }
}

impl FieldCodec {
    /// Codec over the canonical [`SENSITIVE_FIELDS`].
    pub fn new(policy: FailurePolicy) -> Self {
        Self::with_fields(SENSITIVE_FIELDS, policy)
    }

    /// Codec over a custom whitelist (for whitelist revisions).
    pub fn with_fields<I, S>(fields: I, policy: FailurePolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            policy,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Encrypt every present, non-empty sensitive string field.
    ///
    /// Stamps `_encrypted = true` and `_encryptedFields` with this codec's
    /// field list. The input must hold plaintext.
    pub fn encrypt_sensitive_fields(&self, record: &Record, key: &Key) -> Result<Record> {
        let cipher = FieldCipher::new(key)?;
        let mut encrypted = record.clone();
        strip_markers(&mut encrypted);

        for field in &self.fields {
            let Some(Value::String(plaintext)) = encrypted.get(field) else {
                continue;
            };
            if plaintext.is_empty() {
                continue;
            }
            match cipher.encrypt_str(plaintext) {
                Ok(ciphertext) => {
                    encrypted.insert(field.clone(), Value::String(ciphertext));
                }
                Err(e) => match self.policy {
                    FailurePolicy::FailOpen => {
                        warn!(field = %field, error = %e, "field encryption failed; keeping plaintext");
                    }
                    FailurePolicy::FailClosed => return Err(e.into()),
                },
            }
        }

        encrypted.insert(ENCRYPTED_MARKER.to_string(), Value::Bool(true));
        encrypted.insert(
            ENCRYPTED_FIELDS_MARKER.to_string(),
            Value::Array(self.fields.iter().cloned().map(Value::String).collect()),
        );
        Ok(encrypted)
    }

    /// Decrypt a record, absorbing every failure.
    ///
    /// Unmarked records pass through unchanged. A field that fails to decrypt
    /// becomes an empty string; a record whose markers are malformed comes back
    /// with all of its sensitive fields blanked. Markers are stripped.
    pub fn decrypt_sensitive_fields(&self, record: &Record, key: &Key) -> Record {
        match self.decrypt_with(record, key, false) {
            Ok(decrypted) => decrypted,
            Err(e) => {
                let id = record.get("id").and_then(Value::as_str).unwrap_or("<none>");
                warn!(
                    id,
                    error = %e,
                    "record could not be decrypted; blanking sensitive fields"
                );
                self.blank_sensitive_fields(record)
            }
        }
    }

    /// Decrypt a record, failing on the first field that does not decrypt.
    ///
    /// Used by bulk re-encryption, where blanking a field would destroy the
    /// only copy of its ciphertext.
    pub fn decrypt_strict(&self, record: &Record, key: &Key) -> Result<Record> {
        self.decrypt_with(record, key, true)
    }

    /// Replace every sensitive field (the record's own list, or this codec's
    /// when the record is unmarked or malformed) with an empty string and
    /// strip the markers.
    pub fn blank_sensitive_fields(&self, record: &Record) -> Record {
        let fields = encrypted_field_list(record)
            .ok()
            .flatten()
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| self.fields.clone());

        let mut blanked = record.clone();
        for field in &fields {
            if blanked.contains_key(field) {
                blanked.insert(field.clone(), Value::String(String::new()));
            }
        }
        strip_markers(&mut blanked);
        blanked
    }

    /// Whether the record's first non-empty encrypted field decrypts under `key`.
    ///
    /// `None` when the record has nothing to test against (unmarked, or no
    /// non-empty listed field).
    pub fn decrypts_under(&self, record: &Record, key: &Key) -> Option<bool> {
        let fields = encrypted_field_list(record).ok().flatten()?;
        let cipher = FieldCipher::new(key).ok()?;
        fields.iter().find_map(|field| match record.get(field) {
            Some(Value::String(ciphertext)) if !ciphertext.is_empty() => {
                Some(cipher.decrypt_str(ciphertext).is_ok())
            }
            _ => None,
        })
    }

    fn decrypt_with(&self, record: &Record, key: &Key, strict: bool) -> Result<Record> {
        let Some(fields) = encrypted_field_list(record)? else {
            return Ok(record.clone());
        };
        let cipher = FieldCipher::new(key)?;
        let mut decrypted = record.clone();

        for field in &fields {
            // Non-string values were never encrypted; leave them alone
            let Some(Value::String(ciphertext)) = decrypted.get(field) else {
                continue;
            };
            if ciphertext.is_empty() {
                continue;
            }
            match cipher.decrypt_str(ciphertext) {
                Ok(plaintext) => {
                    decrypted.insert(field.clone(), Value::String(plaintext));
                }
                Err(e) if strict => {
                    debug!(field = %field, error = %e, "strict decryption failed");
                    return Err(VaultError::from(e));
                }
                Err(e) => {
                    warn!(field = %field, error = %e, "field decryption failed; blanking");
                    decrypted.insert(field.clone(), Value::String(String::new()));
                }
            }
        }

        strip_markers(&mut decrypted);
        Ok(decrypted)
    }
}
