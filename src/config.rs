use crate::codec::{FailurePolicy, FieldCodec};
use crate::key_manager::SecretScheme;
use crate::record::SENSITIVE_FIELDS;
use crate::settings::{StorageKeys, DEFAULT_KEY_PREFIX};

/// Configuration shared by every component of a [`Vault`](crate::Vault).
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Prefix of the rotation settings entries (`{prefix}_rotation_interval`, ...).
    pub key_prefix: String,
    /// Behaviour when a single field fails to encrypt.
    pub failure_policy: FailurePolicy,
    pub secret_scheme: SecretScheme,
    /// Attributes encrypted on write. Records keep the list they were
    /// written with, so changing this does not break existing data.
    pub sensitive_fields: Vec<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            failure_policy: FailurePolicy::default(),
            secret_scheme: SecretScheme::default(),
            sensitive_fields: SENSITIVE_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl VaultConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_secret_scheme(mut self, scheme: SecretScheme) -> Self {
        self.secret_scheme = scheme;
        self
    }

    pub fn with_sensitive_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn storage_keys(&self) -> StorageKeys {
        StorageKeys::new(self.key_prefix.clone())
    }

    pub fn codec(&self) -> FieldCodec {
        FieldCodec::with_fields(self.sensitive_fields.iter().cloned(), self.failure_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = VaultConfig::default();
        assert_eq!(config.key_prefix, "cooper");
        assert_eq!(config.failure_policy, FailurePolicy::FailOpen);
        assert_eq!(config.codec().fields().len(), SENSITIVE_FIELDS.len());
        assert!(matches!(config.secret_scheme, SecretScheme::IdentityBound { .. }));
    }

    #[test]
    fn builders_override() {
        let config = VaultConfig::new()
            .with_key_prefix("acme")
            .with_failure_policy(FailurePolicy::FailClosed)
            .with_sensitive_fields(["phone", "email"]);
        assert_eq!(config.storage_keys().rotation_interval(), "acme_rotation_interval");
        assert_eq!(config.codec().policy(), FailurePolicy::FailClosed);
        assert_eq!(config.codec().fields(), ["phone", "email"]);
    }
}
