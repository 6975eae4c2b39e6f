//! Per-identity key lifecycle.
//!
//! The salt is durable; the derived key is held in memory and exported to a
//! session-scoped store so a new manager in the same session can pick it up
//! without re-running PBKDF2. Rotation replaces salt and key together.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use vault_crypto::{decode_salt, derive_key, encode_salt, generate_salt, hkdf_derive, Key, Salt};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Result, StorageError, VaultError};
use crate::settings::StorageKeys;
use crate::storage::KeyValueStore;

pub const MIN_PASSPHRASE_CHARS: usize = 8;
pub const DEFAULT_PEPPER: &str = "cooper_2025";

const IDENTITY_SECRET_INFO: &[u8] = b"contact-vault:identity-secret:v1";
/// Secret input for the device-scoped key material.
const DEVICE_SECRET_INPUT: &str = "device";

// ============================================================================
// SecretScheme
// ============================================================================

/// Source of the secret fed into PBKDF2.
#[derive(Clone)]
pub enum SecretScheme {
    /// Secret derived from the identity and an application pepper.
    ///
    /// Anyone holding the identity, the pepper and the salt can derive the
    /// key. Keys survive device loss.
    IdentityBound { pepper: String },
    /// User-supplied passphrase. A forgotten passphrase cannot be recovered.
    Passphrase(Zeroizing<String>),
}

impl Default for SecretScheme {
    fn default() -> Self {
        Self::IdentityBound {
            pepper: DEFAULT_PEPPER.to_string(),
        }
    }
}

impl fmt::Debug for SecretScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentityBound { .. } => f.write_str("IdentityBound { pepper: <redacted> }"),
            Self::Passphrase(_) => f.write_str("Passphrase(<redacted>)"),
        }
    }
}

impl SecretScheme {
    pub fn identity_bound(pepper: impl Into<String>) -> Self {
        Self::IdentityBound {
            pepper: pepper.into(),
        }
    }

    /// Passphrase scheme. Rejects passphrases shorter than [`MIN_PASSPHRASE_CHARS`].
    pub fn passphrase(passphrase: impl Into<String>) -> Result<Self> {
        let passphrase = Zeroizing::new(passphrase.into());
        if passphrase.chars().count() < MIN_PASSPHRASE_CHARS {
            return Err(VaultError::InvalidPassphrase {
                min: MIN_PASSPHRASE_CHARS,
            });
        }
        Ok(Self::Passphrase(passphrase))
    }

    fn secret(&self, identity: &str) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            Self::IdentityBound { pepper } => {
                let mut okm =
                    hkdf_derive(identity.as_bytes(), pepper.as_bytes(), IDENTITY_SECRET_INFO)?;
                let secret = Zeroizing::new(okm.to_vec());
                okm.zeroize();
                Ok(secret)
            }
            Self::Passphrase(p) => Ok(Zeroizing::new(p.as_bytes().to_vec())),
        }
    }
}

// ============================================================================
// KeyMaterial
// ============================================================================

/// A salt and the key derived from it. Always replaced together.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub salt: Salt,
    pub key: Key,
}

/// Owner of a salt and key.
///
/// The signed-out device collection has its own entries, so no identity
/// string can alias it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOwner {
    Identity(String),
    Device,
}

impl KeyOwner {
    fn salt_entry(&self, keys: &StorageKeys) -> String {
        match self {
            Self::Identity(id) => keys.salt(id),
            Self::Device => keys.device_salt(),
        }
    }

    fn session_entry(&self, keys: &StorageKeys) -> String {
        match self {
            Self::Identity(id) => keys.session_key(id),
            Self::Device => keys.device_session_key(),
        }
    }

    fn secret_input(&self) -> &str {
        match self {
            Self::Identity(id) => id,
            Self::Device => DEVICE_SECRET_INPUT,
        }
    }
}

struct ActiveKey {
    owner: KeyOwner,
    key: Key,
}

// ============================================================================
// KeyManager
// ============================================================================

pub struct KeyManager {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    scheme: SecretScheme,
    keys: StorageKeys,
    active: RwLock<Option<ActiveKey>>,
}

impl KeyManager {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        scheme: SecretScheme,
        keys: StorageKeys,
    ) -> Self {
        Self {
            durable,
            session,
            scheme,
            keys,
            active: RwLock::new(None),
        }
    }

    /// Make `identity`'s key active.
    ///
    /// No-op when it already is. Otherwise imports the session-cached key if
    /// present, or loads (creating on first use) the salt and derives the key.
    pub fn initialize_user_key(&self, identity: &str) -> Result<()> {
        self.activate(KeyOwner::Identity(identity.to_string()))
    }

    /// Make the device-scoped key (signed-out local collection) active.
    pub fn initialize_device_key(&self) -> Result<()> {
        self.activate(KeyOwner::Device)
    }

    fn activate(&self, owner: KeyOwner) -> Result<()> {
        if self.active.read().as_ref().is_some_and(|a| a.owner == owner) {
            return Ok(());
        }

        let key = match self.cached_session_key(&owner)? {
            Some(key) => {
                debug!(?owner, "imported session key");
                key
            }
            None => {
                let salt = self.load_or_create_salt(&owner)?;
                let key = self.derive_for(&owner, &salt)?;
                self.session
                    .set(&owner.session_entry(&self.keys), &key.to_base64())?;
                debug!(?owner, "derived key from stored salt");
                key
            }
        };

        *self.active.write() = Some(ActiveKey { owner, key });
        Ok(())
    }

    /// The active key.
    pub fn get_key(&self) -> Result<Key> {
        self.active
            .read()
            .as_ref()
            .map(|active| active.key.clone())
            .ok_or(VaultError::NotInitialized)
    }

    /// Identity whose key is active, if any.
    pub fn identity(&self) -> Option<String> {
        match self.active.read().as_ref().map(|a| &a.owner) {
            Some(KeyOwner::Identity(id)) => Some(id.clone()),
            _ => None,
        }
    }

    /// Salt currently stored for `identity`.
    pub fn stored_salt(&self, identity: &str) -> Result<Option<Salt>> {
        self.read_salt(&self.keys.salt(identity))
    }

    /// New salt and key for `identity`. Nothing is persisted.
    pub fn derive_with_fresh_salt(&self, identity: &str) -> Result<KeyMaterial> {
        let salt = generate_salt()?;
        let key = self.derive(identity, &salt)?;
        Ok(KeyMaterial { salt, key })
    }

    /// Record `material`'s salt as pending so an interrupted rotation can be
    /// finished later. The active salt is untouched.
    pub fn stage(&self, identity: &str, material: &KeyMaterial) -> Result<()> {
        self.durable
            .set(&self.keys.pending_salt(identity), &encode_salt(&material.salt))?;
        Ok(())
    }

    /// Key material for a previously staged salt.
    pub fn staged_material(&self, identity: &str) -> Result<Option<KeyMaterial>> {
        let Some(salt) = self.read_salt(&self.keys.pending_salt(identity))? else {
            return Ok(None);
        };
        let key = self.derive(identity, &salt)?;
        Ok(Some(KeyMaterial { salt, key }))
    }

    pub fn discard_staged(&self, identity: &str) -> Result<()> {
        self.durable.remove(&self.keys.pending_salt(identity))?;
        Ok(())
    }

    /// Make `material` authoritative: persist the salt, drop any staged salt,
    /// refresh the session cache and swap the in-memory key.
    pub fn commit_key_material(&self, identity: &str, material: KeyMaterial) -> Result<()> {
        self.durable
            .set(&self.keys.salt(identity), &encode_salt(&material.salt))?;
        self.durable.remove(&self.keys.pending_salt(identity))?;
        self.session
            .set(&self.keys.session_key(identity), &material.key.to_base64())?;

        *self.active.write() = Some(ActiveKey {
            owner: KeyOwner::Identity(identity.to_string()),
            key: material.key,
        });
        info!(identity, "committed new key material");
        Ok(())
    }

    /// Forget every trace of `identity`'s key material.
    pub fn clear(&self, identity: &str) -> Result<()> {
        self.durable.remove(&self.keys.pending_salt(identity))?;
        self.forget(&KeyOwner::Identity(identity.to_string()))
    }

    /// Forget the device-scoped key material.
    pub fn clear_device(&self) -> Result<()> {
        self.forget(&KeyOwner::Device)
    }

    fn forget(&self, owner: &KeyOwner) -> Result<()> {
        self.session.remove(&owner.session_entry(&self.keys))?;
        self.durable.remove(&owner.salt_entry(&self.keys))?;

        let mut active = self.active.write();
        if active.as_ref().is_some_and(|a| &a.owner == owner) {
            *active = None;
        }
        Ok(())
    }

    fn derive(&self, identity: &str, salt: &Salt) -> Result<Key> {
        let secret = self.scheme.secret(identity)?;
        Ok(derive_key(&secret, salt)?)
    }

    fn derive_for(&self, owner: &KeyOwner, salt: &Salt) -> Result<Key> {
        self.derive(owner.secret_input(), salt)
    }

    fn load_or_create_salt(&self, owner: &KeyOwner) -> Result<Salt> {
        let key = owner.salt_entry(&self.keys);
        if let Some(salt) = self.read_salt(&key)? {
            return Ok(salt);
        }
        let salt = generate_salt()?;
        self.durable.set(&key, &encode_salt(&salt))?;
        info!(?owner, "created salt");
        Ok(salt)
    }

    fn read_salt(&self, key: &str) -> Result<Option<Salt>> {
        let Some(encoded) = self.durable.get(key)? else {
            return Ok(None);
        };
        // Never regenerate over a corrupt salt; existing ciphertext depends on it
        decode_salt(&encoded).map(Some).map_err(|e| {
            StorageError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    fn cached_session_key(&self, owner: &KeyOwner) -> Result<Option<Key>> {
        let entry = owner.session_entry(&self.keys);
        let Some(encoded) = self.session.get(&entry)? else {
            return Ok(None);
        };
        match Key::from_base64(&encoded) {
            Ok(key) => Ok(Some(key)),
            Err(e) => {
                warn!(?owner, error = %e, "discarding unreadable session key");
                self.session.remove(&entry)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    struct Fixture {
        durable: Arc<MemoryKeyValueStore>,
        session: Arc<MemoryKeyValueStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                durable: Arc::new(MemoryKeyValueStore::new()),
                session: Arc::new(MemoryKeyValueStore::new()),
            }
        }

        fn manager(&self) -> KeyManager {
            KeyManager::new(
                self.durable.clone(),
                self.session.clone(),
                SecretScheme::default(),
                StorageKeys::default(),
            )
        }
    }

    #[test]
    fn key_requires_initialization() {
        let fx = Fixture::new();
        assert!(matches!(fx.manager().get_key(), Err(VaultError::NotInitialized)));
    }

    #[test]
    fn initialize_creates_salt_and_session_entry() {
        let fx = Fixture::new();
        let km = fx.manager();
        km.initialize_user_key("u1").unwrap();

        assert!(fx.durable.contains("salt_u1"));
        assert!(fx.session.contains("session_key_u1"));
        assert_eq!(km.identity().as_deref(), Some("u1"));
        assert!(km.get_key().is_ok());
    }

    #[test]
    fn initialize_is_idempotent() {
        let fx = Fixture::new();
        let km = fx.manager();
        km.initialize_user_key("u1").unwrap();
        let salt = fx.durable.get("salt_u1").unwrap();
        let key = km.get_key().unwrap();

        km.initialize_user_key("u1").unwrap();
        assert_eq!(fx.durable.get("salt_u1").unwrap(), salt);
        assert_eq!(km.get_key().unwrap(), key);
    }

    #[test]
    fn fresh_session_rederives_same_key() {
        let fx = Fixture::new();
        let first = fx.manager();
        first.initialize_user_key("u1").unwrap();
        let key = first.get_key().unwrap();

        // New session: durable salt survives, session cache does not
        let second = KeyManager::new(
            fx.durable.clone(),
            Arc::new(MemoryKeyValueStore::new()),
            SecretScheme::default(),
            StorageKeys::default(),
        );
        second.initialize_user_key("u1").unwrap();
        assert_eq!(second.get_key().unwrap(), key);
    }

    #[test]
    fn session_entry_is_imported() {
        let fx = Fixture::new();
        let planted = Key::new([9u8; 32]);
        fx.session.set("session_key_u1", &planted.to_base64()).unwrap();

        let km = fx.manager();
        km.initialize_user_key("u1").unwrap();
        assert_eq!(km.get_key().unwrap(), planted);
        assert!(!fx.durable.contains("salt_u1"));
    }

    #[test]
    fn identities_get_distinct_keys() {
        let fx = Fixture::new();
        let km = fx.manager();
        km.initialize_user_key("u1").unwrap();
        let k1 = km.get_key().unwrap();
        km.initialize_user_key("u2").unwrap();
        assert_ne!(km.get_key().unwrap(), k1);
        assert_eq!(km.identity().as_deref(), Some("u2"));
    }

    #[test]
    fn corrupt_salt_is_reported_not_replaced() {
        let fx = Fixture::new();
        fx.durable.set("salt_u1", "not base64!").unwrap();
        let err = fx.manager().initialize_user_key("u1").unwrap_err();
        assert!(matches!(err, VaultError::Storage(StorageError::Corrupt { .. })));
        assert_eq!(fx.durable.get("salt_u1").unwrap().as_deref(), Some("not base64!"));
    }

    #[test]
    fn commit_replaces_salt_and_key_together() {
        let fx = Fixture::new();
        let km = fx.manager();
        km.initialize_user_key("u1").unwrap();
        let old = km.get_key().unwrap();

        let material = km.derive_with_fresh_salt("u1").unwrap();
        km.stage("u1", &material).unwrap();
        assert!(fx.durable.contains("pending_salt_u1"));
        assert_eq!(km.get_key().unwrap(), old);

        let new_key = material.key.clone();
        let new_salt = material.salt;
        km.commit_key_material("u1", material).unwrap();

        assert_eq!(km.get_key().unwrap(), new_key);
        assert_eq!(km.stored_salt("u1").unwrap(), Some(new_salt));
        assert!(!fx.durable.contains("pending_salt_u1"));
        assert_eq!(
            fx.session.get("session_key_u1").unwrap(),
            Some(new_key.to_base64())
        );
    }

    #[test]
    fn staged_material_rederives_key() {
        let fx = Fixture::new();
        let km = fx.manager();
        let material = km.derive_with_fresh_salt("u1").unwrap();
        km.stage("u1", &material).unwrap();

        let staged = km.staged_material("u1").unwrap().unwrap();
        assert_eq!(staged.key, material.key);

        km.discard_staged("u1").unwrap();
        assert!(km.staged_material("u1").unwrap().is_none());
    }

    #[test]
    fn clear_forgets_key_material() {
        let fx = Fixture::new();
        let km = fx.manager();
        km.initialize_user_key("u1").unwrap();
        km.clear("u1").unwrap();

        assert!(fx.durable.is_empty());
        assert!(fx.session.is_empty());
        assert!(matches!(km.get_key(), Err(VaultError::NotInitialized)));
    }

    #[test]
    fn device_key_material_is_separate_from_identities() {
        let fx = Fixture::new();
        let km = fx.manager();
        km.initialize_user_key("device").unwrap();
        let user_key = km.get_key().unwrap();

        km.initialize_device_key().unwrap();
        assert!(fx.durable.contains("device_salt"));
        assert!(fx.session.contains("device_session_key"));
        assert!(km.identity().is_none());
        assert_ne!(km.get_key().unwrap(), user_key);

        km.clear_device().unwrap();
        assert!(!fx.durable.contains("device_salt"));
        assert!(fx.durable.contains("salt_device"));
        km.initialize_user_key("device").unwrap();
        assert_eq!(km.get_key().unwrap(), user_key);
    }

    #[test]
    fn passphrase_scheme() {
        assert!(matches!(
            SecretScheme::passphrase("short"),
            Err(VaultError::InvalidPassphrase { min: 8 })
        ));
        let scheme = SecretScheme::passphrase("correct horse").unwrap();
        assert_eq!(format!("{scheme:?}"), "Passphrase(<redacted>)");

        let fx = Fixture::new();
        let km = KeyManager::new(
            fx.durable.clone(),
            fx.session.clone(),
            scheme,
            StorageKeys::default(),
        );
        km.initialize_user_key("u1").unwrap();

        let other = fx.manager();
        let salt = km.stored_salt("u1").unwrap().unwrap();
        assert_ne!(other.derive("u1", &salt).unwrap(), km.get_key().unwrap());
    }
}
