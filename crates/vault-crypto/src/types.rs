use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::base64::{base64_decode, base64_encode};
use crate::error::CryptoError;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_NONCE_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// PBKDF2 salt length in bytes.
pub const SALT_LENGTH: usize = 16;

/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Key derivation salt. Not secret; persisted next to the data it protects.
pub type Salt = [u8; SALT_LENGTH];

/// A 256-bit symmetric key. Zeroed on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; AES_KEY_LENGTH]);

impl Key {
    pub fn new(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Generate a random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; AES_KEY_LENGTH];
        getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
        let key = Self(bytes);
        bytes.zeroize();
        Ok(key)
    }

    /// Build a key from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; AES_KEY_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: AES_KEY_LENGTH,
                got: bytes.len(),
            })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.0
    }

    /// Export the raw key as base64 (session cache format).
    pub fn to_base64(&self) -> String {
        base64_encode(&self.0)
    }

    /// Import a key previously exported with [`Key::to_base64`].
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = base64_decode(encoded)?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

/// Encode a salt for storage.
pub fn encode_salt(salt: &Salt) -> String {
    base64_encode(salt)
}

/// Decode a stored salt, enforcing its length.
pub fn decode_salt(encoded: &str) -> Result<Salt, CryptoError> {
    let bytes = base64_decode(encoded)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidSaltLength {
            expected: SALT_LENGTH,
            got: bytes.len(),
        })
}
