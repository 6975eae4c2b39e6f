//! Key derivation: PBKDF2-HMAC-SHA256 for secrets, HKDF-SHA256 for domain separation.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::types::{Key, Salt, AES_KEY_LENGTH, PBKDF2_ITERATIONS, SALT_LENGTH};

/// Derive a 256-bit key from a secret and salt using PBKDF2-HMAC-SHA256.
///
/// Deterministic: the same `(secret, salt)` always yields the same key.
/// Uses [`PBKDF2_ITERATIONS`] iterations.
///
/// # Arguments
/// * `secret` - Passphrase or identity-bound secret bytes
/// * `salt` - 16-byte salt
pub fn derive_key(secret: &[u8], salt: &[u8]) -> Result<Key, CryptoError> {
    if salt.len() != SALT_LENGTH {
        return Err(CryptoError::InvalidSaltLength {
            expected: SALT_LENGTH,
            got: salt.len(),
        });
    }
    let mut okm = [0u8; AES_KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(secret, salt, PBKDF2_ITERATIONS, &mut okm);
    let key = Key::new(okm);
    okm.zeroize();
    Ok(key)
}

/// Derive a 256-bit value using HKDF-SHA256.
///
/// # Arguments
/// * `ikm` - Input keying material
/// * `salt` - Salt for domain separation
/// * `info` - Context and application-specific info
pub fn hkdf_derive(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; AES_KEY_LENGTH];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::DerivationFailed(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

/// Generate a random 16-byte salt.
pub fn generate_salt() -> Result<Salt, CryptoError> {
    let mut salt = [0u8; SALT_LENGTH];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(salt)
}
