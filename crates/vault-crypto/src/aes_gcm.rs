//! AES-256-GCM encryption of field values.
//!
//! Wire format (before base64):
//! [12 bytes: nonce][N bytes: ciphertext + 16-byte tag]
//!
//! The whole blob is encoded as standard padded base64 so it can be stored
//! as a plain string attribute.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::base64::{base64_decode, base64_encode};
use crate::error::CryptoError;
use crate::types::{Key, AES_GCM_NONCE_LENGTH, AES_GCM_TAG_LENGTH};

/// Generate a random 12-byte nonce for AES-GCM.
pub fn generate_nonce() -> Result<[u8; AES_GCM_NONCE_LENGTH], CryptoError> {
    let mut nonce = [0u8; AES_GCM_NONCE_LENGTH];
    getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(nonce)
}

/// AES-256-GCM cipher bound to one key.
///
/// Keyed once and reused for every field of a record.
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    pub fn new(key: &Key) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt raw bytes. Returns `[nonce:12][ciphertext+tag]`.
    pub fn encrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = generate_nonce()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, data)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt `[nonce:12][ciphertext+tag]`.
    pub fn decrypt_bytes(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let min_length = AES_GCM_NONCE_LENGTH + AES_GCM_TAG_LENGTH;
        if blob.len() < min_length {
            return Err(CryptoError::DecodeFailure(format!(
                "ciphertext too short: {} bytes, need at least {}",
                blob.len(),
                min_length
            )));
        }

        let nonce = Nonce::from_slice(&blob[..AES_GCM_NONCE_LENGTH]);
        let ciphertext = &blob[AES_GCM_NONCE_LENGTH..];

        // aes-gcm reports every failure as an opaque tag mismatch
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailure)
    }

    /// Encrypt a string into a base64 transport string.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        let blob = self.encrypt_bytes(plaintext.as_bytes())?;
        Ok(base64_encode(&blob))
    }

    /// Decrypt a base64 transport string produced by [`FieldCipher::encrypt_str`].
    pub fn decrypt_str(&self, encoded: &str) -> Result<String, CryptoError> {
        let blob = base64_decode(encoded)?;
        let plaintext = self.decrypt_bytes(&blob)?;
        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecodeFailure(format!("plaintext is not UTF-8: {e}")))
    }
}

/// Encrypt `plaintext` under `key` into a base64 string.
pub fn encrypt(plaintext: &str, key: &Key) -> Result<String, CryptoError> {
    FieldCipher::new(key)?.encrypt_str(plaintext)
}

/// Decrypt a base64 string produced by [`encrypt`].
///
/// Fails with `AuthenticationFailure` on a tag mismatch and `DecodeFailure`
/// on malformed input. Never returns unauthenticated plaintext.
pub fn decrypt(encoded: &str, key: &Key) -> Result<String, CryptoError> {
    FieldCipher::new(key)?.decrypt_str(encoded)
}
