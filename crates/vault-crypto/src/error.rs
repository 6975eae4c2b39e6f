use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid salt length: expected {expected} bytes, got {got}")]
    InvalidSaltLength { expected: usize, got: usize },

    /// The GCM tag did not verify: wrong key, corrupted data or tampering.
    #[error("Authentication failed: wrong key or tampered ciphertext")]
    AuthenticationFailure,

    /// The stored ciphertext is not well-formed (bad encoding, too short, bad UTF-8).
    #[error("Malformed ciphertext: {0}")]
    DecodeFailure(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
