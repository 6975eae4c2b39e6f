use thiserror::Error;
use vault_crypto::CryptoError;

pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors raised by a storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Batch commit rejected: {0}")]
    BatchRejected(String),

    #[error("Stored value under {key:?} is not valid: {message}")]
    Corrupt { key: String, message: String },
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

#[derive(Debug, Error)]
pub enum VaultError {
    /// Ciphertext tag mismatch: wrong key or tampering.
    #[error("Authentication failed: wrong key or tampered ciphertext")]
    AuthenticationFailure,

    /// Stored ciphertext or marker attributes are malformed.
    #[error("Malformed stored data: {0}")]
    DecodeFailure(String),

    #[error("Encryption key requested before initialization")]
    NotInitialized,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Operation declined by user")]
    UserDeclined,

    #[error("Passphrase must be at least {min} characters")]
    InvalidPassphrase { min: usize },

    #[error("Record is missing a string `id` attribute")]
    MissingRecordId,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CryptoError> for VaultError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::AuthenticationFailure => Self::AuthenticationFailure,
            CryptoError::DecodeFailure(message) => Self::DecodeFailure(message),
            other => Self::Crypto(other),
        }
    }
}
