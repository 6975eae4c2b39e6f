pub mod aes_gcm;
pub mod base64;
pub mod error;
pub mod kdf;
pub mod types;

pub use aes_gcm::{decrypt, encrypt, generate_nonce, FieldCipher};
pub use base64::{base64_decode, base64_encode};
pub use error::CryptoError;
pub use kdf::{derive_key, generate_salt, hkdf_derive};
pub use types::{
    decode_salt, encode_salt, Key, Salt, AES_GCM_NONCE_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH,
    PBKDF2_ITERATIONS, SALT_LENGTH,
};
