//! Error types for meshnode core.

use thiserror::Error;

/// Core errors that can occur while handling signed artifacts.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
