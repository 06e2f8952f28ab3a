//! Error types for the recovery module.

use thiserror::Error;

/// Errors that can occur during identity recovery.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Request timestamp outside the freshness window.
    #[error("request timestamp outside freshness window")]
    Timeout,

    /// No matching identity, request or access point.
    #[error("not found: {0}")]
    NotFound(String),

    /// The record exists but cannot answer this operation (no recovery
    /// material, already completed, expired, ...).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The phrase, signature or certificate did not check out.
    #[error("authentication failed: {0}")]
    AuthInvalid(String),

    /// Malformed input (missing fields, unparseable payload).
    #[error("malformed input: {0}")]
    Malformed(String),

    /// A genuine cryptographic fault (corrupt ciphertext, bad key), as
    /// opposed to a deliberate verification-false result.
    #[error("crypto failure: {0}")]
    Crypto(#[from] meshnode_core::CoreError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] meshnode_store::StoreError),
}

/// Result type for recovery operations.
pub type Result<T> = std::result::Result<T, RecoveryError>;
