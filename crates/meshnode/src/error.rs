//! Node-level error taxonomy and wire rejections.
//!
//! Every rejection that crosses the boundary carries a stable type tag
//! (`*_RJT`) and a short error string. No stack traces, no internal field
//! names. Verification negatives arrive here already shaped as structured
//! results; genuine faults (crypto, storage) are mapped to their taxonomy
//! entry at this boundary.

use serde::Serialize;
use thiserror::Error;

use meshnode_core::CoreError;
use meshnode_recovery::RecoveryError;
use meshnode_store::StoreError;
use meshnode_sync::SyncError;

/// The stable error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Request timestamp too far from the server clock.
    Timeout,
    /// Signature/certificate/chain failure.
    AuthInvalid,
    /// No matching identity/request/channel.
    NotFound,
    /// Record exists but cannot answer this operation.
    InvalidState,
    /// Missing required fields, unparseable envelope.
    MalformedInput,
    /// Decryption/signature-library fault, distinct from a deliberate
    /// verification-false result.
    CryptoFailure,
    /// Storage or runtime failure.
    Internal,
}

/// Errors surfaced by access-point operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("request timestamp outside freshness window")]
    Timeout,

    #[error("authentication failed: {0}")]
    AuthInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NodeError {
    /// The taxonomy entry for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Timeout => ErrorKind::Timeout,
            NodeError::AuthInvalid(_) => ErrorKind::AuthInvalid,
            NodeError::NotFound(_) => ErrorKind::NotFound,
            NodeError::InvalidState(_) => ErrorKind::InvalidState,
            NodeError::MalformedInput(_) => ErrorKind::MalformedInput,
            NodeError::CryptoFailure(_) => ErrorKind::CryptoFailure,
            NodeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shape this error into a wire rejection for the given surface tag.
    pub fn rejection(&self, type_tag: &str) -> Rejection {
        Rejection {
            r#type: type_tag.to_string(),
            kind: self.kind(),
            error: self.to_string(),
        }
    }
}

/// A typed rejection as it crosses the boundary.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    /// Stable per-surface tag, e.g. `MSG_RJT`, `SYNC_RJT`, `RCV_RJT`.
    pub r#type: String,
    /// Taxonomy entry.
    pub kind: ErrorKind,
    /// Short human-readable description.
    pub error: String,
}

impl From<RecoveryError> for NodeError {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::Timeout => NodeError::Timeout,
            RecoveryError::NotFound(msg) => NodeError::NotFound(msg),
            RecoveryError::InvalidState(msg) => NodeError::InvalidState(msg),
            RecoveryError::AuthInvalid(msg) => NodeError::AuthInvalid(msg),
            RecoveryError::Malformed(msg) => NodeError::MalformedInput(msg),
            RecoveryError::Crypto(e) => NodeError::CryptoFailure(e.to_string()),
            RecoveryError::Store(e) => NodeError::Internal(e.to_string()),
        }
    }
}

impl From<SyncError> for NodeError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Store(e) => NodeError::Internal(e.to_string()),
            SyncError::Internal(msg) => NodeError::Internal(msg),
        }
    }
}

impl From<StoreError> for NodeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => NodeError::NotFound(msg),
            other => NodeError::Internal(other.to_string()),
        }
    }
}

impl From<CoreError> for NodeError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::MalformedCertificate(msg) | CoreError::MalformedToken(msg) => {
                NodeError::MalformedInput(msg)
            }
            other => NodeError::CryptoFailure(other.to_string()),
        }
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
