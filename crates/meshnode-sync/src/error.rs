//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during sync operations.
///
/// Unverifiable peer items are not errors; they are silently dropped and
/// counted in the report. Only storage faults and runtime failures surface
/// here.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] meshnode_store::StoreError),

    /// A verification task failed to join.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
