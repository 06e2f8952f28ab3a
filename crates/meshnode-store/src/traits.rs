//! Store trait: the abstract interface for mesh state persistence.
//!
//! This trait keeps the trust/sync/recovery components storage-agnostic.
//! Implementations include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;

use meshnode_core::{
    BlacklistedPu, Channel, CrossApRecoveryRequest, CrossApRecoveryResponse, Message,
    RecoveryStatus, UserRecord,
};

use crate::error::Result;

/// Result of an insert-if-absent operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was inserted.
    Inserted,
    /// A record with the same key already exists (idempotent - not an error).
    AlreadyExists,
}

impl InsertOutcome {
    /// Whether the record was actually written.
    pub fn is_inserted(self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// The Store trait: async interface for mesh state.
///
/// # Design Notes
///
/// - **Insert-if-absent**: messages, blacklist entries and recovery
///   artifacts are keyed by a unique column; inserting a duplicate returns
///   `AlreadyExists`. The uniqueness lives in the storage layer, which is
///   what closes the check-then-act race on concurrent sync calls.
/// - **Last-writer-wins channels**: a channel upsert only lands when its
///   timestamp strictly improves on the stored one.
/// - **Status CAS**: recovery status updates are compare-and-set, so the
///   expiry sweep transitions each record exactly once no matter how many
///   sweepers run.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // User Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a user by exact username.
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Insert a user. `AlreadyExists` when the username is taken.
    async fn insert_user(&self, user: &UserRecord) -> Result<InsertOutcome>;

    /// Replace a user record by username.
    ///
    /// Returns `NotFound` if the user does not exist.
    async fn update_user(&self, user: &UserRecord) -> Result<()>;

    /// Look up a user by the unsalted recovery fingerprint (the SHA-256
    /// phrase digest carried by cross-AP requests).
    async fn find_user_by_recovery_hash(&self, recovery_hash: &str)
        -> Result<Option<UserRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Message Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a message if its hashKey is not present.
    async fn insert_message(&self, message: &Message) -> Result<InsertOutcome>;

    /// Look up a message by its content address.
    async fn get_message(&self, hash_key: &str) -> Result<Option<Message>>;

    /// Check presence by content address.
    async fn has_message(&self, hash_key: &str) -> Result<bool>;

    /// All messages in a channel, ordered by tod.
    async fn list_messages_by_channel(&self, channel: &str) -> Result<Vec<Message>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Channel Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a channel by name.
    async fn find_channel(&self, channel_name: &str) -> Result<Option<Channel>>;

    /// Store a channel iff it is new or strictly newer than the stored copy.
    ///
    /// Returns true when the write landed. Equal timestamps keep the
    /// existing copy.
    async fn upsert_channel_if_newer(&self, channel: &Channel) -> Result<bool>;

    /// List channels; `active_only` filters on the isActive flag.
    async fn list_channels(&self, active_only: bool) -> Result<Vec<Channel>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Blacklist Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a revoked PU key. Dedup by public key.
    async fn insert_blacklisted_pu(&self, entry: &BlacklistedPu) -> Result<InsertOutcome>;

    /// The full blacklist.
    async fn list_blacklist(&self) -> Result<Vec<BlacklistedPu>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Cross-AP Recovery Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a recovery request. Unique by tempUserId.
    async fn insert_recovery_request(
        &self,
        request: &CrossApRecoveryRequest,
    ) -> Result<InsertOutcome>;

    /// Look up a recovery request by tempUserId.
    async fn get_recovery_request(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApRecoveryRequest>>;

    /// Compare-and-set a request's status.
    ///
    /// Returns true iff the record existed with status `from` and is now
    /// `to`. Running the same transition twice returns false the second
    /// time.
    async fn update_recovery_request_status(
        &self,
        temp_user_id: &str,
        from: RecoveryStatus,
        to: RecoveryStatus,
    ) -> Result<bool>;

    /// Requests in a given status, optionally filtered by destination AP.
    async fn list_recovery_requests(
        &self,
        status: RecoveryStatus,
        destination_ap_id: Option<&str>,
    ) -> Result<Vec<CrossApRecoveryRequest>>;

    /// Hard-delete a request.
    async fn delete_recovery_request(&self, temp_user_id: &str) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Cross-AP Recovery Responses
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a recovery response. Unique by tempUserId — this constraint
    /// is what guarantees at most one response per recovery attempt under
    /// concurrent sync calls.
    async fn insert_recovery_response(
        &self,
        response: &CrossApRecoveryResponse,
    ) -> Result<InsertOutcome>;

    /// Look up a recovery response by tempUserId.
    async fn get_recovery_response(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApRecoveryResponse>>;

    /// Responses addressed to a given requesting AP.
    async fn list_recovery_responses_for(
        &self,
        requesting_ap_id: &str,
    ) -> Result<Vec<CrossApRecoveryResponse>>;

    /// All responses (cleanup uses this to age them out).
    async fn list_recovery_responses(&self) -> Result<Vec<CrossApRecoveryResponse>>;

    /// Hard-delete a response.
    async fn delete_recovery_response(&self, temp_user_id: &str) -> Result<()>;
}
