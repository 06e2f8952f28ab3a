//! Recovery entities: per-user recovery records and the cross-AP
//! request/response pair.
//!
//! A cross-AP request travels the mesh as an opaque hybrid-encrypted blob;
//! only routing metadata (tempUserId, requesting/destination AP ids,
//! timestamps) is visible in the clear. The requester's ephemeral private
//! key never leaves its own store.

use serde::{Deserialize, Serialize};

/// Lifetime of a pending cross-AP recovery request: 48 hours.
pub const CROSS_AP_REQUEST_TTL_MS: i64 = 48 * 60 * 60 * 1000;

/// Retention of EXPIRED records before hard deletion: 7 days.
pub const EXPIRED_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Status of a cross-AP recovery attempt.
///
/// Transitions only Pending -> Completed or Pending -> Expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStatus {
    Pending,
    Completed,
    Expired,
}

impl RecoveryStatus {
    /// Whether a transition from self to `next` is legal.
    pub fn can_transition_to(self, next: RecoveryStatus) -> bool {
        matches!(
            (self, next),
            (RecoveryStatus::Pending, RecoveryStatus::Completed)
                | (RecoveryStatus::Pending, RecoveryStatus::Expired)
        )
    }

    /// Stable wire string, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStatus::Pending => "PENDING",
            RecoveryStatus::Completed => "COMPLETED",
            RecoveryStatus::Expired => "EXPIRED",
        }
    }

    /// Parse the wire string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RecoveryStatus::Pending),
            "COMPLETED" => Some(RecoveryStatus::Completed),
            "EXPIRED" => Some(RecoveryStatus::Expired),
            _ => None,
        }
    }
}

/// A registered user, including the local recovery record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Unique username (may be scoped as `name@apId`).
    pub username: String,

    /// The AP where this identity lives.
    pub ap_reg: String,

    /// The user's current public key, SPKI PEM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mt_pub_key: Option<String>,

    /// PBKDF2-HMAC-SHA512 hash of the recovery phrase, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_key_hash: Option<String>,

    /// Salt used for the recovery hash, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_key_salt: Option<String>,

    /// Unsalted SHA-256 fingerprint of the phrase, hex. This is the
    /// lookup key cross-AP requests carry; the PBKDF2 hash above is salted
    /// and cannot serve as an index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_fingerprint: Option<String>,

    /// When the recovery key was last rotated (Unix ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_key_updated_at: Option<i64>,

    /// Signature binding the recovery material to the user, base64.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_signature: Option<String>,

    /// Provenance of the recovery record ("registration", "cross-ap", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_source: Option<String>,

    /// When the user was created (Unix ms).
    pub created_at: i64,
}

impl UserRecord {
    /// Whether this record can answer a recovery attempt.
    pub fn has_recovery_material(&self) -> bool {
        self.recovery_key_hash.is_some() && self.recovery_key_salt.is_some()
    }
}

/// A cross-AP recovery request record.
///
/// Created at the requesting AP, consumed at the destination AP. The
/// sensitive fields (recovery hash, real user id, ephemeral public key)
/// travel only inside `encrypted_payload`; they are populated in the clear
/// on whichever node has legitimately produced or decrypted the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossApRecoveryRequest {
    /// Unique id of this recovery attempt.
    pub temp_user_id: String,

    /// The AP the user is currently talking to.
    pub requesting_ap_id: String,

    /// The AP where the identity actually lives.
    pub destination_ap_id: String,

    /// Hybrid-encrypted `CrossApRequestPayload`, opaque on the wire.
    pub encrypted_payload: String,

    /// SHA-256 of the recovery phrase, hex. Cleartext only off the wire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_hash: Option<String>,

    /// The username being recovered. Cleartext only off the wire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_user_id: Option<String>,

    /// The AP the identity lives on, as claimed by the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ap_id: Option<String>,

    /// Ephemeral RSA public key for encrypting the response, SPKI PEM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_public_key: Option<String>,

    /// Ephemeral RSA private key, PKCS#8 PEM. Requester-local only.
    #[serde(skip)]
    pub ephemeral_secret_pem: Option<String>,

    /// Attempt status.
    pub status: RecoveryStatus,

    /// When the request was created (Unix ms).
    pub created_at: i64,

    /// created_at + 48h; PENDING past this is swept to EXPIRED.
    pub expires_at: i64,
}

impl CrossApRecoveryRequest {
    /// Strip requester-local and decrypted fields for wire propagation.
    pub fn wire_view(&self) -> CrossApRecoveryRequest {
        CrossApRecoveryRequest {
            temp_user_id: self.temp_user_id.clone(),
            requesting_ap_id: self.requesting_ap_id.clone(),
            destination_ap_id: self.destination_ap_id.clone(),
            encrypted_payload: self.encrypted_payload.clone(),
            recovery_hash: None,
            real_user_id: None,
            source_ap_id: None,
            ephemeral_public_key: None,
            ephemeral_secret_pem: None,
            status: RecoveryStatus::Pending,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }

    /// Whether a PENDING request has outlived its expiry.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.status == RecoveryStatus::Pending && now > self.expires_at
    }
}

/// The decrypted contents of a cross-AP recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossApRequestPayload {
    pub temp_user_id: String,
    /// SHA-256 of the recovery phrase, hex.
    pub recovery_hash: String,
    /// The username being recovered.
    pub real_user_id: String,
    /// The AP the identity lives on.
    pub source_ap_id: String,
    /// Ephemeral RSA public key to encrypt the response under, SPKI PEM.
    pub ephemeral_public_key: String,
    /// When the request was created (Unix ms).
    pub timestamp: i64,
}

/// A cross-AP recovery response record.
///
/// Created at the destination AP, consumed at the requesting AP. The token
/// is opaque (encrypted under the requester's ephemeral public key), so the
/// full record travels the wire as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossApRecoveryResponse {
    /// Id of the recovery attempt this answers.
    pub temp_user_id: String,

    /// Hybrid-encrypted recovered token.
    pub encrypted_token_data: String,

    /// The AP that asked.
    pub requesting_ap_id: String,

    /// The AP that answered (where the identity lives).
    pub source_ap_id: String,

    /// Base64 RSA-PSS signature by the source AP over the signable fields.
    pub signature: String,

    /// When the response was created (Unix ms).
    pub created_at: i64,
}

impl CrossApRecoveryResponse {
    /// Canonical signing bytes: JSON of
    /// {tempUserId, encryptedTokenData, requestingApId, sourceApId, createdAt}
    /// in that order.
    pub fn signable_bytes(&self) -> Vec<u8> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ResponseSignable<'a> {
            temp_user_id: &'a str,
            encrypted_token_data: &'a str,
            requesting_ap_id: &'a str,
            source_ap_id: &'a str,
            created_at: i64,
        }
        serde_json::to_vec(&ResponseSignable {
            temp_user_id: &self.temp_user_id,
            encrypted_token_data: &self.encrypted_token_data,
            requesting_ap_id: &self.requesting_ap_id,
            source_ap_id: &self.source_ap_id,
            created_at: self.created_at,
        })
        .expect("JSON serialization failed")
    }
}
