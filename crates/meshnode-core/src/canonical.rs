//! Canonical JSON byte functions for every signed structure.
//!
//! The mesh wire format signs over literal field order, not a normalized
//! encoding: each signed structure has exactly one canonical-bytes function,
//! and the field order of the Rust struct IS the serialization contract.
//! Reordering a field here breaks signature compatibility with every
//! deployed node, so these structs must never be touched casually.
//!
//! Content addressing follows the same rule: a message's hashKey is
//! `hex(SHA256(base64(canonicalJSON({content, tod, usernick, origin}))))`,
//! byte-identical on every node.

use serde::{Deserialize, Serialize};

use crate::crypto::Sha256Hash;
use crate::error::CoreError;

/// Base64 helpers for the dot-separated envelope format.
///
/// Standard alphabet with padding; the segment delimiter `.` never appears
/// in encoded output, which is what makes dot-splitting safe.
pub mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};

    use crate::error::CoreError;

    /// Encode bytes to standard base64.
    pub fn encode(data: impl AsRef<[u8]>) -> String {
        STANDARD.encode(data)
    }

    /// Decode standard base64.
    pub fn decode(data: &str) -> Result<Vec<u8>, CoreError> {
        STANDARD
            .decode(data)
            .map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// Identity data of an access point, embedded in its certificate.
///
/// Field order (apId, apPub) is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApData {
    /// The access point's unique identifier.
    pub ap_id: String,
    /// The access point's public key, SPKI PEM.
    pub ap_pub: String,
}

impl ApData {
    /// Canonical signing bytes: JSON with fields in declaration order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("JSON serialization failed")
    }
}

/// Identity data of a privileged user, embedded in 4-segment certificates.
///
/// Field order (puName, puPub) is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuData {
    /// The privileged user's name.
    pub pu_name: String,
    /// The privileged user's public key, SPKI PEM.
    pub pu_pub: String,
}

impl PuData {
    /// Canonical signing bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("JSON serialization failed")
    }
}

/// The signed body of a mobile-terminal token.
///
/// Field order (mtUsername, apReg, mtPubKey, todReg) is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    /// Username of the mobile terminal.
    pub mt_username: String,
    /// Identifier of the access point that registered this terminal.
    pub ap_reg: String,
    /// The terminal's public key, SPKI PEM.
    pub mt_pub_key: String,
    /// Registration timestamp (Unix ms).
    pub tod_reg: i64,
}

impl TokenData {
    /// Canonical signing bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("JSON serialization failed")
    }
}

/// The content-addressed core of a message.
///
/// Field order (content, tod, usernick, origin) is both the signing payload
/// and the hashKey input. Image fields are deliberately excluded: the
/// content address of a message never covers its attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSignable {
    /// Message body.
    pub content: String,
    /// Timestamp of dispatch (Unix ms).
    pub tod: i64,
    /// Display name of the sender.
    pub usernick: String,
    /// Identifier of the issuing access point.
    pub origin: String,
}

impl MessageSignable {
    /// Canonical signing bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("JSON serialization failed")
    }

    /// The content address: hex SHA-256 over the base64 of the canonical
    /// JSON. Used for deduplication during sync.
    pub fn hash_key(&self) -> String {
        let encoded = b64::encode(self.canonical_bytes());
        Sha256Hash::hash(encoded.as_bytes()).to_hex()
    }
}

/// The signed body of a channel.
///
/// Field order (channelName, isActive, tod) is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSignable {
    /// Unique channel name.
    pub channel_name: String,
    /// Whether the channel is active.
    pub is_active: bool,
    /// Last-modified timestamp (Unix ms).
    pub tod: i64,
}

impl ChannelSignable {
    /// Canonical signing bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("JSON serialization failed")
    }
}

/// Split a dot-separated envelope into its segments.
pub fn split_segments(raw: &str) -> Vec<&str> {
    raw.split('.').collect()
}

/// Decode a base64 JSON segment into a typed value.
pub fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, CoreError> {
    let bytes = b64::decode(segment)?;
    serde_json::from_slice(&bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
}
