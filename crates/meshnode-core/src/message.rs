//! Message: the unit of relayed, content-addressed chat traffic.
//!
//! A message is signed by its issuing access point and deduplicated across
//! the mesh by its hashKey. The hashKey covers only {content, tod, usernick,
//! origin}; image fields ride along outside the content address.

use serde::{Deserialize, Serialize};

use crate::canonical::{b64, MessageSignable};
use crate::crypto::Keypair;
use crate::error::CoreError;

/// Split a `signature.<APCertificate>` envelope into its signature head and
/// certificate tail. The tail contains dots of its own.
pub fn split_signed_envelope(raw: &str) -> Result<(&str, &str), CoreError> {
    match raw.split_once('.') {
        Some((signature, certificate)) if !signature.is_empty() && !certificate.is_empty() => {
            Ok((signature, certificate))
        }
        _ => Err(CoreError::MalformedCertificate(
            "missing signature or certificate segment".into(),
        )),
    }
}

/// A relayed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message body.
    pub content: String,

    /// Display name of the sender.
    pub usernick: String,

    /// Identifier of the issuing access point.
    pub origin: String,

    /// `signature.<APCertificate>` envelope produced by the issuing AP.
    pub certificate: String,

    /// Content address: hex SHA-256 over the base64 canonical JSON of
    /// {content, tod, usernick, origin}.
    pub hash_key: String,

    /// Channel the message belongs to.
    pub channel: String,

    /// Timestamp of dispatch (Unix ms).
    pub tod: i64,

    /// False when the issuing AP's certificate resolved through the
    /// NO_CERT path.
    pub is_safe: bool,

    /// Whether an image is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_image: Option<bool>,

    /// Base64 image payload. Not part of the content address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

impl Message {
    /// The signed/content-addressed core of this message.
    pub fn signable(&self) -> MessageSignable {
        MessageSignable {
            content: self.content.clone(),
            tod: self.tod,
            usernick: self.usernick.clone(),
            origin: self.origin.clone(),
        }
    }

    /// Recompute the content address from the message fields.
    pub fn compute_hash_key(&self) -> String {
        self.signable().hash_key()
    }

    /// Split the certificate field into (signature, AP certificate).
    pub fn split_certificate(&self) -> Result<(&str, &str), CoreError> {
        split_signed_envelope(&self.certificate)
    }
}

/// Builder for signed messages.
pub struct MessageBuilder {
    content: String,
    usernick: String,
    channel: String,
    tod: i64,
    has_image: Option<bool>,
    image_data: Option<String>,
}

impl MessageBuilder {
    /// Start building a message.
    pub fn new(content: impl Into<String>, usernick: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usernick: usernick.into(),
            channel: String::new(),
            tod: 0,
            has_image: None,
            image_data: None,
        }
    }

    /// Set the channel.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Set the dispatch timestamp.
    pub fn tod(mut self, tod: i64) -> Self {
        self.tod = tod;
        self
    }

    /// Attach a base64 image payload.
    pub fn image(mut self, image_data: impl Into<String>) -> Self {
        self.has_image = Some(true);
        self.image_data = Some(image_data.into());
        self
    }

    /// Sign with the issuing access point's key and build the message.
    pub fn sign(
        self,
        ap_keypair: &Keypair,
        ap_id: &str,
        ap_certificate: &str,
    ) -> Result<Message, CoreError> {
        let signable = MessageSignable {
            content: self.content.clone(),
            tod: self.tod,
            usernick: self.usernick.clone(),
            origin: ap_id.to_string(),
        };
        let signature = ap_keypair.sign(&signable.canonical_bytes())?;
        let hash_key = signable.hash_key();

        Ok(Message {
            content: self.content,
            usernick: self.usernick,
            origin: ap_id.to_string(),
            certificate: format!("{}.{}", b64::encode(signature), ap_certificate),
            hash_key,
            channel: self.channel,
            tod: self.tod,
            is_safe: true,
            has_image: self.has_image,
            image_data: self.image_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(content: &str, tod: i64, image: Option<&str>) -> Message {
        let ap = Keypair::from_seed(&[0x02; 32]).unwrap();
        let mut builder = MessageBuilder::new(content, "alice").channel("general").tod(tod);
        if let Some(data) = image {
            builder = builder.image(data);
        }
        builder.sign(&ap, "ap-north", "certstub.NO_CERT").unwrap()
    }

    #[test]
    fn test_hash_key_matches_computed() {
        let message = make_message("hello", 1736870400000, None);
        assert_eq!(message.hash_key, message.compute_hash_key());
    }

    #[test]
    fn test_hash_key_changes_with_content() {
        let a = make_message("hello", 1736870400000, None);
        let b = make_message("goodbye", 1736870400000, None);
        assert_ne!(a.hash_key, b.hash_key);
    }

    // The content address deliberately excludes image fields: two messages
    // identical in {content, tod, usernick, origin} but carrying different
    // attachments collide and dedupe to one. This mirrors the deployed wire
    // behavior; changing it would fork the content-address space.
    #[test]
    fn test_hash_key_ignores_image_fields() {
        let plain = make_message("hello", 1736870400000, None);
        let with_image = make_message("hello", 1736870400000, Some("aW1hZ2U="));
        assert_eq!(plain.hash_key, with_image.hash_key);
    }

    #[test]
    fn test_split_certificate() {
        let message = make_message("hello", 1736870400000, None);
        let (signature, certificate) = message.split_certificate().unwrap();
        assert!(!signature.contains('.'));
        assert_eq!(certificate, "certstub.NO_CERT");
    }

    #[test]
    fn test_split_envelope_malformed() {
        assert!(split_signed_envelope("nodots").is_err());
        assert!(split_signed_envelope(".leading").is_err());
    }

    #[test]
    fn test_serde_camel_case() {
        let message = make_message("hi", 5, None);
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"hashKey\""));
        assert!(json.contains("\"isSafe\""));
        assert!(!json.contains("\"hasImage\"")); // skipped when None
    }
}
