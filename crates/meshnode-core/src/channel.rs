//! Channel: a named message stream, replicated last-writer-wins.

use serde::{Deserialize, Serialize};

use crate::canonical::{b64, ChannelSignable};
use crate::crypto::Keypair;
use crate::error::CoreError;
use crate::message::split_signed_envelope;

/// A channel record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Unique channel name.
    pub channel_name: String,

    /// Whether the channel currently accepts messages.
    pub is_active: bool,

    /// Last-modified timestamp (Unix ms). Sync keeps the strictly newer copy.
    pub tod: i64,

    /// `signature.<APCertificate>` envelope over {channelName, isActive, tod}.
    pub channel_cert: String,
}

impl Channel {
    /// The signed core of this channel.
    pub fn signable(&self) -> ChannelSignable {
        ChannelSignable {
            channel_name: self.channel_name.clone(),
            is_active: self.is_active,
            tod: self.tod,
        }
    }

    /// Split the certificate field into (signature, AP certificate).
    pub fn split_certificate(&self) -> Result<(&str, &str), CoreError> {
        split_signed_envelope(&self.channel_cert)
    }

    /// Create a signed channel record.
    pub fn sign(
        channel_name: impl Into<String>,
        is_active: bool,
        tod: i64,
        ap_keypair: &Keypair,
        ap_certificate: &str,
    ) -> Result<Self, CoreError> {
        let signable = ChannelSignable {
            channel_name: channel_name.into(),
            is_active,
            tod,
        };
        let signature = ap_keypair.sign(&signable.canonical_bytes())?;
        Ok(Self {
            channel_name: signable.channel_name,
            is_active,
            tod,
            channel_cert: format!("{}.{}", b64::encode(signature), ap_certificate),
        })
    }
}
