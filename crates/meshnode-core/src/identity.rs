//! Identity artifacts: AP certificates, PU certificates, MT tokens and the
//! blacklist entry type.
//!
//! Certificates travel as dot-separated envelopes of base64 segments. They
//! are parsed exactly once at the boundary into a tagged variant; downstream
//! logic matches on the tag instead of re-splitting strings.
//!
//! Each variant retains the raw base64 segments it was parsed from, because
//! signatures cover the issuer's canonical JSON bytes — verification must
//! run over the received bytes, not over a re-serialization.

use serde::{Deserialize, Serialize};

use crate::canonical::{b64, decode_segment, ApData, PuData, TokenData};
use crate::crypto::Keypair;
use crate::error::CoreError;

/// Sentinel admin-signature value marking a self-asserted certificate.
pub const NO_CERT: &str = "NO_CERT";

/// An access-point certificate, parsed from its wire envelope.
///
/// Wire forms:
/// - 2 segments: `base64(APData).adminSignature` (admin-issued, or
///   self-asserted when the signature is the `NO_CERT` sentinel)
/// - 4 segments: `base64(APData).PUSignature.base64(PUData).adminSignature`
///   (vouched for by a privileged user)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApCertificate {
    /// Directly signed by the admin key.
    AdminIssued {
        ap_data: ApData,
        /// Raw base64 APData segment: the exact bytes the admin signed.
        ap_segment: String,
        /// Base64 RSA-PSS signature over the APData segment's JSON.
        admin_signature: String,
    },
    /// Vouched for by a privileged user whose own certificate chains to
    /// the admin key.
    PuIssued {
        ap_data: ApData,
        ap_segment: String,
        /// Base64 signature by the PU over the APData JSON.
        pu_signature: String,
        pu_data: PuData,
        /// Raw base64 PUData segment: the exact bytes the admin signed.
        pu_segment: String,
        /// Base64 admin signature over the PUData JSON.
        admin_signature: String,
    },
    /// Self-asserted and unverifiable. Trusted provisionally; everything
    /// it vouches for is marked unsafe.
    SelfAsserted { ap_data: ApData, ap_segment: String },
}

impl ApCertificate {
    /// Parse a certificate envelope.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let segments: Vec<&str> = raw.split('.').collect();
        match segments.len() {
            2 => {
                let ap_data: ApData = decode_segment(segments[0])?;
                if segments[1] == NO_CERT {
                    Ok(Self::SelfAsserted {
                        ap_data,
                        ap_segment: segments[0].to_string(),
                    })
                } else {
                    Ok(Self::AdminIssued {
                        ap_data,
                        ap_segment: segments[0].to_string(),
                        admin_signature: segments[1].to_string(),
                    })
                }
            }
            4 => {
                let ap_data: ApData = decode_segment(segments[0])?;
                let pu_data: PuData = decode_segment(segments[2])?;
                Ok(Self::PuIssued {
                    ap_data,
                    ap_segment: segments[0].to_string(),
                    pu_signature: segments[1].to_string(),
                    pu_data,
                    pu_segment: segments[2].to_string(),
                    admin_signature: segments[3].to_string(),
                })
            }
            n => Err(CoreError::MalformedCertificate(format!(
                "malformed certificate: {} segments",
                n
            ))),
        }
    }

    /// Reassemble the wire envelope from the retained raw segments.
    pub fn encode(&self) -> String {
        match self {
            Self::AdminIssued {
                ap_segment,
                admin_signature,
                ..
            } => format!("{}.{}", ap_segment, admin_signature),
            Self::PuIssued {
                ap_segment,
                pu_signature,
                pu_segment,
                admin_signature,
                ..
            } => format!(
                "{}.{}.{}.{}",
                ap_segment, pu_signature, pu_segment, admin_signature
            ),
            Self::SelfAsserted { ap_segment, .. } => format!("{}.{}", ap_segment, NO_CERT),
        }
    }

    /// The embedded AP identity data.
    pub fn ap_data(&self) -> &ApData {
        match self {
            Self::AdminIssued { ap_data, .. }
            | Self::PuIssued { ap_data, .. }
            | Self::SelfAsserted { ap_data, .. } => ap_data,
        }
    }

    /// The embedded AP identifier.
    pub fn ap_id(&self) -> &str {
        &self.ap_data().ap_id
    }

    /// Whether this certificate is the self-asserted (`NO_CERT`) form.
    pub fn is_self_asserted(&self) -> bool {
        matches!(self, Self::SelfAsserted { .. })
    }

    /// Issue an admin-signed certificate for an access point.
    pub fn issue_admin(ap_data: ApData, admin: &Keypair) -> Result<Self, CoreError> {
        let canonical = ap_data.canonical_bytes();
        let signature = admin.sign(&canonical)?;
        Ok(Self::AdminIssued {
            ap_segment: b64::encode(&canonical),
            admin_signature: b64::encode(signature),
            ap_data,
        })
    }

    /// Issue a PU-vouched certificate for an access point.
    ///
    /// The PU signs the APData; its own admin-signed certificate supplies
    /// the PUData segment and the admin signature.
    pub fn issue_by_pu(
        ap_data: ApData,
        pu_keypair: &Keypair,
        pu_certificate: &PuCertificate,
    ) -> Result<Self, CoreError> {
        let canonical = ap_data.canonical_bytes();
        let pu_signature = pu_keypair.sign(&canonical)?;
        Ok(Self::PuIssued {
            ap_segment: b64::encode(&canonical),
            pu_signature: b64::encode(pu_signature),
            pu_data: pu_certificate.pu_data.clone(),
            pu_segment: pu_certificate.pu_segment.clone(),
            admin_signature: pu_certificate.admin_signature.clone(),
            ap_data,
        })
    }

    /// Build a self-asserted certificate (no signature chain).
    pub fn self_asserted(ap_data: ApData) -> Self {
        let canonical = ap_data.canonical_bytes();
        Self::SelfAsserted {
            ap_segment: b64::encode(canonical),
            ap_data,
        }
    }
}

/// A privileged user's certificate: `base64(PUData).adminSignature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuCertificate {
    pub pu_data: PuData,
    /// Raw base64 PUData segment.
    pub pu_segment: String,
    /// Base64 admin signature over the PUData JSON.
    pub admin_signature: String,
}

impl PuCertificate {
    /// Issue an admin-signed PU certificate.
    pub fn issue(pu_data: PuData, admin: &Keypair) -> Result<Self, CoreError> {
        let canonical = pu_data.canonical_bytes();
        let signature = admin.sign(&canonical)?;
        Ok(Self {
            pu_segment: b64::encode(&canonical),
            admin_signature: b64::encode(signature),
            pu_data,
        })
    }

    /// Parse from the wire envelope.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 2 {
            return Err(CoreError::MalformedCertificate(format!(
                "malformed PU certificate: {} segments",
                segments.len()
            )));
        }
        let pu_data: PuData = decode_segment(segments[0])?;
        Ok(Self {
            pu_data,
            pu_segment: segments[0].to_string(),
            admin_signature: segments[1].to_string(),
        })
    }

    /// Reassemble the wire envelope.
    pub fn encode(&self) -> String {
        format!("{}.{}", self.pu_segment, self.admin_signature)
    }
}

/// A mobile-terminal authentication token:
/// `base64(TokenData).signature.<APCertificate>`.
///
/// The certificate tail itself contains dots, so parsing takes the first
/// two segments and re-joins the remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtToken {
    pub token_data: TokenData,
    /// Raw base64 TokenData segment: the exact bytes the AP signed.
    pub data_segment: String,
    /// Base64 RSA-PSS signature by the issuing AP over the TokenData JSON.
    pub signature: String,
    /// The issuing AP's certificate envelope, verbatim.
    pub certificate: String,
}

impl MtToken {
    /// Parse a token envelope.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() < 3 {
            return Err(CoreError::MalformedToken(format!(
                "malformed token: {} segments",
                segments.len()
            )));
        }
        let token_data: TokenData = decode_segment(segments[0])
            .map_err(|e| CoreError::MalformedToken(e.to_string()))?;
        Ok(Self {
            token_data,
            data_segment: segments[0].to_string(),
            signature: segments[1].to_string(),
            certificate: segments[2..].join("."),
        })
    }

    /// Reassemble the wire envelope.
    pub fn encode(&self) -> String {
        format!("{}.{}.{}", self.data_segment, self.signature, self.certificate)
    }

    /// Issue a token for a terminal, signed by the access point's key.
    pub fn issue(
        token_data: TokenData,
        ap_keypair: &Keypair,
        ap_certificate: &str,
    ) -> Result<Self, CoreError> {
        let canonical = token_data.canonical_bytes();
        let signature = ap_keypair.sign(&canonical)?;
        Ok(Self {
            data_segment: b64::encode(&canonical),
            signature: b64::encode(signature),
            certificate: ap_certificate.to_string(),
            token_data,
        })
    }
}

/// A revoked privileged-user key. Append-only, globally propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistedPu {
    /// The revoked public key, SPKI PEM.
    pub pub_key: String,
    /// When the revocation was recorded (Unix ms).
    pub tod: i64,
}
