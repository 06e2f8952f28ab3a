//! The Trust Verifier: authenticates AP certificates, MT tokens, and the
//! embedded certificates carried by messages and channels.
//!
//! Verification never fails with an error on malformed input; it returns a
//! structured negative result with a reason. Only the caller decides what a
//! rejection means (drop the item, reject the request). Signature checks
//! hold no locks and mutate nothing, so they parallelize freely.

use std::collections::HashSet;

use rsa::RsaPublicKey;

use meshnode_core::canonical::b64;
use meshnode_core::crypto::{parse_public_key_pem, pss_verify};
use meshnode_core::{ApCertificate, Channel, Message, MtToken};

use crate::context::TrustContext;

/// Trust resolution outcome for an AP certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    /// The chain verifies back to the admin key.
    Valid,
    /// Self-asserted (`NO_CERT` sentinel): provisionally trusted, artifacts
    /// it vouches for are marked unsafe.
    NoCert,
    /// The chain is broken or the envelope is malformed.
    Invalid,
}

/// Result of verifying an AP certificate.
#[derive(Debug, Clone)]
pub struct ApTrust {
    /// True only for a fully verified chain.
    pub verified: bool,
    /// The AP public key resolved from the certificate, when parseable.
    pub ap_public_key: Option<RsaPublicKey>,
    /// Trust classification.
    pub trust_level: TrustLevel,
    /// Human-readable rejection reason, when not Valid.
    pub reason: Option<String>,
}

impl ApTrust {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            verified: false,
            ap_public_key: None,
            trust_level: TrustLevel::Invalid,
            reason: Some(reason.into()),
        }
    }

    /// Valid and NoCert certificates are usable; Invalid is not.
    pub fn is_usable(&self) -> bool {
        matches!(self.trust_level, TrustLevel::Valid | TrustLevel::NoCert)
    }
}

/// Result of verifying an MT token.
#[derive(Debug, Clone)]
pub struct TokenCheck {
    /// Trust resolution for the embedded AP certificate. None when the
    /// chain was not required or the token never parsed.
    pub ap_trust: Option<ApTrust>,
    /// Whether the token signature verified against the resolved AP key.
    pub token_valid: bool,
    /// The terminal's public key from the token data, when valid.
    pub mt_public_key: Option<RsaPublicKey>,
    /// Human-readable rejection reason, when invalid.
    pub reason: Option<String>,
}

impl TokenCheck {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ap_trust: None,
            token_valid: false,
            mt_public_key: None,
            reason: Some(reason.into()),
        }
    }
}

/// Result of verifying a message or channel certificate.
#[derive(Debug, Clone)]
pub struct ArtifactCheck {
    /// Whether the signature verified against a usable certificate.
    pub verified: bool,
    /// False iff trust resolved through the NO_CERT path.
    pub is_safe: bool,
    /// Internal rejection reason; never sent over the wire.
    pub reason: Option<String>,
}

impl ArtifactCheck {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            verified: false,
            is_safe: false,
            reason: Some(reason.into()),
        }
    }
}

/// The Trust Verifier.
#[derive(Debug, Clone)]
pub struct TrustVerifier {
    context: TrustContext,
}

impl TrustVerifier {
    /// Create a verifier rooted at the given context.
    pub fn new(context: TrustContext) -> Self {
        Self { context }
    }

    /// The root-of-trust context.
    pub fn context(&self) -> &TrustContext {
        &self.context
    }

    /// Verify an AP certificate envelope.
    pub fn verify_ap_certificate(&self, raw: &str) -> ApTrust {
        self.verify_ap_certificate_guarded(raw, &HashSet::new())
    }

    /// Verify an AP certificate envelope, treating the given PU public keys
    /// as revoked. A blacklisted PU cannot vouch for anyone.
    pub fn verify_ap_certificate_guarded(
        &self,
        raw: &str,
        revoked_pu_keys: &HashSet<String>,
    ) -> ApTrust {
        let certificate = match ApCertificate::parse(raw) {
            Ok(certificate) => certificate,
            Err(e) => return ApTrust::invalid(format!("malformed certificate: {}", e)),
        };
        self.resolve_certificate(&certificate, revoked_pu_keys)
    }

    /// Resolve trust for an already-parsed certificate.
    pub fn resolve_certificate(
        &self,
        certificate: &ApCertificate,
        revoked_pu_keys: &HashSet<String>,
    ) -> ApTrust {
        match certificate {
            ApCertificate::SelfAsserted { ap_data, .. } => ApTrust {
                verified: false,
                ap_public_key: parse_public_key_pem(&ap_data.ap_pub).ok(),
                trust_level: TrustLevel::NoCert,
                reason: Some("self-asserted certificate".into()),
            },
            ApCertificate::AdminIssued {
                ap_data,
                ap_segment,
                admin_signature,
            } => {
                let signed = match b64::decode(ap_segment) {
                    Ok(bytes) => bytes,
                    Err(_) => return ApTrust::invalid("unreadable certificate data"),
                };
                let signature = match b64::decode(admin_signature) {
                    Ok(bytes) => bytes,
                    Err(_) => return ApTrust::invalid("unreadable admin signature"),
                };
                if !pss_verify(self.context.admin_public(), &signed, &signature) {
                    return ApTrust::invalid("admin signature verification failed");
                }
                match parse_public_key_pem(&ap_data.ap_pub) {
                    Ok(key) => ApTrust {
                        verified: true,
                        ap_public_key: Some(key),
                        trust_level: TrustLevel::Valid,
                        reason: None,
                    },
                    Err(_) => ApTrust::invalid("unparseable AP public key"),
                }
            }
            ApCertificate::PuIssued {
                ap_data,
                ap_segment,
                pu_signature,
                pu_data,
                pu_segment,
                admin_signature,
            } => {
                // Chain order: admin vouches for the PU, the PU vouches
                // for the AP.
                let pu_signed = match b64::decode(pu_segment) {
                    Ok(bytes) => bytes,
                    Err(_) => return ApTrust::invalid("unreadable PU certificate data"),
                };
                let admin_sig = match b64::decode(admin_signature) {
                    Ok(bytes) => bytes,
                    Err(_) => return ApTrust::invalid("unreadable admin signature"),
                };
                if !pss_verify(self.context.admin_public(), &pu_signed, &admin_sig) {
                    return ApTrust::invalid("PU certificate not signed by admin");
                }

                if revoked_pu_keys.contains(&pu_data.pu_pub) {
                    return ApTrust::invalid("privileged user is blacklisted");
                }

                let pu_key = match parse_public_key_pem(&pu_data.pu_pub) {
                    Ok(key) => key,
                    Err(_) => return ApTrust::invalid("unparseable PU public key"),
                };
                let ap_signed = match b64::decode(ap_segment) {
                    Ok(bytes) => bytes,
                    Err(_) => return ApTrust::invalid("unreadable certificate data"),
                };
                let pu_sig = match b64::decode(pu_signature) {
                    Ok(bytes) => bytes,
                    Err(_) => return ApTrust::invalid("unreadable PU signature"),
                };
                if !pss_verify(&pu_key, &ap_signed, &pu_sig) {
                    return ApTrust::invalid("PU signature verification failed");
                }

                match parse_public_key_pem(&ap_data.ap_pub) {
                    Ok(key) => ApTrust {
                        verified: true,
                        ap_public_key: Some(key),
                        trust_level: TrustLevel::Valid,
                        reason: None,
                    },
                    Err(_) => ApTrust::invalid("unparseable AP public key"),
                }
            }
        }
    }

    /// Verify an MT token envelope.
    ///
    /// With `require_ap_chain == false` the token's own embedded AP public
    /// key verifies the signature directly (the weaker first-hello mode).
    /// Otherwise the certificate chain must resolve to a usable trust level
    /// and the embedded apId must match the token's apReg.
    pub fn verify_token(&self, raw: &str, require_ap_chain: bool) -> TokenCheck {
        let token = match MtToken::parse(raw) {
            Ok(token) => token,
            Err(e) => return TokenCheck::rejected(format!("{}", e)),
        };

        let certificate = match ApCertificate::parse(&token.certificate) {
            Ok(certificate) => certificate,
            Err(e) => return TokenCheck::rejected(format!("malformed certificate: {}", e)),
        };

        let signed = match b64::decode(&token.data_segment) {
            Ok(bytes) => bytes,
            Err(_) => return TokenCheck::rejected("unreadable token data"),
        };
        let signature = match b64::decode(&token.signature) {
            Ok(bytes) => bytes,
            Err(_) => return TokenCheck::rejected("unreadable token signature"),
        };

        if !require_ap_chain {
            // First-hello mode: trust the embedded key without the chain.
            let ap_key = match parse_public_key_pem(&certificate.ap_data().ap_pub) {
                Ok(key) => key,
                Err(_) => return TokenCheck::rejected("unparseable AP public key"),
            };
            if !pss_verify(&ap_key, &signed, &signature) {
                return TokenCheck::rejected("token signature verification failed");
            }
            return TokenCheck {
                ap_trust: None,
                mt_public_key: parse_public_key_pem(&token.token_data.mt_pub_key).ok(),
                token_valid: true,
                reason: None,
            };
        }

        let ap_trust = self.resolve_certificate(&certificate, &HashSet::new());
        if !ap_trust.is_usable() {
            let reason = ap_trust
                .reason
                .clone()
                .unwrap_or_else(|| "certificate not usable".into());
            return TokenCheck {
                ap_trust: Some(ap_trust),
                token_valid: false,
                mt_public_key: None,
                reason: Some(reason),
            };
        }

        if certificate.ap_id() != token.token_data.ap_reg {
            return TokenCheck {
                ap_trust: Some(ap_trust),
                token_valid: false,
                mt_public_key: None,
                reason: Some("token apReg does not match certificate apId".into()),
            };
        }

        let ap_key = match &ap_trust.ap_public_key {
            Some(key) => key.clone(),
            None => {
                return TokenCheck {
                    ap_trust: Some(ap_trust),
                    token_valid: false,
                    mt_public_key: None,
                    reason: Some("no AP public key resolved".into()),
                }
            }
        };

        if !pss_verify(&ap_key, &signed, &signature) {
            return TokenCheck {
                ap_trust: Some(ap_trust),
                token_valid: false,
                mt_public_key: None,
                reason: Some("token signature verification failed".into()),
            };
        }

        TokenCheck {
            mt_public_key: parse_public_key_pem(&token.token_data.mt_pub_key).ok(),
            ap_trust: Some(ap_trust),
            token_valid: true,
            reason: None,
        }
    }

    /// Verify a message's embedded certificate and signature.
    pub fn verify_message(&self, message: &Message) -> ArtifactCheck {
        self.verify_message_guarded(message, &HashSet::new())
    }

    /// Verify a message, treating the given PU keys as revoked.
    pub fn verify_message_guarded(
        &self,
        message: &Message,
        revoked_pu_keys: &HashSet<String>,
    ) -> ArtifactCheck {
        if message.hash_key != message.compute_hash_key() {
            return ArtifactCheck::rejected("hashKey does not match content");
        }
        self.verify_signed_artifact(
            &message.certificate,
            &message.signable().canonical_bytes(),
            revoked_pu_keys,
        )
    }

    /// Verify a channel's embedded certificate and signature.
    pub fn verify_channel(&self, channel: &Channel) -> ArtifactCheck {
        self.verify_channel_guarded(channel, &HashSet::new())
    }

    /// Verify a channel, treating the given PU keys as revoked.
    pub fn verify_channel_guarded(
        &self,
        channel: &Channel,
        revoked_pu_keys: &HashSet<String>,
    ) -> ArtifactCheck {
        self.verify_signed_artifact(
            &channel.channel_cert,
            &channel.signable().canonical_bytes(),
            revoked_pu_keys,
        )
    }

    /// Shared path for `signature.<APCertificate>` envelopes.
    fn verify_signed_artifact(
        &self,
        envelope: &str,
        signed_payload: &[u8],
        revoked_pu_keys: &HashSet<String>,
    ) -> ArtifactCheck {
        let (signature, certificate) = match meshnode_core::split_signed_envelope(envelope) {
            Ok(parts) => parts,
            Err(e) => return ArtifactCheck::rejected(format!("{}", e)),
        };

        let ap_trust = self.verify_ap_certificate_guarded(certificate, revoked_pu_keys);
        if !ap_trust.is_usable() {
            return ArtifactCheck::rejected(
                ap_trust.reason.unwrap_or_else(|| "certificate not usable".into()),
            );
        }

        let ap_key = match &ap_trust.ap_public_key {
            Some(key) => key,
            None => return ArtifactCheck::rejected("no AP public key resolved"),
        };
        let signature = match b64::decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => return ArtifactCheck::rejected("unreadable signature"),
        };
        if !pss_verify(ap_key, signed_payload, &signature) {
            return ArtifactCheck::rejected("signature verification failed");
        }

        ArtifactCheck {
            verified: true,
            is_safe: ap_trust.trust_level == TrustLevel::Valid,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshnode_core::crypto::Keypair;
    use meshnode_core::{ApData, Channel, MessageBuilder, MtToken, PuCertificate, PuData, TokenData};

    struct Setup {
        verifier: TrustVerifier,
        admin: Keypair,
        ap: Keypair,
        ap_cert: ApCertificate,
    }

    fn setup() -> Setup {
        let admin = Keypair::from_seed(&[0x01; 32]).unwrap();
        let ap = Keypair::from_seed(&[0x02; 32]).unwrap();
        let ap_cert = ApCertificate::issue_admin(
            ApData {
                ap_id: "ap-north".into(),
                ap_pub: ap.public_key_pem(),
            },
            &admin,
        )
        .unwrap();
        let context =
            TrustContext::new(admin.public_key(), "ap-north", ap.clone(), &ap_cert).unwrap();
        Setup {
            verifier: TrustVerifier::new(context),
            admin,
            ap,
            ap_cert,
        }
    }

    fn flip_signature_byte(cert: &str) -> String {
        // Flip one byte inside the decoded admin signature, then re-encode.
        let (head, signature) = cert.rsplit_once('.').unwrap();
        let mut bytes = b64::decode(signature).unwrap();
        bytes[0] ^= 0xff;
        format!("{}.{}", head, b64::encode(bytes))
    }

    #[test]
    fn test_admin_cert_valid() {
        let s = setup();
        let trust = s.verifier.verify_ap_certificate(&s.ap_cert.encode());
        assert!(trust.verified);
        assert_eq!(trust.trust_level, TrustLevel::Valid);
        assert!(trust.ap_public_key.is_some());
        assert!(trust.reason.is_none());
    }

    #[test]
    fn test_admin_cert_flipped_signature_invalid() {
        let s = setup();
        let tampered = flip_signature_byte(&s.ap_cert.encode());
        let trust = s.verifier.verify_ap_certificate(&tampered);
        assert!(!trust.verified);
        assert_eq!(trust.trust_level, TrustLevel::Invalid);
    }

    #[test]
    fn test_no_cert_sentinel() {
        let s = setup();
        let cert = ApCertificate::self_asserted(ApData {
            ap_id: "ap-lone".into(),
            ap_pub: s.ap.public_key_pem(),
        });
        let trust = s.verifier.verify_ap_certificate(&cert.encode());
        assert!(!trust.verified);
        assert_eq!(trust.trust_level, TrustLevel::NoCert);
        assert!(trust.is_usable());
        assert!(trust.ap_public_key.is_some());
    }

    #[test]
    fn test_malformed_certificate() {
        let s = setup();
        let trust = s.verifier.verify_ap_certificate("one.two.three");
        assert_eq!(trust.trust_level, TrustLevel::Invalid);
        assert!(trust.reason.unwrap().contains("malformed certificate"));
    }

    #[test]
    fn test_pu_issued_chain() {
        let s = setup();
        let pu = Keypair::from_seed(&[0x03; 32]).unwrap();
        let pu_cert = PuCertificate::issue(
            PuData {
                pu_name: "pu-1".into(),
                pu_pub: pu.public_key_pem(),
            },
            &s.admin,
        )
        .unwrap();
        let ap2 = Keypair::from_seed(&[0x04; 32]).unwrap();
        let cert = ApCertificate::issue_by_pu(
            ApData {
                ap_id: "ap-vouched".into(),
                ap_pub: ap2.public_key_pem(),
            },
            &pu,
            &pu_cert,
        )
        .unwrap();

        let trust = s.verifier.verify_ap_certificate(&cert.encode());
        assert!(trust.verified);
        assert_eq!(trust.trust_level, TrustLevel::Valid);

        // Same chain, but the PU key is revoked.
        let mut revoked = HashSet::new();
        revoked.insert(pu.public_key_pem());
        let trust = s.verifier.verify_ap_certificate_guarded(&cert.encode(), &revoked);
        assert_eq!(trust.trust_level, TrustLevel::Invalid);
        assert!(trust.reason.unwrap().contains("blacklisted"));
    }

    #[test]
    fn test_pu_chain_wrong_admin() {
        let s = setup();
        let rogue_admin = Keypair::from_seed(&[0x0a; 32]).unwrap();
        let pu = Keypair::from_seed(&[0x03; 32]).unwrap();
        let pu_cert = PuCertificate::issue(
            PuData {
                pu_name: "pu-rogue".into(),
                pu_pub: pu.public_key_pem(),
            },
            &rogue_admin,
        )
        .unwrap();
        let cert = ApCertificate::issue_by_pu(
            ApData {
                ap_id: "ap-rogue".into(),
                ap_pub: s.ap.public_key_pem(),
            },
            &pu,
            &pu_cert,
        )
        .unwrap();

        let trust = s.verifier.verify_ap_certificate(&cert.encode());
        assert_eq!(trust.trust_level, TrustLevel::Invalid);
    }

    fn make_token(s: &Setup, ap_reg: &str) -> MtToken {
        MtToken::issue(
            TokenData {
                mt_username: "alice".into(),
                ap_reg: ap_reg.into(),
                mt_pub_key: Keypair::from_seed(&[0x05; 32]).unwrap().public_key_pem(),
                tod_reg: 1736870400000,
            },
            &s.ap,
            &s.ap_cert.encode(),
        )
        .unwrap()
    }

    #[test]
    fn test_token_with_chain() {
        let s = setup();
        let token = make_token(&s, "ap-north");
        let check = s.verifier.verify_token(&token.encode(), true);
        assert!(check.token_valid, "reason: {:?}", check.reason);
        assert!(check.mt_public_key.is_some());
        assert_eq!(
            check.ap_trust.unwrap().trust_level,
            TrustLevel::Valid
        );
    }

    #[test]
    fn test_token_ap_reg_mismatch() {
        let s = setup();
        let token = make_token(&s, "ap-other");
        let check = s.verifier.verify_token(&token.encode(), true);
        assert!(!check.token_valid);
        assert!(check.reason.unwrap().contains("apReg"));
    }

    #[test]
    fn test_token_without_chain_requirement() {
        let s = setup();
        // Self-asserted cert: chain verification would classify NoCert,
        // but the embedded key still validates the signature.
        let lone_ap = Keypair::from_seed(&[0x06; 32]).unwrap();
        let cert = ApCertificate::self_asserted(ApData {
            ap_id: "ap-lone".into(),
            ap_pub: lone_ap.public_key_pem(),
        });
        let token = MtToken::issue(
            TokenData {
                mt_username: "bob".into(),
                ap_reg: "ap-lone".into(),
                mt_pub_key: lone_ap.public_key_pem(),
                tod_reg: 1,
            },
            &lone_ap,
            &cert.encode(),
        )
        .unwrap();

        let check = s.verifier.verify_token(&token.encode(), false);
        assert!(check.token_valid);
        assert!(check.ap_trust.is_none());
    }

    #[test]
    fn test_token_garbage() {
        let s = setup();
        let check = s.verifier.verify_token("not-a-token", true);
        assert!(!check.token_valid);
        assert!(check.reason.is_some());
    }

    #[test]
    fn test_message_verification() {
        let s = setup();
        let message = MessageBuilder::new("hello mesh", "alice")
            .channel("general")
            .tod(1736870400000)
            .sign(&s.ap, "ap-north", &s.ap_cert.encode())
            .unwrap();

        let check = s.verifier.verify_message(&message);
        assert!(check.verified, "reason: {:?}", check.reason);
        assert!(check.is_safe);
    }

    #[test]
    fn test_message_tampered_content() {
        let s = setup();
        let mut message = MessageBuilder::new("hello mesh", "alice")
            .channel("general")
            .tod(1736870400000)
            .sign(&s.ap, "ap-north", &s.ap_cert.encode())
            .unwrap();
        message.content = "tampered".into();

        let check = s.verifier.verify_message(&message);
        assert!(!check.verified);
    }

    #[test]
    fn test_message_from_self_asserted_ap_is_unsafe() {
        let s = setup();
        let lone_ap = Keypair::from_seed(&[0x06; 32]).unwrap();
        let cert = ApCertificate::self_asserted(ApData {
            ap_id: "ap-lone".into(),
            ap_pub: lone_ap.public_key_pem(),
        });
        let message = MessageBuilder::new("unvouched", "carol")
            .channel("general")
            .tod(1736870400000)
            .sign(&lone_ap, "ap-lone", &cert.encode())
            .unwrap();

        let check = s.verifier.verify_message(&message);
        assert!(check.verified);
        assert!(!check.is_safe);
    }

    #[test]
    fn test_channel_verification() {
        let s = setup();
        let channel =
            Channel::sign("general", true, 1736870400000, &s.ap, &s.ap_cert.encode()).unwrap();

        let check = s.verifier.verify_channel(&channel);
        assert!(check.verified, "reason: {:?}", check.reason);
        assert!(check.is_safe);

        let mut tampered = channel;
        tampered.is_active = false;
        let check = s.verifier.verify_channel(&tampered);
        assert!(!check.verified);
    }
}
