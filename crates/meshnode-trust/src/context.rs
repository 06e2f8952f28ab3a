//! The process root of trust, as an explicit value.
//!
//! The admin public key and this node's own identity are passed into every
//! component that needs them instead of living in globals. One context per
//! process preserves the "one root per process" semantic without hidden
//! state.

use rsa::RsaPublicKey;

use meshnode_core::crypto::{self, Keypair};
use meshnode_core::{ApCertificate, CoreError};

/// Root-of-trust material for one node.
#[derive(Clone)]
pub struct TrustContext {
    admin_public: RsaPublicKey,
    local_ap_id: String,
    local_keypair: Keypair,
    local_certificate: String,
}

impl TrustContext {
    /// Build a context from the admin public key and this node's identity.
    ///
    /// The certificate must embed `local_ap_id`; a mismatch here would make
    /// every artifact this node signs unverifiable elsewhere.
    pub fn new(
        admin_public: RsaPublicKey,
        local_ap_id: impl Into<String>,
        local_keypair: Keypair,
        local_certificate: &ApCertificate,
    ) -> Result<Self, CoreError> {
        let local_ap_id = local_ap_id.into();
        if local_certificate.ap_id() != local_ap_id {
            return Err(CoreError::MalformedCertificate(format!(
                "certificate is for '{}', node is '{}'",
                local_certificate.ap_id(),
                local_ap_id
            )));
        }
        Ok(Self {
            admin_public,
            local_ap_id,
            local_keypair,
            local_certificate: local_certificate.encode(),
        })
    }

    /// The admin public key, sole root of the chain.
    pub fn admin_public(&self) -> &RsaPublicKey {
        &self.admin_public
    }

    /// The admin public key as SPKI PEM, for the hello bootstrap.
    pub fn admin_public_pem(&self) -> Result<String, CoreError> {
        crypto::public_key_to_pem(&self.admin_public)
    }

    /// This node's AP identifier.
    pub fn local_ap_id(&self) -> &str {
        &self.local_ap_id
    }

    /// This node's signing keypair.
    pub fn local_keypair(&self) -> &Keypair {
        &self.local_keypair
    }

    /// This node's certificate envelope, verbatim.
    pub fn local_certificate(&self) -> &str {
        &self.local_certificate
    }
}

impl std::fmt::Debug for TrustContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustContext")
            .field("local_ap_id", &self.local_ap_id)
            .finish_non_exhaustive()
    }
}
