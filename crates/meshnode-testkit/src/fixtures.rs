//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: an admin root, certified
//! access points, and fully wired nodes over in-memory stores.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use meshnode::{AccessPoint, NodeConfig};
use meshnode_core::crypto::Keypair;
use meshnode_core::{ApCertificate, ApData, Channel, Message, MessageBuilder, MtToken, TokenData};
use meshnode_recovery::ApDirectory;
use meshnode_store::MemoryStore;
use meshnode_trust::TrustContext;

/// A map-backed AP directory, shared between test nodes.
#[derive(Default)]
pub struct MapDirectory {
    certificates: RwLock<HashMap<String, String>>,
}

impl MapDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a certificate under an AP id.
    pub fn insert(&self, ap_id: impl Into<String>, certificate: impl Into<String>) {
        self.certificates
            .write()
            .unwrap()
            .insert(ap_id.into(), certificate.into());
    }
}

impl ApDirectory for MapDirectory {
    fn certificate_for(&self, ap_id: &str) -> Option<String> {
        self.certificates.read().unwrap().get(ap_id).cloned()
    }
}

/// A mesh under one admin root.
pub struct MeshFixture {
    pub admin: Keypair,
    pub directory: Arc<MapDirectory>,
}

impl MeshFixture {
    /// Create a mesh fixture with a deterministic admin key.
    pub fn new() -> Self {
        Self {
            admin: Keypair::from_seed(&[0x01; 32]).expect("admin keygen"),
            directory: Arc::new(MapDirectory::new()),
        }
    }

    /// Create a certified access-point fixture and register it in the
    /// directory.
    pub fn ap(&self, seed: u8, ap_id: &str) -> ApFixture {
        let keypair = Keypair::from_seed(&[seed; 32]).expect("ap keygen");
        let certificate = ApCertificate::issue_admin(
            ApData {
                ap_id: ap_id.to_string(),
                ap_pub: keypair.public_key_pem(),
            },
            &self.admin,
        )
        .expect("certificate issuance");
        self.directory.insert(ap_id, certificate.encode());

        ApFixture {
            ap_id: ap_id.to_string(),
            keypair,
            certificate,
        }
    }

    /// Build a fully wired node over an in-memory store.
    pub fn node(&self, ap: &ApFixture) -> AccessPoint<MemoryStore> {
        let context = TrustContext::new(
            self.admin.public_key(),
            ap.ap_id.clone(),
            ap.keypair.clone(),
            &ap.certificate,
        )
        .expect("trust context");
        AccessPoint::new(
            context,
            MemoryStore::new(),
            Arc::clone(&self.directory) as Arc<dyn ApDirectory>,
            NodeConfig::default(),
        )
    }
}

impl Default for MeshFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// One certified access point.
pub struct ApFixture {
    pub ap_id: String,
    pub keypair: Keypair,
    pub certificate: ApCertificate,
}

impl ApFixture {
    /// The certificate envelope string.
    pub fn certificate_string(&self) -> String {
        self.certificate.encode()
    }

    /// Create a message signed by this AP.
    pub fn make_message(&self, content: &str, usernick: &str, channel: &str, tod: i64) -> Message {
        MessageBuilder::new(content, usernick)
            .channel(channel)
            .tod(tod)
            .sign(&self.keypair, &self.ap_id, &self.certificate_string())
            .expect("message signing")
    }

    /// Create a channel signed by this AP.
    pub fn make_channel(&self, name: &str, is_active: bool, tod: i64) -> Channel {
        Channel::sign(name, is_active, tod, &self.keypair, &self.certificate_string())
            .expect("channel signing")
    }

    /// Issue a token for a user registered at this AP.
    pub fn issue_token(&self, username: &str, mt_pub_key: &str, tod: i64) -> String {
        MtToken::issue(
            TokenData {
                mt_username: username.to_string(),
                ap_reg: self.ap_id.clone(),
                mt_pub_key: mt_pub_key.to_string(),
                tod_reg: tod,
            },
            &self.keypair,
            &self.certificate_string(),
        )
        .expect("token issuance")
        .encode()
    }

    /// Issue a node-to-node token this AP uses to call a peer's sync.
    pub fn issue_node_token(&self, tod: i64) -> String {
        self.issue_token(
            &format!("node-{}", self.ap_id),
            &self.keypair.public_key_pem(),
            tod,
        )
    }
}

/// A fixed, valid recovery phrase for tests that need determinism.
pub fn fixed_phrase() -> Vec<String> {
    ["river", "sage", "summit", "ridge", "reed", "raven", "quartz", "prairie"]
        .iter()
        .map(|w| w.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_builds_verifiable_artifacts() {
        let mesh = MeshFixture::new();
        let ap = mesh.ap(0x02, "ap-test");
        let node = mesh.node(&ap);

        let message = ap.make_message("hello", "alice", "general", 1000);
        let check = node.verifier().verify_message(&message);
        assert!(check.verified, "reason: {:?}", check.reason);
        assert!(check.is_safe);

        let token = ap.issue_node_token(1000);
        let check = node.verifier().verify_token(&token, true);
        assert!(check.token_valid, "reason: {:?}", check.reason);
    }

    #[test]
    fn test_directory_lookup() {
        let mesh = MeshFixture::new();
        let ap = mesh.ap(0x02, "ap-test");
        assert_eq!(
            mesh.directory.certificate_for("ap-test"),
            Some(ap.certificate_string())
        );
        assert!(mesh.directory.certificate_for("ap-ghost").is_none());
    }
}
