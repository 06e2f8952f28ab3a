//! The Recovery Protocol: local and cross-AP identity recovery.
//!
//! Local recovery is a phrase check against the stored PBKDF2 material.
//! Cross-AP recovery propagates an encrypted request to the AP where the
//! identity actually lives, via ordinary sync traffic, and the answer comes
//! back encrypted under an ephemeral key only the requester holds.
//!
//! State machine per attempt:
//!
//! ```text
//! START --(same AP)--> LOCAL_VERIFY --(phrase matches)--> TOKEN_ISSUED
//! START --(same AP)--> LOCAL_VERIFY --(mismatch)-------> REJECTED
//! START --(different AP)--> CROSS_AP_PENDING --(response)--> CROSS_AP_READY
//!       --(client confirms)--> TOKEN_ISSUED
//! CROSS_AP_PENDING --(48h, no response)--> EXPIRED
//! ```

use std::sync::Arc;

use meshnode_core::crypto::{parse_public_key_pem, pss_verify, random_bytes, Keypair};
use meshnode_core::{
    b64, CrossApRecoveryRequest, CrossApRecoveryResponse, CrossApRequestPayload, MtToken,
    RecoveryStatus, TokenData, UserRecord, CROSS_AP_REQUEST_TTL_MS, EXPIRED_RETENTION_MS,
};
use meshnode_store::Store;
use meshnode_trust::TrustVerifier;

use crate::error::{RecoveryError, Result};
use crate::hybrid::{hybrid_decrypt, hybrid_encrypt};
use crate::phrase::{
    keypair_from_phrase, keypair_seed_from_fingerprint, phrase_fingerprint,
    verify_recovery_phrase,
};

/// External collaborator: AP discovery as a certificate lookup.
///
/// The core never discovers peers itself; whatever opportunistic layer
/// drives sync also knows which certificates belong to which AP ids.
pub trait ApDirectory: Send + Sync {
    /// Certificate envelope for a known access point, if any.
    fn certificate_for(&self, ap_id: &str) -> Option<String>;
}

/// Configuration for recovery behavior.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Reject recovery requests whose timestamp is further than this from
    /// the local clock (ms).
    pub freshness_window_ms: i64,
    /// Lifetime of a pending cross-AP request (ms).
    pub request_ttl_ms: i64,
    /// Retention of EXPIRED records before hard deletion (ms).
    pub expired_retention_ms: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: 5 * 60 * 1000,
            request_ttl_ms: CROSS_AP_REQUEST_TTL_MS,
            expired_retention_ms: EXPIRED_RETENTION_MS,
        }
    }
}

/// Terminal or intermediate result of a recovery attempt.
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    /// Local recovery succeeded; the token is final.
    Recovered { username: String, token: String },
    /// Cross-AP recovery is in flight; the temp token keeps the user on
    /// the network while they poll by tempUserId.
    CrossApInitiated {
        temp_user_id: String,
        temp_token: String,
    },
}

/// Counters from one cleanup sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// PENDING requests moved to EXPIRED.
    pub swept_expired: usize,
    /// EXPIRED requests hard-deleted after retention.
    pub purged_requests: usize,
    /// Responses hard-deleted after retention.
    pub purged_responses: usize,
}

/// The recovery protocol engine for one node.
pub struct RecoveryProtocol<S: Store> {
    store: Arc<S>,
    verifier: TrustVerifier,
    config: RecoveryConfig,
}

impl<S: Store> RecoveryProtocol<S> {
    /// Create a recovery engine over the given store and verifier.
    pub fn new(store: Arc<S>, verifier: TrustVerifier, config: RecoveryConfig) -> Self {
        Self {
            store,
            verifier,
            config,
        }
    }

    fn local_ap_id(&self) -> &str {
        self.verifier.context().local_ap_id()
    }

    /// Issue a token binding a username to a public key, signed by this AP.
    fn issue_token(&self, username: &str, mt_pub_key: String, now: i64) -> Result<String> {
        let context = self.verifier.context();
        let token = MtToken::issue(
            TokenData {
                mt_username: username.to_string(),
                ap_reg: context.local_ap_id().to_string(),
                mt_pub_key,
                tod_reg: now,
            },
            context.local_keypair(),
            context.local_certificate(),
        )?;
        Ok(token.encode())
    }

    /// Entry point for a recovery attempt.
    ///
    /// Same-AP requests resolve locally; anything else initiates the
    /// cross-AP flow against `ap_identifier`.
    pub async fn recover_identity(
        &self,
        username: &str,
        ap_identifier: &str,
        recovery_words: &[String],
        tod: i64,
        now: i64,
        directory: &dyn ApDirectory,
    ) -> Result<RecoveryOutcome> {
        if (now - tod).abs() > self.config.freshness_window_ms {
            return Err(RecoveryError::Timeout);
        }
        if username.is_empty() || recovery_words.is_empty() {
            return Err(RecoveryError::Malformed("missing username or phrase".into()));
        }

        if ap_identifier == self.local_ap_id() {
            self.recover_locally(username, ap_identifier, recovery_words, now)
                .await
        } else {
            self.initiate_cross_ap(username, ap_identifier, recovery_words, now, directory)
                .await
        }
    }

    /// Local recovery: phrase check against the stored record.
    async fn recover_locally(
        &self,
        username: &str,
        ap_identifier: &str,
        recovery_words: &[String],
        now: i64,
    ) -> Result<RecoveryOutcome> {
        // Scoped name first, then the bare username.
        let scoped = format!("{}@{}", username, ap_identifier);
        let mut user = match self.store.find_user(&scoped).await? {
            Some(user) => user,
            None => self
                .store
                .find_user(username)
                .await?
                .ok_or_else(|| RecoveryError::NotFound(format!("no identity '{}'", username)))?,
        };

        let (hash, salt) = match (&user.recovery_key_hash, &user.recovery_key_salt) {
            (Some(hash), Some(salt)) => (hash.clone(), salt.clone()),
            _ => {
                return Err(RecoveryError::InvalidState(
                    "identity has no recovery material".into(),
                ))
            }
        };

        if !verify_recovery_phrase(recovery_words, &hash, &salt) {
            return Err(RecoveryError::AuthInvalid("recovery phrase mismatch".into()));
        }

        let keypair = keypair_from_phrase(recovery_words)?;
        let public_pem = keypair.public_key_pem();
        let token = self.issue_token(&user.username, public_pem.clone(), now)?;

        user.mt_pub_key = Some(public_pem);
        user.recovery_key_updated_at = Some(now);
        self.store.update_user(&user).await?;

        Ok(RecoveryOutcome::Recovered {
            username: user.username,
            token,
        })
    }

    /// Start a cross-AP recovery: temp identity + encrypted request.
    async fn initiate_cross_ap(
        &self,
        username: &str,
        destination_ap_id: &str,
        recovery_words: &[String],
        now: i64,
        directory: &dyn ApDirectory,
    ) -> Result<RecoveryOutcome> {
        let destination_cert = directory
            .certificate_for(destination_ap_id)
            .ok_or_else(|| {
                RecoveryError::NotFound(format!("unknown access point '{}'", destination_ap_id))
            })?;

        // The request carries a phrase hash and an ephemeral key; it only
        // goes out under a destination key that chains to the admin.
        let trust = self.verifier.verify_ap_certificate(&destination_cert);
        if !trust.verified {
            return Err(RecoveryError::AuthInvalid(
                "destination certificate does not verify".into(),
            ));
        }
        let destination_key = trust
            .ap_public_key
            .ok_or_else(|| RecoveryError::AuthInvalid("no destination public key".into()))?;

        let temp_user_id = format!("tmp-{}", hex::encode(random_bytes::<8>()));
        let ephemeral = Keypair::generate()?;
        let derived = keypair_from_phrase(recovery_words)?;
        let derived_pem = derived.public_key_pem();

        let fingerprint = phrase_fingerprint(recovery_words);
        let payload = CrossApRequestPayload {
            temp_user_id: temp_user_id.clone(),
            recovery_hash: fingerprint.clone(),
            real_user_id: username.to_string(),
            source_ap_id: destination_ap_id.to_string(),
            ephemeral_public_key: ephemeral.public_key_pem(),
            timestamp: now,
        };
        let payload_json =
            serde_json::to_vec(&payload).expect("JSON serialization failed");
        let encrypted_payload = hybrid_encrypt(&payload_json, &destination_key)?;

        // Temp identity scoped to this AP keeps the user on the network
        // while the request is in flight.
        let temp_user = UserRecord {
            username: temp_user_id.clone(),
            ap_reg: self.local_ap_id().to_string(),
            mt_pub_key: Some(derived_pem.clone()),
            recovery_key_hash: None,
            recovery_key_salt: None,
            recovery_fingerprint: None,
            recovery_key_updated_at: None,
            recovery_signature: None,
            recovery_source: Some("cross-ap".into()),
            created_at: now,
        };
        self.store.insert_user(&temp_user).await?;
        let temp_token = self.issue_token(&temp_user_id, derived_pem, now)?;

        let request = CrossApRecoveryRequest {
            temp_user_id: temp_user_id.clone(),
            requesting_ap_id: self.local_ap_id().to_string(),
            destination_ap_id: destination_ap_id.to_string(),
            encrypted_payload,
            recovery_hash: Some(fingerprint),
            real_user_id: Some(username.to_string()),
            source_ap_id: Some(destination_ap_id.to_string()),
            ephemeral_public_key: Some(payload.ephemeral_public_key.clone()),
            ephemeral_secret_pem: Some(ephemeral.to_pkcs8_pem()?),
            status: RecoveryStatus::Pending,
            created_at: now,
            expires_at: now + self.config.request_ttl_ms,
        };
        if !self.store.insert_recovery_request(&request).await?.is_inserted() {
            return Err(RecoveryError::InvalidState(format!(
                "recovery attempt '{}' already exists",
                temp_user_id
            )));
        }

        Ok(RecoveryOutcome::CrossApInitiated {
            temp_user_id,
            temp_token,
        })
    }

    /// Destination side: answer pending requests addressed to this AP.
    ///
    /// Called after sync ingestion. Returns how many responses were issued.
    /// Undecryptable or unmatched requests are left pending; they expire on
    /// their own.
    pub async fn process_incoming_requests(&self, now: i64) -> Result<usize> {
        let pending = self
            .store
            .list_recovery_requests(RecoveryStatus::Pending, Some(self.local_ap_id()))
            .await?;

        let mut issued = 0;
        for request in pending {
            if request.is_expired_at(now) {
                continue;
            }
            // Consumed at most once: an existing response wins.
            if self
                .store
                .get_recovery_response(&request.temp_user_id)
                .await?
                .is_some()
            {
                self.store
                    .update_recovery_request_status(
                        &request.temp_user_id,
                        RecoveryStatus::Pending,
                        RecoveryStatus::Completed,
                    )
                    .await?;
                continue;
            }

            match self.answer_request(&request, now).await {
                Ok(true) => issued += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        temp_user_id = %request.temp_user_id,
                        error = %e,
                        "failed to answer cross-AP recovery request"
                    );
                }
            }
        }
        Ok(issued)
    }

    /// Answer one request addressed to this AP. Returns true if a response
    /// was issued.
    async fn answer_request(&self, request: &CrossApRecoveryRequest, now: i64) -> Result<bool> {
        let context = self.verifier.context();

        let payload_json = hybrid_decrypt(&request.encrypted_payload, context.local_keypair())?;
        let payload: CrossApRequestPayload = serde_json::from_slice(&payload_json)
            .map_err(|e| RecoveryError::Malformed(format!("request payload: {}", e)))?;

        let mut user = match self
            .store
            .find_user_by_recovery_hash(&payload.recovery_hash)
            .await?
        {
            Some(user) => user,
            None => {
                tracing::debug!(
                    temp_user_id = %request.temp_user_id,
                    "no identity matches recovery hash; leaving request pending"
                );
                return Ok(false);
            }
        };

        let ephemeral_key = parse_public_key_pem(&payload.ephemeral_public_key)
            .map_err(|_| RecoveryError::Malformed("unparseable ephemeral key".into()))?;

        // Both sides derive the replacement keypair from the fingerprint.
        let derived = Keypair::from_seed(&keypair_seed_from_fingerprint(&payload.recovery_hash))?;
        let derived_pem = derived.public_key_pem();
        let token = self.issue_token(&user.username, derived_pem.clone(), now)?;
        let encrypted_token_data = hybrid_encrypt(token.as_bytes(), &ephemeral_key)?;

        let mut response = CrossApRecoveryResponse {
            temp_user_id: request.temp_user_id.clone(),
            encrypted_token_data,
            requesting_ap_id: request.requesting_ap_id.clone(),
            source_ap_id: self.local_ap_id().to_string(),
            signature: String::new(),
            created_at: now,
        };
        let signature = context.local_keypair().sign(&response.signable_bytes())?;
        response.signature = b64::encode(signature);

        // The tempUserId uniqueness constraint closes the race: if a
        // concurrent sync call answered first, this insert loses and we
        // issue nothing.
        if !self
            .store
            .insert_recovery_response(&response)
            .await?
            .is_inserted()
        {
            return Ok(false);
        }

        user.mt_pub_key = Some(derived_pem);
        user.recovery_key_updated_at = Some(now);
        self.store.update_user(&user).await?;

        self.store
            .update_recovery_request_status(
                &request.temp_user_id,
                RecoveryStatus::Pending,
                RecoveryStatus::Completed,
            )
            .await?;

        Ok(true)
    }

    /// Requester side: poll the status of an attempt.
    pub async fn check_status(&self, temp_user_id: &str, now: i64) -> Result<RecoveryStatus> {
        let request = self
            .store
            .get_recovery_request(temp_user_id)
            .await?
            .ok_or_else(|| {
                RecoveryError::NotFound(format!("no recovery attempt '{}'", temp_user_id))
            })?;

        if self
            .store
            .get_recovery_response(temp_user_id)
            .await?
            .is_some()
        {
            self.store
                .update_recovery_request_status(
                    temp_user_id,
                    RecoveryStatus::Pending,
                    RecoveryStatus::Completed,
                )
                .await?;
            return Ok(RecoveryStatus::Completed);
        }

        if request.is_expired_at(now) {
            self.store
                .update_recovery_request_status(
                    temp_user_id,
                    RecoveryStatus::Pending,
                    RecoveryStatus::Expired,
                )
                .await?;
            return Ok(RecoveryStatus::Expired);
        }

        Ok(request.status)
    }

    /// Requester side: decrypt the recovered token once a response landed.
    pub async fn complete_recovery(
        &self,
        temp_user_id: &str,
        directory: &dyn ApDirectory,
    ) -> Result<String> {
        let request = self
            .store
            .get_recovery_request(temp_user_id)
            .await?
            .ok_or_else(|| {
                RecoveryError::NotFound(format!("no recovery attempt '{}'", temp_user_id))
            })?;

        let secret_pem = request.ephemeral_secret_pem.as_ref().ok_or_else(|| {
            RecoveryError::InvalidState("attempt was not initiated on this node".into())
        })?;

        let response = self
            .store
            .get_recovery_response(temp_user_id)
            .await?
            .ok_or_else(|| RecoveryError::InvalidState("no response received yet".into()))?;

        // The answer must carry a valid signature from the AP the request
        // was addressed to.
        let source_cert = directory
            .certificate_for(&response.source_ap_id)
            .ok_or_else(|| {
                RecoveryError::AuthInvalid(format!("unknown source AP '{}'", response.source_ap_id))
            })?;
        let trust = self.verifier.verify_ap_certificate(&source_cert);
        let source_key = match (trust.is_usable(), trust.ap_public_key) {
            (true, Some(key)) => key,
            _ => {
                return Err(RecoveryError::AuthInvalid(
                    "source certificate does not verify".into(),
                ))
            }
        };
        let signature = b64::decode(&response.signature)
            .map_err(|_| RecoveryError::AuthInvalid("unreadable response signature".into()))?;
        if !pss_verify(&source_key, &response.signable_bytes(), &signature) {
            return Err(RecoveryError::AuthInvalid(
                "response signature verification failed".into(),
            ));
        }

        let ephemeral = Keypair::from_pkcs8_pem(secret_pem)?;
        let token_bytes = hybrid_decrypt(&response.encrypted_token_data, &ephemeral)?;
        let token = String::from_utf8(token_bytes)
            .map_err(|_| RecoveryError::Malformed("recovered token is not UTF-8".into()))?;

        self.store
            .update_recovery_request_status(
                temp_user_id,
                RecoveryStatus::Pending,
                RecoveryStatus::Completed,
            )
            .await?;

        Ok(token)
    }

    /// Sweep PENDING requests past expiry to EXPIRED, and hard-delete
    /// EXPIRED artifacts past the retention window.
    ///
    /// Idempotent and safe to run on any schedule, including concurrently
    /// with itself: the CAS transition fires exactly once per record.
    pub async fn cleanup(&self, now: i64) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        for request in self
            .store
            .list_recovery_requests(RecoveryStatus::Pending, None)
            .await?
        {
            if request.is_expired_at(now)
                && self
                    .store
                    .update_recovery_request_status(
                        &request.temp_user_id,
                        RecoveryStatus::Pending,
                        RecoveryStatus::Expired,
                    )
                    .await?
            {
                report.swept_expired += 1;
            }
        }

        for request in self
            .store
            .list_recovery_requests(RecoveryStatus::Expired, None)
            .await?
        {
            if now > request.expires_at + self.config.expired_retention_ms {
                self.store
                    .delete_recovery_request(&request.temp_user_id)
                    .await?;
                report.purged_requests += 1;
            }
        }

        for response in self.store.list_recovery_responses().await? {
            if now > response.created_at + self.config.request_ttl_ms + self.config.expired_retention_ms
            {
                self.store
                    .delete_recovery_response(&response.temp_user_id)
                    .await?;
                report.purged_responses += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use meshnode_core::{ApCertificate, ApData};
    use meshnode_store::MemoryStore;
    use meshnode_trust::TrustContext;

    use crate::phrase::derive_recovery_material;

    struct MapDirectory(HashMap<String, String>);

    impl ApDirectory for MapDirectory {
        fn certificate_for(&self, ap_id: &str) -> Option<String> {
            self.0.get(ap_id).cloned()
        }
    }

    struct Node {
        protocol: RecoveryProtocol<MemoryStore>,
        store: Arc<MemoryStore>,
        cert: String,
    }

    fn make_node(seed: u8, ap_id: &str) -> Node {
        let admin = Keypair::from_seed(&[0x01; 32]).unwrap();
        let ap = Keypair::from_seed(&[seed; 32]).unwrap();
        let cert = ApCertificate::issue_admin(
            ApData {
                ap_id: ap_id.into(),
                ap_pub: ap.public_key_pem(),
            },
            &admin,
        )
        .unwrap();
        let context = TrustContext::new(admin.public_key(), ap_id, ap, &cert).unwrap();
        let store = Arc::new(MemoryStore::new());
        Node {
            protocol: RecoveryProtocol::new(
                Arc::clone(&store),
                TrustVerifier::new(context),
                RecoveryConfig::default(),
            ),
            store,
            cert: cert.encode(),
        }
    }

    fn phrase() -> Vec<String> {
        ["river", "sage", "summit", "ridge", "reed", "raven", "quartz", "prairie"]
            .iter()
            .map(|w| w.to_string())
            .collect()
    }

    async fn register_user(node: &Node, username: &str, words: &[String]) {
        let material = derive_recovery_material(words);
        node.store
            .insert_user(&UserRecord {
                username: username.into(),
                ap_reg: node.protocol.local_ap_id().into(),
                mt_pub_key: None,
                recovery_key_hash: Some(material.hash_hex),
                recovery_key_salt: Some(material.salt_hex),
                recovery_fingerprint: Some(crate::phrase::phrase_fingerprint(words)),
                recovery_key_updated_at: None,
                recovery_signature: None,
                recovery_source: Some("registration".into()),
                created_at: 1000,
            })
            .await
            .unwrap();
    }

    fn empty_directory() -> MapDirectory {
        MapDirectory(HashMap::new())
    }

    #[tokio::test]
    async fn test_local_recovery_success() {
        let node = make_node(0x02, "ap-a");
        let words = phrase();
        register_user(&node, "alice", &words).await;

        let outcome = node
            .protocol
            .recover_identity("alice", "ap-a", &words, 5000, 5000, &empty_directory())
            .await
            .unwrap();

        match outcome {
            RecoveryOutcome::Recovered { username, token } => {
                assert_eq!(username, "alice");
                let parsed = MtToken::parse(&token).unwrap();
                assert_eq!(parsed.token_data.mt_username, "alice");
                assert_eq!(parsed.token_data.ap_reg, "ap-a");
            }
            other => panic!("expected local recovery, got {:?}", other),
        }

        let user = node.store.find_user("alice").await.unwrap().unwrap();
        assert_eq!(user.recovery_key_updated_at, Some(5000));
        assert!(user.mt_pub_key.is_some());
    }

    #[tokio::test]
    async fn test_local_recovery_scoped_lookup() {
        let node = make_node(0x02, "ap-a");
        let words = phrase();
        register_user(&node, "alice@ap-a", &words).await;

        let outcome = node
            .protocol
            .recover_identity("alice", "ap-a", &words, 5000, 5000, &empty_directory())
            .await
            .unwrap();
        match outcome {
            RecoveryOutcome::Recovered { username, .. } => assert_eq!(username, "alice@ap-a"),
            other => panic!("expected local recovery, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_recovery_wrong_phrase() {
        let node = make_node(0x02, "ap-a");
        register_user(&node, "alice", &phrase()).await;

        let mut wrong = phrase();
        wrong[0] = "acorn".into();
        let result = node
            .protocol
            .recover_identity("alice", "ap-a", &wrong, 5000, 5000, &empty_directory())
            .await;
        assert!(matches!(result, Err(RecoveryError::AuthInvalid(_))));
    }

    #[tokio::test]
    async fn test_local_recovery_unknown_user() {
        let node = make_node(0x02, "ap-a");
        let result = node
            .protocol
            .recover_identity("ghost", "ap-a", &phrase(), 5000, 5000, &empty_directory())
            .await;
        assert!(matches!(result, Err(RecoveryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_recovery_no_material() {
        let node = make_node(0x02, "ap-a");
        node.store
            .insert_user(&UserRecord {
                username: "bare".into(),
                ap_reg: "ap-a".into(),
                mt_pub_key: None,
                recovery_key_hash: None,
                recovery_key_salt: None,
                recovery_fingerprint: None,
                recovery_key_updated_at: None,
                recovery_signature: None,
                recovery_source: None,
                created_at: 1000,
            })
            .await
            .unwrap();

        let result = node
            .protocol
            .recover_identity("bare", "ap-a", &phrase(), 5000, 5000, &empty_directory())
            .await;
        assert!(matches!(result, Err(RecoveryError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_freshness_window() {
        let node = make_node(0x02, "ap-a");
        register_user(&node, "alice", &phrase()).await;

        let stale_tod = 5000 - RecoveryConfig::default().freshness_window_ms - 1;
        let result = node
            .protocol
            .recover_identity("alice", "ap-a", &phrase(), stale_tod, 5000, &empty_directory())
            .await;
        assert!(matches!(result, Err(RecoveryError::Timeout)));
    }

    #[tokio::test]
    async fn test_cross_ap_initiation_creates_pending_request() {
        let a = make_node(0x02, "ap-a");
        let b = make_node(0x03, "ap-b");
        let mut directory = HashMap::new();
        directory.insert("ap-b".to_string(), b.cert.clone());
        let directory = MapDirectory(directory);

        let outcome = a
            .protocol
            .recover_identity("alice", "ap-b", &phrase(), 5000, 5000, &directory)
            .await
            .unwrap();

        let temp_user_id = match outcome {
            RecoveryOutcome::CrossApInitiated { temp_user_id, temp_token } => {
                let parsed = MtToken::parse(&temp_token).unwrap();
                assert_eq!(parsed.token_data.mt_username, temp_user_id);
                assert_eq!(parsed.token_data.ap_reg, "ap-a");
                temp_user_id
            }
            other => panic!("expected cross-AP initiation, got {:?}", other),
        };

        let request = a
            .store
            .get_recovery_request(&temp_user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, RecoveryStatus::Pending);
        assert_eq!(request.destination_ap_id, "ap-b");
        assert!(request.ephemeral_secret_pem.is_some());
        assert_eq!(
            request.expires_at - request.created_at,
            CROSS_AP_REQUEST_TTL_MS
        );

        // The temp identity exists and is scoped to the local AP.
        let temp_user = a.store.find_user(&temp_user_id).await.unwrap().unwrap();
        assert_eq!(temp_user.recovery_source.as_deref(), Some("cross-ap"));
    }

    #[tokio::test]
    async fn test_cross_ap_unknown_destination() {
        let a = make_node(0x02, "ap-a");
        let result = a
            .protocol
            .recover_identity("alice", "ap-nowhere", &phrase(), 5000, 5000, &empty_directory())
            .await;
        assert!(matches!(result, Err(RecoveryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_exactly_once_and_retains() {
        let node = make_node(0x02, "ap-a");
        let request = CrossApRecoveryRequest {
            temp_user_id: "tmp-old".into(),
            requesting_ap_id: "ap-a".into(),
            destination_ap_id: "ap-b".into(),
            encrypted_payload: "blob".into(),
            recovery_hash: None,
            real_user_id: None,
            source_ap_id: None,
            ephemeral_public_key: None,
            ephemeral_secret_pem: None,
            status: RecoveryStatus::Pending,
            created_at: 0,
            expires_at: 1000,
        };
        node.store.insert_recovery_request(&request).await.unwrap();

        // First sweep past expiry: transitions once.
        let report = node.protocol.cleanup(2000).await.unwrap();
        assert_eq!(report.swept_expired, 1);
        assert_eq!(report.purged_requests, 0);

        // Second sweep: nothing left to transition, still retained.
        let report = node.protocol.cleanup(2000).await.unwrap();
        assert_eq!(report.swept_expired, 0);
        assert_eq!(report.purged_requests, 0);
        assert!(node
            .store
            .get_recovery_request("tmp-old")
            .await
            .unwrap()
            .is_some());

        // Just inside retention: kept.
        let report = node
            .protocol
            .cleanup(1000 + EXPIRED_RETENTION_MS)
            .await
            .unwrap();
        assert_eq!(report.purged_requests, 0);

        // Past retention: hard-deleted.
        let report = node
            .protocol
            .cleanup(1000 + EXPIRED_RETENTION_MS + 1)
            .await
            .unwrap();
        assert_eq!(report.purged_requests, 1);
        assert!(node
            .store
            .get_recovery_request("tmp-old")
            .await
            .unwrap()
            .is_none());
    }
}
