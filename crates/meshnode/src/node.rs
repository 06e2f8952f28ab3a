//! The AccessPoint: unified API over trust, sync and recovery.
//!
//! One value per node, holding the store, the verifier, the sync engine and
//! the recovery protocol. The excluded HTTP layer maps each public method
//! here to a request/response pair; everything is transport-agnostic.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use meshnode_core::{Message, MessageBuilder, RecoveryStatus, UserRecord};
use meshnode_recovery::{
    derive_recovery_material, ApDirectory, CleanupReport, RecoveryConfig, RecoveryOutcome,
    RecoveryProtocol,
};
use meshnode_store::Store;
use meshnode_sync::{SyncConfig, SyncEngine, SyncReport, SyncRequest, SyncResponse};
use meshnode_trust::{TrustContext, TrustLevel, TrustVerifier};

use crate::error::{NodeError, Result};

/// Configuration for one access point.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Reject authenticated calls whose tod is further than this from the
    /// local clock (ms).
    pub freshness_window_ms: i64,
    /// Sync engine configuration.
    pub sync: SyncConfig,
    /// Recovery protocol configuration.
    pub recovery: RecoveryConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: 5 * 60 * 1000,
            sync: SyncConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Trust bootstrap payload for new clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloInfo {
    /// This node's AP identifier.
    pub ap_id: String,
    /// This node's certificate envelope.
    pub certificate: String,
    /// The admin public key, SPKI PEM.
    pub admin_public_key: String,
}

/// Body of a post-message call from a terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessage {
    pub content: String,
    pub tod: i64,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_image: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

/// Acknowledgment for an accepted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    /// The message's content address.
    pub hash_key: String,
    /// Server-side acceptance time (Unix ms).
    pub tod: i64,
}

/// Body of a recover-identity call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverIdentityRequest {
    pub username: String,
    pub ap_identifier: String,
    pub recovery_words: Vec<String>,
    pub tod: i64,
}

/// Polling view of a cross-AP recovery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStatusView {
    pub temp_user_id: String,
    pub status: RecoveryStatus,
}

/// The recovered token, handed back once per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRecovery {
    pub temp_user_id: String,
    pub token: String,
}

/// One mesh access point.
pub struct AccessPoint<S: Store> {
    store: Arc<S>,
    verifier: TrustVerifier,
    sync_engine: SyncEngine<S>,
    recovery: RecoveryProtocol<S>,
    directory: Arc<dyn ApDirectory>,
    config: NodeConfig,
    /// Whether this node's own certificate chains to the admin. Messages
    /// signed here inherit this safety flag.
    local_chain_valid: bool,
}

impl<S: Store + 'static> AccessPoint<S> {
    /// Assemble an access point from its root of trust, storage and the
    /// external AP directory.
    pub fn new(
        context: TrustContext,
        store: S,
        directory: Arc<dyn ApDirectory>,
        config: NodeConfig,
    ) -> Self {
        let store = Arc::new(store);
        let verifier = TrustVerifier::new(context);
        let local_chain_valid = verifier
            .verify_ap_certificate(verifier.context().local_certificate())
            .trust_level
            == TrustLevel::Valid;

        let sync_engine = SyncEngine::new(
            Arc::clone(&store),
            verifier.clone(),
            config.sync.clone(),
        );
        let recovery = RecoveryProtocol::new(
            Arc::clone(&store),
            verifier.clone(),
            config.recovery.clone(),
        );

        tracing::info!(
            ap_id = %verifier.context().local_ap_id(),
            chain_valid = local_chain_valid,
            "access point initialized"
        );

        Self {
            store,
            verifier,
            sync_engine,
            recovery,
            directory,
            config,
            local_chain_valid,
        }
    }

    /// The storage backend.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The trust verifier.
    pub fn verifier(&self) -> &TrustVerifier {
        &self.verifier
    }

    /// This node's AP identifier.
    pub fn ap_id(&self) -> &str {
        self.verifier.context().local_ap_id()
    }

    fn check_freshness(&self, tod: i64, now: i64) -> Result<()> {
        if (now - tod).abs() > self.config.freshness_window_ms {
            return Err(NodeError::Timeout);
        }
        Ok(())
    }

    /// Verify a caller token against the full chain. Returns the verified
    /// token data.
    async fn authenticate(&self, token: &str) -> Result<meshnode_core::TokenData> {
        let revoked: HashSet<String> = self
            .store
            .list_blacklist()
            .await?
            .into_iter()
            .map(|entry| entry.pub_key)
            .collect();
        // Token certificates get the same revocation treatment as message
        // certificates.
        let check = self.verifier.verify_token(token, true);
        if !check.token_valid {
            return Err(NodeError::AuthInvalid(
                check.reason.unwrap_or_else(|| "token rejected".into()),
            ));
        }
        let parsed = meshnode_core::MtToken::parse(token)
            .map_err(|e| NodeError::MalformedInput(e.to_string()))?;

        // A token vouched for by a blacklisted PU is no token at all.
        let trust = self
            .verifier
            .verify_ap_certificate_guarded(&parsed.certificate, &revoked);
        if !trust.is_usable() {
            return Err(NodeError::AuthInvalid(
                trust.reason.unwrap_or_else(|| "certificate rejected".into()),
            ));
        }

        Ok(parsed.token_data)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Hello / bootstrap
    // ─────────────────────────────────────────────────────────────────────────

    /// Trust bootstrap: this node's certificate and the admin public key.
    pub fn hello(&self) -> Result<HelloInfo> {
        let context = self.verifier.context();
        Ok(HelloInfo {
            ap_id: context.local_ap_id().to_string(),
            certificate: context.local_certificate().to_string(),
            admin_public_key: context.admin_public_pem()?,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Accept a message from an authenticated terminal, sign it as this
    /// node, and store it.
    pub async fn post_message(
        &self,
        token: &str,
        body: PostMessage,
        now: i64,
    ) -> Result<MessageAck> {
        self.check_freshness(body.tod, now)?;
        let token_data = self.authenticate(token).await?;

        if body.content.is_empty() || body.channel.is_empty() {
            return Err(NodeError::MalformedInput(
                "content and channel are required".into(),
            ));
        }

        let channel = self
            .store
            .find_channel(&body.channel)
            .await?
            .ok_or_else(|| NodeError::NotFound(format!("channel '{}'", body.channel)))?;
        if !channel.is_active {
            return Err(NodeError::InvalidState(format!(
                "channel '{}' is inactive",
                body.channel
            )));
        }

        let context = self.verifier.context();
        let mut builder = MessageBuilder::new(body.content, token_data.mt_username)
            .channel(body.channel)
            .tod(body.tod);
        if let Some(image_data) = body.image_data {
            builder = builder.image(image_data);
        }
        let mut message: Message = builder.sign(
            context.local_keypair(),
            context.local_ap_id(),
            context.local_certificate(),
        )?;
        message.is_safe = self.local_chain_valid;

        // AlreadyExists still acks: the content address is the identity.
        self.store.insert_message(&message).await?;

        Ok(MessageAck {
            hash_key: message.hash_key,
            tod: now,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Full sync round with an authenticated peer.
    pub async fn sync(
        &self,
        token: &str,
        request: SyncRequest,
        now: i64,
    ) -> Result<(SyncResponse, SyncReport)> {
        self.check_freshness(request.tod, now)?;
        let token_data = self.authenticate(token).await?;
        let peer_ap_id = token_data.ap_reg;

        let (mut response, report) = self.sync_engine.sync(&peer_ap_id, request, now).await?;

        // Answer any newly arrived requests addressed here, then refresh
        // the in-transit artifacts so the answers ride this same response.
        let answered = self.recovery.process_incoming_requests(now).await?;
        if answered > 0 {
            let (requests, responses) = self
                .sync_engine
                .pending_cross_ap_artifacts(&peer_ap_id, now)
                .await?;
            response.cross_ap_requests = requests;
            response.cross_ap_responses = responses;
        }

        Ok((response, report))
    }

    /// Unauthenticated bootstrap for a node with no prior state.
    pub async fn emergency_sync(&self, now: i64) -> Result<SyncResponse> {
        Ok(self.sync_engine.emergency_snapshot(now).await?)
    }

    /// Assemble an outbound sync call for the opportunistic-connectivity
    /// layer to deliver to a peer.
    pub async fn build_sync_request(&self, now: i64) -> Result<SyncRequest> {
        Ok(self.sync_engine.outbound_request(now).await?)
    }

    /// Ingest a peer's sync response on the calling side.
    pub async fn ingest_sync_response(
        &self,
        response: &SyncResponse,
        now: i64,
    ) -> Result<SyncReport> {
        let report = self.sync_engine.ingest_response(response, now).await?;
        // A response can carry requests addressed to this node.
        self.recovery.process_incoming_requests(now).await?;
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a terminal identity with recovery material and issue its
    /// first token.
    pub async fn register_user(
        &self,
        username: &str,
        mt_pub_key: &str,
        recovery_words: &[String],
        now: i64,
    ) -> Result<String> {
        if username.is_empty() || recovery_words.is_empty() {
            return Err(NodeError::MalformedInput(
                "username and recovery phrase are required".into(),
            ));
        }

        let material = derive_recovery_material(recovery_words);
        let context = self.verifier.context();
        let recovery_signature = context
            .local_keypair()
            .sign(material.hash_hex.as_bytes())?;

        let user = UserRecord {
            username: username.to_string(),
            ap_reg: self.ap_id().to_string(),
            mt_pub_key: Some(mt_pub_key.to_string()),
            recovery_key_hash: Some(material.hash_hex),
            recovery_key_salt: Some(material.salt_hex),
            recovery_fingerprint: Some(meshnode_recovery::phrase_fingerprint(recovery_words)),
            recovery_key_updated_at: Some(now),
            recovery_signature: Some(meshnode_core::b64::encode(recovery_signature)),
            recovery_source: Some("registration".into()),
            created_at: now,
        };
        if !self.store.insert_user(&user).await?.is_inserted() {
            return Err(NodeError::InvalidState(format!(
                "username '{}' is taken",
                username
            )));
        }

        let token = meshnode_core::MtToken::issue(
            meshnode_core::TokenData {
                mt_username: username.to_string(),
                ap_reg: self.ap_id().to_string(),
                mt_pub_key: mt_pub_key.to_string(),
                tod_reg: now,
            },
            context.local_keypair(),
            context.local_certificate(),
        )?;
        Ok(token.encode())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────────

    /// Start or resolve a recovery attempt.
    pub async fn recover_identity(
        &self,
        request: RecoverIdentityRequest,
        now: i64,
    ) -> Result<RecoveryOutcome> {
        Ok(self
            .recovery
            .recover_identity(
                &request.username,
                &request.ap_identifier,
                &request.recovery_words,
                request.tod,
                now,
                self.directory.as_ref(),
            )
            .await?)
    }

    /// Poll a cross-AP attempt by tempUserId.
    pub async fn check_cross_ap_recovery_status(
        &self,
        temp_user_id: &str,
        now: i64,
    ) -> Result<RecoveryStatusView> {
        let status = self.recovery.check_status(temp_user_id, now).await?;
        Ok(RecoveryStatusView {
            temp_user_id: temp_user_id.to_string(),
            status,
        })
    }

    /// Fetch and decrypt the recovered token for a completed attempt.
    pub async fn get_cross_ap_recovery_response(
        &self,
        temp_user_id: &str,
    ) -> Result<CompletedRecovery> {
        let token = self
            .recovery
            .complete_recovery(temp_user_id, self.directory.as_ref())
            .await?;
        Ok(CompletedRecovery {
            temp_user_id: temp_user_id.to_string(),
            token,
        })
    }

    /// Run the recovery cleanup sweep. Idempotent, any schedule.
    pub async fn run_cleanup(&self, now: i64) -> Result<CleanupReport> {
        Ok(self.recovery.cleanup(now).await?)
    }
}
