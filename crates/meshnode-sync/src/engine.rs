//! The Sync Engine: reconciles two nodes' views of messages, channels and
//! blacklist without a central sequence number.
//!
//! Four phases, each independent and safely re-orderable:
//! 1. ingest newly-presented blacklist entries (idempotent append)
//! 2. verify-then-persist missing channels (last-writer-wins)
//! 3. verify-then-persist missing messages (insert-if-absent by hashKey)
//! 4. reverse diff: compute everything the caller is missing
//!
//! Unverifiable peer items are dropped without surfacing detail to the
//! caller; the drop is logged internally and counted in the report. This
//! bounds the blast radius of a compromised or buggy peer without leaking
//! verification internals over the wire.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use meshnode_core::{Channel, CrossApRecoveryRequest, CrossApRecoveryResponse, Message};
use meshnode_store::{InsertOutcome, Store};
use meshnode_trust::TrustVerifier;

use crate::error::{Result, SyncError};
use crate::inventory::{
    diff_messages, find_missing_channels, MessageInventory, SyncReport, SyncRequest, SyncResponse,
};

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Cap on concurrent signature verifications during ingest fan-out.
    pub max_concurrent_verifies: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_verifies: 8,
        }
    }
}

/// The sync engine for one node.
pub struct SyncEngine<S: Store> {
    store: Arc<S>,
    verifier: TrustVerifier,
    config: SyncConfig,
}

impl<S: Store + 'static> SyncEngine<S> {
    /// Create a sync engine over the given store and verifier.
    pub fn new(store: Arc<S>, verifier: TrustVerifier, config: SyncConfig) -> Self {
        Self {
            store,
            verifier,
            config,
        }
    }

    /// This node's AP identifier.
    fn local_ap_id(&self) -> &str {
        self.verifier.context().local_ap_id()
    }

    /// Run a full sync round against a peer's state.
    ///
    /// `peer_ap_id` identifies the caller (from its verified token) so the
    /// response can carry the cross-AP artifacts still in transit.
    pub async fn sync(
        &self,
        peer_ap_id: &str,
        request: SyncRequest,
        now: i64,
    ) -> Result<(SyncResponse, SyncReport)> {
        let mut report = SyncReport::default();

        // Phase 1: blacklist append. Runs first so phases 2/3 verify
        // against the freshest revocation set, but any order converges.
        self.ingest_blacklist(&request.blacklist, &mut report).await?;

        let revoked: Arc<HashSet<String>> = Arc::new(
            self.store
                .list_blacklist()
                .await?
                .into_iter()
                .map(|entry| entry.pub_key)
                .collect(),
        );

        // Phase 2: channels.
        self.ingest_channels(&request.channels, &revoked, &mut report)
            .await?;

        // Phase 3: messages.
        self.ingest_messages(&request.messages, &revoked, &mut report)
            .await?;

        // Cross-AP artifacts ride along opaquely.
        self.ingest_cross_ap_artifacts(
            &request.cross_ap_requests,
            &request.cross_ap_responses,
            now,
            &mut report,
        )
        .await?;

        // Phase 4: reverse diff.
        let response = self.build_response(peer_ap_id, &request.messages, now).await?;

        Ok((response, report))
    }

    /// Assemble an outbound sync call: this node's full state plus the
    /// cross-AP artifacts still in transit.
    pub async fn outbound_request(&self, now: i64) -> Result<SyncRequest> {
        let (cross_ap_requests, cross_ap_responses) =
            self.pending_cross_ap_artifacts("", now).await?;
        Ok(SyncRequest {
            messages: self.local_inventory().await?,
            channels: self.store.list_channels(true).await?,
            blacklist: self.store.list_blacklist().await?,
            cross_ap_requests,
            cross_ap_responses,
            tod: now,
        })
    }

    /// Ingest a peer's sync response on the calling side.
    ///
    /// Runs the same verify-then-persist phases as the serving side; the
    /// protocol is symmetric by construction.
    pub async fn ingest_response(&self, response: &SyncResponse, now: i64) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.ingest_blacklist(&response.blacklist, &mut report).await?;

        let revoked: Arc<HashSet<String>> = Arc::new(
            self.store
                .list_blacklist()
                .await?
                .into_iter()
                .map(|entry| entry.pub_key)
                .collect(),
        );

        self.ingest_channels(&response.channels, &revoked, &mut report)
            .await?;
        self.ingest_messages(&response.messages, &revoked, &mut report)
            .await?;
        self.ingest_cross_ap_artifacts(
            &response.cross_ap_requests,
            &response.cross_ap_responses,
            now,
            &mut report,
        )
        .await?;

        Ok(report)
    }

    /// Unauthenticated bootstrap payload: full active channel set and
    /// blacklist, empty message/recovery payloads.
    pub async fn emergency_snapshot(&self, now: i64) -> Result<SyncResponse> {
        Ok(SyncResponse {
            messages: MessageInventory::new(),
            channels: self.store.list_channels(true).await?,
            blacklist: self.store.list_blacklist().await?,
            cross_ap_requests: Vec::new(),
            cross_ap_responses: Vec::new(),
            tod: now,
        })
    }

    /// Messages the peer is missing, computed from its inventory.
    pub async fn diff_against_peer(
        &self,
        peer_inventory: &MessageInventory,
    ) -> Result<MessageInventory> {
        let local = self.local_inventory().await?;
        Ok(diff_messages(&local, peer_inventory))
    }

    /// The local message inventory over active channels.
    async fn local_inventory(&self) -> Result<MessageInventory> {
        let mut inventory = MessageInventory::new();
        for channel in self.store.list_channels(true).await? {
            let messages = self
                .store
                .list_messages_by_channel(&channel.channel_name)
                .await?;
            if messages.is_empty() {
                continue;
            }
            inventory.insert(
                channel.channel_name,
                messages
                    .into_iter()
                    .map(|m| (m.hash_key.clone(), m))
                    .collect(),
            );
        }
        Ok(inventory)
    }

    async fn ingest_blacklist(
        &self,
        entries: &[meshnode_core::BlacklistedPu],
        report: &mut SyncReport,
    ) -> Result<()> {
        for entry in entries {
            if self
                .store
                .insert_blacklisted_pu(entry)
                .await?
                .is_inserted()
            {
                report.blacklist_ingested += 1;
            }
        }
        Ok(())
    }

    async fn ingest_channels(
        &self,
        peer_channels: &[Channel],
        revoked: &Arc<HashSet<String>>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut local_tods = HashMap::new();
        for channel in self.store.list_channels(false).await? {
            local_tods.insert(channel.channel_name.clone(), channel.tod);
        }

        for channel in find_missing_channels(&local_tods, peer_channels) {
            let check = self.verifier.verify_channel_guarded(channel, revoked);
            if !check.verified {
                tracing::debug!(
                    channel = %channel.channel_name,
                    reason = ?check.reason,
                    "dropping unverifiable peer channel"
                );
                report.channels_dropped += 1;
                continue;
            }
            if self.store.upsert_channel_if_newer(channel).await? {
                report.channels_ingested += 1;
            } else {
                // Lost a write race to an even newer copy.
                report.channels_dropped += 1;
            }
        }
        Ok(())
    }

    async fn ingest_messages(
        &self,
        peer_inventory: &MessageInventory,
        revoked: &Arc<HashSet<String>>,
        report: &mut SyncReport,
    ) -> Result<()> {
        // Collect lookup misses first; verification then fans out over the
        // missing set with bounded concurrency. Items are independent, so
        // completion order is irrelevant.
        let mut candidates: Vec<Message> = Vec::new();
        for messages in peer_inventory.values() {
            for message in messages.values() {
                if self.store.has_message(&message.hash_key).await? {
                    report.messages_duplicate += 1;
                } else {
                    candidates.push(message.clone());
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_verifies));
        let mut join_set = JoinSet::new();

        for message in candidates {
            let semaphore = Arc::clone(&semaphore);
            let verifier = self.verifier.clone();
            let revoked = Arc::clone(revoked);
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let check = verifier.verify_message_guarded(&message, &revoked);
                (message, check)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (mut message, check) =
                joined.map_err(|e| SyncError::Internal(format!("verify task failed: {}", e)))?;
            if !check.verified {
                tracing::debug!(
                    hash_key = %message.hash_key,
                    reason = ?check.reason,
                    "dropping unverifiable peer message"
                );
                report.messages_dropped += 1;
                continue;
            }
            // Safety is our own judgement of the chain, not the peer's.
            message.is_safe = check.is_safe;
            match self.store.insert_message(&message).await? {
                InsertOutcome::Inserted => report.messages_ingested += 1,
                InsertOutcome::AlreadyExists => report.messages_duplicate += 1,
            }
        }

        Ok(())
    }

    async fn ingest_cross_ap_artifacts(
        &self,
        requests: &[CrossApRecoveryRequest],
        responses: &[CrossApRecoveryResponse],
        now: i64,
        report: &mut SyncReport,
    ) -> Result<()> {
        for request in requests {
            if request.is_expired_at(now) {
                tracing::debug!(
                    temp_user_id = %request.temp_user_id,
                    "dropping expired cross-AP request"
                );
                continue;
            }
            if self
                .store
                .insert_recovery_request(&request.wire_view())
                .await?
                .is_inserted()
            {
                report.requests_ingested += 1;
            }
        }

        for response in responses {
            if self
                .store
                .insert_recovery_response(response)
                .await?
                .is_inserted()
            {
                report.responses_ingested += 1;
            }
        }

        Ok(())
    }

    /// Cross-AP artifacts still in transit, from this node's perspective.
    ///
    /// Requests addressed to this node are consumed here, not forwarded;
    /// everything else keeps travelling. Responses go back to their
    /// requester: the peer gets its own plus anything in transit elsewhere.
    pub async fn pending_cross_ap_artifacts(
        &self,
        peer_ap_id: &str,
        now: i64,
    ) -> Result<(Vec<CrossApRecoveryRequest>, Vec<CrossApRecoveryResponse>)> {
        let local_ap = self.local_ap_id().to_string();
        let requests: Vec<CrossApRecoveryRequest> = self
            .store
            .list_recovery_requests(meshnode_core::RecoveryStatus::Pending, None)
            .await?
            .into_iter()
            .filter(|r| r.destination_ap_id != local_ap)
            .filter(|r| !r.is_expired_at(now))
            .map(|r| r.wire_view())
            .collect();

        let responses: Vec<CrossApRecoveryResponse> = self
            .store
            .list_recovery_responses()
            .await?
            .into_iter()
            .filter(|r| r.requesting_ap_id == peer_ap_id || r.requesting_ap_id != local_ap)
            .collect();

        Ok((requests, responses))
    }

    async fn build_response(
        &self,
        peer_ap_id: &str,
        peer_inventory: &MessageInventory,
        now: i64,
    ) -> Result<SyncResponse> {
        let messages = self.diff_against_peer(peer_inventory).await?;
        let channels = self.store.list_channels(true).await?;
        let blacklist = self.store.list_blacklist().await?;
        let (cross_ap_requests, cross_ap_responses) =
            self.pending_cross_ap_artifacts(peer_ap_id, now).await?;

        Ok(SyncResponse {
            messages,
            channels,
            blacklist,
            cross_ap_requests,
            cross_ap_responses,
            tod: now,
        })
    }
}
