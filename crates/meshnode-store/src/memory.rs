//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use meshnode_core::{
    BlacklistedPu, Channel, CrossApRecoveryRequest, CrossApRecoveryResponse, Message,
    RecoveryStatus, UserRecord,
};

use crate::error::{Result, StoreError};
use crate::traits::{InsertOutcome, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Users indexed by username.
    users: HashMap<String, UserRecord>,

    /// Messages indexed by content address.
    messages: HashMap<String, Message>,

    /// Channels indexed by name. BTreeMap keeps listings deterministic.
    channels: BTreeMap<String, Channel>,

    /// Revoked PU keys indexed by public key.
    blacklist: BTreeMap<String, BlacklistedPu>,

    /// Recovery requests indexed by tempUserId.
    recovery_requests: HashMap<String, CrossApRecoveryRequest>,

    /// Recovery responses indexed by tempUserId.
    recovery_responses: HashMap<String, CrossApRecoveryResponse>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.users.get(username).cloned())
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().unwrap();
        if inner.users.contains_key(&user.username) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        inner.users.insert(user.username.clone(), user.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn update_user(&self, user: &UserRecord) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        match inner.users.get_mut(&user.username) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("user {}", user.username))),
        }
    }

    async fn find_user_by_recovery_hash(
        &self,
        recovery_hash: &str,
    ) -> Result<Option<UserRecord>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .users
            .values()
            .find(|u| u.recovery_fingerprint.as_deref() == Some(recovery_hash))
            .cloned())
    }

    async fn insert_message(&self, message: &Message) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().unwrap();
        if inner.messages.contains_key(&message.hash_key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        inner
            .messages
            .insert(message.hash_key.clone(), message.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_message(&self, hash_key: &str) -> Result<Option<Message>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.messages.get(hash_key).cloned())
    }

    async fn has_message(&self, hash_key: &str) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner.messages.contains_key(hash_key))
    }

    async fn list_messages_by_channel(&self, channel: &str) -> Result<Vec<Message>> {
        let inner = self.inner.read().unwrap();
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.tod);
        Ok(messages)
    }

    async fn find_channel(&self, channel_name: &str) -> Result<Option<Channel>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.channels.get(channel_name).cloned())
    }

    async fn upsert_channel_if_newer(&self, channel: &Channel) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        match inner.channels.get(&channel.channel_name) {
            Some(existing) if existing.tod >= channel.tod => Ok(false),
            _ => {
                inner
                    .channels
                    .insert(channel.channel_name.clone(), channel.clone());
                Ok(true)
            }
        }
    }

    async fn list_channels(&self, active_only: bool) -> Result<Vec<Channel>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .channels
            .values()
            .filter(|c| !active_only || c.is_active)
            .cloned()
            .collect())
    }

    async fn insert_blacklisted_pu(&self, entry: &BlacklistedPu) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().unwrap();
        if inner.blacklist.contains_key(&entry.pub_key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        inner.blacklist.insert(entry.pub_key.clone(), entry.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list_blacklist(&self) -> Result<Vec<BlacklistedPu>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.blacklist.values().cloned().collect())
    }

    async fn insert_recovery_request(
        &self,
        request: &CrossApRecoveryRequest,
    ) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().unwrap();
        if inner.recovery_requests.contains_key(&request.temp_user_id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        inner
            .recovery_requests
            .insert(request.temp_user_id.clone(), request.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_recovery_request(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApRecoveryRequest>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.recovery_requests.get(temp_user_id).cloned())
    }

    async fn update_recovery_request_status(
        &self,
        temp_user_id: &str,
        from: RecoveryStatus,
        to: RecoveryStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        match inner.recovery_requests.get_mut(temp_user_id) {
            Some(request) if request.status == from => {
                request.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_recovery_requests(
        &self,
        status: RecoveryStatus,
        destination_ap_id: Option<&str>,
    ) -> Result<Vec<CrossApRecoveryRequest>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .recovery_requests
            .values()
            .filter(|r| r.status == status)
            .filter(|r| destination_ap_id.map_or(true, |ap| r.destination_ap_id == ap))
            .cloned()
            .collect())
    }

    async fn delete_recovery_request(&self, temp_user_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.recovery_requests.remove(temp_user_id);
        Ok(())
    }

    async fn insert_recovery_response(
        &self,
        response: &CrossApRecoveryResponse,
    ) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().unwrap();
        if inner.recovery_responses.contains_key(&response.temp_user_id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        inner
            .recovery_responses
            .insert(response.temp_user_id.clone(), response.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_recovery_response(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApRecoveryResponse>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.recovery_responses.get(temp_user_id).cloned())
    }

    async fn list_recovery_responses_for(
        &self,
        requesting_ap_id: &str,
    ) -> Result<Vec<CrossApRecoveryResponse>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .recovery_responses
            .values()
            .filter(|r| r.requesting_ap_id == requesting_ap_id)
            .cloned()
            .collect())
    }

    async fn list_recovery_responses(&self) -> Result<Vec<CrossApRecoveryResponse>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.recovery_responses.values().cloned().collect())
    }

    async fn delete_recovery_response(&self, temp_user_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.recovery_responses.remove(temp_user_id);
        Ok(())
    }
}
