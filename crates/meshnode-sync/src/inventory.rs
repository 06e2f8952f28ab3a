//! Sync wire types and the pure diff functions.
//!
//! Messages travel as a per-channel inventory keyed by hashKey, which makes
//! the diff a plain set operation: anything the other side's inventory
//! lacks gets sent. No sequence numbers, no vector clocks — presence of the
//! content address is the whole protocol.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use meshnode_core::{
    BlacklistedPu, Channel, CrossApRecoveryRequest, CrossApRecoveryResponse, Message,
};

/// Per-channel message inventory: channel name -> hashKey -> message.
pub type MessageInventory = HashMap<String, HashMap<String, Message>>;

/// The body of a sync call from a peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// The peer's message inventory.
    #[serde(default)]
    pub messages: MessageInventory,

    /// The peer's channel set.
    #[serde(default)]
    pub channels: Vec<Channel>,

    /// The peer's blacklist.
    #[serde(default)]
    pub blacklist: Vec<BlacklistedPu>,

    /// Cross-AP recovery requests in transit (opaque blobs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_ap_requests: Vec<CrossApRecoveryRequest>,

    /// Cross-AP recovery responses in transit (opaque blobs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_ap_responses: Vec<CrossApRecoveryResponse>,

    /// Caller's clock at dispatch (Unix ms).
    pub tod: i64,
}

/// The four-part result of a sync call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Messages the caller is missing, by channel, keyed by hashKey.
    pub messages: MessageInventory,

    /// The full active channel set.
    pub channels: Vec<Channel>,

    /// The full blacklist.
    pub blacklist: Vec<BlacklistedPu>,

    /// Pending cross-AP recovery requests still in transit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_ap_requests: Vec<CrossApRecoveryRequest>,

    /// Cross-AP recovery responses still in transit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_ap_responses: Vec<CrossApRecoveryResponse>,

    /// Responder's clock (Unix ms).
    pub tod: i64,
}

/// Counters for one sync session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Peer messages ingested.
    pub messages_ingested: usize,
    /// Peer messages we already had.
    pub messages_duplicate: usize,
    /// Peer messages dropped as unverifiable.
    pub messages_dropped: usize,
    /// Peer channels accepted (new or strictly newer).
    pub channels_ingested: usize,
    /// Peer channels dropped (unverifiable or stale).
    pub channels_dropped: usize,
    /// Blacklist entries newly appended.
    pub blacklist_ingested: usize,
    /// Cross-AP requests newly stored.
    pub requests_ingested: usize,
    /// Cross-AP responses newly stored.
    pub responses_ingested: usize,
}

/// Messages present in `local` but absent from `peer`, per channel.
///
/// Pure set difference on hashKeys; ignores channels the local side has no
/// messages for.
pub fn diff_messages(local: &MessageInventory, peer: &MessageInventory) -> MessageInventory {
    let mut to_send: MessageInventory = HashMap::new();

    for (channel, local_messages) in local {
        let peer_keys: HashSet<&String> = peer
            .get(channel)
            .map(|m| m.keys().collect())
            .unwrap_or_default();

        let missing: HashMap<String, Message> = local_messages
            .iter()
            .filter(|(hash_key, _)| !peer_keys.contains(hash_key))
            .map(|(hash_key, message)| (hash_key.clone(), message.clone()))
            .collect();

        if !missing.is_empty() {
            to_send.insert(channel.clone(), missing);
        }
    }

    to_send
}

/// Peer channels that are missing locally or strictly newer than the local
/// copy. `local_tods` maps channel name to the stored timestamp.
///
/// Ties keep the local copy, which makes repeated sync with stale peer
/// data a no-op.
pub fn find_missing_channels<'a>(
    local_tods: &HashMap<String, i64>,
    peer_channels: &'a [Channel],
) -> Vec<&'a Channel> {
    peer_channels
        .iter()
        .filter(|channel| match local_tods.get(&channel.channel_name) {
            None => true,
            Some(&local_tod) => channel.tod > local_tod,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshnode_core::crypto::Keypair;
    use meshnode_core::MessageBuilder;

    fn make_message(content: &str, channel: &str) -> Message {
        let ap = Keypair::from_seed(&[0x02; 32]).unwrap();
        MessageBuilder::new(content, "alice")
            .channel(channel)
            .tod(1000)
            .sign(&ap, "ap-north", "cert.NO_CERT")
            .unwrap()
    }

    fn make_channel(name: &str, tod: i64) -> Channel {
        let ap = Keypair::from_seed(&[0x02; 32]).unwrap();
        Channel::sign(name, true, tod, &ap, "cert.NO_CERT").unwrap()
    }

    fn inventory(messages: &[Message]) -> MessageInventory {
        let mut inv: MessageInventory = HashMap::new();
        for m in messages {
            inv.entry(m.channel.clone())
                .or_default()
                .insert(m.hash_key.clone(), m.clone());
        }
        inv
    }

    #[test]
    fn test_diff_messages_finds_missing() {
        let a = make_message("one", "general");
        let b = make_message("two", "general");
        let c = make_message("three", "random");

        let local = inventory(&[a.clone(), b.clone(), c.clone()]);
        let peer = inventory(&[a]);

        let to_send = diff_messages(&local, &peer);
        assert_eq!(to_send["general"].len(), 1);
        assert!(to_send["general"].contains_key(&b.hash_key));
        assert_eq!(to_send["random"].len(), 1);
        assert!(to_send["random"].contains_key(&c.hash_key));
    }

    #[test]
    fn test_diff_messages_identical_inventories() {
        let a = make_message("one", "general");
        let local = inventory(&[a.clone()]);
        let peer = inventory(&[a]);
        assert!(diff_messages(&local, &peer).is_empty());
    }

    #[test]
    fn test_find_missing_channels_by_tod() {
        let mut local_tods = HashMap::new();
        local_tods.insert("general".to_string(), 2000i64);

        // Strictly newer peer copy is missing locally.
        let newer = make_channel("general", 3000);
        // Equal tod is not.
        let tie = make_channel("general", 2000);
        // Older is not.
        let stale = make_channel("general", 1000);
        // Unknown channel is.
        let unknown = make_channel("random", 1);

        let peer = vec![newer.clone(), tie, stale, unknown.clone()];
        let missing = find_missing_channels(&local_tods, &peer);

        assert_eq!(missing.len(), 2);
        assert!(missing.iter().any(|c| c.channel_name == "general" && c.tod == 3000));
        assert!(missing.iter().any(|c| c.channel_name == "random"));
    }

    #[test]
    fn test_sync_request_defaults() {
        // A minimal sync body parses with everything defaulted.
        let request: SyncRequest = serde_json::from_str(r#"{"tod": 123}"#).unwrap();
        assert!(request.messages.is_empty());
        assert!(request.channels.is_empty());
        assert!(request.cross_ap_requests.is_empty());
        assert_eq!(request.tod, 123);
    }
}
