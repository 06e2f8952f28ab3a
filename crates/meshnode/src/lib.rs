//! # meshnode
//!
//! The trust, synchronization and identity-recovery core of an
//! offline-first mesh messaging network.
//!
//! ## Overview
//!
//! Independent access points (APs) relay messages between terminals and
//! gossip-sync state with other APs when connectivity allows. Trust is
//! rooted in a single offline admin key; APs and privileged users hold
//! certificates chaining back to it, and messages, channels, tokens and
//! identities are authenticated through that chain instead of a
//! centralized live service.
//!
//! ## Key Concepts
//!
//! - **Trust chain**: admin signs AP and PU certificates; PUs may vouch
//!   for APs; the `NO_CERT` sentinel marks self-asserted nodes whose
//!   artifacts are flagged unsafe.
//! - **Content-addressed sync**: messages dedupe by hashKey, channels
//!   converge last-writer-wins, the blacklist is append-only.
//! - **Recovery**: a lost identity comes back via a phrase check at its
//!   home AP, or via an encrypted cross-AP request answered under an
//!   ephemeral key only the requester holds.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshnode::{AccessPoint, NodeConfig};
//! use meshnode::core::crypto::Keypair;
//! use meshnode::core::ApCertificate;
//! use meshnode::recovery::ApDirectory;
//! use meshnode::store::SqliteStore;
//! use meshnode::trust::TrustContext;
//!
//! struct NoDirectory;
//! impl ApDirectory for NoDirectory {
//!     fn certificate_for(&self, _ap_id: &str) -> Option<String> {
//!         None
//!     }
//! }
//!
//! fn example(admin: &Keypair, keypair: Keypair, cert: ApCertificate) {
//!     let context = TrustContext::new(admin.public_key(), "ap-north", keypair, &cert).unwrap();
//!     let store = SqliteStore::open("mesh.db").unwrap();
//!     let node = AccessPoint::new(context, store, Arc::new(NoDirectory), NodeConfig::default());
//!     let hello = node.hello().unwrap();
//!     println!("serving as {}", hello.ap_id);
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `meshnode::core` - entities, crypto, canonical payloads
//! - `meshnode::trust` - the Trust Verifier
//! - `meshnode::store` - storage abstraction, SQLite and in-memory
//! - `meshnode::sync` - the Sync Engine
//! - `meshnode::recovery` - the Recovery Protocol

pub mod error;
pub mod node;

// Re-export component crates
pub use meshnode_core as core;
pub use meshnode_recovery as recovery;
pub use meshnode_store as store;
pub use meshnode_sync as sync;
pub use meshnode_trust as trust;

// Re-export main types for convenience
pub use error::{ErrorKind, NodeError, Rejection, Result};
pub use node::{
    AccessPoint, CompletedRecovery, HelloInfo, MessageAck, NodeConfig, PostMessage,
    RecoverIdentityRequest, RecoveryStatusView,
};

// Re-export commonly used component types
pub use meshnode_core::{
    ApCertificate, BlacklistedPu, Channel, Message, MtToken, RecoveryStatus, UserRecord,
};
pub use meshnode_recovery::{ApDirectory, RecoveryOutcome};
pub use meshnode_sync::{SyncReport, SyncRequest, SyncResponse};
pub use meshnode_trust::{TrustContext, TrustLevel, TrustVerifier};
