//! # meshnode-sync
//!
//! The Sync Engine: content-addressed, eventually-consistent replication of
//! messages, channels and the PU blacklist between access points, with
//! cross-AP recovery artifacts riding along as opaque blobs.
//!
//! There is no central sequence number. Messages are compared by hashKey
//! (presence is the protocol), channels converge last-writer-wins by
//! timestamp, and the blacklist is an idempotent append-only set. Every
//! externally supplied signed artifact passes the Trust Verifier before it
//! is persisted; anything unverifiable is silently dropped.

pub mod engine;
pub mod error;
pub mod inventory;

pub use engine::{SyncConfig, SyncEngine};
pub use error::{Result, SyncError};
pub use inventory::{
    diff_messages, find_missing_channels, MessageInventory, SyncReport, SyncRequest, SyncResponse,
};
