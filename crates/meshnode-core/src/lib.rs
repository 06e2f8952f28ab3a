//! # meshnode-core
//!
//! Pure primitives for the meshnode trust/sync/recovery core: crypto,
//! canonical signing payloads, and the entity types shared by every other
//! crate.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Message`] / [`Channel`] - the replicated, content-addressed entities
//! - [`ApCertificate`] / [`MtToken`] - the identity chain artifacts
//! - [`Keypair`] - RSA keypair used by every role in the mesh
//!
//! ## Canonicalization
//!
//! Signed structures serialize with hard-coded field order. See
//! [`canonical`].

pub mod canonical;
pub mod channel;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod message;
pub mod recovery;

pub use canonical::{b64, ApData, ChannelSignable, MessageSignable, PuData, TokenData};
pub use channel::Channel;
pub use crypto::{Keypair, Sha256Hash};
pub use error::{CoreError, Result};
pub use identity::{ApCertificate, BlacklistedPu, MtToken, PuCertificate, NO_CERT};
pub use message::{split_signed_envelope, Message, MessageBuilder};
pub use recovery::{
    CrossApRecoveryRequest, CrossApRecoveryResponse, CrossApRequestPayload, RecoveryStatus,
    UserRecord, CROSS_AP_REQUEST_TTL_MS, EXPIRED_RETENTION_MS,
};
