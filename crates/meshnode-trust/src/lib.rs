//! # meshnode-trust
//!
//! The Trust Verifier: authenticates access points, privileged users,
//! terminal tokens, and the certificates embedded in messages and channels,
//! ultimately checking every signature against the process-wide admin
//! public key.
//!
//! Trust is a value, not a global: construct a [`TrustContext`] with the
//! admin key and this node's identity, then hand it to a [`TrustVerifier`].
//!
//! Verification is total over its inputs — malformed envelopes come back as
//! structured `Invalid` results with a reason, never as errors.

pub mod context;
pub mod verifier;

pub use context::TrustContext;
pub use verifier::{ApTrust, ArtifactCheck, TokenCheck, TrustLevel, TrustVerifier};
