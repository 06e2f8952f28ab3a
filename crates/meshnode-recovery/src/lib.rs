//! # meshnode-recovery
//!
//! The Recovery Protocol: regaining a lost identity either locally (phrase
//! check at the home AP) or across the mesh (encrypted request propagated
//! to the AP where the identity lives, answered under an ephemeral key only
//! the requester can open).
//!
//! Phrase material never crosses the wire: servers store a PBKDF2 hash,
//! cross-AP requests carry a SHA-256 fingerprint, and replacement keypairs
//! derive deterministically from that fingerprint on both ends.

pub mod error;
pub mod hybrid;
pub mod phrase;
pub mod protocol;
pub mod wordlist;

pub use error::{RecoveryError, Result};
pub use hybrid::{hybrid_decrypt, hybrid_encrypt, HybridEnvelope};
pub use phrase::{
    derive_recovery_material, generate_recovery_phrase, keypair_from_phrase,
    keypair_seed_from_fingerprint, normalize_phrase, phrase_fingerprint, verify_recovery_phrase,
    RecoveryMaterial,
};
pub use protocol::{
    ApDirectory, CleanupReport, RecoveryConfig, RecoveryOutcome, RecoveryProtocol,
};
pub use wordlist::{PHRASE_WORDS, WORDLIST};
