//! Recovery phrase generation, derivation and verification.
//!
//! The phrase never leaves the client in clear; servers hold
//! PBKDF2-HMAC-SHA512(phrase, salt, 100k, 64B) plus the salt. Cross-AP
//! requests carry only SHA-256(phrase), and the replacement signing keypair
//! is derived deterministically from that fingerprint, so both the client
//! and the home AP can arrive at the same keypair without the phrase ever
//! crossing the wire.

use rand::seq::SliceRandom;
use subtle::ConstantTimeEq;

use meshnode_core::crypto::{pbkdf2_sha512, random_bytes, Keypair, Sha256Hash, PBKDF2_ROUNDS};
use meshnode_core::CoreError;

use crate::wordlist::{PHRASE_WORDS, WORDLIST};

/// Length of the stored recovery hash in bytes.
pub const RECOVERY_HASH_BYTES: usize = 64;

/// Length of the per-user salt in bytes.
pub const RECOVERY_SALT_BYTES: usize = 16;

/// Derivation context for turning a phrase fingerprint into a keypair seed.
const KEYPAIR_SEED_CONTEXT: &[u8] = b"meshnode-recovery-keypair-v1";

/// Hash + salt pair stored on a user record, both hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryMaterial {
    pub hash_hex: String,
    pub salt_hex: String,
}

/// Draw a fresh recovery phrase: 8 words without replacement.
pub fn generate_recovery_phrase() -> Vec<String> {
    let mut rng = rand::thread_rng();
    WORDLIST
        .choose_multiple(&mut rng, PHRASE_WORDS)
        .map(|w| w.to_string())
        .collect()
}

/// Normalize a phrase for hashing: lowercase, single-space joined.
pub fn normalize_phrase(words: &[String]) -> String {
    words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive fresh recovery material (random salt) from a phrase.
pub fn derive_recovery_material(words: &[String]) -> RecoveryMaterial {
    let salt = random_bytes::<RECOVERY_SALT_BYTES>();
    let hash = pbkdf2_sha512(
        normalize_phrase(words).as_bytes(),
        &salt,
        PBKDF2_ROUNDS,
        RECOVERY_HASH_BYTES,
    );
    RecoveryMaterial {
        hash_hex: hex::encode(hash),
        salt_hex: hex::encode(salt),
    }
}

/// Check a phrase against stored hash/salt.
///
/// Comparison is constant-time; short-circuit string equality on recovery
/// material is a timing side channel. Malformed salt or hash returns
/// false, never an error.
pub fn verify_recovery_phrase(words: &[String], hash_hex: &str, salt_hex: &str) -> bool {
    let salt = match hex::decode(salt_hex) {
        Ok(salt) => salt,
        Err(_) => return false,
    };
    let expected = match hex::decode(hash_hex) {
        Ok(hash) => hash,
        Err(_) => return false,
    };

    let computed = pbkdf2_sha512(
        normalize_phrase(words).as_bytes(),
        &salt,
        PBKDF2_ROUNDS,
        expected.len().max(1),
    );

    computed.ct_eq(&expected).into()
}

/// SHA-256 fingerprint of a phrase, hex. This is what cross-AP requests
/// carry instead of the phrase itself.
pub fn phrase_fingerprint(words: &[String]) -> String {
    Sha256Hash::hash(normalize_phrase(words).as_bytes()).to_hex()
}

/// Deterministic keypair seed from a phrase fingerprint.
///
/// Both ends of a cross-AP recovery know the fingerprint (the client from
/// the phrase, the home AP from the decrypted request), so both derive the
/// same replacement keypair.
pub fn keypair_seed_from_fingerprint(fingerprint_hex: &str) -> [u8; 32] {
    let derived = pbkdf2_sha512(
        fingerprint_hex.as_bytes(),
        KEYPAIR_SEED_CONTEXT,
        PBKDF2_ROUNDS,
        32,
    );
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&derived);
    seed
}

/// Derive the replacement signing keypair from a phrase.
pub fn keypair_from_phrase(words: &[String]) -> Result<Keypair, CoreError> {
    let seed = keypair_seed_from_fingerprint(&phrase_fingerprint(words));
    Keypair::from_seed(&seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrase(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_generated_phrase_shape() {
        let words = generate_recovery_phrase();
        assert_eq!(words.len(), PHRASE_WORDS);

        // Without replacement: all distinct, all from the list.
        let unique: std::collections::HashSet<&String> = words.iter().collect();
        assert_eq!(unique.len(), PHRASE_WORDS);
        for word in &words {
            assert!(WORDLIST.contains(&word.as_str()));
        }
    }

    #[test]
    fn test_verify_correct_phrase() {
        let words = phrase(&["acorn", "anchor", "antler", "arrow", "aspen", "badger", "basalt", "beacon"]);
        let material = derive_recovery_material(&words);
        assert!(verify_recovery_phrase(&words, &material.hash_hex, &material.salt_hex));
    }

    #[test]
    fn test_verify_one_wrong_word() {
        let words = phrase(&["acorn", "anchor", "antler", "arrow", "aspen", "badger", "basalt", "beacon"]);
        let material = derive_recovery_material(&words);

        let mut wrong = words.clone();
        wrong[3] = "raven".into();
        assert!(!verify_recovery_phrase(&wrong, &material.hash_hex, &material.salt_hex));
    }

    #[test]
    fn test_verify_malformed_salt_returns_false() {
        let words = phrase(&["acorn", "anchor"]);
        assert!(!verify_recovery_phrase(&words, "deadbeef", "not hex!"));
        assert!(!verify_recovery_phrase(&words, "not hex!", "deadbeef"));
        assert!(!verify_recovery_phrase(&words, "", ""));
    }

    #[test]
    fn test_normalization_is_forgiving() {
        let canonical = phrase(&["acorn", "anchor", "antler", "arrow", "aspen", "badger", "basalt", "beacon"]);
        let material = derive_recovery_material(&canonical);

        let messy = phrase(&[" Acorn", "ANCHOR ", "antler", "arrow", "aspen", "badger", "basalt", " beacon "]);
        assert!(verify_recovery_phrase(&messy, &material.hash_hex, &material.salt_hex));
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let words = phrase(&["river", "sage", "summit", "ridge", "reed", "raven", "quartz", "prairie"]);
        assert_eq!(phrase_fingerprint(&words), phrase_fingerprint(&words));
    }

    #[test]
    fn test_keypair_derivation_matches_across_parties() {
        let words = phrase(&["river", "sage", "summit", "ridge", "reed", "raven", "quartz", "prairie"]);

        // Client derives from the phrase; the home AP only ever sees the
        // fingerprint. Both must land on the same keypair.
        let client = keypair_from_phrase(&words).unwrap();
        let seed = keypair_seed_from_fingerprint(&phrase_fingerprint(&words));
        let home_ap = Keypair::from_seed(&seed).unwrap();

        assert_eq!(client.public_key_pem(), home_ap.public_key_pem());
    }
}
