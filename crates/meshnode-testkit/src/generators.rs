//! Proptest strategies for meshnode types.

use proptest::prelude::*;

use meshnode_recovery::{PHRASE_WORDS, WORDLIST};

/// A valid recovery phrase: 8 distinct words from the fixed wordlist.
pub fn arb_phrase() -> impl Strategy<Value = Vec<String>> {
    proptest::sample::subsequence(WORDLIST.to_vec(), PHRASE_WORDS)
        .prop_map(|words| words.into_iter().map(String::from).collect())
}

/// Printable message content up to a few hundred bytes.
pub fn arb_content() -> impl Strategy<Value = String> {
    "[ -~]{1,300}"
}

/// A plausible dispatch timestamp.
pub fn arb_tod() -> impl Strategy<Value = i64> {
    1_600_000_000_000i64..1_900_000_000_000i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshnode_core::MessageSignable;
    use meshnode_recovery::{derive_recovery_material, verify_recovery_phrase};

    proptest! {
        // Keep case counts low: PBKDF2 at 100k rounds is deliberately slow.
        #![proptest_config(ProptestConfig::with_cases(4))]

        #[test]
        fn prop_phrase_roundtrip(words in arb_phrase()) {
            let material = derive_recovery_material(&words);
            prop_assert!(verify_recovery_phrase(
                &words,
                &material.hash_hex,
                &material.salt_hex
            ));
        }
    }

    proptest! {
        #[test]
        fn prop_hash_key_deterministic(
            content in arb_content(),
            tod in arb_tod(),
        ) {
            let signable = MessageSignable {
                content,
                tod,
                usernick: "prop".into(),
                origin: "ap-prop".into(),
            };
            prop_assert_eq!(signable.hash_key(), signable.hash_key());
        }

        #[test]
        fn prop_hash_key_sensitive_to_content(
            content in arb_content(),
            tod in arb_tod(),
        ) {
            let a = MessageSignable {
                content: content.clone(),
                tod,
                usernick: "prop".into(),
                origin: "ap-prop".into(),
            };
            let b = MessageSignable {
                content: format!("{}!", content),
                tod,
                usernick: "prop".into(),
                origin: "ap-prop".into(),
            };
            prop_assert_ne!(a.hash_key(), b.hash_key());
        }
    }
}
