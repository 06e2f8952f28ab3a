//! The fixed recovery wordlist.
//!
//! Phrases are 8 words drawn without replacement from this list. The list
//! is part of the wire-compatible surface: changing it invalidates every
//! phrase issued against the old list.

/// The recovery wordlist. Order matters only for reproducibility of tests.
pub const WORDLIST: &[&str] = &[
    "acorn", "anchor", "antler", "arrow", "aspen", "badger", "basalt", "beacon",
    "birch", "bramble", "breeze", "canyon", "cedar", "cinder", "cliff", "clover",
    "comet", "coral", "crater", "creek", "cypress", "delta", "drift", "ember",
    "falcon", "fern", "fjord", "flint", "gale", "glacier", "granite", "grove",
    "harbor", "hazel", "heron", "hollow", "island", "juniper", "kestrel", "lagoon",
    "lantern", "larch", "lichen", "marsh", "meadow", "mesa", "moraine", "moss",
    "nettle", "oasis", "obsidian", "orchid", "osprey", "otter", "pebble", "pine",
    "prairie", "quartz", "raven", "reed", "ridge", "river", "sage", "summit",
];

/// Number of words in a recovery phrase.
pub const PHRASE_WORDS: usize = 8;
