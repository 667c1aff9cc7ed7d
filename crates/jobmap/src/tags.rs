//! Random human-readable map tags.

use rand::Rng;

use crate::core::Tag;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brisk", "calm", "clever", "crisp", "dusty", "eager", "fancy", "gentle",
    "golden", "hazy", "hidden", "humble", "icy", "jolly", "keen", "lively", "lucky", "mellow",
    "misty", "nimble", "noble", "odd", "patient", "plucky", "quiet", "rapid", "rustic", "shy",
    "silent", "silver", "sleepy", "snowy", "steady", "sunny", "swift", "tidy", "vivid", "wild",
];

const NOUNS: &[&str] = &[
    "badger", "beacon", "brook", "canyon", "cedar", "comet", "coral", "crane", "delta", "ember",
    "falcon", "fern", "glacier", "harbor", "heron", "island", "lantern", "maple", "meadow",
    "nebula", "orchid", "otter", "pebble", "pine", "prairie", "quartz", "raven", "reef", "river",
    "sparrow", "summit", "thicket", "tundra", "valley", "walrus", "willow", "wren", "yak", "zephyr",
];

const ATTEMPTS: usize = 64;
const FALLBACK_LEN: usize = 6;
const FALLBACK_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// An `adjective-adjective-noun` tag for which `is_taken` is false.
///
/// Falls back to random alphanumeric suffixes when the word space is
/// crowded.
pub fn random_tag(mut is_taken: impl FnMut(&Tag) -> bool) -> Tag {
    let mut rng = rand::rng();
    for _ in 0..ATTEMPTS {
        let raw = format!(
            "{}-{}-{}",
            pick(&mut rng, ADJECTIVES),
            pick(&mut rng, ADJECTIVES),
            pick(&mut rng, NOUNS)
        );
        if let Ok(tag) = Tag::parse(raw)
            && !is_taken(&tag)
        {
            return tag;
        }
    }
    loop {
        let raw: String = (0..FALLBACK_LEN)
            .map(|_| FALLBACK_ALPHABET[rng.random_range(0..FALLBACK_ALPHABET.len())] as char)
            .collect();
        if let Ok(tag) = Tag::parse(raw)
            && !is_taken(&tag)
        {
            return tag;
        }
    }
}

fn pick<'a>(rng: &mut impl Rng, words: &[&'a str]) -> &'a str {
    words[rng.random_range(0..words.len())]
}
