//! Message generation for the scenarios.
//!
//! Messages follow the `Sample data: 1xyz 2xyz ...` pattern: easy to eyeball
//! in logs, and a reassembly bug that swaps or drops a fragment shows up as
//! a broken count sequence.
//!
//! # Design
//!
//! Lengths are drawn from a seeded ChaCha8 RNG, so the same seed gives the
//! same traffic and a failing run can be replayed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const PREFIX: &str = "Sample data:";

/// Build `Sample data: 1xyz 2xyz ... {words}xyz`.
pub fn sample_message(words: usize) -> String {
    let mut msg = String::from(PREFIX);
    for i in 1..=words {
        msg.push_str(&format!(" {i}xyz"));
    }
    msg
}

/// Generate `count` sample messages of `min_words..=max_words` words each.
///
/// # Arguments
/// - `seed`: random seed for determinism
/// - `count`: number of messages
/// - `min_words`, `max_words`: inclusive word count range
pub fn generate_messages(
    seed: u64,
    count: usize,
    min_words: usize,
    max_words: usize,
) -> Vec<String> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let max_words = max_words.max(min_words);

    (0..count)
        .map(|_| sample_message(rng.gen_range(min_words..=max_words)))
        .collect()
}

/// Longest message, in words, whose single packet fits `mtu` after a
/// `header_len`-byte header. 0 if not even the prefix fits.
pub fn max_words_for(mtu: usize, header_len: usize) -> usize {
    let budget = mtu.saturating_sub(header_len);
    let mut words = 0;
    while sample_message(words + 1).len() <= budget {
        words += 1;
    }
    words
}
