//! Random set elements.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Length of generated items before truncation.
pub const ITEM_LEN: usize = 6;

/// Infinite stream of random strings over `[a-zA-Z0-9]`.
///
/// Every item is drawn at [`ITEM_LEN`] symbols and then truncated to `key_length`, so shorter
/// keys see the collision rate of a smaller key space.
pub struct ItemGenerator {
    rng: StdRng,
    key_length: usize,
}

impl ItemGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            key_length: ITEM_LEN,
        }
    }

    /// Keep only the first `key_length` symbols of every item.
    pub fn truncate(mut self, key_length: usize) -> Self {
        self.key_length = key_length.min(ITEM_LEN);
        self
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    /// Draw `n` items into a vector.
    pub fn batch(&mut self, n: usize) -> Vec<String> {
        self.by_ref().take(n).collect()
    }
}

impl Iterator for ItemGenerator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut item: String = (&mut self.rng)
            .sample_iter(&Alphanumeric)
            .take(ITEM_LEN)
            .map(char::from)
            .collect();
        item.truncate(self.key_length);
        Some(item)
    }
}
