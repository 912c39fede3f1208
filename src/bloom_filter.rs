//! A fixed-size Bloom filter over string keys.
//!
//! Bit positions come from double hashing (`h1 + i * h2`) over two SipHash
//! digests with distinct seeds, so results are stable across runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const SEED_A: u64 = 0x9E37_79B9_7F4A_7C15;
const SEED_B: u64 = 0xC2B2_AE3D_27D4_EB4F;

#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a filter with `num_bits` bits and `num_hashes` probes per key.
    pub fn new(num_bits: usize, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(64) as u64;
        let words = num_bits.div_ceil(64) as usize;
        BloomFilter {
            bits: vec![0; words],
            num_bits,
            num_hashes: num_hashes.max(1),
        }
    }

    /// Sizes the filter for `expected_items` keys at false-positive rate `fp_rate`.
    pub fn with_rate(expected_items: usize, fp_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = fp_rate.clamp(f64::MIN_POSITIVE, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-n * p.ln() / (ln2 * ln2)).ceil();
        let k = ((m / n) * ln2).round().max(1.0);
        BloomFilter::new(m as usize, k as u32)
    }

    pub fn add(&mut self, key: &str) {
        let (h1, h2) = digests(key);
        for i in 0..self.num_hashes {
            let bit = self.position(h1, h2, i);
            self.bits[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    pub fn might_contain(&self, key: &str) -> bool {
        let (h1, h2) = digests(key);
        (0..self.num_hashes).all(|i| {
            let bit = self.position(h1, h2, i);
            self.bits[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0
        })
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|word| *word = 0);
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }
}

fn digests(key: &str) -> (u64, u64) {
    let hash_with = |seed: u64| {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        key.hash(&mut hasher);
        hasher.finish()
    };
    // An odd step keeps the probe sequence from collapsing.
    (hash_with(SEED_A), hash_with(SEED_B) | 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_keys_are_always_found() {
        let mut filter = BloomFilter::with_rate(1_000, 0.01);
        for i in 0..1_000 {
            filter.add(&format!("https://example.com/{i}"));
        }
        for i in 0..1_000 {
            assert!(filter.might_contain(&format!("https://example.com/{i}")));
        }
    }

    #[test]
    fn false_positive_rate_stays_near_target() {
        let mut filter = BloomFilter::with_rate(10_000, 0.01);
        for i in 0..10_000 {
            filter.add(&format!("in-{i}"));
        }
        let false_positives = (0..10_000)
            .filter(|i| filter.might_contain(&format!("out-{i}")))
            .count();
        // Target is 1%; allow generous slack.
        assert!(false_positives < 300, "got {false_positives} false positives");
    }

    #[test]
    fn clear_forgets_everything() {
        let mut filter = BloomFilter::new(1024, 3);
        filter.add("a");
        assert!(filter.might_contain("a"));
        filter.clear();
        assert!(!filter.might_contain("a"));
    }

    #[test]
    fn sizing_follows_standard_formula() {
        let filter = BloomFilter::with_rate(5_000_000, 0.03);
        // m = -n ln p / ln2^2 ~= 36.5M bits, k ~= 5
        assert!(filter.num_bits() > 36_000_000 && filter.num_bits() < 37_000_000);
        assert_eq!(filter.num_hashes(), 5);
    }
}
