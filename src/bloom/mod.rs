//! Per-SSTable bloom filter for fast negative point lookups.
//!
//! Sized from an expected entry count `n` and a target false-positive rate
//! `p`:
//!
//! ```text
//! m = ceil(-n * ln(p) / (ln 2)^2)      bits
//! k = round((m / n) * ln 2)            hash functions
//! ```
//!
//! Hash `i` (for `i` in `0..k`) is 32-bit MurmurHash3 seeded with `i`; the
//! bit index is `hash mod m`. `contains` can report false positives but
//! never false negatives.
//!
//! The serialized form is the packed bit array alone (LSB-first within each
//! byte, `ceil(m / 8)` bytes) — hash parameters are **not** stored, so a
//! decoder must be constructed with the same `(n, p)` the writer used.

#[cfg(test)]
mod tests;

use thiserror::Error;

/// Errors returned by bloom filter construction.
#[derive(Debug, Error)]
pub enum BloomError {
    /// Parameters outside the valid domain, or a degenerate derived size.
    #[error("invalid bloom filter parameters: {0}")]
    BadConfig(String),
}

/// A fixed-size bloom filter over byte-string keys.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Packed bit array, LSB-first within each byte.
    bits: Vec<u8>,

    /// Number of addressable bits (`m`).
    num_bits: usize,

    /// Number of hash functions (`k`).
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates an empty filter sized for `expected_entries` keys at the
    /// given target false-positive rate.
    pub fn new(expected_entries: usize, false_positive_rate: f64) -> Result<Self, BloomError> {
        let (num_bits, num_hashes) = Self::derive_params(expected_entries, false_positive_rate)?;
        Ok(Self {
            bits: vec![0u8; num_bits.div_ceil(8)],
            num_bits,
            num_hashes,
        })
    }

    /// Reconstructs a filter from its packed bit array.
    ///
    /// `expected_entries` and `false_positive_rate` must equal the values
    /// the encoding filter was built with; they are re-derived into the
    /// same `(m, k)` so that lookups hash identically.
    pub fn decode(
        data: &[u8],
        expected_entries: usize,
        false_positive_rate: f64,
    ) -> Result<Self, BloomError> {
        let (num_bits, num_hashes) = Self::derive_params(expected_entries, false_positive_rate)?;
        let expected_len = num_bits.div_ceil(8);
        if data.len() < expected_len {
            return Err(BloomError::BadConfig(format!(
                "filter data of {} bytes is shorter than the {} bytes implied by (n={}, p={})",
                data.len(),
                expected_len,
                expected_entries,
                false_positive_rate,
            )));
        }
        Ok(Self {
            bits: data[..expected_len].to_vec(),
            num_bits,
            num_hashes,
        })
    }

    /// Serializes the filter as its packed bit array.
    pub fn encode(&self) -> Vec<u8> {
        self.bits.clone()
    }

    /// Inserts `key` by setting all `k` bits.
    pub fn add(&mut self, key: &[u8]) {
        for seed in 0..self.num_hashes {
            let index = self.bit_index(key, seed);
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// Returns true if `key` may be present, false if definitely absent.
    pub fn contains(&self, key: &[u8]) -> bool {
        (0..self.num_hashes).all(|seed| {
            let index = self.bit_index(key, seed);
            self.bits[index / 8] & (1 << (index % 8)) != 0
        })
    }

    /// Number of addressable bits.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Number of hash functions.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn bit_index(&self, key: &[u8], seed: u32) -> usize {
        mur3::murmurhash3_x86_32(key, seed) as usize % self.num_bits
    }

    /// Computes `(m, k)` from `(n, p)`, rejecting degenerate inputs.
    fn derive_params(n: usize, p: f64) -> Result<(usize, u32), BloomError> {
        if n == 0 {
            return Err(BloomError::BadConfig("expected entry count is zero".into()));
        }
        if !(p > 0.0 && p < 1.0) {
            return Err(BloomError::BadConfig(format!(
                "false positive rate {p} is outside (0, 1)"
            )));
        }

        let n_f = n as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-n_f * p.ln() / (ln2 * ln2)).ceil() as usize;
        let k = ((m as f64 / n_f) * ln2).round() as u32;

        if m == 0 || k == 0 {
            return Err(BloomError::BadConfig(format!(
                "derived sizes are degenerate (m={m}, k={k})"
            )));
        }

        Ok((m, k))
    }
}
