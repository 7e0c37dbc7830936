//! Deterministic 256-bit random stream.
//!
//! A [`Rand`] is a SHA3-256 digest that can be extended with further inputs
//! to derive independent sub-streams. Every node deriving from the same seed
//! obtains the same values, which is what makes candidate selection and the
//! per-era polynomials reproducible.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use committee_types::sha3_256;
use rand::{CryptoRng, RngCore};

pub const RAND_LENGTH: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct Rand([u8; RAND_LENGTH]);

impl Rand {
    /// H(parts[0] || parts[1] || ...)
    pub fn from_bytes(parts: &[&[u8]]) -> Self {
        Self(sha3_256(parts))
    }

    /// Fresh stream from an OS-grade generator.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; RAND_LENGTH];
        rng.fill_bytes(&mut bytes);
        Self::from_bytes(&[&bytes])
    }

    pub fn as_bytes(&self) -> &[u8; RAND_LENGTH] {
        &self.0
    }

    /// Chain each input into the stream: r' = H(r || x).
    pub fn derived_rand(&self, parts: &[&[u8]]) -> Self {
        parts
            .iter()
            .fold(*self, |r, part| Self(sha3_256(&[&r.0, part])))
    }

    /// The i-th sub-stream, keyed by the decimal text of `i`.
    pub fn deri(&self, i: u64) -> Self {
        self.derived_rand(&[i.to_string().as_bytes()])
    }

    /// The stream read as a big-endian integer, reduced mod `n`.
    ///
    /// Returns 0 when `n` is 0.
    pub fn modulo_u64(&self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        let n = n as u128;
        let rem = self
            .0
            .iter()
            .fold(0u128, |acc, b| ((acc << 8) | *b as u128) % n);
        rem as u64
    }

    pub fn modulo(&self, n: usize) -> usize {
        self.modulo_u64(n as u64) as usize
    }

    /// Deterministic permutation of `0..n`, `k` of which are returned.
    pub fn random_perm(&self, n: usize, k: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        let k = k.min(n);
        for i in 0..k {
            let j = i + self.deri(i as u64).modulo(n - i);
            indices.swap(i, j);
        }
        indices.truncate(k);
        indices
    }
}

impl fmt::Debug for Rand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rand(..)")
    }
}

impl From<[u8; RAND_LENGTH]> for Rand {
    fn from(bytes: [u8; RAND_LENGTH]) -> Self {
        Self(bytes)
    }
}
