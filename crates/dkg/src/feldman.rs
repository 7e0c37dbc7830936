//! Feldman Verifiable Secret Sharing.
//!
//! Each member's per-era polynomial is derived from its long-term secret
//! stream and the era seed, so it is reproducible by the member but
//! unpredictable to everyone else. The commitments `a_i · G2` let any node
//! check a share without learning the polynomial.

use committee_crypto::{share_pubkey, share_seckey, Id, Pubkey, Rand, Seckey};
use committee_types::Hash;

/// Derive the k coefficients `[a_0, ..., a_{k-1}]` for one era.
///
/// f(x) = a_0 + a_1*x + ... + a_{k-1}*x^{k-1}
pub fn generate_polynomial(secret_seed: &Rand, seed: &Hash, k: usize) -> Vec<Seckey> {
    let era_stream = era_secret(secret_seed, seed);
    (0..k as u64)
        .map(|i| Seckey::from_rand(&era_stream.deri(i)))
        .collect()
}

/// The member's secret stream for one era, keyed by the seed's random stream.
fn era_secret(secret_seed: &Rand, seed: &Hash) -> Rand {
    let seed_rand = Rand::from_bytes(&[seed.as_bytes()]);
    secret_seed.derived_rand(&[seed_rand.as_bytes()])
}

/// Evaluate the polynomial at every receiver id.
pub fn evaluate_shares(coefficients: &[Seckey], receivers: &[Id]) -> Vec<Seckey> {
    receivers
        .iter()
        .map(|id| share_seckey(coefficients, id))
        .collect()
}

/// C_i = a_i · G2 for each coefficient a_i
pub fn generate_commitments(coefficients: &[Seckey]) -> Vec<Pubkey> {
    coefficients.iter().map(Seckey::pubkey).collect()
}

/// Verify a share against Feldman commitments.
///
/// Checks that share · G2 = Σ C_i · x^i
pub fn verify_share(share: &Seckey, receiver: &Id, commitments: &[Pubkey]) -> bool {
    if commitments.is_empty() {
        return false;
    }
    share.pubkey() == share_pubkey(commitments, receiver)
}
