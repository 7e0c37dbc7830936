//! Shamir secret sharing and threshold recovery.
//!
//! In a (k, n) scheme:
//! - A dealer picks a polynomial f of degree k-1 with f(0) the secret
//! - Participant `id` receives the share f(id)
//! - Any k shares recover f(0); fewer reveal nothing about it
//!
//! # Recovery
//!
//! Given k points (x_i, y_i), the constant term is
//! f(0) = Σ λ_i · y_i with λ_i = Π_{j≠i} x_j / (x_j - x_i).
//!
//! Signing is linear in the secret key, so the same weights applied to
//! partial signatures σ_i = f(x_i) · H(m) yield f(0) · H(m).
//!
//! Recovery does not know the threshold: callers must supply exactly the
//! points of one polynomial, at least k of them. Too few points silently
//! give a wrong result.

use std::collections::HashSet;

use ark_bn254::Fr;
use ark_ff::{Field, One, Zero};

use crate::curve::{G1, G2};
use crate::error::CryptoError;
use crate::keys::{Id, Pubkey, Seckey};
use crate::signature::Signature;

/// Evaluate the secret polynomial at `id` using Horner's method.
///
/// `coefficients[0]` is the constant term.
pub fn share_seckey(coefficients: &[Seckey], id: &Id) -> Seckey {
    let x = id.0;
    let value = coefficients
        .iter()
        .rev()
        .fold(Fr::zero(), |acc, c| acc * x + c.0);
    Seckey(value)
}

/// Evaluate the committed polynomial Σ C_i · x^i at `id`.
///
/// With `C_i = a_i · G2` this is the public key of `share_seckey(a, id)`.
pub fn share_pubkey(commitments: &[Pubkey], id: &Id) -> Pubkey {
    let x = id.0;
    let value = commitments
        .iter()
        .rev()
        .fold(G2::identity(), |acc, c| acc.scalar_mult(&x) + c.0);
    Pubkey(value)
}

/// Sum of all keys; no Lagrange weighting.
pub fn aggregate_seckeys(keys: &[Seckey]) -> Seckey {
    keys.iter().copied().sum()
}

/// Sum of all public keys; no Lagrange weighting.
pub fn aggregate_pubkeys(keys: &[Pubkey]) -> Pubkey {
    keys.iter().copied().sum()
}

/// Sum of all signatures; no Lagrange weighting.
pub fn aggregate_sigs(sigs: &[Signature]) -> Signature {
    sigs.iter().copied().sum()
}

/// Recover f(0) from shares of a single polynomial.
pub fn recover_seckey(shares: &[(Id, Seckey)]) -> Result<Seckey, CryptoError> {
    interpolate_at(&Id::default(), shares)
}

/// Recover f(0) · H(m) from partial signatures f(x_i) · H(m).
pub fn recover_signature(shares: &[(Id, Signature)]) -> Result<Signature, CryptoError> {
    let xs = distinct_points(shares.iter().map(|(id, _)| id))?;
    let mut result = G1::identity();
    for (i, (_, sig)) in shares.iter().enumerate() {
        let lambda = lagrange_coefficient(&Fr::zero(), i, &xs)?;
        result += sig.0.scalar_mult(&lambda);
    }
    Ok(Signature(result))
}

/// Recover a group signature from the first `threshold` partial signatures.
///
/// Unlike [`recover_signature`], this checks that enough shares are present.
pub fn recover_threshold_signature(
    shares: &[(Id, Signature)],
    threshold: usize,
) -> Result<Signature, CryptoError> {
    if threshold == 0 || shares.len() < threshold {
        return Err(CryptoError::InsufficientShares {
            required: threshold,
            got: shares.len(),
        });
    }
    recover_signature(&shares[..threshold])
}

/// Evaluate at `x` the polynomial passing through `points`.
pub fn interpolate_at(x: &Id, points: &[(Id, Seckey)]) -> Result<Seckey, CryptoError> {
    let xs = distinct_points(points.iter().map(|(id, _)| id))?;
    let mut result = Fr::zero();
    for (i, (_, y)) in points.iter().enumerate() {
        result += lagrange_coefficient(&x.0, i, &xs)? * y.0;
    }
    Ok(Seckey(result))
}

/// Check that revealed share pieces come from one committed polynomial.
///
/// `shares[m]` is the piece the sender produced for `ids[m]`; `k` is the
/// threshold and `commitments` the sender's published `a_i · G2`, with
/// `commitments[0]` the contribution to the group public key. The pieces
/// pass when:
///
/// 1. every piece beyond the first `k` lies on the polynomial those `k`
///    pieces determine,
/// 2. that polynomial's constant term matches `commitments[0]`,
/// 3. every piece matches the commitments evaluated at its id.
pub fn check_share_pieces_valid(
    shares: &[Seckey],
    ids: &[Id],
    k: usize,
    commitments: &[Pubkey],
) -> bool {
    let n = shares.len();
    if n != ids.len() || k == 0 || k > n || commitments.len() != k {
        return false;
    }

    let basis: Vec<(Id, Seckey)> = ids[..k].iter().copied().zip(shares[..k].iter().copied()).collect();
    for m in k..n {
        match interpolate_at(&ids[m], &basis) {
            Ok(expected) if expected == shares[m] => {}
            _ => return false,
        }
    }

    match recover_seckey(&basis) {
        Ok(secret) if secret.pubkey() == commitments[0] => {}
        _ => return false,
    }

    shares
        .iter()
        .zip(ids.iter())
        .all(|(share, id)| share.pubkey() == share_pubkey(commitments, id))
}

fn distinct_points<'a>(ids: impl Iterator<Item = &'a Id>) -> Result<Vec<Fr>, CryptoError> {
    let xs: Vec<Fr> = ids.map(|id| id.0).collect();
    if xs.is_empty() {
        return Err(CryptoError::EmptyShareSet);
    }
    let unique: HashSet<Fr> = xs.iter().copied().collect();
    if unique.len() != xs.len() {
        return Err(CryptoError::DuplicateShareIndex);
    }
    Ok(xs)
}

/// λ_i(x) = Π_{j≠i} (x - x_j) / (x_i - x_j)
fn lagrange_coefficient(x: &Fr, i: usize, xs: &[Fr]) -> Result<Fr, CryptoError> {
    let x_i = xs[i];
    let mut numerator = Fr::one();
    let mut denominator = Fr::one();
    for (j, x_j) in xs.iter().enumerate() {
        if j == i {
            continue;
        }
        numerator *= *x - x_j;
        denominator *= x_i - x_j;
    }
    let inverse = denominator.inverse().ok_or(CryptoError::DuplicateShareIndex)?;
    Ok(numerator * inverse)
}
