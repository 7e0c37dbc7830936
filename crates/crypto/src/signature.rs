//! BLS signatures on G1.
//!
//! A signature on `msg` under secret key `sk` is `sk · H(msg)` where `H` is
//! [`G1::hash_to_point`]. Verification checks
//! `e(sig, G2) == e(H(msg), pk)` with a single batched pairing check.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::codec::impl_wire_encoding;
use crate::curve::{pairing_check, G1, G1_BYTES, G2};
use crate::error::CryptoError;
use crate::keys::{Pubkey, Seckey};

pub const SIGNATURE_LENGTH: usize = G1_BYTES;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Signature(pub(crate) G1);

impl Signature {
    /// Anything but the point at infinity.
    pub fn is_valid(&self) -> bool {
        !self.0.is_identity()
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        self.0.marshal()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        G1::unmarshal(bytes).map(Self)
    }

    pub fn point(&self) -> &G1 {
        &self.0
    }
}

impl_wire_encoding!(Signature, SIGNATURE_LENGTH);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Signature({}..)", &hex[..18])
    }
}

impl From<G1> for Signature {
    fn from(point: G1) -> Self {
        Self(point)
    }
}

impl Add for Signature {
    type Output = Signature;
    fn add(self, rhs: Signature) -> Signature {
        Signature(self.0 + rhs.0)
    }
}

impl AddAssign for Signature {
    fn add_assign(&mut self, rhs: Signature) {
        self.0 += rhs.0;
    }
}

impl Sum for Signature {
    fn sum<I: Iterator<Item = Signature>>(iter: I) -> Signature {
        iter.fold(Signature::default(), |acc, sig| acc + sig)
    }
}

impl Seckey {
    /// sk · H(msg). A zero key yields the invalid identity signature.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        sign(self, msg)
    }
}

/// sk · H(msg)
pub fn sign(sk: &Seckey, msg: &[u8]) -> Signature {
    Signature(G1::hash_to_point(msg).scalar_mult(&sk.0))
}

/// Check `e(sig, G2) == e(H(msg), pk)`.
///
/// Invalid (identity) keys or signatures never verify.
pub fn verify_sig(pk: &Pubkey, msg: &[u8], sig: &Signature) -> bool {
    if !pk.is_valid() || !sig.is_valid() {
        return false;
    }
    let h = G1::hash_to_point(msg);
    pairing_check(&[(sig.0, G2::generator()), (-h, pk.0)])
}

/// Verify `sig` under the sum of `pubkeys`.
pub fn verify_aggregate_sig(pubkeys: &[Pubkey], msg: &[u8], sig: &Signature) -> bool {
    if pubkeys.is_empty() {
        return false;
    }
    let aggregated: Pubkey = pubkeys.iter().copied().sum();
    verify_sig(&aggregated, msg, sig)
}

/// Verify many signatures on one message at once.
///
/// Sums the signatures and the keys and runs one pairing check; a single
/// bad pair makes the whole batch fail.
pub fn batch_verify(pubkeys: &[Pubkey], msg: &[u8], sigs: &[Signature]) -> bool {
    if pubkeys.is_empty() || pubkeys.len() != sigs.len() {
        return false;
    }
    if pubkeys.iter().any(|pk| !pk.is_valid()) || sigs.iter().any(|s| !s.is_valid()) {
        return false;
    }
    let sig: Signature = sigs.iter().copied().sum();
    verify_aggregate_sig(pubkeys, msg, &sig)
}
