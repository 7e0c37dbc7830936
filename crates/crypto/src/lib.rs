//! Pairing-based threshold signature primitives for committee key generation.
//!
//! This crate implements BLS signatures and Shamir secret sharing on the
//! BN254 curve.
//!
//! # Overview
//!
//! 1. **Curve arithmetic**: G1, G2 and GT with a fixed wire encoding,
//!    try-and-increment hashing to G1 and a batched pairing check.
//!
//! 2. **Keys**: a [`Seckey`] is a scalar mod the group order, its [`Pubkey`]
//!    the point `sk · G2`, and a participant is named by an [`Id`].
//!
//! 3. **Signatures**: σ = sk · H(m) on G1, verified with
//!    e(σ, G2) = e(H(m), pk).
//!
//! 4. **Sharing**: shares are evaluations of a degree k-1 polynomial at the
//!    participants' ids. Any k of them recover the secret, or a signature
//!    under it, by Lagrange interpolation at zero.

mod codec;
pub mod curve;
pub mod entropy;
pub mod error;
pub mod keys;
pub mod signature;
pub mod threshold;

pub use entropy::Rand;
pub use error::CryptoError;
pub use keys::{Id, Pubkey, Seckey};
pub use signature::{batch_verify, sign, verify_aggregate_sig, verify_sig, Signature};
pub use threshold::{
    aggregate_pubkeys, aggregate_seckeys, aggregate_sigs, check_share_pieces_valid,
    recover_seckey, recover_signature, recover_threshold_signature, share_pubkey, share_seckey,
};
