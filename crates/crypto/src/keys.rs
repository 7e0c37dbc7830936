//! Participant identities and BLS key pairs.
//!
//! Secret keys are scalars mod the group order r; public keys live in G2.
//! All byte forms are fixed width and big-endian.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use ark_bn254::Fr;
use ark_ff::{PrimeField, Zero};
use committee_types::sha3_256;
use rand::{CryptoRng, RngCore};

use crate::codec::impl_wire_encoding;
use crate::curve::{random_scalar, scalar_from_bytes, scalar_to_bytes, G2, FIELD_BYTES, G2_BYTES};
use crate::entropy::Rand;
use crate::error::CryptoError;

pub const ID_LENGTH: usize = FIELD_BYTES;
pub const SECKEY_LENGTH: usize = FIELD_BYTES;
pub const PUBKEY_LENGTH: usize = G2_BYTES;

// =========================
// ID
// =========================

/// Identity of a committee participant, an integer mod r.
///
/// Shares are evaluated at the participant's id, so ids must be distinct
/// and non-zero within one committee.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id(pub(crate) Fr);

impl Id {
    pub fn from_u64(n: u64) -> Self {
        Self(Fr::from(n))
    }

    /// Big-endian bytes of any length, reduced mod r.
    pub fn from_address(address: &[u8]) -> Self {
        Self(Fr::from_be_bytes_mod_order(address))
    }

    /// SHA3-256 of the serialized public key, reduced mod r.
    pub fn from_pubkey(pk: &Pubkey) -> Self {
        Self::from_address(&sha3_256(&[&pk.to_bytes()]))
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_zero()
    }

    pub fn to_bytes(&self) -> [u8; ID_LENGTH] {
        scalar_to_bytes(&self.0)
    }

    /// Strict decoding: exactly 32 bytes holding a value below r.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        scalar_from_bytes(bytes).map(Self)
    }
}

impl_wire_encoding!(Id, ID_LENGTH);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Id({}..)", &hex[..10])
    }
}

// =========================
// SECRET KEY
// =========================

/// BLS secret key, a scalar mod r.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Seckey(pub(crate) Fr);

impl Seckey {
    pub fn from_u64(n: u64) -> Self {
        Self(Fr::from(n))
    }

    /// The stream bytes read big-endian, reduced mod r.
    pub fn from_rand(rand: &Rand) -> Self {
        Self(Fr::from_be_bytes_mod_order(rand.as_bytes()))
    }

    /// Big-endian bytes of any length, reduced mod r.
    pub fn from_bytes_mod_order(bytes: &[u8]) -> Self {
        Self(Fr::from_be_bytes_mod_order(bytes))
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(random_scalar(rng))
    }

    /// Non-zero keys are valid.
    pub fn is_valid(&self) -> bool {
        !self.0.is_zero()
    }

    pub fn to_bytes(&self) -> [u8; SECKEY_LENGTH] {
        scalar_to_bytes(&self.0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        scalar_from_bytes(bytes).map(Self)
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::from_seckey(self)
    }

    /// Diffie-Hellman on G2: pk · sk.
    pub fn dh(&self, pk: &Pubkey) -> Pubkey {
        Pubkey(pk.0.scalar_mult(&self.0))
    }
}

impl_wire_encoding!(Seckey, SECKEY_LENGTH);

impl fmt::Debug for Seckey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seckey(..)")
    }
}

impl Add for Seckey {
    type Output = Seckey;
    fn add(self, rhs: Seckey) -> Seckey {
        Seckey(self.0 + rhs.0)
    }
}

impl AddAssign for Seckey {
    fn add_assign(&mut self, rhs: Seckey) {
        self.0 += rhs.0;
    }
}

impl Sum for Seckey {
    fn sum<I: Iterator<Item = Seckey>>(iter: I) -> Seckey {
        iter.fold(Seckey::default(), |acc, sk| acc + sk)
    }
}

// =========================
// PUBLIC KEY
// =========================

/// BLS public key, sk · G2.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Pubkey(pub(crate) G2);

impl Pubkey {
    pub fn from_seckey(sk: &Seckey) -> Self {
        Self(G2::scalar_base_mult(&sk.0))
    }

    /// Anything but the point at infinity.
    pub fn is_valid(&self) -> bool {
        !self.0.is_identity()
    }

    pub fn to_bytes(&self) -> [u8; PUBKEY_LENGTH] {
        self.0.marshal()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        G2::unmarshal(bytes).map(Self)
    }

    pub fn point(&self) -> &G2 {
        &self.0
    }
}

impl_wire_encoding!(Pubkey, PUBKEY_LENGTH);

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Pubkey({}..)", &hex[..18])
    }
}

impl From<G2> for Pubkey {
    fn from(point: G2) -> Self {
        Self(point)
    }
}

impl Add for Pubkey {
    type Output = Pubkey;
    fn add(self, rhs: Pubkey) -> Pubkey {
        Pubkey(self.0 + rhs.0)
    }
}

impl AddAssign for Pubkey {
    fn add_assign(&mut self, rhs: Pubkey) {
        self.0 += rhs.0;
    }
}

impl Sum for Pubkey {
    fn sum<I: Iterator<Item = Pubkey>>(iter: I) -> Pubkey {
        iter.fold(Pubkey::default(), |acc, pk| acc + pk)
    }
}
