//! Pairing groups over the BN254 (alt_bn128) curve.
//!
//! [`G1`], [`G2`] and [`Gt`] wrap the arkworks group elements and fix the
//! wire encoding used by every node:
//!
//! - G1: 32-byte big-endian X followed by one byte holding the parity of Y.
//! - G2: x.imag, x.real, y.imag, y.real, each 32 bytes big-endian.
//! - GT: the twelve base-field coefficients, highest tower degree first.
//!
//! The point at infinity encodes as an all-zero buffer in G1 and G2.
//!
//! None of these operations is constant time.

use std::ops::{Add, AddAssign, Neg, Sub};

use ark_bn254::{Bn254, Fq, Fq12, Fq2, Fq6, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{pairing::Pairing, AffineRepr, CurveGroup, Group};
use ark_ff::{BigInt, BigInteger, Field, One, PrimeField, Zero};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Width of one serialized base-field or scalar-field element.
pub const FIELD_BYTES: usize = 32;
/// Serialized G1 length: X plus the Y parity byte.
pub const G1_BYTES: usize = FIELD_BYTES + 1;
/// Serialized G2 length.
pub const G2_BYTES: usize = FIELD_BYTES * 4;
/// Serialized GT length.
pub const GT_BYTES: usize = FIELD_BYTES * 12;

// =========================
// FIELD ENCODING
// =========================

fn fq_to_bytes(f: &Fq, out: &mut [u8]) {
    let bytes = f.into_bigint().to_bytes_be();
    let offset = FIELD_BYTES - bytes.len();
    out[..offset].fill(0);
    out[offset..FIELD_BYTES].copy_from_slice(&bytes);
}

fn fq_from_bytes(bytes: &[u8]) -> Result<Fq, CryptoError> {
    Fq::from_bigint(bigint_from_be(bytes)).ok_or(CryptoError::CoordinateOutOfRange)
}

fn bigint_from_be(bytes: &[u8]) -> BigInt<4> {
    let mut limbs = [0u64; 4];
    for (limb, chunk) in limbs.iter_mut().zip(bytes.rchunks(8)) {
        let mut buf = [0u8; 8];
        buf[8 - chunk.len()..].copy_from_slice(chunk);
        *limb = u64::from_be_bytes(buf);
    }
    BigInt::new(limbs)
}

/// Big-endian encoding of a scalar.
pub fn scalar_to_bytes(s: &Fr) -> [u8; FIELD_BYTES] {
    let bytes = s.into_bigint().to_bytes_be();
    let mut out = [0u8; FIELD_BYTES];
    out[FIELD_BYTES - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Decode a canonical big-endian scalar; values at or above the group order
/// are rejected.
pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Fr, CryptoError> {
    if bytes.len() != FIELD_BYTES {
        return Err(CryptoError::InvalidLength {
            expected: FIELD_BYTES,
            got: bytes.len(),
        });
    }
    Fr::from_bigint(bigint_from_be(bytes)).ok_or(CryptoError::InvalidScalar)
}

/// Uniformly random scalar.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Fr {
    let mut bytes = [0u8; 64];
    rng.fill_bytes(&mut bytes);
    Fr::from_le_bytes_mod_order(&bytes)
}

fn check_length(bytes: &[u8], expected: usize) -> Result<(), CryptoError> {
    if bytes.len() != expected {
        return Err(CryptoError::InvalidLength {
            expected,
            got: bytes.len(),
        });
    }
    Ok(())
}

// =========================
// G1
// =========================

/// Element of G1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct G1(pub(crate) G1Projective);

impl Default for G1 {
    fn default() -> Self {
        Self::identity()
    }
}

impl G1 {
    pub fn identity() -> Self {
        Self(G1Projective::zero())
    }

    pub fn generator() -> Self {
        Self(G1Projective::generator())
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_zero()
    }

    /// k · G
    pub fn scalar_base_mult(k: &Fr) -> Self {
        Self(G1Projective::generator() * k)
    }

    /// k · self
    pub fn scalar_mult(&self, k: &Fr) -> Self {
        Self(self.0 * k)
    }

    pub fn marshal(&self) -> [u8; G1_BYTES] {
        let mut out = [0u8; G1_BYTES];
        let affine = self.0.into_affine();
        if affine.is_zero() {
            return out;
        }
        fq_to_bytes(&affine.x, &mut out[..FIELD_BYTES]);
        out[FIELD_BYTES] = affine.y.into_bigint().is_odd() as u8;
        out
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_length(bytes, G1_BYTES)?;
        if bytes.iter().all(|b| *b == 0) {
            return Ok(Self::identity());
        }

        let odd = match bytes[FIELD_BYTES] {
            0 => false,
            1 => true,
            _ => return Err(CryptoError::InvalidG1Point),
        };
        let x = fq_from_bytes(&bytes[..FIELD_BYTES])?;
        let mut y = g1_rhs(&x).sqrt().ok_or(CryptoError::PointNotOnCurve)?;
        if y.into_bigint().is_odd() != odd {
            y = -y;
        }

        // BN254 G1 has cofactor one, so every curve point is in the subgroup
        let point = G1Affine::new_unchecked(x, y);
        if !point.is_on_curve() {
            return Err(CryptoError::PointNotOnCurve);
        }
        Ok(Self(point.into()))
    }

    /// Map a message to G1 by try-and-increment.
    ///
    /// x starts at SHA-256(msg) mod p and is incremented until x^3 + 3 is a
    /// quadratic residue.
    pub fn hash_to_point(msg: &[u8]) -> Self {
        let digest = Sha256::digest(msg);
        let mut x = Fq::from_be_bytes_mod_order(&digest);
        loop {
            if let Some(y) = g1_rhs(&x).sqrt() {
                return Self(G1Affine::new_unchecked(x, y).into());
            }
            x += Fq::one();
        }
    }
}

/// y^2 = x^3 + 3
fn g1_rhs(x: &Fq) -> Fq {
    x.square() * x + Fq::from(3u64)
}

impl Add for G1 {
    type Output = G1;
    fn add(self, rhs: G1) -> G1 {
        G1(self.0 + rhs.0)
    }
}

impl AddAssign for G1 {
    fn add_assign(&mut self, rhs: G1) {
        self.0 += rhs.0;
    }
}

impl Sub for G1 {
    type Output = G1;
    fn sub(self, rhs: G1) -> G1 {
        G1(self.0 - rhs.0)
    }
}

impl Neg for G1 {
    type Output = G1;
    fn neg(self) -> G1 {
        G1(-self.0)
    }
}

// =========================
// G2
// =========================

/// Element of G2, the order-r subgroup of the sextic twist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct G2(pub(crate) G2Projective);

impl Default for G2 {
    fn default() -> Self {
        Self::identity()
    }
}

impl G2 {
    pub fn identity() -> Self {
        Self(G2Projective::zero())
    }

    pub fn generator() -> Self {
        Self(G2Projective::generator())
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_zero()
    }

    pub fn scalar_base_mult(k: &Fr) -> Self {
        Self(G2Projective::generator() * k)
    }

    pub fn scalar_mult(&self, k: &Fr) -> Self {
        Self(self.0 * k)
    }

    pub fn marshal(&self) -> [u8; G2_BYTES] {
        let mut out = [0u8; G2_BYTES];
        let affine = self.0.into_affine();
        if affine.is_zero() {
            return out;
        }
        let coords = [affine.x.c1, affine.x.c0, affine.y.c1, affine.y.c0];
        for (chunk, coord) in out.chunks_mut(FIELD_BYTES).zip(coords.iter()) {
            fq_to_bytes(coord, chunk);
        }
        out
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_length(bytes, G2_BYTES)?;
        if bytes.iter().all(|b| *b == 0) {
            return Ok(Self::identity());
        }

        let mut coords = [Fq::zero(); 4];
        for (coord, chunk) in coords.iter_mut().zip(bytes.chunks(FIELD_BYTES)) {
            *coord = fq_from_bytes(chunk)?;
        }
        let [x_imag, x_real, y_imag, y_real] = coords;
        let point = G2Affine::new_unchecked(Fq2::new(x_real, x_imag), Fq2::new(y_real, y_imag));
        if !point.is_on_curve() {
            return Err(CryptoError::PointNotOnCurve);
        }
        if !point.is_in_correct_subgroup_assuming_on_curve() {
            return Err(CryptoError::PointNotInSubgroup);
        }
        Ok(Self(point.into()))
    }
}

impl Add for G2 {
    type Output = G2;
    fn add(self, rhs: G2) -> G2 {
        G2(self.0 + rhs.0)
    }
}

impl AddAssign for G2 {
    fn add_assign(&mut self, rhs: G2) {
        self.0 += rhs.0;
    }
}

impl Sub for G2 {
    type Output = G2;
    fn sub(self, rhs: G2) -> G2 {
        G2(self.0 - rhs.0)
    }
}

impl Neg for G2 {
    type Output = G2;
    fn neg(self) -> G2 {
        G2(-self.0)
    }
}

// =========================
// GT
// =========================

/// Element of the target group, written additively.
///
/// `Add` is multiplication in Fq12, `Neg` the inverse and `scalar_mult`
/// exponentiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gt(pub(crate) Fq12);

impl Default for Gt {
    fn default() -> Self {
        Self::identity()
    }
}

impl Gt {
    pub fn identity() -> Self {
        Self(Fq12::one())
    }

    /// e(G1 generator, G2 generator)
    pub fn generator() -> Self {
        pair(&G1::generator(), &G2::generator())
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_one()
    }

    pub fn scalar_base_mult(k: &Fr) -> Self {
        Self::generator().scalar_mult(k)
    }

    pub fn scalar_mult(&self, k: &Fr) -> Self {
        Self(self.0.pow(k.into_bigint()))
    }

    pub fn marshal(&self) -> [u8; GT_BYTES] {
        let mut out = [0u8; GT_BYTES];
        for (chunk, coeff) in out.chunks_mut(FIELD_BYTES).zip(gt_coefficients(&self.0).iter()) {
            fq_to_bytes(coeff, chunk);
        }
        out
    }

    /// Decode and check membership in the order-r subgroup of Fq12*.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_length(bytes, GT_BYTES)?;
        let mut c = [Fq::zero(); 12];
        for (coeff, chunk) in c.iter_mut().zip(bytes.chunks(FIELD_BYTES)) {
            *coeff = fq_from_bytes(chunk)?;
        }
        let value = Fq12::new(
            Fq6::new(
                Fq2::new(c[11], c[10]),
                Fq2::new(c[9], c[8]),
                Fq2::new(c[7], c[6]),
            ),
            Fq6::new(
                Fq2::new(c[5], c[4]),
                Fq2::new(c[3], c[2]),
                Fq2::new(c[1], c[0]),
            ),
        );
        if value.is_zero() || !value.pow(Fr::MODULUS).is_one() {
            return Err(CryptoError::InvalidGtElement);
        }
        Ok(Self(value))
    }
}

fn gt_coefficients(v: &Fq12) -> [Fq; 12] {
    let (lo, hi) = (&v.c0, &v.c1);
    [
        hi.c2.c1, hi.c2.c0, hi.c1.c1, hi.c1.c0, hi.c0.c1, hi.c0.c0, lo.c2.c1, lo.c2.c0,
        lo.c1.c1, lo.c1.c0, lo.c0.c1, lo.c0.c0,
    ]
}

impl Add for Gt {
    type Output = Gt;
    fn add(self, rhs: Gt) -> Gt {
        Gt(self.0 * rhs.0)
    }
}

impl Neg for Gt {
    type Output = Gt;
    fn neg(self) -> Gt {
        Gt(self.0.inverse().unwrap_or_default())
    }
}

// =========================
// PAIRING
// =========================

/// Optimal-Ate pairing e(g1, g2).
pub fn pair(g1: &G1, g2: &G2) -> Gt {
    let g1 = g1.0.into_affine();
    let g2 = g2.0.into_affine();
    Gt(Bn254::pairing(g1, g2).0)
}

/// Whether the product of e(a_i, b_i) is the identity.
///
/// Runs one multi Miller loop and a single final exponentiation.
pub fn pairing_check(pairs: &[(G1, G2)]) -> bool {
    let g1s: Vec<G1Affine> = pairs.iter().map(|(a, _)| a.0.into_affine()).collect();
    let g2s: Vec<G2Affine> = pairs.iter().map(|(_, b)| b.0.into_affine()).collect();
    let miller = Bn254::multi_miller_loop(g1s, g2s);
    Bn254::final_exponentiation(miller)
        .map(|out| out.0.is_one())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_g1_marshal_roundtrip() {
        for _ in 0..8 {
            let k = random_scalar(&mut OsRng);
            let p = G1::scalar_base_mult(&k);
            let bytes = p.marshal();
            assert_eq!(G1::unmarshal(&bytes).unwrap(), p);
        }
    }

    #[test]
    fn test_g2_marshal_roundtrip() {
        for _ in 0..4 {
            let k = random_scalar(&mut OsRng);
            let p = G2::scalar_base_mult(&k);
            let bytes = p.marshal();
            assert_eq!(G2::unmarshal(&bytes).unwrap(), p);
        }
    }

    #[test]
    fn test_identity_marshals_to_zero() {
        assert_eq!(G1::identity().marshal(), [0u8; G1_BYTES]);
        assert_eq!(G2::identity().marshal(), [0u8; G2_BYTES]);
        assert!(G1::unmarshal(&[0u8; G1_BYTES]).unwrap().is_identity());
        assert!(G2::unmarshal(&[0u8; G2_BYTES]).unwrap().is_identity());
    }

    #[test]
    fn test_g1_parity_byte_selects_root() {
        let p = G1::scalar_base_mult(&Fr::from(7u64));
        let mut bytes = p.marshal();
        bytes[FIELD_BYTES] ^= 1;
        assert_eq!(G1::unmarshal(&bytes).unwrap(), -p);

        bytes[FIELD_BYTES] = 2;
        assert_eq!(G1::unmarshal(&bytes), Err(CryptoError::InvalidG1Point));
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert_eq!(
            G1::unmarshal(&[1u8; 32]),
            Err(CryptoError::InvalidLength {
                expected: G1_BYTES,
                got: 32
            })
        );
        assert!(G2::unmarshal(&[1u8; 127]).is_err());
        assert!(Gt::unmarshal(&[1u8; 10]).is_err());
    }

    #[test]
    fn test_rejects_coordinate_above_modulus() {
        let mut bytes = [0xffu8; G1_BYTES];
        bytes[FIELD_BYTES] = 0;
        assert_eq!(G1::unmarshal(&bytes), Err(CryptoError::CoordinateOutOfRange));
    }

    #[test]
    fn test_g2_rejects_point_off_curve() {
        let mut bytes = G2::generator().marshal();
        bytes[G2_BYTES - 1] ^= 1;
        assert_eq!(G2::unmarshal(&bytes), Err(CryptoError::PointNotOnCurve));
    }

    #[test]
    fn test_g1_rejects_non_residue() {
        // Scan for an x with no square root for x^3 + 3
        let mut x = Fq::from(1u64);
        while g1_rhs(&x).sqrt().is_some() {
            x += Fq::one();
        }
        let mut bytes = [0u8; G1_BYTES];
        fq_to_bytes(&x, &mut bytes[..FIELD_BYTES]);
        assert_eq!(G1::unmarshal(&bytes), Err(CryptoError::PointNotOnCurve));
    }

    #[test]
    fn test_hash_to_point_deterministic() {
        let a = G1::hash_to_point(b"this is test message");
        let b = G1::hash_to_point(b"this is test message");
        let c = G1::hash_to_point(b"this is test messagf");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_identity());
        assert!(a.0.into_affine().is_on_curve());
    }

    #[test]
    fn test_group_law() {
        let a = Fr::from(11u64);
        let b = Fr::from(31u64);
        assert_eq!(
            G1::scalar_base_mult(&a) + G1::scalar_base_mult(&b),
            G1::scalar_base_mult(&(a + b))
        );
        assert_eq!(
            G2::scalar_base_mult(&a) - G2::scalar_base_mult(&b),
            G2::scalar_base_mult(&(a - b))
        );
        let p = G1::scalar_base_mult(&a);
        assert!((p + (-p)).is_identity());
    }

    #[test]
    fn test_pairing_bilinear() {
        let a = random_scalar(&mut OsRng);
        let b = random_scalar(&mut OsRng);
        let lhs = pair(&G1::scalar_base_mult(&a), &G2::scalar_base_mult(&b));
        let rhs = Gt::generator().scalar_mult(&(a * b));
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn test_gt_group_law() {
        let a = Fr::from(5u64);
        let b = Fr::from(9u64);
        let ga = Gt::scalar_base_mult(&a);
        let gb = Gt::scalar_base_mult(&b);
        assert_eq!(ga + gb, Gt::scalar_base_mult(&(a + b)));
        assert!((ga + (-ga)).is_identity());
    }

    #[test]
    fn test_gt_marshal_roundtrip() {
        let g = Gt::scalar_base_mult(&Fr::from(1234u64));
        let bytes = g.marshal();
        assert_eq!(Gt::unmarshal(&bytes).unwrap(), g);

        // An arbitrary field element is not in the pairing subgroup
        let mut junk = [0u8; GT_BYTES];
        junk[GT_BYTES - 1] = 2;
        assert_eq!(Gt::unmarshal(&junk), Err(CryptoError::InvalidGtElement));
    }

    #[test]
    fn test_pairing_check() {
        let a = random_scalar(&mut OsRng);
        let p = G1::scalar_base_mult(&a);
        let q = G2::generator();
        // e(aG, H) * e(-G, aH) == 1
        assert!(pairing_check(&[(p, q), (-G1::generator(), G2::scalar_base_mult(&a))]));
        assert!(!pairing_check(&[(p, q), (G1::generator(), G2::scalar_base_mult(&a))]));
    }

    #[test]
    fn test_scalar_bytes() {
        let s = random_scalar(&mut OsRng);
        assert_eq!(scalar_from_bytes(&scalar_to_bytes(&s)).unwrap(), s);
        assert_eq!(
            scalar_from_bytes(&[0xffu8; 32]),
            Err(CryptoError::InvalidScalar)
        );
    }
}
