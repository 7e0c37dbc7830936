//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid encoding length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid G1 point encoding")]
    InvalidG1Point,

    #[error("Invalid G2 point encoding")]
    InvalidG2Point,

    #[error("Invalid GT element encoding")]
    InvalidGtElement,

    #[error("Field element exceeds the modulus")]
    CoordinateOutOfRange,

    #[error("Invalid scalar encoding")]
    InvalidScalar,

    #[error("Point not on curve")]
    PointNotOnCurve,

    #[error("Point not in the prime-order subgroup")]
    PointNotInSubgroup,

    #[error("Hex string must start with 0x")]
    MissingHexPrefix,

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("No shares supplied")]
    EmptyShareSet,

    #[error("Duplicate share index")]
    DuplicateShareIndex,

    #[error("Share set mismatch: {shares} shares for {ids} ids")]
    MismatchedShareSet { shares: usize, ids: usize },

    #[error("Insufficient threshold shares: need {required}, got {got}")]
    InsufficientShares { required: usize, got: usize },
}
