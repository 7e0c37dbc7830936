//! Error types for group creation.

use std::fmt;

use committee_crypto::{CryptoError, Id};
use committee_keystore::KeyStoreError;
use committee_types::Hash;
use thiserror::Error;

use crate::era::Round;

/// The three packets a member sends per era.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    EncryptedPiece,
    Mpk,
    OriginPiece,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::EncryptedPiece => "encrypted piece",
            PacketKind::Mpk => "mpk",
            PacketKind::OriginPiece => "origin piece",
        };
        f.write_str(name)
    }
}

/// Reasons a local send did not happen.
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("No seed block at height {0}")]
    NoSeed(u64),

    #[error("Height {height} is outside the {round} round")]
    NotInRound { height: u64, round: Round },

    #[error("Header at height {0} does not belong to the current era")]
    StaleHeader(u64),

    #[error("Local miner info unavailable")]
    NoMinerInfo,

    #[error("Miner {0} cannot join a group")]
    CannotJoin(Id),

    #[error("No candidates selected this era")]
    NoCandidates,

    #[error("Miner {0} is not a selected candidate")]
    NotSelected(Id),

    #[error("The {0} packet was already sent this era")]
    AlreadySent(PacketKind),

    #[error("The {0} packet has not been sent this era")]
    PrerequisiteMissing(PacketKind),

    #[error("Only {received} of {total} piece packets received")]
    NotEnoughPieces { received: usize, total: usize },

    #[error("Origin pieces are not required for seed {0}")]
    OriginNotRequired(Hash),

    #[error("No key share stored for seed {0}")]
    KeyShareMissing(Hash),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Failed to send {kind} packet: {reason}")]
    Send { kind: PacketKind, reason: String },
}

impl CreateError {
    /// Whether the failure is an unmet protocol precondition rather than a
    /// fault. Preconditions are expected on most heights.
    pub fn is_precondition(&self) -> bool {
        !matches!(
            self,
            CreateError::Crypto(_)
                | CreateError::KeyStore(_)
                | CreateError::Send { .. }
                | CreateError::KeyShareMissing(_)
        )
    }
}

/// Reasons an incoming packet was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Era has no seed block")]
    NoSeed,

    #[error("Packet seed {got} does not match era seed {expected}")]
    SeedMismatch { expected: Hash, got: Hash },

    #[error("Height {height} is outside the {round} round")]
    NotInRound { height: u64, round: Round },

    #[error("Sender {0} is not a selected candidate")]
    NotCandidate(Id),

    #[error("Sender {0} is not a known miner")]
    UnknownMiner(Id),

    #[error("Sender {0} cannot join a group")]
    CannotJoin(Id),

    #[error("Duplicate {kind} packet from {sender}")]
    Duplicate { kind: PacketKind, sender: Id },

    #[error("Sender {sender} has no {kind} packet on record")]
    MissingPrerequisite { kind: PacketKind, sender: Id },

    #[error("Origin pieces are not required this era")]
    OriginNotRequired,

    #[error("Invalid signature from {0}")]
    InvalidSignature(Id),

    #[error("Malformed packet: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        assert!(CreateError::NotSelected(Id::from_u64(1)).is_precondition());
        assert!(CreateError::AlreadySent(PacketKind::Mpk).is_precondition());
        assert!(!CreateError::Crypto(CryptoError::EmptyShareSet).is_precondition());
        let send = CreateError::Send {
            kind: PacketKind::EncryptedPiece,
            reason: "network down".to_string(),
        };
        assert!(!send.is_precondition());
        assert_eq!(
            send.to_string(),
            "Failed to send encrypted piece packet: network down"
        );
    }
}
