//! Committee creation for threshold BLS groups.
//!
//! Every era, a stake-weighted sample of miners runs a Feldman VSS
//! key generation over three on-chain rounds:
//!
//! 1. Each candidate posts its polynomial commitments together with one
//!    encrypted share piece per candidate
//! 2. Each candidate posts its share of the group key (`mpk`), signed
//!    over the era seed
//! 3. Only if the group signature does not verify: each candidate reveals
//!    its plaintext pieces and ephemeral key so the chain can find the
//!    culprit
//!
//! [`CreateChecker`] validates packets and settles an era; it is what the
//! chain runs. [`CreateRoutine`] is the local miner's side, which builds
//! and sends its own packets as blocks arrive.
//!
//! # Security
//!
//! - Requires more than half of the candidates to be honest
//! - Privacy holds against up to k-1 corrupt members
//! - Revealed pieces are checked against the Feldman commitments and the
//!   published ciphertexts

mod checker;
mod context;
pub mod era;
mod error;
pub mod feldman;
pub mod piece_cipher;
pub mod pieces;
mod routine;
pub mod select;
#[cfg(test)]
mod testing;
mod traits;
pub mod types;

pub use checker::CreateChecker;
pub use context::{CreateContext, Stage};
pub use era::{Era, Round, RoundRange};
pub use error::{CreateError, PacketError, PacketKind};
pub use routine::CreateRoutine;
pub use traits::{ChainReader, GroupStoreReader, MinerReader, PacketSender};
pub use types::{
    Candidate, CreateResult, CreateResultCode, EncryptedPiece, EncryptedSharePiecePacket, Evidence,
    EvidenceKind, Group, GroupHeader, Member, MinerInfo, MpkPacket, OriginSharePiecePacket,
    Punishment, SelfMinerInfo, SharePiece,
};
