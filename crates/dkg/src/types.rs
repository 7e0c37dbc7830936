//! DKG type definitions.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use committee_crypto::{Id, Pubkey, Rand, Seckey, Signature};
use committee_types::Hash;
use serde::{Deserialize, Serialize};

// =========================
// MINERS
// =========================

/// Public view of a miner as recorded on chain.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MinerInfo {
    pub id: Id,
    pub pubkey: Pubkey,
    pub stake: u64,
    /// Height from which the miner may take part
    pub apply_height: u64,
    /// Height at which the miner stopped, if it did
    pub abort_height: Option<u64>,
}

impl MinerInfo {
    /// Whether the miner may join a group at `height`.
    pub fn can_join_group_at(&self, height: u64) -> bool {
        self.id.is_valid()
            && self.pubkey.is_valid()
            && self.stake > 0
            && self.apply_height <= height
            && self.abort_height.map_or(true, |abort| height < abort)
    }
}

/// The local miner, including its private key material.
#[derive(Clone)]
pub struct SelfMinerInfo {
    pub info: MinerInfo,
    /// Private stream the per-era polynomials are derived from
    pub secret_seed: Rand,
    pub seckey: Seckey,
}

impl SelfMinerInfo {
    /// Derive all key material from a private seed.
    pub fn from_private_seed(seed: &[u8], stake: u64, apply_height: u64) -> Self {
        let secret_seed = Rand::from_bytes(&[seed]);
        let seckey = Seckey::from_rand(&secret_seed);
        let pubkey = seckey.pubkey();
        Self {
            info: MinerInfo {
                id: Id::from_pubkey(&pubkey),
                pubkey,
                stake,
                apply_height,
                abort_height: None,
            },
            secret_seed,
            seckey,
        }
    }

    pub fn id(&self) -> Id {
        self.info.id
    }
}

impl fmt::Debug for SelfMinerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfMinerInfo")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// A miner eligible for committee membership in one era.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Id,
    pub pubkey: Pubkey,
    pub stake: u64,
}

impl From<&MinerInfo> for Candidate {
    fn from(miner: &MinerInfo) -> Self {
        Self {
            id: miner.id,
            pubkey: miner.pubkey,
            stake: miner.stake,
        }
    }
}

// =========================
// GROUPS
// =========================

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct GroupHeader {
    /// Hash of the seed block of the era that created the group
    pub seed: Hash,
    pub work_height: u64,
    pub dismiss_height: u64,
    pub group_pubkey: Pubkey,
    pub threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Member {
    pub id: Id,
    pub pubkey: Pubkey,
}

/// A certified committee.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Group {
    pub header: GroupHeader,
    pub members: Vec<Member>,
}

impl Group {
    pub fn has_member(&self, id: &Id) -> bool {
        self.members.iter().any(|m| m.id == *id)
    }

    /// Whether the group is still alive at `height`.
    pub fn is_available_at(&self, height: u64) -> bool {
        height < self.header.dismiss_height
    }
}

// =========================
// PACKETS
// =========================

/// One Shamir share, addressed to its receiver.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SharePiece {
    pub receiver: Id,
    pub share: Seckey,
}

/// A share encrypted to its receiver.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EncryptedPiece {
    pub receiver: Id,
    pub ciphertext: Vec<u8>,
}

/// First-round packet: encrypted shares plus Feldman commitments.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EncryptedSharePiecePacket {
    pub seed: Hash,
    pub sender: Id,
    /// a_i · G2 for each polynomial coefficient
    pub commitments: Vec<Pubkey>,
    /// Ephemeral public key the pieces were encrypted under
    pub enc_pubkey: Pubkey,
    pub nonce: [u8; 12],
    /// One piece per candidate, in candidate order
    pub pieces: Vec<EncryptedPiece>,
}

impl EncryptedSharePiecePacket {
    /// The sender's contribution to the group public key.
    pub fn pubkey0(&self) -> Option<&Pubkey> {
        self.commitments.first()
    }
}

/// Second-round packet: the member's share of the group key.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MpkPacket {
    pub seed: Hash,
    pub sender: Id,
    pub mpk: Pubkey,
    /// Signature over the seed hash under the member's share
    pub sign: Signature,
}

/// Third-round packet: plaintext shares and the ephemeral key, revealed
/// only when the group failed to verify.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct OriginSharePiecePacket {
    pub seed: Hash,
    pub sender: Id,
    pub enc_seckey: Seckey,
    pub pieces: Vec<SharePiece>,
}

// =========================
// OUTCOMES
// =========================

/// Outcome code of one era's group creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum CreateResultCode {
    /// Group certified
    Success,
    /// Too few members contributed
    Fail,
    /// The shares do not reproduce the group key; origin pieces required
    MarkEvil,
    /// No group was attempted this era
    Idle,
}

/// Result of [`crate::CreateChecker::check_group_create_result`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResult {
    pub seed: Hash,
    pub code: CreateResultCode,
    pub group: Option<Group>,
    pub group_sign: Option<Signature>,
    /// Candidates that failed to take part
    pub frozen_miners: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum EvidenceKind {
    /// Encrypted pieces sent but never revealed
    MissingOriginPieces,
    /// Revealed key or shares do not reproduce the encrypted packet
    InconsistentEncryption,
    /// Revealed shares are not evaluations of the committed polynomial
    InvalidPieces,
    /// Announced mpk differs from the sum of the pieces addressed to it
    WrongMpk,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Evidence {
    pub culprit: Id,
    pub kind: EvidenceKind,
}

/// Result of [`crate::CreateChecker::check_group_create_punishment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    pub seed: Hash,
    pub evidence: Vec<Evidence>,
    pub penalty_targets: Vec<Id>,
    pub reward_targets: Vec<Id>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miner_join_rules() {
        let me = SelfMinerInfo::from_private_seed(b"miner-1", 100, 10);
        assert!(!me.info.can_join_group_at(9));
        assert!(me.info.can_join_group_at(10));

        let mut aborted = me.info.clone();
        aborted.abort_height = Some(50);
        assert!(aborted.can_join_group_at(49));
        assert!(!aborted.can_join_group_at(50));

        let mut broke = me.info.clone();
        broke.stake = 0;
        assert!(!broke.can_join_group_at(20));
    }

    #[test]
    fn test_self_miner_is_deterministic() {
        let a = SelfMinerInfo::from_private_seed(b"seed", 1, 0);
        let b = SelfMinerInfo::from_private_seed(b"seed", 1, 0);
        assert_eq!(a.info, b.info);
        assert_eq!(a.id(), Id::from_pubkey(&a.seckey.pubkey()));
        assert!(!format!("{a:?}").contains("secret_seed"));
    }

    #[test]
    fn test_packet_borsh_is_stable() {
        let sk = Seckey::from_u64(9);
        let packet = MpkPacket {
            seed: Hash([7u8; 32]),
            sender: Id::from_u64(3),
            mpk: sk.pubkey(),
            sign: sk.sign(&[7u8; 32]),
        };
        let encoded = borsh::to_vec(&packet).unwrap();
        // seed + id + G2 + G1, no length prefixes
        assert_eq!(encoded.len(), 32 + 32 + 128 + 33);
        let decoded: MpkPacket = borsh::from_slice(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_group_json_uses_prefixed_hex() {
        let me = SelfMinerInfo::from_private_seed(b"member", 1, 0);
        let group = Group {
            header: GroupHeader {
                seed: Hash([9u8; 32]),
                work_height: 800,
                dismiss_height: 1600,
                group_pubkey: me.info.pubkey,
                threshold: 1,
            },
            members: vec![Member {
                id: me.id(),
                pubkey: me.info.pubkey,
            }],
        };
        let json = serde_json::to_value(&group).unwrap();
        let pubkey = json["header"]["group_pubkey"].as_str().unwrap();
        assert!(pubkey.starts_with("0x"));
        assert_eq!(pubkey.len(), 2 + 2 * 128);
        let back: Group = serde_json::from_value(json).unwrap();
        assert_eq!(back, group);
        assert!(back.has_member(&me.id()));
        assert!(back.is_available_at(1599));
        assert!(!back.is_available_at(1600));
    }
}
