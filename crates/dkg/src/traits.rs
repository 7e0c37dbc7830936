//! Collaborators the group-creation core reads from and sends through.
//!
//! Block storage, miner bookkeeping, packet pools and transport live outside
//! this crate; the routine and checker only see these traits.

use committee_crypto::Id;
use committee_types::{BlockHeader, Hash};

use crate::types::{
    EncryptedSharePiecePacket, Group, MinerInfo, MpkPacket, OriginSharePiecePacket, SelfMinerInfo,
};

pub trait ChainReader: Send + Sync {
    fn query_block_header_by_height(&self, height: u64) -> Option<BlockHeader>;

    fn query_block_header_by_hash(&self, hash: &Hash) -> Option<BlockHeader>;

    /// First block at or above `height`.
    fn query_block_header_ceil(&self, height: u64) -> Option<BlockHeader>;

    /// Groups still alive at `height`.
    fn get_available_group_infos(&self, height: u64) -> Vec<Group>;
}

pub trait MinerReader: Send + Sync {
    /// The local miner, if this node mines.
    fn self_miner_info(&self) -> Option<SelfMinerInfo>;

    fn get_latest_miner(&self, id: &Id) -> Option<MinerInfo>;

    fn get_can_join_group_miners_at(&self, height: u64) -> Vec<MinerInfo>;

    fn can_join_group(&self, id: &Id, height: u64) -> bool {
        self.get_latest_miner(id)
            .map_or(false, |miner| miner.can_join_group_at(height))
    }
}

/// Packets accepted on chain, keyed by era seed.
pub trait GroupStoreReader: Send + Sync {
    fn get_encrypted_piece_packets(&self, seed: &Hash) -> Vec<EncryptedSharePiecePacket>;

    fn get_mpk_packets(&self, seed: &Hash) -> Vec<MpkPacket>;

    fn get_origin_piece_packets(&self, seed: &Hash) -> Vec<OriginSharePiecePacket>;

    fn has_sent_encrypted_piece_packet(&self, sender: &Id, seed: &Hash) -> bool;

    fn has_sent_mpk_packet(&self, sender: &Id, seed: &Hash) -> bool;

    fn has_sent_origin_piece_packet(&self, sender: &Id, seed: &Hash) -> bool;

    /// Set once the era's group failed to verify.
    fn is_origin_piece_required(&self, seed: &Hash) -> bool;
}

/// Broadcasts locally produced packets.
pub trait PacketSender: Send + Sync {
    fn send_encrypted_piece_packet(&self, packet: EncryptedSharePiecePacket) -> anyhow::Result<()>;

    fn send_mpk_packet(&self, packet: MpkPacket) -> anyhow::Result<()>;

    fn send_origin_piece_packet(&self, packet: OriginSharePiecePacket) -> anyhow::Result<()>;
}
