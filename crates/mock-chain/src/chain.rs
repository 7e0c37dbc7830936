//! Chain state: headers, miners, certified groups and accepted packets.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use committee_crypto::Id;
use committee_dkg::{
    ChainReader, EncryptedSharePiecePacket, Group, GroupStoreReader, MinerInfo, MinerReader,
    MpkPacket, OriginSharePiecePacket, SelfMinerInfo,
};
use committee_types::{sha3_256, BlockHeader, Hash};
use parking_lot::RwLock;
use tracing::info;

/// Packets accepted on chain for one era.
#[derive(Default, Clone)]
struct EraPackets {
    encrypted: Vec<EncryptedSharePiecePacket>,
    mpks: Vec<MpkPacket>,
    origins: Vec<OriginSharePiecePacket>,
}

#[derive(Default)]
struct ChainState {
    headers: BTreeMap<u64, BlockHeader>,
    miners: Vec<MinerInfo>,
    groups: Vec<Group>,
    packets: HashMap<Hash, EraPackets>,
    origin_required: HashSet<Hash>,
}

/// Shared chain state.
pub struct MockChain {
    state: RwLock<ChainState>,
}

impl MockChain {
    /// A chain holding only its genesis block.
    pub fn new(genesis_seed: &[u8]) -> Self {
        let hash = Hash(sha3_256(&[b"genesis", genesis_seed]));
        let genesis = BlockHeader {
            height: 0,
            hash,
            pre_hash: Hash::ZERO,
            random: sha3_256(&[b"random", hash.as_bytes()]).to_vec(),
        };
        let mut state = ChainState::default();
        state.headers.insert(0, genesis);
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn head(&self) -> BlockHeader {
        tip(&self.state.read())
    }

    pub fn height(&self) -> u64 {
        self.head().height
    }

    /// Append the next block. `salt` distinguishes forks at the same height.
    pub fn push_block(&self, salt: &[u8]) -> BlockHeader {
        let mut state = self.state.write();
        let parent = tip(&state);
        let height = parent.height + 1;
        let hash = Hash(sha3_256(&[parent.hash.as_bytes(), &height.to_be_bytes(), salt]));
        let header = BlockHeader {
            height,
            hash,
            pre_hash: parent.hash,
            random: sha3_256(&[parent.random.as_slice(), hash.as_bytes()]).to_vec(),
        };
        state.headers.insert(height, header.clone());
        header
    }

    /// Drop every block above `height`.
    ///
    /// Accepted packets and groups are kept; the protocol tells stale ones
    /// apart by their seed.
    pub fn rewind_to(&self, height: u64) {
        let mut state = self.state.write();
        let removed = state.headers.split_off(&(height + 1));
        if !removed.is_empty() {
            info!(height, dropped = removed.len(), "Chain rewound");
        }
    }

    // =========================
    // MINERS
    // =========================

    pub fn register_miner(&self, miner: MinerInfo) {
        let mut state = self.state.write();
        state.miners.retain(|m| m.id != miner.id);
        state.miners.push(miner);
    }

    pub fn abort_miner(&self, id: &Id, height: u64) {
        let mut state = self.state.write();
        if let Some(miner) = state.miners.iter_mut().find(|m| m.id == *id) {
            miner.abort_height = Some(height);
        }
    }

    pub fn miners(&self) -> Vec<MinerInfo> {
        self.state.read().miners.clone()
    }

    // =========================
    // GROUPS AND PACKETS
    // =========================

    pub fn add_group(&self, group: Group) {
        self.state.write().groups.push(group);
    }

    pub fn groups(&self) -> Vec<Group> {
        self.state.read().groups.clone()
    }

    pub fn mark_origin_piece_required(&self, seed: Hash) {
        self.state.write().origin_required.insert(seed);
    }

    pub fn accept_encrypted_piece_packet(&self, packet: EncryptedSharePiecePacket) {
        let mut state = self.state.write();
        state.packets.entry(packet.seed).or_default().encrypted.push(packet);
    }

    pub fn accept_mpk_packet(&self, packet: MpkPacket) {
        let mut state = self.state.write();
        state.packets.entry(packet.seed).or_default().mpks.push(packet);
    }

    pub fn accept_origin_piece_packet(&self, packet: OriginSharePiecePacket) {
        let mut state = self.state.write();
        state.packets.entry(packet.seed).or_default().origins.push(packet);
    }

    fn era_packets(&self, seed: &Hash) -> EraPackets {
        self.state.read().packets.get(seed).cloned().unwrap_or_default()
    }
}

fn tip(state: &ChainState) -> BlockHeader {
    match state.headers.last_key_value() {
        Some((_, header)) => header.clone(),
        // Genesis is never rewound
        None => BlockHeader {
            height: 0,
            hash: Hash::ZERO,
            pre_hash: Hash::ZERO,
            random: Vec::new(),
        },
    }
}

impl ChainReader for MockChain {
    fn query_block_header_by_height(&self, height: u64) -> Option<BlockHeader> {
        self.state.read().headers.get(&height).cloned()
    }

    fn query_block_header_by_hash(&self, hash: &Hash) -> Option<BlockHeader> {
        self.state
            .read()
            .headers
            .values()
            .find(|h| h.hash == *hash)
            .cloned()
    }

    fn query_block_header_ceil(&self, height: u64) -> Option<BlockHeader> {
        self.state
            .read()
            .headers
            .range(height..)
            .next()
            .map(|(_, h)| h.clone())
    }

    fn get_available_group_infos(&self, height: u64) -> Vec<Group> {
        self.state
            .read()
            .groups
            .iter()
            .filter(|g| g.is_available_at(height))
            .cloned()
            .collect()
    }
}

impl GroupStoreReader for MockChain {
    fn get_encrypted_piece_packets(&self, seed: &Hash) -> Vec<EncryptedSharePiecePacket> {
        self.era_packets(seed).encrypted
    }

    fn get_mpk_packets(&self, seed: &Hash) -> Vec<MpkPacket> {
        self.era_packets(seed).mpks
    }

    fn get_origin_piece_packets(&self, seed: &Hash) -> Vec<OriginSharePiecePacket> {
        self.era_packets(seed).origins
    }

    fn has_sent_encrypted_piece_packet(&self, sender: &Id, seed: &Hash) -> bool {
        self.state
            .read()
            .packets
            .get(seed)
            .map_or(false, |p| p.encrypted.iter().any(|x| x.sender == *sender))
    }

    fn has_sent_mpk_packet(&self, sender: &Id, seed: &Hash) -> bool {
        self.state
            .read()
            .packets
            .get(seed)
            .map_or(false, |p| p.mpks.iter().any(|x| x.sender == *sender))
    }

    fn has_sent_origin_piece_packet(&self, sender: &Id, seed: &Hash) -> bool {
        self.state
            .read()
            .packets
            .get(seed)
            .map_or(false, |p| p.origins.iter().any(|x| x.sender == *sender))
    }

    fn is_origin_piece_required(&self, seed: &Hash) -> bool {
        self.state.read().origin_required.contains(seed)
    }
}

/// Miner registry as seen from one node.
pub struct NodeMiners {
    chain: Arc<MockChain>,
    me: Option<SelfMinerInfo>,
}

impl NodeMiners {
    pub fn new(chain: Arc<MockChain>, me: Option<SelfMinerInfo>) -> Self {
        Self { chain, me }
    }
}

impl MinerReader for NodeMiners {
    fn self_miner_info(&self) -> Option<SelfMinerInfo> {
        let me = self.me.as_ref()?;
        // Stake and abort height come from the chain
        let mut me = me.clone();
        if let Some(latest) = self.get_latest_miner(&me.id()) {
            me.info = latest;
        }
        Some(me)
    }

    fn get_latest_miner(&self, id: &Id) -> Option<MinerInfo> {
        self.chain
            .state
            .read()
            .miners
            .iter()
            .find(|m| m.id == *id)
            .cloned()
    }

    fn get_can_join_group_miners_at(&self, height: u64) -> Vec<MinerInfo> {
        self.chain
            .state
            .read()
            .miners
            .iter()
            .filter(|m| m.can_join_group_at(height))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_link_and_fork() {
        let chain = MockChain::new(b"test");
        let a1 = chain.push_block(b"");
        let a2 = chain.push_block(b"");
        assert_eq!(a1.pre_hash, chain.query_block_header_by_height(0).unwrap().hash);
        assert_eq!(a2.pre_hash, a1.hash);
        assert_eq!(chain.height(), 2);

        chain.rewind_to(1);
        assert_eq!(chain.height(), 1);
        let b2 = chain.push_block(b"fork");
        assert_ne!(b2.hash, a2.hash);
        assert_ne!(b2.random, a2.random);
        assert_eq!(chain.query_block_header_by_hash(&b2.hash), Some(b2));
        assert!(chain.query_block_header_by_hash(&a2.hash).is_none());
    }

    #[test]
    fn test_packet_bookkeeping() {
        let chain = MockChain::new(b"test");
        let miner = SelfMinerInfo::from_private_seed(b"m", 1, 0);
        let seed = Hash([3u8; 32]);
        let msk = miner.seckey;
        chain.accept_mpk_packet(MpkPacket {
            seed,
            sender: miner.id(),
            mpk: msk.pubkey(),
            sign: msk.sign(seed.as_bytes()),
        });
        assert!(chain.has_sent_mpk_packet(&miner.id(), &seed));
        assert!(!chain.has_sent_mpk_packet(&miner.id(), &Hash([4u8; 32])));
        assert!(!chain.has_sent_encrypted_piece_packet(&miner.id(), &seed));
        assert_eq!(chain.get_mpk_packets(&seed).len(), 1);
    }

    #[test]
    fn test_node_miners_follow_chain() {
        let chain = Arc::new(MockChain::new(b"test"));
        let me = SelfMinerInfo::from_private_seed(b"me", 10, 0);
        chain.register_miner(me.info.clone());
        let miners = NodeMiners::new(chain.clone(), Some(me.clone()));
        assert!(miners.can_join_group(&me.id(), 5));

        chain.abort_miner(&me.id(), 5);
        assert!(!miners.can_join_group(&me.id(), 5));
        assert_eq!(miners.self_miner_info().unwrap().info.abort_height, Some(5));
        assert!(miners.get_can_join_group_miners_at(5).is_empty());
    }
}
