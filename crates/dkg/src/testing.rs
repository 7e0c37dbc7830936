//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use committee_crypto::Id;
use committee_types::{sha256, BlockHeader, Hash, ProtocolParams};
use parking_lot::{Mutex, RwLock};

use crate::checker::CreateChecker;
use crate::era::Era;
use crate::traits::{ChainReader, GroupStoreReader, MinerReader, PacketSender};
use crate::types::{
    EncryptedSharePiecePacket, Group, MinerInfo, MpkPacket, OriginSharePiecePacket, SelfMinerInfo,
};

pub(crate) const SEED_HEIGHT: u64 = 85;

pub(crate) fn header_at(height: u64) -> BlockHeader {
    let hash = Hash(sha256(&height.to_be_bytes()));
    let pre_hash = if height == 0 {
        Hash::ZERO
    } else {
        Hash(sha256(&(height - 1).to_be_bytes()))
    };
    BlockHeader {
        height,
        hash,
        pre_hash,
        random: sha256(hash.as_bytes()).to_vec(),
    }
}

#[derive(Default)]
pub(crate) struct TestChain {
    headers: RwLock<BTreeMap<u64, BlockHeader>>,
    groups: RwLock<Vec<Group>>,
}

impl TestChain {
    pub fn extend_to(&self, height: u64) {
        let mut headers = self.headers.write();
        for h in 0..=height {
            headers.entry(h).or_insert_with(|| header_at(h));
        }
    }

    pub fn add_group(&self, group: Group) {
        self.groups.write().push(group);
    }
}

impl ChainReader for TestChain {
    fn query_block_header_by_height(&self, height: u64) -> Option<BlockHeader> {
        self.headers.read().get(&height).cloned()
    }

    fn query_block_header_by_hash(&self, hash: &Hash) -> Option<BlockHeader> {
        self.headers.read().values().find(|h| h.hash == *hash).cloned()
    }

    fn query_block_header_ceil(&self, height: u64) -> Option<BlockHeader> {
        self.headers.read().range(height..).next().map(|(_, h)| h.clone())
    }

    fn get_available_group_infos(&self, height: u64) -> Vec<Group> {
        self.groups
            .read()
            .iter()
            .filter(|g| g.is_available_at(height))
            .cloned()
            .collect()
    }
}

pub(crate) struct TestMiners {
    miners: Vec<MinerInfo>,
    me: Option<SelfMinerInfo>,
}

impl MinerReader for TestMiners {
    fn self_miner_info(&self) -> Option<SelfMinerInfo> {
        self.me.clone()
    }

    fn get_latest_miner(&self, id: &Id) -> Option<MinerInfo> {
        self.miners.iter().find(|m| m.id == *id).cloned()
    }

    fn get_can_join_group_miners_at(&self, height: u64) -> Vec<MinerInfo> {
        self.miners
            .iter()
            .filter(|m| m.can_join_group_at(height))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct TestStore {
    encrypted: RwLock<Vec<EncryptedSharePiecePacket>>,
    mpks: RwLock<Vec<MpkPacket>>,
    origins: RwLock<Vec<OriginSharePiecePacket>>,
    origin_required: RwLock<HashSet<Hash>>,
}

impl TestStore {
    pub fn accept_encrypted(&self, packet: EncryptedSharePiecePacket) {
        self.encrypted.write().push(packet);
    }

    pub fn accept_mpk(&self, packet: MpkPacket) {
        self.mpks.write().push(packet);
    }

    pub fn accept_origin(&self, packet: OriginSharePiecePacket) {
        self.origins.write().push(packet);
    }

    pub fn require_origin(&self, seed: Hash) {
        self.origin_required.write().insert(seed);
    }
}

impl GroupStoreReader for TestStore {
    fn get_encrypted_piece_packets(&self, seed: &Hash) -> Vec<EncryptedSharePiecePacket> {
        self.encrypted.read().iter().filter(|p| p.seed == *seed).cloned().collect()
    }

    fn get_mpk_packets(&self, seed: &Hash) -> Vec<MpkPacket> {
        self.mpks.read().iter().filter(|p| p.seed == *seed).cloned().collect()
    }

    fn get_origin_piece_packets(&self, seed: &Hash) -> Vec<OriginSharePiecePacket> {
        self.origins.read().iter().filter(|p| p.seed == *seed).cloned().collect()
    }

    fn has_sent_encrypted_piece_packet(&self, sender: &Id, seed: &Hash) -> bool {
        self.encrypted
            .read()
            .iter()
            .any(|p| p.sender == *sender && p.seed == *seed)
    }

    fn has_sent_mpk_packet(&self, sender: &Id, seed: &Hash) -> bool {
        self.mpks
            .read()
            .iter()
            .any(|p| p.sender == *sender && p.seed == *seed)
    }

    fn has_sent_origin_piece_packet(&self, sender: &Id, seed: &Hash) -> bool {
        self.origins
            .read()
            .iter()
            .any(|p| p.sender == *sender && p.seed == *seed)
    }

    fn is_origin_piece_required(&self, seed: &Hash) -> bool {
        self.origin_required.read().contains(seed)
    }
}

/// Records sent packets instead of broadcasting them.
#[derive(Default)]
pub(crate) struct RecordingSender {
    pub encrypted: Mutex<Vec<EncryptedSharePiecePacket>>,
    pub mpks: Mutex<Vec<MpkPacket>>,
    pub origins: Mutex<Vec<OriginSharePiecePacket>>,
}

impl PacketSender for RecordingSender {
    fn send_encrypted_piece_packet(&self, packet: EncryptedSharePiecePacket) -> anyhow::Result<()> {
        self.encrypted.lock().push(packet);
        Ok(())
    }

    fn send_mpk_packet(&self, packet: MpkPacket) -> anyhow::Result<()> {
        self.mpks.lock().push(packet);
        Ok(())
    }

    fn send_origin_piece_packet(&self, packet: OriginSharePiecePacket) -> anyhow::Result<()> {
        self.origins.lock().push(packet);
        Ok(())
    }
}

/// A small committee on a chain that reaches just past the seed height.
pub(crate) struct Fixture {
    pub params: ProtocolParams,
    pub members: Vec<SelfMinerInfo>,
    pub chain: Arc<TestChain>,
    pub store: Arc<TestStore>,
}

impl Fixture {
    pub fn new(n: usize) -> Self {
        let params = ProtocolParams {
            group_member_min: 1,
            ..ProtocolParams::default()
        };
        let members = (0..n)
            .map(|i| SelfMinerInfo::from_private_seed(format!("member-{i}").as_bytes(), 10 + i as u64, 0))
            .collect();
        let chain = Arc::new(TestChain::default());
        chain.extend_to(SEED_HEIGHT + 1);
        Self {
            params,
            members,
            chain,
            store: Arc::new(TestStore::default()),
        }
    }

    pub fn header(&self, height: u64) -> BlockHeader {
        header_at(height)
    }

    pub fn extend_chain(&self, height: u64) {
        self.chain.extend_to(height);
    }

    pub fn seed(&self) -> Hash {
        header_at(SEED_HEIGHT).hash
    }

    pub fn era(&self) -> Era {
        Era::new(SEED_HEIGHT, Some(header_at(SEED_HEIGHT)), &self.params)
    }

    fn miners(&self, me: Option<SelfMinerInfo>) -> Arc<TestMiners> {
        let mut miners: Vec<MinerInfo> = self.members.iter().map(|m| m.info.clone()).collect();
        if let Some(me) = &me {
            if !miners.iter().any(|m| m.id == me.id()) {
                miners.push(me.info.clone());
            }
        }
        Arc::new(TestMiners { miners, me })
    }

    /// Checker with no local miner, as run by the chain.
    pub fn chain_checker(&self) -> CreateChecker {
        CreateChecker::new(
            self.params.clone(),
            self.chain.clone(),
            self.miners(None),
            self.store.clone(),
        )
    }

    /// Checker for the node of member `index`.
    pub fn node_checker(&self, index: usize) -> CreateChecker {
        self.checker_for(self.members[index].clone())
    }

    /// Checker for a node that is registered as a miner after the seed
    /// height.
    pub fn checker_for(&self, me: SelfMinerInfo) -> CreateChecker {
        CreateChecker::new(
            self.params.clone(),
            self.chain.clone(),
            self.miners(Some(me)),
            self.store.clone(),
        )
    }
}
