//! Multi-node runs of group creation on the mock chain.
//!
//! Each block goes through the same steps a real chain would take:
//!
//! 1. Pending packets are executed through the chain's checker; accepted
//!    ones are stored, rejected ones are logged and counted
//! 2. At the first block of the origin piece round the era result is
//!    settled; a verified group is registered, a failed one requires reveals
//! 3. At the first block of the end round a reveal is turned into a
//!    punishment
//! 4. Every node's routine sees the new block and sends what it can

use std::sync::Arc;

use anyhow::{ensure, Result};
use committee_crypto::{Id, Seckey};
use committee_dkg::{
    ChainReader, CreateChecker, CreateResult, CreateResultCode, CreateRoutine, Era, PacketError,
    Punishment, SelfMinerInfo,
};
use committee_keystore::KeyShareStore;
use committee_types::{BlockHeader, Hash, ProtocolParams};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chain::{MockChain, NodeMiners};
use crate::mempool::{Batch, Mempool, MempoolSender};

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub params: ProtocolParams,
    pub members: usize,
    /// Stake added per member index on top of a base stake of 100
    pub stake_spread: u64,
    /// The first `evil` members tamper with one of their share pieces
    pub evil: usize,
    pub genesis_seed: Vec<u8>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            params: ProtocolParams {
                group_member_min: 1,
                ..ProtocolParams::default()
            },
            members: 9,
            stake_spread: 10,
            evil: 0,
            genesis_seed: b"committee-simulation".to_vec(),
        }
    }
}

/// One simulated miner.
pub struct Node {
    pub miner: SelfMinerInfo,
    pub routine: CreateRoutine,
    pub evil: bool,
    expiry: Option<JoinHandle<()>>,
}

impl Node {
    pub fn id(&self) -> Id {
        self.miner.id()
    }

    fn with_key_expiry(self, capacity: usize) -> Self {
        let (events, handle) = self.routine.key_store().spawn_expiry_loop(capacity);
        Self {
            miner: self.miner,
            routine: self.routine.with_height_events(events),
            evil: self.evil,
            expiry: Some(handle),
        }
    }
}

/// What happened in one era.
#[derive(Debug, Clone, Serialize)]
pub struct EraReport {
    pub seed_height: u64,
    pub seed: Hash,
    pub candidates: Vec<Id>,
    pub threshold: usize,
    pub result: Option<CreateResult>,
    pub punishment: Option<Punishment>,
    pub rejected_packets: usize,
}

pub struct Simulation {
    params: ProtocolParams,
    chain: Arc<MockChain>,
    pool: Arc<Mempool>,
    checker: CreateChecker,
    nodes: Vec<Node>,
    results: Vec<CreateResult>,
    punishments: Vec<Punishment>,
    rejected: Vec<(u64, PacketError)>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.params.validate()?;
        ensure!(config.members > 0, "a simulation needs at least one member");
        ensure!(
            config.evil <= config.members,
            "{} evil members out of {}",
            config.evil,
            config.members
        );

        let chain = Arc::new(MockChain::new(&config.genesis_seed));
        let pool = Arc::new(Mempool::default());
        let mut nodes = Vec::with_capacity(config.members);
        for i in 0..config.members {
            let mut private_seed = config.genesis_seed.clone();
            private_seed.extend_from_slice(format!("/node-{i}").as_bytes());
            let stake = 100 + i as u64 * config.stake_spread;
            let miner = SelfMinerInfo::from_private_seed(&private_seed, stake, 0);
            chain.register_miner(miner.info.clone());

            let evil = i < config.evil;
            let mut sender = MempoolSender::new(pool.clone(), miner.id());
            if evil {
                sender = sender.tampering();
            }
            let checker = Arc::new(CreateChecker::new(
                config.params.clone(),
                chain.clone(),
                Arc::new(NodeMiners::new(chain.clone(), Some(miner.clone()))),
                chain.clone(),
            ));
            let key_store = Arc::new(KeyShareStore::in_memory(&miner.seckey));
            nodes.push(Node {
                routine: CreateRoutine::new(checker, Arc::new(sender), key_store),
                miner,
                evil,
                expiry: None,
            });
        }

        let checker = CreateChecker::new(
            config.params.clone(),
            chain.clone(),
            Arc::new(NodeMiners::new(chain.clone(), None)),
            chain.clone(),
        );
        info!(
            members = config.members,
            evil = config.evil,
            era_window = config.params.era_window(),
            "Simulation ready"
        );
        Ok(Self {
            params: config.params,
            chain,
            pool,
            checker,
            nodes,
            results: Vec::new(),
            punishments: Vec::new(),
            rejected: Vec::new(),
        })
    }

    /// Run each node's key share expiry loop on the current Tokio runtime.
    pub fn with_key_expiry(mut self, capacity: usize) -> Self {
        self.nodes = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(|node| node.with_key_expiry(capacity))
            .collect();
        self
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn chain(&self) -> &Arc<MockChain> {
        &self.chain
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &Id) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == *id)
    }

    /// The checker the chain executes packets with.
    pub fn checker(&self) -> &CreateChecker {
        &self.checker
    }

    pub fn results(&self) -> &[CreateResult] {
        &self.results
    }

    pub fn punishments(&self) -> &[Punishment] {
        &self.punishments
    }

    /// Produce one block and let every node react to it.
    pub fn advance_block(&mut self) -> BlockHeader {
        let header = self.chain.push_block(&[]);
        let batch = self.pool.drain();
        self.execute(&header, batch);
        self.settle(&header);
        for node in &self.nodes {
            node.routine.on_block_added(&header);
        }
        header
    }

    /// Produce blocks up to and including `height`.
    pub fn advance_to(&mut self, height: u64) {
        while self.chain.height() < height {
            self.advance_block();
        }
    }

    /// Run the era the next block belongs to through its last height.
    pub fn run_era(&mut self) -> EraReport {
        let seed_height = self.params.seed_height(self.chain.height() + 1);
        let last = seed_height + self.params.era_window() - 1;
        self.advance_to(last);
        self.report(seed_height)
    }

    /// Summarise the era seeded at `seed_height` from what the chain saw.
    pub fn report(&self, seed_height: u64) -> EraReport {
        let seed_block = self.chain.query_block_header_by_height(seed_height);
        let era = Era::new(seed_height, seed_block, &self.params);
        let seed = era.seed();
        let current = self.checker.current_era() == era;
        let (candidates, threshold) = if current {
            let ids = self.checker.candidates().iter().map(|c| c.id).collect();
            (ids, self.checker.threshold())
        } else {
            (Vec::new(), 0)
        };
        let last = seed_height + self.params.era_window();
        EraReport {
            seed_height,
            seed,
            candidates,
            threshold,
            result: self.results.iter().rev().find(|r| r.seed == seed).cloned(),
            punishment: self.punishments.iter().rev().find(|p| p.seed == seed).cloned(),
            rejected_packets: self
                .rejected
                .iter()
                .filter(|(h, _)| (seed_height..last).contains(h))
                .count(),
        }
    }

    /// Group key shares the nodes stored for the era seeded by `seed`.
    pub fn member_shares(&self, seed: &Hash) -> Vec<(Id, Seckey)> {
        self.nodes
            .iter()
            .filter_map(|node| {
                match node.routine.key_store().get_group_signature_seckey(seed) {
                    Ok(share) => share.map(|sk| (node.id(), sk)),
                    Err(e) => {
                        warn!(node = %node.id(), error = %e, "Unreadable key share");
                        None
                    }
                }
            })
            .collect()
    }

    /// Stop the expiry loops and wait for them to finish.
    pub async fn shutdown(self) {
        self.pool.close();
        let handles: Vec<JoinHandle<()>> = self.nodes.into_iter().filter_map(|n| n.expiry).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Key share expiry loop failed");
            }
        }
    }

    fn execute(&mut self, header: &BlockHeader, batch: Batch) {
        let height = header.height;
        let mut outcomes = Vec::with_capacity(batch.len());
        for packet in batch.encrypted {
            let sender = packet.sender;
            let outcome = self.checker.check_encrypted_piece_packet(&packet, header);
            if outcome.is_ok() {
                self.chain.accept_encrypted_piece_packet(packet);
            }
            outcomes.push((sender, outcome));
        }
        for packet in batch.mpks {
            let sender = packet.sender;
            let outcome = self.checker.check_mpk_packet(&packet, header);
            if outcome.is_ok() {
                self.chain.accept_mpk_packet(packet);
            }
            outcomes.push((sender, outcome));
        }
        for packet in batch.origins {
            let sender = packet.sender;
            let outcome = self.checker.check_origin_piece_packet(&packet, header);
            if outcome.is_ok() {
                self.chain.accept_origin_piece_packet(packet);
            }
            outcomes.push((sender, outcome));
        }

        for (sender, outcome) in outcomes {
            if let Err(e) = outcome {
                warn!(height, %sender, error = %e, "Rejected packet");
                self.rejected.push((height, e));
            }
        }
    }

    fn settle(&mut self, header: &BlockHeader) {
        if let Some(result) = self.checker.check_group_create_result(header.height) {
            match result.code {
                CreateResultCode::Success => {
                    if let Some(group) = &result.group {
                        self.chain.add_group(group.clone());
                    }
                }
                CreateResultCode::MarkEvil => self.chain.mark_origin_piece_required(result.seed),
                CreateResultCode::Fail | CreateResultCode::Idle => {}
            }
            info!(height = header.height, seed = %result.seed, code = ?result.code, "Era settled");
            self.results.push(result);
        }
        if let Some(punishment) = self.checker.check_group_create_punishment(header.height) {
            self.punishments.push(punishment);
        }
    }
}
