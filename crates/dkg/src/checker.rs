//! Validation of group-creation packets and era outcomes.
//!
//! Every node runs a checker: the chain executes incoming packets through
//! it, and the local routine shares its per-era context. A rejected packet
//! only affects its sender; the era proceeds with whoever remains.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use committee_crypto::{
    check_share_pieces_valid, recover_threshold_signature, verify_sig, Id, Pubkey, Rand, Seckey,
    Signature,
};
use committee_types::{BlockHeader, Hash, ProtocolParams};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::context::{CreateContext, Stage};
use crate::era::{Era, Round};
use crate::error::{PacketError, PacketKind};
use crate::piece_cipher::CIPHERTEXT_LENGTH;
use crate::pieces::{decrypt_with_revealed_key, encryption_consistent};
use crate::select::{exclude_saturated, CandidateSelector};
use crate::traits::{ChainReader, GroupStoreReader, MinerReader};
use crate::types::{
    Candidate, CreateResult, CreateResultCode, EncryptedSharePiecePacket, Evidence, EvidenceKind,
    Group, GroupHeader, Member, MpkPacket, OriginSharePiecePacket, Punishment,
};

pub struct CreateChecker {
    params: ProtocolParams,
    chain: Arc<dyn ChainReader>,
    miners: Arc<dyn MinerReader>,
    store: Arc<dyn GroupStoreReader>,
    ctx: RwLock<CreateContext>,
}

impl CreateChecker {
    pub fn new(
        params: ProtocolParams,
        chain: Arc<dyn ChainReader>,
        miners: Arc<dyn MinerReader>,
        store: Arc<dyn GroupStoreReader>,
    ) -> Self {
        let era = Era::new(0, None, &params);
        Self {
            params,
            chain,
            miners,
            store,
            ctx: RwLock::new(CreateContext::without_seed(era)),
        }
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub(crate) fn miners(&self) -> &dyn MinerReader {
        self.miners.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn GroupStoreReader {
        self.store.as_ref()
    }

    pub(crate) fn context(&self) -> &RwLock<CreateContext> {
        &self.ctx
    }

    pub fn current_era(&self) -> Era {
        self.ctx.read().era.clone()
    }

    pub fn stage(&self) -> Stage {
        self.ctx.read().stage
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.ctx.read().candidates.clone()
    }

    pub fn threshold(&self) -> usize {
        self.ctx.read().threshold
    }

    /// Outcome recorded by the local routine, if any.
    pub fn result(&self) -> Option<CreateResult> {
        self.ctx.read().result.clone()
    }

    /// Move to the era containing `header`.
    ///
    /// Returns true when a new context was installed. Headers of the current
    /// era on the same seed block are a no-op.
    pub fn update_context(&self, header: &BlockHeader) -> bool {
        let seed_height = self.params.seed_height(header.height);
        let seed_block = self.chain.query_block_header_by_height(seed_height);
        if self.ctx.read().era.same_era(seed_height, seed_block.as_ref()) {
            return false;
        }

        let fresh = self.build_context(seed_height, seed_block);
        let mut ctx = self.ctx.write();
        if ctx.era == fresh.era {
            return false;
        }
        *ctx = fresh;
        true
    }

    fn build_context(&self, seed_height: u64, seed_block: Option<BlockHeader>) -> CreateContext {
        let era = Era::new(seed_height, seed_block, &self.params);
        let random = match &era.seed_block {
            Some(block) => block.random.clone(),
            None => {
                debug!(seed_height, "Seed block not available");
                return CreateContext::without_seed(era);
            }
        };

        let eligible: Vec<Candidate> = self
            .miners
            .get_can_join_group_miners_at(seed_height)
            .iter()
            .filter(|m| m.can_join_group_at(seed_height))
            .map(Candidate::from)
            .collect();
        let groups = self.chain.get_available_group_infos(seed_height);
        let eligible =
            exclude_saturated(eligible, &groups, self.params.member_max_join_group_num);

        let count = self.params.candidate_count(eligible.len());
        if count == 0 {
            info!(
                seed_height,
                eligible = eligible.len(),
                min = self.params.group_member_min,
                "Not enough candidates to form a group"
            );
            return CreateContext::new(era, Vec::new(), 0, Stage::Failed);
        }

        let candidates =
            CandidateSelector::new(eligible, Rand::from_bytes(&[random.as_slice()])).fts(count);
        let threshold = self.params.threshold(count);
        info!(
            seed_height,
            seed = %era.seed(),
            members = candidates.len(),
            threshold,
            "Selected group candidates"
        );
        CreateContext::new(era, candidates, threshold, Stage::CandidatesSelected)
    }

    // =========================
    // PACKET CHECKS
    // =========================

    /// Validate an encrypted piece packet executed in `header`.
    pub fn check_encrypted_piece_packet(
        &self,
        packet: &EncryptedSharePiecePacket,
        header: &BlockHeader,
    ) -> Result<(), PacketError> {
        self.update_context(header);
        let ctx = self.ctx.read();
        check_era(&ctx, &packet.seed, header.height, Round::EncryptedPiece)?;
        self.check_sender(&ctx, &packet.sender, header.height)?;
        if self
            .store
            .has_sent_encrypted_piece_packet(&packet.sender, &packet.seed)
        {
            return Err(PacketError::Duplicate {
                kind: PacketKind::EncryptedPiece,
                sender: packet.sender,
            });
        }
        check_encrypted_structure(&ctx, packet)
    }

    /// Validate an mpk packet executed in `header`.
    pub fn check_mpk_packet(&self, packet: &MpkPacket, header: &BlockHeader) -> Result<(), PacketError> {
        self.update_context(header);
        let ctx = self.ctx.read();
        check_era(&ctx, &packet.seed, header.height, Round::Mpk)?;
        self.check_sender(&ctx, &packet.sender, header.height)?;
        if self.store.has_sent_mpk_packet(&packet.sender, &packet.seed) {
            return Err(PacketError::Duplicate {
                kind: PacketKind::Mpk,
                sender: packet.sender,
            });
        }
        if !self
            .store
            .has_sent_encrypted_piece_packet(&packet.sender, &packet.seed)
        {
            return Err(PacketError::MissingPrerequisite {
                kind: PacketKind::EncryptedPiece,
                sender: packet.sender,
            });
        }
        if !packet.mpk.is_valid() {
            return Err(PacketError::Malformed("mpk is the identity".to_string()));
        }
        if !verify_sig(&packet.mpk, packet.seed.as_bytes(), &packet.sign) {
            return Err(PacketError::InvalidSignature(packet.sender));
        }
        Ok(())
    }

    /// Validate an origin piece packet executed in `header`.
    pub fn check_origin_piece_packet(
        &self,
        packet: &OriginSharePiecePacket,
        header: &BlockHeader,
    ) -> Result<(), PacketError> {
        self.update_context(header);
        let ctx = self.ctx.read();
        check_era(&ctx, &packet.seed, header.height, Round::OriginPiece)?;
        if !self.store.is_origin_piece_required(&packet.seed) {
            return Err(PacketError::OriginNotRequired);
        }
        self.check_sender(&ctx, &packet.sender, header.height)?;
        if self
            .store
            .has_sent_origin_piece_packet(&packet.sender, &packet.seed)
        {
            return Err(PacketError::Duplicate {
                kind: PacketKind::OriginPiece,
                sender: packet.sender,
            });
        }
        if !self
            .store
            .has_sent_encrypted_piece_packet(&packet.sender, &packet.seed)
        {
            return Err(PacketError::MissingPrerequisite {
                kind: PacketKind::EncryptedPiece,
                sender: packet.sender,
            });
        }
        if !packet.enc_seckey.is_valid() {
            return Err(PacketError::Malformed("zero encryption key".to_string()));
        }
        check_receivers(&ctx, packet.pieces.iter().map(|p| &p.receiver))
    }

    fn check_sender(&self, ctx: &CreateContext, sender: &Id, height: u64) -> Result<(), PacketError> {
        if !ctx.is_candidate(sender) {
            return Err(PacketError::NotCandidate(*sender));
        }
        let miner = self
            .miners
            .get_latest_miner(sender)
            .ok_or(PacketError::UnknownMiner(*sender))?;
        if !miner.can_join_group_at(height) {
            return Err(PacketError::CannotJoin(*sender));
        }
        Ok(())
    }

    // =========================
    // ERA OUTCOMES
    // =========================

    /// Decide the era's group at the first block of the origin piece round.
    ///
    /// Returns `None` for any other height.
    pub fn check_group_create_result(&self, height: u64) -> Option<CreateResult> {
        let header = self.chain.query_block_header_by_height(height)?;
        self.update_context(&header);
        let ctx = self.ctx.read();
        if !is_first_block_of(self.chain.as_ref(), &ctx.era, Round::OriginPiece, height) {
            return None;
        }
        Some(self.compute_create_result(&ctx))
    }

    pub(crate) fn compute_create_result(&self, ctx: &CreateContext) -> CreateResult {
        let seed = ctx.era.seed();
        let mut result = CreateResult {
            seed,
            code: CreateResultCode::Idle,
            group: None,
            group_sign: None,
            frozen_miners: Vec::new(),
        };
        if !ctx.era.seed_exists() || ctx.candidates.is_empty() {
            return result;
        }

        let pieces = self.candidate_packets(ctx, self.store.get_encrypted_piece_packets(&seed), |p| p.sender);
        let piece_senders: HashSet<Id> = pieces.iter().map(|p| p.sender).collect();
        let mpks: Vec<MpkPacket> = self
            .candidate_packets(ctx, self.store.get_mpk_packets(&seed), |p| p.sender)
            .into_iter()
            .filter(|p| piece_senders.contains(&p.sender))
            .collect();
        let mpk_senders: HashSet<Id> = mpks.iter().map(|p| p.sender).collect();

        result.frozen_miners = ctx
            .candidates
            .iter()
            .map(|c| c.id)
            .filter(|id| !piece_senders.contains(id) || !mpk_senders.contains(id))
            .collect();

        let n = ctx.candidates.len();
        if !self.params.piece_enough(mpks.len(), n) || mpks.len() < ctx.threshold {
            info!(
                %seed,
                mpks = mpks.len(),
                candidates = n,
                threshold = ctx.threshold,
                "Group creation failed, not enough members"
            );
            result.code = CreateResultCode::Fail;
            return result;
        }

        let group_pubkey: Pubkey = pieces.iter().filter_map(|p| p.pubkey0().copied()).sum();
        let partials: Vec<(Id, Signature)> = mpks.iter().map(|p| (p.sender, p.sign)).collect();
        let group_sign = match recover_threshold_signature(&partials, ctx.threshold) {
            Ok(sign) if verify_sig(&group_pubkey, seed.as_bytes(), &sign) => sign,
            _ => {
                warn!(%seed, "Group signature does not verify, origin pieces required");
                result.code = CreateResultCode::MarkEvil;
                return result;
            }
        };

        let members = ctx
            .candidates
            .iter()
            .filter(|c| mpk_senders.contains(&c.id))
            .map(|c| Member {
                id: c.id,
                pubkey: c.pubkey,
            })
            .collect();
        let group = Group {
            header: GroupHeader {
                seed,
                work_height: self.params.group_work_height(ctx.era.seed_height),
                dismiss_height: self.params.group_dismiss_height(ctx.era.seed_height),
                group_pubkey,
                threshold: ctx.threshold as u32,
            },
            members,
        };
        info!(
            %seed,
            members = group.members.len(),
            threshold = ctx.threshold,
            work_height = group.header.work_height,
            "Group certified"
        );
        result.code = CreateResultCode::Success;
        result.group = Some(group);
        result.group_sign = Some(group_sign);
        result
    }

    /// Settle a failed era at the first block of the end round.
    ///
    /// Returns `None` for any other height, and when the era's group
    /// verified so no reveal took place.
    pub fn check_group_create_punishment(&self, height: u64) -> Option<Punishment> {
        let header = self.chain.query_block_header_by_height(height)?;
        self.update_context(&header);
        let ctx = self.ctx.read();
        if !is_first_block_of(self.chain.as_ref(), &ctx.era, Round::End, height) {
            return None;
        }
        if !ctx.era.seed_exists() || !self.store.is_origin_piece_required(&ctx.era.seed()) {
            return None;
        }
        Some(self.compute_punishment(&ctx))
    }

    fn compute_punishment(&self, ctx: &CreateContext) -> Punishment {
        let seed = ctx.era.seed();
        let pieces = self.candidate_packets(ctx, self.store.get_encrypted_piece_packets(&seed), |p| p.sender);
        let mpks = self.candidate_packets(ctx, self.store.get_mpk_packets(&seed), |p| p.sender);
        let origins: HashMap<Id, OriginSharePiecePacket> = self
            .candidate_packets(ctx, self.store.get_origin_piece_packets(&seed), |p| p.sender)
            .into_iter()
            .map(|p| (p.sender, p))
            .collect();
        let ids = ctx.candidate_ids();

        let mut evidence = Vec::new();
        let mut all_revealed = true;
        for packet in &pieces {
            let Some(origin) = origins.get(&packet.sender) else {
                evidence.push(Evidence {
                    culprit: packet.sender,
                    kind: EvidenceKind::MissingOriginPieces,
                });
                all_revealed = false;
                continue;
            };
            if !encryption_consistent(packet, origin, &ctx.candidates) {
                evidence.push(Evidence {
                    culprit: packet.sender,
                    kind: EvidenceKind::InconsistentEncryption,
                });
                all_revealed = false;
                continue;
            }
            let shares: Vec<Seckey> = origin.pieces.iter().map(|p| p.share).collect();
            if !check_share_pieces_valid(&shares, &ids, ctx.threshold, &packet.commitments) {
                evidence.push(Evidence {
                    culprit: packet.sender,
                    kind: EvidenceKind::InvalidPieces,
                });
            }
        }

        // A wrong mpk can only be told apart from a bad piece once every
        // piece is known
        if all_revealed {
            for mpk in &mpks {
                let Some(receiver) = ctx.candidate(&mpk.sender) else {
                    continue;
                };
                let expected: Seckey = pieces
                    .iter()
                    .filter_map(|packet| {
                        let origin = origins.get(&packet.sender)?;
                        decrypt_with_revealed_key(packet, &origin.enc_seckey, receiver).ok()
                    })
                    .sum();
                if expected.pubkey() != mpk.mpk {
                    evidence.push(Evidence {
                        culprit: mpk.sender,
                        kind: EvidenceKind::WrongMpk,
                    });
                }
            }
        }

        let culprits: HashSet<Id> = evidence.iter().map(|e| e.culprit).collect();
        let penalty_targets: Vec<Id> = ids.iter().copied().filter(|id| culprits.contains(id)).collect();
        let reward_targets: Vec<Id> = mpks
            .iter()
            .map(|p| p.sender)
            .filter(|id| !culprits.contains(id))
            .collect();

        for e in &evidence {
            warn!(%seed, culprit = %e.culprit, kind = ?e.kind, "Punishing group member");
        }
        info!(
            %seed,
            penalties = penalty_targets.len(),
            rewards = reward_targets.len(),
            "Group creation punishment settled"
        );
        Punishment {
            seed,
            evidence,
            penalty_targets,
            reward_targets,
        }
    }

    /// Packets from selected candidates, first per sender, in candidate order.
    fn candidate_packets<P>(
        &self,
        ctx: &CreateContext,
        packets: Vec<P>,
        sender: impl Fn(&P) -> Id,
    ) -> Vec<P> {
        let mut by_sender: HashMap<Id, P> = HashMap::new();
        for packet in packets {
            by_sender.entry(sender(&packet)).or_insert(packet);
        }
        ctx.candidates
            .iter()
            .filter_map(|c| by_sender.remove(&c.id))
            .collect()
    }
}

fn check_era(ctx: &CreateContext, seed: &Hash, height: u64, round: Round) -> Result<(), PacketError> {
    if !ctx.era.seed_exists() {
        return Err(PacketError::NoSeed);
    }
    let expected = ctx.era.seed();
    if *seed != expected {
        return Err(PacketError::SeedMismatch {
            expected,
            got: *seed,
        });
    }
    if !ctx.era.range(round).contains(height) {
        return Err(PacketError::NotInRound { height, round });
    }
    Ok(())
}

fn check_encrypted_structure(
    ctx: &CreateContext,
    packet: &EncryptedSharePiecePacket,
) -> Result<(), PacketError> {
    if packet.commitments.len() != ctx.threshold {
        return Err(PacketError::Malformed(format!(
            "expected {} commitments, got {}",
            ctx.threshold,
            packet.commitments.len()
        )));
    }
    if !packet.commitments.iter().all(Pubkey::is_valid) {
        return Err(PacketError::Malformed("identity commitment".to_string()));
    }
    if !packet.enc_pubkey.is_valid() {
        return Err(PacketError::Malformed("identity encryption key".to_string()));
    }
    if let Some(piece) = packet
        .pieces
        .iter()
        .find(|p| p.ciphertext.len() != CIPHERTEXT_LENGTH)
    {
        return Err(PacketError::Malformed(format!(
            "ciphertext for {} has {} bytes",
            piece.receiver,
            piece.ciphertext.len()
        )));
    }
    check_receivers(ctx, packet.pieces.iter().map(|p| &p.receiver))
}

/// Pieces must be addressed to every candidate, in candidate order.
fn check_receivers<'a>(
    ctx: &CreateContext,
    receivers: impl ExactSizeIterator<Item = &'a Id>,
) -> Result<(), PacketError> {
    if receivers.len() != ctx.candidates.len() {
        return Err(PacketError::Malformed(format!(
            "expected {} pieces, got {}",
            ctx.candidates.len(),
            receivers.len()
        )));
    }
    if receivers.zip(&ctx.candidates).any(|(r, c)| *r != c.id) {
        return Err(PacketError::Malformed("pieces out of candidate order".to_string()));
    }
    Ok(())
}

fn is_first_block_of(chain: &dyn ChainReader, era: &Era, round: Round, height: u64) -> bool {
    let range = era.range(round);
    if !era.seed_exists() || !range.contains(height) {
        return false;
    }
    chain
        .query_block_header_ceil(range.begin)
        .map_or(false, |first| first.height == height)
}
