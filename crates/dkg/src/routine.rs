//! Local participation in group creation.
//!
//! The routine is driven by new blocks. On each block it moves to the right
//! era, then tries each of its three sends; a send whose round is not open,
//! or that already happened, is skipped. Every check-and-send runs under the
//! context write lock, so concurrent callers send each packet at most once
//! per era.

use std::sync::Arc;

use committee_crypto::Seckey;
use committee_keystore::KeyShareStore;
use committee_types::BlockHeader;
use parking_lot::RwLockWriteGuard;
use rand::{rngs::OsRng, RngCore};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::checker::CreateChecker;
use crate::context::{CreateContext, Stage};
use crate::era::Round;
use crate::error::{CreateError, PacketKind};
use crate::piece_cipher::NONCE_LENGTH;
use crate::pieces::{aggregate_own_share, build_encrypted_packet, build_origin_packet};
use crate::traits::PacketSender;
use crate::types::{CreateResult, CreateResultCode, MpkPacket, SelfMinerInfo};

pub struct CreateRoutine {
    checker: Arc<CreateChecker>,
    sender: Arc<dyn PacketSender>,
    key_store: Arc<KeyShareStore>,
    height_events: Option<mpsc::Sender<u64>>,
}

impl CreateRoutine {
    pub fn new(
        checker: Arc<CreateChecker>,
        sender: Arc<dyn PacketSender>,
        key_store: Arc<KeyShareStore>,
    ) -> Self {
        Self {
            checker,
            sender,
            key_store,
            height_events: None,
        }
    }

    /// Forward every block height to the key store expiry loop.
    pub fn with_height_events(mut self, events: mpsc::Sender<u64>) -> Self {
        self.height_events = Some(events);
        self
    }

    pub fn checker(&self) -> &Arc<CreateChecker> {
        &self.checker
    }

    pub fn key_store(&self) -> &Arc<KeyShareStore> {
        &self.key_store
    }

    /// The era outcome as seen by this node, once decided.
    pub fn outcome(&self) -> Option<CreateResult> {
        self.checker.result()
    }

    pub fn on_block_added(&self, header: &BlockHeader) {
        if let Some(events) = &self.height_events {
            if let Err(e) = events.try_send(header.height) {
                debug!(height = header.height, error = %e, "Dropped key share expiry event");
            }
        }

        if self.checker.update_context(header) {
            debug!(height = header.height, stage = %self.checker.stage(), "Entered new era");
        }

        report(PacketKind::EncryptedPiece, header, self.check_and_send_encrypted_piece_packet(header));
        report(PacketKind::Mpk, header, self.check_and_send_mpk_packet(header));
        report(PacketKind::OriginPiece, header, self.check_and_send_origin_piece_packet(header));

        self.refresh_outcome(header);
    }

    /// Send this node's encrypted share pieces if the round is open and the
    /// node is a selected candidate.
    pub fn check_and_send_encrypted_piece_packet(&self, header: &BlockHeader) -> Result<(), CreateError> {
        let mut ctx = self.current_context(header)?;
        check_round(&ctx, header.height, Round::EncryptedPiece)?;
        let me = self.local_member(&ctx, header.height)?;
        let seed = ctx.era.seed();
        if ctx.sent_encrypted
            || self
                .checker
                .store()
                .has_sent_encrypted_piece_packet(&me.id(), &seed)
        {
            return Err(CreateError::AlreadySent(PacketKind::EncryptedPiece));
        }

        let enc_seckey = Seckey::random(&mut OsRng);
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        let packet = build_encrypted_packet(&me, &seed, &ctx.candidates, ctx.threshold, &enc_seckey, nonce)?;

        let expire_height = self.checker.params().group_dismiss_height(ctx.era.seed_height);
        self.key_store
            .store_encryption_seckey(&seed, enc_seckey, expire_height)?;
        self.sender
            .send_encrypted_piece_packet(packet)
            .map_err(|e| send_error(PacketKind::EncryptedPiece, e))?;

        ctx.sent_encrypted = true;
        ctx.stage = Stage::PiecesSent;
        info!(
            height = header.height,
            %seed,
            sender = %me.id(),
            pieces = ctx.candidates.len(),
            "Sent encrypted share pieces"
        );
        Ok(())
    }

    /// Derive this node's share of the group key from the pieces addressed
    /// to it and announce the matching public key.
    pub fn check_and_send_mpk_packet(&self, header: &BlockHeader) -> Result<(), CreateError> {
        let mut ctx = self.current_context(header)?;
        check_round(&ctx, header.height, Round::Mpk)?;
        let me = self.local_member(&ctx, header.height)?;
        let seed = ctx.era.seed();
        let store = self.checker.store();
        if ctx.sent_mpk || store.has_sent_mpk_packet(&me.id(), &seed) {
            return Err(CreateError::AlreadySent(PacketKind::Mpk));
        }
        if !(ctx.sent_encrypted || store.has_sent_encrypted_piece_packet(&me.id(), &seed)) {
            return Err(CreateError::PrerequisiteMissing(PacketKind::EncryptedPiece));
        }

        let packets: Vec<_> = store
            .get_encrypted_piece_packets(&seed)
            .into_iter()
            .filter(|p| ctx.is_candidate(&p.sender))
            .collect();
        let total = ctx.candidates.len();
        if !self.checker.params().piece_enough(packets.len(), total) {
            return Err(CreateError::NotEnoughPieces {
                received: packets.len(),
                total,
            });
        }

        let (msk, used) = aggregate_own_share(&me, &packets);
        if used == 0 {
            return Err(CreateError::Crypto(committee_crypto::CryptoError::EmptyShareSet));
        }
        let expire_height = self.checker.params().group_dismiss_height(ctx.era.seed_height);
        self.key_store
            .store_group_signature_seckey(&seed, msk, expire_height)?;

        let packet = MpkPacket {
            seed,
            sender: me.id(),
            mpk: msk.pubkey(),
            sign: msk.sign(seed.as_bytes()),
        };
        self.sender
            .send_mpk_packet(packet)
            .map_err(|e| send_error(PacketKind::Mpk, e))?;

        ctx.sent_mpk = true;
        ctx.stage = Stage::MpkCollected;
        info!(height = header.height, %seed, pieces = used, "Sent mpk packet");
        Ok(())
    }

    /// Reveal the plaintext pieces and ephemeral key once the era's group
    /// failed to verify.
    pub fn check_and_send_origin_piece_packet(&self, header: &BlockHeader) -> Result<(), CreateError> {
        let mut ctx = self.current_context(header)?;
        check_round(&ctx, header.height, Round::OriginPiece)?;
        let seed = ctx.era.seed();
        let store = self.checker.store();
        if !store.is_origin_piece_required(&seed) {
            return Err(CreateError::OriginNotRequired(seed));
        }
        let me = self.local_member(&ctx, header.height)?;
        if ctx.sent_origin || store.has_sent_origin_piece_packet(&me.id(), &seed) {
            return Err(CreateError::AlreadySent(PacketKind::OriginPiece));
        }
        if !(ctx.sent_encrypted || store.has_sent_encrypted_piece_packet(&me.id(), &seed)) {
            return Err(CreateError::PrerequisiteMissing(PacketKind::EncryptedPiece));
        }

        let enc_seckey = self
            .key_store
            .get_encryption_seckey(&seed)?
            .ok_or(CreateError::KeyShareMissing(seed))?;
        let packet = build_origin_packet(&me, &seed, &ctx.candidates, ctx.threshold, enc_seckey);
        self.sender
            .send_origin_piece_packet(packet)
            .map_err(|e| send_error(PacketKind::OriginPiece, e))?;

        ctx.sent_origin = true;
        info!(height = header.height, %seed, "Revealed origin share pieces");
        Ok(())
    }

    /// Record the era outcome once the origin piece round opens.
    fn refresh_outcome(&self, header: &BlockHeader) {
        let mut ctx = self.checker.context().write();
        if ctx.result.is_some()
            || ctx.is_stale_for(header.height, self.checker.params())
            || ctx.candidates.is_empty()
            || !ctx.era.ori_piece_range.contains(header.height)
        {
            return;
        }
        let result = self.checker.compute_create_result(&ctx);
        ctx.stage = if result.code == CreateResultCode::Success {
            Stage::Finalized
        } else {
            Stage::Failed
        };
        debug!(height = header.height, code = ?result.code, "Recorded group creation outcome");
        ctx.result = Some(result);
    }

    fn current_context(&self, header: &BlockHeader) -> Result<RwLockWriteGuard<'_, CreateContext>, CreateError> {
        let ctx = self.checker.context().write();
        if ctx.is_stale_for(header.height, self.checker.params()) {
            return Err(CreateError::StaleHeader(header.height));
        }
        if !ctx.era.seed_exists() {
            return Err(CreateError::NoSeed(ctx.era.seed_height));
        }
        Ok(ctx)
    }

    /// The local miner, if it may take part in this era's committee.
    fn local_member(&self, ctx: &CreateContext, height: u64) -> Result<SelfMinerInfo, CreateError> {
        let miners = self.checker.miners();
        let me = miners.self_miner_info().ok_or(CreateError::NoMinerInfo)?;
        if !miners.can_join_group(&me.id(), height) {
            return Err(CreateError::CannotJoin(me.id()));
        }
        if ctx.candidates.is_empty() {
            return Err(CreateError::NoCandidates);
        }
        if !ctx.is_candidate(&me.id()) {
            return Err(CreateError::NotSelected(me.id()));
        }
        Ok(me)
    }
}

fn check_round(ctx: &CreateContext, height: u64, round: Round) -> Result<(), CreateError> {
    if ctx.era.range(round).contains(height) {
        Ok(())
    } else {
        Err(CreateError::NotInRound { height, round })
    }
}

fn send_error(kind: PacketKind, e: anyhow::Error) -> CreateError {
    CreateError::Send {
        kind,
        reason: format!("{e:#}"),
    }
}

fn report(kind: PacketKind, header: &BlockHeader, outcome: Result<(), CreateError>) {
    match outcome {
        Ok(()) => {}
        Err(e) if e.is_precondition() => {
            debug!(height = header.height, packet = %kind, reason = %e, "Skipped send");
        }
        Err(e) => {
            warn!(height = header.height, packet = %kind, error = %e, "Send failed");
        }
    }
}
