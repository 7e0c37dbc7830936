//! Building and opening share piece packets.

use committee_crypto::{CryptoError, Id, Seckey};
use committee_types::Hash;
use tracing::warn;

use crate::feldman::{evaluate_shares, generate_commitments, generate_polynomial};
use crate::piece_cipher::{decrypt_piece, decrypt_piece_revealed, encrypt_piece, NONCE_LENGTH};
use crate::types::{
    Candidate, EncryptedPiece, EncryptedSharePiecePacket, OriginSharePiecePacket, SelfMinerInfo,
    SharePiece,
};

/// The member's plaintext shares for every candidate, in candidate order.
pub fn share_pieces(
    me: &SelfMinerInfo,
    seed: &Hash,
    candidates: &[Candidate],
    threshold: usize,
) -> (Vec<Seckey>, Vec<SharePiece>) {
    let coefficients = generate_polynomial(&me.secret_seed, seed, threshold);
    let ids: Vec<Id> = candidates.iter().map(|c| c.id).collect();
    let pieces = evaluate_shares(&coefficients, &ids)
        .into_iter()
        .zip(ids)
        .map(|(share, receiver)| SharePiece { receiver, share })
        .collect();
    (coefficients, pieces)
}

/// Build the first-round packet: one encrypted piece per candidate plus the
/// commitments to the member's polynomial.
pub fn build_encrypted_packet(
    me: &SelfMinerInfo,
    seed: &Hash,
    candidates: &[Candidate],
    threshold: usize,
    enc_seckey: &Seckey,
    nonce: [u8; NONCE_LENGTH],
) -> Result<EncryptedSharePiecePacket, CryptoError> {
    let (coefficients, shares) = share_pieces(me, seed, candidates, threshold);
    let pieces = encrypt_pieces(enc_seckey, seed, &nonce, candidates, &shares)?;
    Ok(EncryptedSharePiecePacket {
        seed: *seed,
        sender: me.id(),
        commitments: generate_commitments(&coefficients),
        enc_pubkey: enc_seckey.pubkey(),
        nonce,
        pieces,
    })
}

/// Build the reveal packet from the same polynomial and the stored
/// ephemeral key.
pub fn build_origin_packet(
    me: &SelfMinerInfo,
    seed: &Hash,
    candidates: &[Candidate],
    threshold: usize,
    enc_seckey: Seckey,
) -> OriginSharePiecePacket {
    let (_, pieces) = share_pieces(me, seed, candidates, threshold);
    OriginSharePiecePacket {
        seed: *seed,
        sender: me.id(),
        enc_seckey,
        pieces,
    }
}

fn encrypt_pieces(
    enc_seckey: &Seckey,
    seed: &Hash,
    nonce: &[u8; NONCE_LENGTH],
    candidates: &[Candidate],
    shares: &[SharePiece],
) -> Result<Vec<EncryptedPiece>, CryptoError> {
    candidates
        .iter()
        .zip(shares)
        .map(|(candidate, piece)| {
            let ciphertext =
                encrypt_piece(enc_seckey, &candidate.pubkey, &candidate.id, seed, nonce, &piece.share)?;
            Ok(EncryptedPiece {
                receiver: candidate.id,
                ciphertext,
            })
        })
        .collect()
}

/// Decrypt the piece of `packet` addressed to the local member.
pub fn decrypt_own_piece(
    me: &SelfMinerInfo,
    packet: &EncryptedSharePiecePacket,
) -> Result<Seckey, CryptoError> {
    let id = me.id();
    let piece = packet
        .pieces
        .iter()
        .find(|p| p.receiver == id)
        .ok_or(CryptoError::EmptyShareSet)?;
    decrypt_piece(
        &me.seckey,
        &packet.enc_pubkey,
        &id,
        &packet.seed,
        &packet.nonce,
        &piece.ciphertext,
    )
}

/// Sum the pieces addressed to the local member.
///
/// Pieces that fail to decrypt are skipped; they will show up as a wrong
/// mpk and are settled by the reveal round. Returns the share and the number
/// of pieces that went into it.
pub fn aggregate_own_share(
    me: &SelfMinerInfo,
    packets: &[EncryptedSharePiecePacket],
) -> (Seckey, usize) {
    let mut msk = Seckey::default();
    let mut used = 0;
    for packet in packets {
        match decrypt_own_piece(me, packet) {
            Ok(share) => {
                msk += share;
                used += 1;
            }
            Err(e) => {
                warn!(sender = %packet.sender, error = %e, "Skipping undecryptable share piece");
            }
        }
    }
    (msk, used)
}

/// Whether a reveal reproduces the encrypted packet byte for byte.
///
/// The revealed key must match `enc_pubkey`, the pieces must be addressed to
/// the candidates in order, and re-encrypting every share must give the
/// published ciphertext.
pub fn encryption_consistent(
    encrypted: &EncryptedSharePiecePacket,
    origin: &OriginSharePiecePacket,
    candidates: &[Candidate],
) -> bool {
    if origin.enc_seckey.pubkey() != encrypted.enc_pubkey {
        return false;
    }
    if origin.pieces.len() != candidates.len() || encrypted.pieces.len() != candidates.len() {
        return false;
    }
    if origin
        .pieces
        .iter()
        .zip(candidates)
        .any(|(piece, candidate)| piece.receiver != candidate.id)
    {
        return false;
    }
    match encrypt_pieces(
        &origin.enc_seckey,
        &encrypted.seed,
        &encrypted.nonce,
        candidates,
        &origin.pieces,
    ) {
        Ok(expected) => expected == encrypted.pieces,
        Err(_) => false,
    }
}

/// Decrypt the piece for `receiver` with the sender's revealed key.
pub fn decrypt_with_revealed_key(
    encrypted: &EncryptedSharePiecePacket,
    enc_seckey: &Seckey,
    receiver: &Candidate,
) -> Result<Seckey, CryptoError> {
    let piece = encrypted
        .pieces
        .iter()
        .find(|p| p.receiver == receiver.id)
        .ok_or(CryptoError::EmptyShareSet)?;
    decrypt_piece_revealed(
        enc_seckey,
        &receiver.pubkey,
        &receiver.id,
        &encrypted.seed,
        &encrypted.nonce,
        &piece.ciphertext,
    )
}
