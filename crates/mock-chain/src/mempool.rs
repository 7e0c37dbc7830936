//! Pending packets, included in the next block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use committee_crypto::Id;
use committee_dkg::{EncryptedSharePiecePacket, MpkPacket, OriginSharePiecePacket, PacketSender};
use parking_lot::Mutex;
use tracing::debug;

/// Packets waiting for the next block.
#[derive(Debug, Default)]
pub struct Batch {
    pub encrypted: Vec<EncryptedSharePiecePacket>,
    pub mpks: Vec<MpkPacket>,
    pub origins: Vec<OriginSharePiecePacket>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.encrypted.len() + self.mpks.len() + self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct Mempool {
    pending: Mutex<Batch>,
    closed: AtomicBool,
}

impl Mempool {
    /// Take everything pending.
    pub fn drain(&self) -> Batch {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Refuse further packets, as a disconnected transport would.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("mempool is closed");
        }
        Ok(())
    }
}

/// A node's view of the transport.
///
/// A tampering sender corrupts the first piece it addresses to another
/// member, so that member derives a wrong share.
pub struct MempoolSender {
    pool: Arc<Mempool>,
    owner: Id,
    tamper: bool,
}

impl MempoolSender {
    pub fn new(pool: Arc<Mempool>, owner: Id) -> Self {
        Self {
            pool,
            owner,
            tamper: false,
        }
    }

    pub fn tampering(mut self) -> Self {
        self.tamper = true;
        self
    }
}

impl PacketSender for MempoolSender {
    fn send_encrypted_piece_packet(&self, mut packet: EncryptedSharePiecePacket) -> Result<()> {
        self.pool.check_open()?;
        if self.tamper {
            if let Some(piece) = packet.pieces.iter_mut().find(|p| p.receiver != self.owner) {
                if let Some(byte) = piece.ciphertext.first_mut() {
                    *byte ^= 0xff;
                }
                debug!(sender = %self.owner, receiver = %piece.receiver, "Tampered share piece");
            }
        }
        self.pool.pending.lock().encrypted.push(packet);
        Ok(())
    }

    fn send_mpk_packet(&self, packet: MpkPacket) -> Result<()> {
        self.pool.check_open()?;
        self.pool.pending.lock().mpks.push(packet);
        Ok(())
    }

    fn send_origin_piece_packet(&self, packet: OriginSharePiecePacket) -> Result<()> {
        self.pool.check_open()?;
        self.pool.pending.lock().origins.push(packet);
        Ok(())
    }
}
