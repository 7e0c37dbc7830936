//! Era scheduling.
//!
//! The chain is split into eras of `era_window` blocks. An era is anchored
//! to the block at its seed height and runs four rounds, each
//! `round_window` blocks tall and `steady_state_back_track_gap` blocks after
//! the previous one:
//!
//! ```text
//! seed  gap  encPiece  gap  mpk  gap  oriPiece  gap  end  gap | next seed
//! ```
//!
//! A reorg that replaces the seed block yields a different era, which resets
//! all protocol state for it.

use std::fmt;

use committee_types::{BlockHeader, Hash, ProtocolParams};
use serde::{Deserialize, Serialize};

/// Protocol rounds of one era.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Round {
    EncryptedPiece,
    Mpk,
    OriginPiece,
    End,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Round::EncryptedPiece => "encrypted-piece",
            Round::Mpk => "mpk",
            Round::OriginPiece => "origin-piece",
            Round::End => "end",
        };
        f.write_str(name)
    }
}

/// Inclusive height range `[begin, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRange {
    pub begin: u64,
    pub end: u64,
}

impl RoundRange {
    fn new(begin: u64, window: u64) -> Self {
        Self {
            begin,
            end: begin + window,
        }
    }

    pub fn contains(&self, height: u64) -> bool {
        height >= self.begin && height <= self.end
    }
}

#[derive(Debug, Clone)]
pub struct Era {
    pub seed_height: u64,
    /// Block at the seed height; absent if that height has no block yet
    pub seed_block: Option<BlockHeader>,
    pub enc_piece_range: RoundRange,
    pub mpk_range: RoundRange,
    pub ori_piece_range: RoundRange,
    pub end_range: RoundRange,
}

impl Era {
    pub fn new(seed_height: u64, seed_block: Option<BlockHeader>, params: &ProtocolParams) -> Self {
        let gap = params.steady_state_back_track_gap;
        let window = params.round_window;
        let enc_piece_range = RoundRange::new(seed_height + gap, window);
        let mpk_range = RoundRange::new(enc_piece_range.end + gap, window);
        let ori_piece_range = RoundRange::new(mpk_range.end + gap, window);
        let end_range = RoundRange::new(ori_piece_range.end + gap, window);
        Self {
            seed_height,
            seed_block,
            enc_piece_range,
            mpk_range,
            ori_piece_range,
            end_range,
        }
    }

    /// Whether this era is anchored at `seed_height` on `seed_block`.
    pub fn same_era(&self, seed_height: u64, seed_block: Option<&BlockHeader>) -> bool {
        if self.seed_height != seed_height {
            return false;
        }
        match (&self.seed_block, seed_block) {
            (None, None) => true,
            (Some(a), Some(b)) => a.hash == b.hash,
            _ => false,
        }
    }

    pub fn seed_exists(&self) -> bool {
        self.seed_block.is_some()
    }

    /// Seed block hash, or the zero hash when no seed block exists.
    pub fn seed(&self) -> Hash {
        self.seed_block
            .as_ref()
            .map(|b| b.hash)
            .unwrap_or(Hash::ZERO)
    }

    pub fn end(&self) -> u64 {
        self.end_range.begin
    }

    pub fn range(&self, round: Round) -> RoundRange {
        match round {
            Round::EncryptedPiece => self.enc_piece_range,
            Round::Mpk => self.mpk_range,
            Round::OriginPiece => self.ori_piece_range,
            Round::End => self.end_range,
        }
    }

    /// The round `height` falls in, if any.
    pub fn round_at(&self, height: u64) -> Option<Round> {
        [Round::EncryptedPiece, Round::Mpk, Round::OriginPiece, Round::End]
            .into_iter()
            .find(|round| self.range(*round).contains(height))
    }
}

impl PartialEq for Era {
    fn eq(&self, other: &Self) -> bool {
        self.same_era(other.seed_height, other.seed_block.as_ref())
    }
}

impl Eq for Era {}
