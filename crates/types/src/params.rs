//! Protocol parameters.
//!
//! All tunables of committee formation live in [`ProtocolParams`]. The
//! defaults are the production values; tests and simulations shrink the
//! member bounds to run small committees.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from [`ProtocolParams::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("group_member_min ({min}) exceeds group_member_max ({max})")]
    MemberBounds { min: usize, max: usize },

    #[error("{name} must be within 1..=100, got {value}")]
    Percent { name: &'static str, value: u64 },

    #[error("{0} must be non-zero")]
    Zero(&'static str),
}

/// Committee formation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    /// Fewer eligible candidates than this forms no group
    pub group_member_min: usize,
    /// Upper bound on the committee size
    pub group_member_max: usize,
    /// Candidates already in this many live groups are skipped
    pub member_max_join_group_num: usize,
    /// Threshold as a percentage of the committee size, rounded up
    pub threshold_percent: u64,
    /// Share of candidates that must contribute before a group can form
    pub piece_min_ratio_percent: u64,
    /// Blocks between consecutive rounds of one era
    pub steady_state_back_track_gap: u64,
    /// Height span of one protocol round
    pub round_window: u64,
    pub epoch_length: u64,
    pub group_activate_epoch_gap: u64,
    pub group_live_epochs: u64,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            group_member_min: 80,
            group_member_max: 100,
            member_max_join_group_num: 5,
            threshold_percent: 51,
            piece_min_ratio_percent: 80,
            steady_state_back_track_gap: 5,
            round_window: 15,
            epoch_length: 400,
            group_activate_epoch_gap: 1,
            group_live_epochs: 2,
        }
    }
}

impl ProtocolParams {
    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.group_member_min > self.group_member_max {
            return Err(ParamsError::MemberBounds {
                min: self.group_member_min,
                max: self.group_member_max,
            });
        }
        if self.group_member_max == 0 {
            return Err(ParamsError::Zero("group_member_max"));
        }
        for (name, value) in [
            ("threshold_percent", self.threshold_percent),
            ("piece_min_ratio_percent", self.piece_min_ratio_percent),
        ] {
            if value == 0 || value > 100 {
                return Err(ParamsError::Percent { name, value });
            }
        }
        if self.round_window == 0 {
            return Err(ParamsError::Zero("round_window"));
        }
        if self.epoch_length == 0 {
            return Err(ParamsError::Zero("epoch_length"));
        }
        Ok(())
    }

    /// Number of members to select from `n` eligible candidates.
    pub fn candidate_count(&self, n: usize) -> usize {
        if n >= self.group_member_max {
            self.group_member_max
        } else if n < self.group_member_min {
            0
        } else {
            n
        }
    }

    /// Signing threshold for a committee of `n` members: ceil(n * pct / 100).
    pub fn threshold(&self, n: usize) -> usize {
        let pct = self.threshold_percent as usize;
        (n * pct + 99) / 100
    }

    /// Whether `received` contributions out of `total` candidates suffice.
    pub fn piece_enough(&self, received: usize, total: usize) -> bool {
        if total == 0 {
            return false;
        }
        let pct = self.piece_min_ratio_percent as usize;
        received >= (total * pct + 99) / 100
    }

    /// Height span of one era: four rounds plus the gaps around them.
    pub fn era_window(&self) -> u64 {
        (self.steady_state_back_track_gap + self.round_window) * 4
            + self.steady_state_back_track_gap
    }

    /// Seed height of the era containing `height`.
    pub fn seed_height(&self, height: u64) -> u64 {
        let window = self.era_window();
        height / window * window
    }

    pub fn epoch_at(&self, height: u64) -> u64 {
        height / self.epoch_length
    }

    /// Height at which a group seeded at `seed_height` starts working.
    pub fn group_work_height(&self, seed_height: u64) -> u64 {
        (self.epoch_at(seed_height) + self.group_activate_epoch_gap + 1) * self.epoch_length
    }

    /// Height at which a group seeded at `seed_height` is dismissed.
    pub fn group_dismiss_height(&self, seed_height: u64) -> u64 {
        self.group_work_height(seed_height) + self.group_live_epochs * self.epoch_length
    }
}
