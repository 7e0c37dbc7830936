//! Per-era protocol state.

use std::fmt;

use committee_crypto::Id;
use committee_types::ProtocolParams;
use serde::{Deserialize, Serialize};

use crate::era::Era;
use crate::types::{Candidate, CreateResult};

/// Progress of the local node through one era.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// The seed block is not on chain yet
    NoSeed,
    CandidatesSelected,
    /// Encrypted pieces sent
    PiecesSent,
    /// Own share derived and mpk sent
    MpkCollected,
    /// Group certified
    Finalized,
    /// No group this era
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct CreateContext {
    pub era: Era,
    /// Selected committee, in draw order
    pub candidates: Vec<Candidate>,
    pub threshold: usize,
    pub stage: Stage,
    pub sent_encrypted: bool,
    pub sent_mpk: bool,
    pub sent_origin: bool,
    pub result: Option<CreateResult>,
}

impl CreateContext {
    pub fn new(era: Era, candidates: Vec<Candidate>, threshold: usize, stage: Stage) -> Self {
        Self {
            era,
            candidates,
            threshold,
            stage,
            sent_encrypted: false,
            sent_mpk: false,
            sent_origin: false,
            result: None,
        }
    }

    /// Context for an era whose seed block is missing.
    pub fn without_seed(era: Era) -> Self {
        Self::new(era, Vec::new(), 0, Stage::NoSeed)
    }

    pub fn candidate(&self, id: &Id) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == *id)
    }

    pub fn is_candidate(&self, id: &Id) -> bool {
        self.candidate(id).is_some()
    }

    /// Position of `id` in the committee.
    pub fn candidate_index(&self, id: &Id) -> Option<usize> {
        self.candidates.iter().position(|c| c.id == *id)
    }

    pub fn candidate_ids(&self) -> Vec<Id> {
        self.candidates.iter().map(|c| c.id).collect()
    }

    /// Whether `height` lies in a different era than this context.
    pub fn is_stale_for(&self, height: u64, params: &ProtocolParams) -> bool {
        params.seed_height(height) != self.era.seed_height
    }
}
