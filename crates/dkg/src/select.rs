//! Stake-weighted candidate selection.
//!
//! Follow-the-stake sampling without replacement: each draw takes a cut
//! point in `[0, remaining_stake)` from the era's random stream, picks the
//! candidate whose cumulative-stake interval contains it, removes that
//! candidate and subtracts its stake. Every node holding the same candidate
//! set and seed computes the same ordered committee.

use std::collections::HashMap;

use committee_crypto::{Id, Rand};
use tracing::debug;

use crate::types::{Candidate, Group};

/// Draws committee members from a pool of candidates.
pub struct CandidateSelector {
    pool: Vec<Candidate>,
    rand: Rand,
}

impl CandidateSelector {
    /// Candidates are sorted by id and deduplicated, so the input order does
    /// not matter.
    pub fn new(mut candidates: Vec<Candidate>, rand: Rand) -> Self {
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        candidates.dedup_by(|a, b| a.id == b.id);
        Self {
            pool: candidates,
            rand,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Select `num` candidates (or the whole pool if smaller), in draw order.
    pub fn fts(mut self, num: usize) -> Vec<Candidate> {
        let num = num.min(self.pool.len());
        let mut selected = Vec::with_capacity(num);
        let mut cumulative: Vec<u64> = self
            .pool
            .iter()
            .scan(0u64, |acc, c| {
                *acc = acc.saturating_add(c.stake);
                Some(*acc)
            })
            .collect();

        while selected.len() < num {
            let remaining = cumulative.last().copied().unwrap_or(0);
            let draw = self.rand.deri(selected.len() as u64);
            let index = if remaining == 0 {
                // Only zero-stake candidates left
                draw.modulo(self.pool.len())
            } else {
                let cut = draw.modulo_u64(remaining);
                cumulative
                    .partition_point(|&c| c <= cut)
                    .min(self.pool.len() - 1)
            };

            let last = self.pool.len() - 1;
            let moved = self.pool[last].stake;
            let chosen = self.pool.swap_remove(index);
            cumulative.pop();
            // The last candidate now sits at `index`
            for c in &mut cumulative[index..] {
                *c = c.saturating_sub(chosen.stake).saturating_add(moved);
            }
            selected.push(chosen);
        }
        selected
    }
}

/// Number of live groups each miner belongs to.
pub fn member_joined_counts(groups: &[Group]) -> HashMap<Id, usize> {
    let mut counts = HashMap::new();
    for group in groups {
        for member in &group.members {
            *counts.entry(member.id).or_insert(0) += 1;
        }
    }
    counts
}

/// Drop candidates already serving in `max_join` or more groups.
pub fn exclude_saturated(
    candidates: Vec<Candidate>,
    groups: &[Group],
    max_join: usize,
) -> Vec<Candidate> {
    let counts = member_joined_counts(groups);
    candidates
        .into_iter()
        .filter(|c| {
            let joined = counts.get(&c.id).copied().unwrap_or(0);
            if joined >= max_join {
                debug!(candidate = %c.id, joined, "Skipping candidate at group cap");
                false
            } else {
                true
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroupHeader, Member};
    use committee_crypto::Seckey;
    use committee_types::Hash;

    fn candidates(stakes: &[u64]) -> Vec<Candidate> {
        stakes
            .iter()
            .enumerate()
            .map(|(i, stake)| {
                let pubkey = Seckey::from_u64(i as u64 + 1).pubkey();
                Candidate {
                    id: Id::from_pubkey(&pubkey),
                    pubkey,
                    stake: *stake,
                }
            })
            .collect()
    }

    #[test]
    fn test_selection_is_deterministic() {
        let pool = candidates(&[10, 20, 30, 40, 50, 60, 70]);
        let rand = Rand::from_bytes(&[b"seed block random"]);

        let a = CandidateSelector::new(pool.clone(), rand).fts(4);
        let b = CandidateSelector::new(pool.clone(), rand).fts(4);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);

        // Input order does not matter
        let mut reversed = pool.clone();
        reversed.reverse();
        assert_eq!(CandidateSelector::new(reversed, rand).fts(4), a);
    }

    #[test]
    fn test_selection_without_replacement() {
        let pool = candidates(&[1, 1, 1000, 1, 1]);
        let rand = Rand::from_bytes(&[b"x"]);
        let selected = CandidateSelector::new(pool.clone(), rand).fts(5);
        let mut ids: Vec<Id> = selected.iter().map(|c| c.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);

        assert_eq!(CandidateSelector::new(pool, rand).fts(10).len(), 5);
    }

    /// Reference draw that recomputes the cumulative stakes every time.
    fn fts_rebuilding(mut pool: Vec<Candidate>, rand: Rand, num: usize) -> Vec<Candidate> {
        pool.sort_by(|a, b| a.id.cmp(&b.id));
        let mut selected = Vec::new();
        while selected.len() < num && !pool.is_empty() {
            let cumulative: Vec<u64> = pool
                .iter()
                .scan(0u64, |acc, c| {
                    *acc += c.stake;
                    Some(*acc)
                })
                .collect();
            let remaining = *cumulative.last().unwrap();
            let draw = rand.deri(selected.len() as u64);
            let index = if remaining == 0 {
                draw.modulo(pool.len())
            } else {
                let cut = draw.modulo_u64(remaining);
                cumulative.partition_point(|&c| c <= cut)
            };
            selected.push(pool.swap_remove(index));
        }
        selected
    }

    #[test]
    fn test_incremental_stakes_match_rebuild() {
        let pool = candidates(&[3, 0, 17, 8, 1, 0, 42, 5, 9, 12, 2]);
        for seed in 0..50u64 {
            let rand = Rand::from_bytes(&[&seed.to_be_bytes()]);
            for num in [1, 4, 11] {
                assert_eq!(
                    CandidateSelector::new(pool.clone(), rand).fts(num),
                    fts_rebuilding(pool.clone(), rand, num)
                );
            }
        }
    }

    #[test]
    fn test_zero_stake_pool() {
        let pool = candidates(&[0, 0, 0]);
        let selected = CandidateSelector::new(pool, Rand::from_bytes(&[b"z"])).fts(2);
        assert_eq!(selected.len(), 2);
        assert_ne!(selected[0].id, selected[1].id);
    }

    #[test]
    fn test_zero_stake_candidates_drawn_last() {
        let pool = candidates(&[0, 5, 0, 7]);
        for seed in 0..20u64 {
            let rand = Rand::from_bytes(&[&seed.to_be_bytes()]);
            let selected = CandidateSelector::new(pool.clone(), rand).fts(2);
            assert!(selected.iter().all(|c| c.stake > 0));
        }
    }

    #[test]
    fn test_frequency_monotonic_in_stake() {
        let stakes = [1u64, 2, 4, 8, 16];
        let pool = candidates(&stakes);
        let mut hits: HashMap<Id, usize> = HashMap::new();

        for seed in 0..2000u64 {
            let rand = Rand::from_bytes(&[&seed.to_be_bytes()]);
            for c in CandidateSelector::new(pool.clone(), rand).fts(2) {
                *hits.entry(c.id).or_insert(0) += 1;
            }
        }

        let counts: Vec<usize> = pool
            .iter()
            .map(|c| hits.get(&c.id).copied().unwrap_or(0))
            .collect();
        for pair in counts.windows(2) {
            assert!(pair[0] < pair[1], "frequencies not monotonic: {counts:?}");
        }
    }

    #[test]
    fn test_exclude_saturated() {
        let pool = candidates(&[10, 10, 10]);
        let member = Member {
            id: pool[0].id,
            pubkey: pool[0].pubkey,
        };
        let group = Group {
            header: GroupHeader {
                seed: Hash::ZERO,
                work_height: 0,
                dismiss_height: 100,
                group_pubkey: pool[0].pubkey,
                threshold: 1,
            },
            members: vec![member],
        };
        let groups = vec![group.clone(), group];

        let kept = exclude_saturated(pool.clone(), &groups, 2);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|c| c.id != pool[0].id));

        assert_eq!(exclude_saturated(pool, &groups, 3).len(), 3);
    }
}
