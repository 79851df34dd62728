use std::collections::HashSet;

use itertools::Itertools;
use serde::Serialize;

use super::PollVoteCandidate;
use crate::Lovelace;

/// Split candidates into the first vote of each pool and the later ones.
///
/// Candidates are visited in transaction order regardless of the order they
/// are given in; a pool's first vote is final and later votes never amend it.
pub fn dedup_first_vote<T>(candidates: Vec<T>) -> (Vec<T>, Vec<T>)
where
    T: AsRef<PollVoteCandidate>,
{
    let mut seen = HashSet::new();

    candidates
        .into_iter()
        .sorted_by_key(|x| x.as_ref().tx_id)
        .partition(|x| seen.insert(x.as_ref().pool_id.clone()))
}

/// The weight a single accepted vote carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ballot {
    pub choice: usize,
    pub delegators: u64,
    pub stake: Lovelace,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollTally {
    pub total_votes: u64,
    pub votes: Vec<u64>,
    pub vote_pct: Vec<f64>,
    pub total_delegators: u64,
    pub delegators: Vec<u64>,
    pub delegator_pct: Vec<f64>,
    pub total_stake: Lovelace,
    pub stake: Vec<Lovelace>,
    pub stake_pct: Vec<f64>,
}

fn shares(parts: &[u64], total: u64) -> Vec<f64> {
    if total == 0 {
        return vec![0.0; parts.len()];
    }

    parts.iter().map(|x| *x as f64 / total as f64).collect()
}

impl PollTally {
    /// Aggregate ballots over `choices` answers. Ballots pointing past the
    /// last choice are ignored.
    pub fn compute(choices: usize, ballots: &[Ballot]) -> Self {
        let mut votes = vec![0u64; choices];
        let mut delegators = vec![0u64; choices];
        let mut stake = vec![0u64; choices];

        for ballot in ballots.iter().filter(|x| x.choice < choices) {
            votes[ballot.choice] += 1;
            delegators[ballot.choice] += ballot.delegators;
            stake[ballot.choice] += ballot.stake;
        }

        let total_votes = votes.iter().sum();
        let total_delegators = delegators.iter().sum();
        let total_stake = stake.iter().sum();

        Self {
            vote_pct: shares(&votes, total_votes),
            delegator_pct: shares(&delegators, total_delegators),
            stake_pct: shares(&stake, total_stake),
            total_votes,
            votes,
            total_delegators,
            delegators,
            total_stake,
            stake,
        }
    }
}
