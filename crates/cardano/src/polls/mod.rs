//! Stake pool polls (CIP-0094).
//!
//! A poll is a question published as transaction metadata. Pools answer it
//! either with a dedicated transaction signed by their cold key, or by
//! embedding the answer in the metadata of a pool registration update. The
//! engine gathers both kinds of votes, keeps the first vote of each pool and
//! weighs every vote by the pool's delegators and stake at the time the poll
//! closed.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use cbi_core::{config::PollsConfig, Epoch, StoreError, TxId};

use crate::{Lovelace, PoolId};

mod payload;
mod tally;

pub use payload::*;
pub use tally::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoteSource {
    /// Dedicated vote transaction carrying the pool's cold key signature
    Direct,

    /// Vote embedded in a pool registration update
    PoolUpdate,
}

/// A transaction publishing a poll question
#[derive(Debug, Clone)]
pub struct PollRecord {
    pub hash: String,
    pub tx_id: TxId,
    pub tx_hash: String,
    pub epoch_no: Epoch,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct PollVoteCandidate {
    pub poll_hash: String,
    pub pool_id: PoolId,
    pub tx_id: TxId,
    pub tx_hash: String,
    pub epoch_no: Epoch,
    pub payload: Value,

    /// Cold key hash that signed a direct vote. Only key hashes are kept on
    /// the ledger side, never the verification keys themselves.
    pub extra_signature_hash: Option<String>,

    pub source: VoteSource,
}

impl AsRef<PollVoteCandidate> for PollVoteCandidate {
    fn as_ref(&self) -> &PollVoteCandidate {
        self
    }
}

/// Delegation state of a pool at a given epoch
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub pool_id: PoolId,
    pub ticker: Option<String>,
    pub name: Option<String>,
    pub delegators: u64,
    pub stake: Lovelace,
}

/// Read access to the poll related ledger data
#[trait_variant::make(Send)]
pub trait PollSource: Sync {
    async fn find_poll(&self, hash: &str) -> Result<Option<PollRecord>, StoreError>;

    async fn list_polls(&self) -> Result<Vec<PollRecord>, StoreError>;

    /// Votes from dedicated transactions included before `end_epoch`
    async fn direct_votes(
        &self,
        hash: &str,
        end_epoch: Epoch,
    ) -> Result<Vec<PollVoteCandidate>, StoreError>;

    /// Votes embedded in pool registration updates
    async fn implicit_votes(&self, hash: &str) -> Result<Vec<PollVoteCandidate>, StoreError>;

    async fn pool_snapshots(
        &self,
        epoch: Epoch,
        pools: &[PoolId],
    ) -> Result<Vec<PoolSnapshot>, StoreError>;

    async fn current_epoch(&self) -> Result<Epoch, StoreError>;
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll {0} not found")]
    NotFound(String),

    #[error("poll {hash} is malformed")]
    Malformed {
        hash: String,
        #[source]
        source: PayloadError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct PollDefinition {
    pub hash: String,
    pub tx_hash: String,
    pub epoch_no: Epoch,
    pub end_epoch: Epoch,
    pub question: String,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedVote {
    pub pool_id: PoolId,
    pub ticker: Option<String>,
    pub name: Option<String>,
    pub tx_hash: String,
    pub epoch_no: Epoch,
    pub source: VoteSource,
    pub choice: usize,
    pub answer: String,
    pub delegators: u64,
    pub stake: Lovelace,
}

/// A candidate left out of the tally because its answer couldn't be decoded
#[derive(Debug, Clone, Serialize)]
pub struct SkippedVote {
    pub pool_id: PoolId,
    pub tx_hash: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollSummary {
    pub poll: PollDefinition,
    pub snapshot_epoch: Epoch,
    pub votes: Vec<AcceptedVote>,
    pub skipped: Vec<SkippedVote>,
    pub superseded: usize,
    pub tally: PollTally,
}

struct DecodedVote {
    candidate: PollVoteCandidate,
    choice: usize,
}

pub struct PollTallyEngine<S> {
    source: S,
    config: PollsConfig,
}

impl<S: PollSource> PollTallyEngine<S> {
    pub fn new(source: S, config: PollsConfig) -> Self {
        Self { source, config }
    }

    /// Last epoch (exclusive) in which direct votes are accepted
    pub fn end_epoch(&self, record: &PollRecord) -> Epoch {
        self.config
            .end_epochs
            .get(&record.hash)
            .copied()
            .unwrap_or(record.epoch_no + self.config.default_lifetime_epochs)
    }

    pub fn definition(&self, record: &PollRecord) -> Result<PollDefinition, PollError> {
        let decoded = decode_poll(&record.payload).map_err(|source| PollError::Malformed {
            hash: record.hash.clone(),
            source,
        })?;

        Ok(PollDefinition {
            hash: record.hash.clone(),
            tx_hash: record.tx_hash.clone(),
            epoch_no: record.epoch_no,
            end_epoch: self.end_epoch(record),
            question: decoded.question,
            choices: decoded.choices,
        })
    }

    /// Every poll on chain whose question decodes
    pub async fn list(&self) -> Result<Vec<PollDefinition>, PollError> {
        let records = self.source.list_polls().await?;

        let mut out = Vec::with_capacity(records.len());

        for record in records {
            match self.definition(&record) {
                Ok(x) => out.push(x),
                Err(err) => warn!(hash = record.hash, %err, "skipping malformed poll"),
            }
        }

        Ok(out)
    }

    /// Decode the answer of each accepted vote. A malformed vote is dropped
    /// and its pool ends up without a vote.
    fn decode_votes(
        candidates: Vec<PollVoteCandidate>,
        choices: usize,
    ) -> (Vec<DecodedVote>, Vec<SkippedVote>) {
        let mut decoded = Vec::with_capacity(candidates.len());
        let mut skipped = vec![];

        for candidate in candidates {
            match decode_vote_choice(&candidate.payload, choices) {
                Ok(choice) => decoded.push(DecodedVote { candidate, choice }),
                Err(err) => {
                    warn!(
                        pool = candidate.pool_id,
                        tx = candidate.tx_hash,
                        %err,
                        "skipping malformed vote"
                    );

                    skipped.push(SkippedVote {
                        pool_id: candidate.pool_id,
                        tx_hash: candidate.tx_hash,
                        reason: err.to_string(),
                    });
                }
            }
        }

        (decoded, skipped)
    }

    #[instrument(skip(self))]
    pub async fn tally(&self, hash: &str) -> Result<PollSummary, PollError> {
        let hash = normalize_hash(hash);

        let record = self
            .source
            .find_poll(&hash)
            .await?
            .ok_or_else(|| PollError::NotFound(hash.clone()))?;

        let poll = self.definition(&record)?;

        let mut candidates = self.source.direct_votes(&hash, poll.end_epoch).await?;
        let implicit = self.source.implicit_votes(&hash).await?;

        debug!(
            direct = candidates.len(),
            implicit = implicit.len(),
            "gathered vote candidates"
        );

        candidates.extend(implicit);

        let (accepted, superseded) = dedup_first_vote(candidates);
        let (accepted, skipped) = Self::decode_votes(accepted, poll.choices.len());

        let current = self.source.current_epoch().await?;
        let snapshot_epoch = poll.end_epoch.min(current);

        let pools: Vec<_> = accepted
            .iter()
            .map(|x| x.candidate.pool_id.clone())
            .collect();

        let mut snapshots: HashMap<_, _> = self
            .source
            .pool_snapshots(snapshot_epoch, &pools)
            .await?
            .into_iter()
            .map(|x| (x.pool_id.clone(), x))
            .collect();

        let votes: Vec<_> = accepted
            .into_iter()
            .map(|DecodedVote { candidate, choice }| {
                let snapshot = snapshots.remove(&candidate.pool_id);

                AcceptedVote {
                    ticker: snapshot.as_ref().and_then(|x| x.ticker.clone()),
                    name: snapshot.as_ref().and_then(|x| x.name.clone()),
                    delegators: snapshot.as_ref().map(|x| x.delegators).unwrap_or_default(),
                    stake: snapshot.as_ref().map(|x| x.stake).unwrap_or_default(),
                    answer: poll.choices[choice].clone(),
                    pool_id: candidate.pool_id,
                    tx_hash: candidate.tx_hash,
                    epoch_no: candidate.epoch_no,
                    source: candidate.source,
                    choice,
                }
            })
            .collect();

        let ballots: Vec<_> = votes
            .iter()
            .map(|x| Ballot {
                choice: x.choice,
                delegators: x.delegators,
                stake: x.stake,
            })
            .collect();

        let tally = PollTally::compute(poll.choices.len(), &ballots);

        info!(
            votes = tally.total_votes,
            skipped = skipped.len(),
            superseded = superseded.len(),
            snapshot_epoch,
            "poll tallied"
        );

        Ok(PollSummary {
            poll,
            snapshot_epoch,
            votes,
            skipped,
            superseded: superseded.len(),
            tally,
        })
    }
}
