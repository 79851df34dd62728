//! Builders for poll records and votes shaped like on-chain metadata.

use serde_json::{json, Value};

use cbi_cardano::{PollRecord, PollVoteCandidate, PoolSnapshot, VoteSource};
use cbi_core::{Epoch, TxId};

pub fn question_payload(question: &str, choices: &[&str]) -> Value {
    let choices: Vec<_> = choices.iter().map(|x| json!([x])).collect();

    json!({ "0": [question], "1": choices })
}

pub fn vote_payload(poll_hash: &str, choice: u64) -> Value {
    json!({ "2": format!("0x{poll_hash}"), "3": choice })
}

pub fn poll(hash: &str, epoch_no: Epoch, question: &str, choices: &[&str]) -> PollRecord {
    PollRecord {
        hash: hash.to_string(),
        tx_id: 1,
        tx_hash: format!("{hash}-question"),
        epoch_no,
        payload: question_payload(question, choices),
    }
}

pub fn vote_with_payload(
    poll_hash: &str,
    pool: &str,
    tx_id: TxId,
    epoch_no: Epoch,
    payload: Value,
    source: VoteSource,
) -> PollVoteCandidate {
    PollVoteCandidate {
        poll_hash: poll_hash.to_string(),
        pool_id: pool.to_string(),
        tx_id,
        tx_hash: format!("tx{tx_id}"),
        epoch_no,
        payload,
        extra_signature_hash: match source {
            VoteSource::Direct => Some(format!("{pool}-cold")),
            VoteSource::PoolUpdate => None,
        },
        source,
    }
}

pub fn direct_vote(
    poll_hash: &str,
    pool: &str,
    tx_id: TxId,
    epoch_no: Epoch,
    choice: u64,
) -> PollVoteCandidate {
    vote_with_payload(
        poll_hash,
        pool,
        tx_id,
        epoch_no,
        vote_payload(poll_hash, choice),
        VoteSource::Direct,
    )
}

pub fn implicit_vote(
    poll_hash: &str,
    pool: &str,
    tx_id: TxId,
    epoch_no: Epoch,
    choice: u64,
) -> PollVoteCandidate {
    vote_with_payload(
        poll_hash,
        pool,
        tx_id,
        epoch_no,
        vote_payload(poll_hash, choice),
        VoteSource::PoolUpdate,
    )
}

pub fn snapshot(pool: &str, ticker: &str, delegators: u64, stake: u64) -> PoolSnapshot {
    PoolSnapshot {
        pool_id: pool.to_string(),
        ticker: Some(ticker.to_string()),
        name: None,
        delegators,
        stake,
    }
}
