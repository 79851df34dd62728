use serde_json::json;

use cbi_cardano::{PollError, PollTallyEngine, VoteSource};
use cbi_core::config::PollsConfig;
use cbi_testing::{fixtures, MemoryPollSource};

mod common;

const HASH: &str = "29093fd43fc30ba31e306af06ce8537390e1668ae7496fe53d53684683c3762c";

fn source() -> MemoryPollSource {
    let source = MemoryPollSource::new(420);

    source.add_poll(fixtures::poll(
        HASH,
        400,
        "Should the minimum pool margin be lowered?",
        &["Yes", "No", "Abstain"],
    ));

    source
}

fn engine(source: &MemoryPollSource) -> PollTallyEngine<MemoryPollSource> {
    PollTallyEngine::new(source.clone(), PollsConfig::default())
}

#[tokio::test]
async fn tallies_votes_from_both_sources() {
    common::init_tracing();

    let source = source();

    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1a", 10, 400, 0));
    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1b", 11, 401, 0));
    source.add_implicit_vote(fixtures::implicit_vote(HASH, "pool1c", 12, 401, 1));

    source.add_snapshot(402, fixtures::snapshot("pool1a", "AAA", 10, 1_000));
    source.add_snapshot(402, fixtures::snapshot("pool1b", "BBB", 20, 2_000));
    source.add_snapshot(402, fixtures::snapshot("pool1c", "CCC", 5, 500));

    let summary = engine(&source).tally(HASH).await.unwrap();

    assert_eq!(summary.poll.end_epoch, 402);
    assert_eq!(summary.snapshot_epoch, 402);
    assert_eq!(source.snapshot_requests(), vec![402]);

    let tally = &summary.tally;

    assert_eq!(tally.total_votes, 3);
    assert_eq!(tally.votes, vec![2, 1, 0]);
    assert_eq!(tally.total_delegators, 35);
    assert_eq!(tally.delegators, vec![30, 5, 0]);
    assert_eq!(tally.total_stake, 3_500);
    assert_eq!(tally.stake, vec![3_000, 500, 0]);

    assert!((tally.vote_pct[0] - 0.667).abs() < 1e-3);
    assert!((tally.vote_pct[1] - 0.333).abs() < 1e-3);
    assert_eq!(tally.vote_pct[2], 0.0);

    let implicit = summary
        .votes
        .iter()
        .find(|x| x.pool_id == "pool1c")
        .unwrap();

    assert_eq!(implicit.source, VoteSource::PoolUpdate);
    assert_eq!(implicit.answer, "No");
    assert_eq!(implicit.ticker.as_deref(), Some("CCC"));
}

#[tokio::test]
async fn first_vote_of_a_pool_wins_across_sources() {
    let source = source();

    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1a", 30, 401, 2));
    source.add_implicit_vote(fixtures::implicit_vote(HASH, "pool1a", 20, 400, 1));
    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1b", 25, 400, 0));

    let summary = engine(&source).tally(HASH).await.unwrap();

    let votes: Vec<_> = summary
        .votes
        .iter()
        .map(|x| (x.pool_id.as_str(), x.tx_hash.as_str(), x.choice))
        .collect();

    assert_eq!(votes, vec![("pool1a", "tx20", 1), ("pool1b", "tx25", 0)]);
    assert_eq!(summary.superseded, 1);
}

#[tokio::test]
async fn direct_votes_after_the_end_epoch_are_ignored() {
    let source = source();

    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1a", 10, 401, 0));
    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1b", 11, 402, 0));

    let summary = engine(&source).tally(HASH).await.unwrap();

    assert_eq!(summary.tally.total_votes, 1);
    assert_eq!(summary.votes[0].pool_id, "pool1a");
}

#[tokio::test]
async fn configured_end_epoch_overrides_the_default() {
    let source = source();

    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1a", 10, 405, 0));

    let mut config = PollsConfig::default();
    config.end_epochs.insert(HASH.to_string(), 410);

    let summary = PollTallyEngine::new(source.clone(), config)
        .tally(HASH)
        .await
        .unwrap();

    assert_eq!(summary.poll.end_epoch, 410);
    assert_eq!(summary.tally.total_votes, 1);

    // current epoch is 420, the snapshot is taken when the poll closed
    assert_eq!(summary.snapshot_epoch, 410);
}

#[tokio::test]
async fn open_poll_uses_current_snapshot() {
    let source = MemoryPollSource::new(401);
    source.add_poll(fixtures::poll(HASH, 400, "q", &["a", "b"]));

    let summary = engine(&source).tally(HASH).await.unwrap();

    assert_eq!(summary.snapshot_epoch, 401);
    assert_eq!(summary.tally.total_votes, 0);
    assert_eq!(summary.tally.vote_pct, vec![0.0, 0.0]);
}

#[tokio::test]
async fn malformed_first_vote_still_claims_the_pool() {
    let source = source();

    source.add_direct_vote(fixtures::vote_with_payload(
        HASH,
        "pool1a",
        10,
        400,
        json!({ "2": HASH, "3": "garbage" }),
        VoteSource::Direct,
    ));
    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1a", 11, 400, 1));
    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1b", 12, 400, 7));
    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1c", 13, 400, 1));

    let summary = engine(&source).tally(HASH).await.unwrap();

    assert_eq!(summary.tally.total_votes, 1);
    assert_eq!(summary.tally.votes, vec![0, 1, 0]);
    assert_eq!(summary.votes.len(), 1);
    assert_eq!(summary.votes[0].pool_id, "pool1c");

    // the later vote of pool1a never amends its malformed first one
    assert_eq!(summary.superseded, 1);

    let skipped: Vec<_> = summary.skipped.iter().map(|x| x.tx_hash.as_str()).collect();
    assert_eq!(skipped, vec!["tx10", "tx12"]);
}

#[tokio::test]
async fn pool_with_only_a_malformed_vote_gets_no_vote() {
    let source = source();

    source.add_direct_vote(fixtures::vote_with_payload(
        HASH,
        "pool1a",
        10,
        400,
        json!({ "3": "garbage" }),
        VoteSource::Direct,
    ));
    source.add_implicit_vote(fixtures::implicit_vote(HASH, "pool1a", 11, 400, 1));

    let summary = engine(&source).tally(HASH).await.unwrap();

    assert_eq!(summary.tally.total_votes, 0);
    assert!(summary.votes.is_empty());
    assert_eq!(summary.superseded, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].pool_id, "pool1a");
}

#[tokio::test]
async fn pool_without_snapshot_counts_without_weight() {
    let source = source();

    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1a", 10, 400, 0));
    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1z", 11, 400, 1));
    source.add_snapshot(402, fixtures::snapshot("pool1a", "AAA", 10, 1_000));

    let summary = engine(&source).tally(HASH).await.unwrap();

    assert_eq!(summary.tally.votes, vec![1, 1, 0]);
    assert_eq!(summary.tally.stake, vec![1_000, 0, 0]);
    assert_eq!(summary.tally.stake_pct, vec![1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn hash_lookup_accepts_prefixed_input() {
    let source = source();

    let summary = engine(&source)
        .tally(&format!("0x{}", HASH.to_uppercase()))
        .await
        .unwrap();

    assert_eq!(summary.poll.hash, HASH);
}

#[tokio::test]
async fn unknown_poll_is_not_found() {
    let source = source();

    let err = engine(&source).tally("deadbeef").await.unwrap_err();

    assert!(matches!(err, PollError::NotFound(hash) if hash == "deadbeef"));
}

#[tokio::test]
async fn listing_skips_malformed_polls() {
    let source = source();

    source.add_poll(cbi_cardano::PollRecord {
        hash: "ff".into(),
        tx_id: 2,
        tx_hash: "broken".into(),
        epoch_no: 410,
        payload: json!({ "0": "missing choices" }),
    });

    let polls = engine(&source).list().await.unwrap();

    assert_eq!(polls.len(), 1);
    assert_eq!(polls[0].choices, vec!["Yes", "No", "Abstain"]);

    let err = engine(&source).tally("ff").await.unwrap_err();
    assert!(matches!(err, PollError::Malformed { .. }));
}

#[tokio::test]
async fn summary_serializes_for_json_output() {
    let source = source();
    source.add_direct_vote(fixtures::direct_vote(HASH, "pool1a", 10, 400, 2));

    let summary = engine(&source).tally(HASH).await.unwrap();
    let json = serde_json::to_value(&summary).unwrap();

    assert_eq!(json["tally"]["votes"], json!([0, 0, 1]));
    assert_eq!(json["votes"][0]["source"], json!("direct"));
    assert_eq!(json["votes"][0]["answer"], json!("Abstain"));
}
