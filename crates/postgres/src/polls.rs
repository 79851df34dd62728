use serde_json::Value;
use tokio_postgres::Row;

use cbi_cardano::{
    normalize_hash, poll_hash, PollRecord, PollSource, PollVoteCandidate, PoolId, PoolSnapshot,
    VoteSource,
};
use cbi_core::{Epoch, LedgerReader, StoreError};

use crate::{from_row, parse_numeric, to_i64, to_u64, DbSync};

const POLLS: &str = include_str!("sql/polls.sql");
const DIRECT_VOTES: &str = include_str!("sql/direct_votes.sql");
const IMPLICIT_VOTES: &str = include_str!("sql/implicit_votes.sql");
const POOL_SNAPSHOTS: &str = include_str!("sql/pool_snapshots.sql");

fn poll_record(row: &Row) -> Result<PollRecord, StoreError> {
    let bytes = from_row!(row, Vec<u8>, "payload_cbor");

    Ok(PollRecord {
        hash: poll_hash(&bytes),
        tx_id: to_u64("tx_id", from_row!(row, i64, "tx_id"))?,
        tx_hash: from_row!(row, String, "tx_hash"),
        epoch_no: to_u64("epoch_no", from_row!(row, i64, "epoch_no"))?,
        payload: from_row!(row, Value, "payload"),
    })
}

fn vote_candidate(
    row: &Row,
    poll_hash: &str,
    source: VoteSource,
) -> Result<PollVoteCandidate, StoreError> {
    let extra_signature_hash = match source {
        VoteSource::Direct => from_row!(row, Option<String>, "extra_signature_hash"),
        VoteSource::PoolUpdate => None,
    };

    Ok(PollVoteCandidate {
        poll_hash: poll_hash.to_string(),
        pool_id: from_row!(row, String, "pool_id"),
        tx_id: to_u64("tx_id", from_row!(row, i64, "tx_id"))?,
        tx_hash: from_row!(row, String, "tx_hash"),
        epoch_no: to_u64("epoch_no", from_row!(row, i64, "epoch_no"))?,
        payload: from_row!(row, Value, "payload"),
        extra_signature_hash,
        source,
    })
}

impl PollSource for DbSync {
    async fn find_poll(&self, hash: &str) -> Result<Option<PollRecord>, StoreError> {
        let hash = normalize_hash(hash);

        // the poll hash isn't stored, it's derived from the metadata bytes
        let found = self
            .list_polls()
            .await?
            .into_iter()
            .find(|x| x.hash == hash);

        Ok(found)
    }

    async fn list_polls(&self) -> Result<Vec<PollRecord>, StoreError> {
        let rows = self.query(POLLS, &[]).await?;

        rows.iter().map(poll_record).collect()
    }

    async fn direct_votes(
        &self,
        hash: &str,
        end_epoch: Epoch,
    ) -> Result<Vec<PollVoteCandidate>, StoreError> {
        let end_epoch = to_i64("end_epoch", end_epoch)?;

        let rows = self.query(DIRECT_VOTES, &[&hash, &end_epoch]).await?;

        rows.iter()
            .map(|row| vote_candidate(row, hash, VoteSource::Direct))
            .collect()
    }

    async fn implicit_votes(&self, hash: &str) -> Result<Vec<PollVoteCandidate>, StoreError> {
        let rows = self.query(IMPLICIT_VOTES, &[&hash]).await?;

        rows.iter()
            .map(|row| vote_candidate(row, hash, VoteSource::PoolUpdate))
            .collect()
    }

    async fn pool_snapshots(
        &self,
        epoch: Epoch,
        pools: &[PoolId],
    ) -> Result<Vec<PoolSnapshot>, StoreError> {
        if pools.is_empty() {
            return Ok(vec![]);
        }

        let epoch = to_i64("epoch_no", epoch)?;

        let rows = self.query(POOL_SNAPSHOTS, &[&epoch, &pools]).await?;

        rows.iter()
            .map(|row| {
                Ok(PoolSnapshot {
                    pool_id: from_row!(row, String, "pool_id"),
                    ticker: from_row!(row, Option<String>, "ticker"),
                    name: from_row!(row, Option<String>, "name"),
                    delegators: to_u64("delegators", from_row!(row, i64, "delegators"))?,
                    stake: parse_numeric("stake", from_row!(row, Option<String>, "stake"))?,
                })
            })
            .collect()
    }

    async fn current_epoch(&self) -> Result<Epoch, StoreError> {
        self.max_epoch_no().await
    }
}
