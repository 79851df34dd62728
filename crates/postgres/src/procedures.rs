use tracing::debug;

use cbi_cardano::AggregateProcedures;
use cbi_core::{Epoch, IncrementalProcedures, StoreError};

use crate::{to_i64, DbSync};

pub const ACTIVE_STAKE_CACHE: &str = "_cbi_active_stake_cache_rebuild";
pub const STAKE_DISTRIBUTION_CACHE: &str = "_cbi_stake_distribution_cache_rebuild";
pub const POOL_STATS_CACHE: &str = "_cbi_pool_stats_cache_rebuild";
pub const ASSET_CACHE: &str = "_cbi_asset_cache_rebuild";
pub const ASSET_ADDRESSES_CACHE: &str = "_cbi_asset_addresses_cache_rebuild";
pub const POOL_PARAMS: &str = "_cbi_pool_params_upsert_missing";
pub const POOL_STATS_PER_EPOCH: &str = "_cbi_pool_stats_insert_epoch";

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => chars
            .all(|x| x.is_ascii_lowercase() || x.is_ascii_digit() || x == '_'),
        _ => false,
    }
}

/// Build a `CALL` statement for a procedure name taken from configuration.
///
/// Names can't be bound as parameters, so they are restricted to plain
/// lowercase identifiers with an optional schema.
pub fn call_statement(procedure: &str, arity: usize) -> Result<String, StoreError> {
    let parts: Vec<_> = procedure.split('.').collect();

    if parts.len() > 2 || !parts.iter().all(|x| is_identifier(x)) {
        return Err(StoreError::InvalidIdentifier(procedure.to_string()));
    }

    let args: Vec<_> = (1..=arity).map(|i| format!("${i}::bigint")).collect();

    Ok(format!("CALL {procedure}({})", args.join(", ")))
}

impl DbSync {
    async fn call(&self, procedure: &str, args: &[Option<i64>]) -> Result<(), StoreError> {
        let statement = call_statement(procedure, args.len())?;

        let params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = args
            .iter()
            .map(|x| x as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();

        debug!(procedure, ?args, "calling procedure");

        self.execute(&statement, &params).await?;

        Ok(())
    }
}

impl IncrementalProcedures for DbSync {
    async fn advance(&self, procedure: &str, after: u64, up_to: u64) -> Result<(), StoreError> {
        let after = to_i64("after", after)?;
        let up_to = to_i64("up_to", up_to)?;

        self.call(procedure, &[Some(after), Some(up_to)]).await
    }

    async fn process_window(
        &self,
        procedure: &str,
        start: u64,
        end: u64,
    ) -> Result<(), StoreError> {
        let start = to_i64("start", start)?;
        let end = to_i64("end", end)?;

        self.call(procedure, &[Some(start), Some(end)]).await
    }
}

impl AggregateProcedures for DbSync {
    async fn rebuild_active_stake_cache(&self) -> Result<(), StoreError> {
        self.call(ACTIVE_STAKE_CACHE, &[]).await
    }

    async fn rebuild_stake_distribution_cache(&self) -> Result<(), StoreError> {
        self.call(STAKE_DISTRIBUTION_CACHE, &[]).await
    }

    async fn rebuild_pool_stats_cache(&self) -> Result<(), StoreError> {
        self.call(POOL_STATS_CACHE, &[]).await
    }

    async fn rebuild_asset_cache(&self) -> Result<(), StoreError> {
        self.call(ASSET_CACHE, &[]).await
    }

    async fn rebuild_asset_addresses_cache(
        &self,
        batch_size: Option<u64>,
    ) -> Result<(), StoreError> {
        let batch_size = batch_size
            .map(|x| to_i64("batch_size", x))
            .transpose()?;

        self.call(ASSET_ADDRESSES_CACHE, &[batch_size]).await
    }

    async fn upsert_missing_pool_params(&self) -> Result<(), StoreError> {
        self.call(POOL_PARAMS, &[]).await
    }

    async fn insert_pool_stats_for_epoch(&self, epoch: Epoch) -> Result<(), StoreError> {
        let epoch = to_i64("epoch_no", epoch)?;

        self.call(POOL_STATS_PER_EPOCH, &[Some(epoch)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_call_with_typed_params() {
        assert_eq!(
            call_statement("_cbi_asset_cache_update", 2).unwrap(),
            "CALL _cbi_asset_cache_update($1::bigint, $2::bigint)"
        );

        assert_eq!(
            call_statement("public._cbi_pool_params_upsert_missing", 0).unwrap(),
            "CALL public._cbi_pool_params_upsert_missing()"
        );
    }

    #[test]
    fn rejects_unsafe_names() {
        for name in [
            "",
            "drop table tx; --",
            "a.b.c",
            "Upper",
            "1abc",
            "x()",
            "schema.",
        ] {
            assert!(
                matches!(call_statement(name, 1), Err(StoreError::InvalidIdentifier(_))),
                "{name} was accepted"
            );
        }
    }
}
