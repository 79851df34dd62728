use std::fmt::Display;

use cbi_core::{Epoch, JobStep, StoreError};

use crate::AggregateProcedures;

/// One rebuild step of the epoch boundary pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    ActiveStakeCache,
    StakeDistributionCache,
    PoolStatsCache,
    AssetCache,
    AssetAddressesCache,
    PoolParams,
    PoolStatsPerEpoch,
}

/// Steps in dependency order; pool stats need the active stake cache and the
/// per-epoch insert reads the refreshed pool stats.
pub const REFERENCE_PIPELINE: [PipelineStep; 7] = [
    PipelineStep::ActiveStakeCache,
    PipelineStep::StakeDistributionCache,
    PipelineStep::PoolStatsCache,
    PipelineStep::AssetCache,
    PipelineStep::AssetAddressesCache,
    PipelineStep::PoolParams,
    PipelineStep::PoolStatsPerEpoch,
];

impl PipelineStep {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ActiveStakeCache => "active-stake-cache",
            Self::StakeDistributionCache => "stake-distribution-cache",
            Self::PoolStatsCache => "pool-stats-cache",
            Self::AssetCache => "asset-cache",
            Self::AssetAddressesCache => "asset-addresses-cache",
            Self::PoolParams => "pool-params",
            Self::PoolStatsPerEpoch => "pool-stats-per-epoch",
        }
    }
}

impl Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// What a pipeline step needs to run
pub struct PipelineContext<'a, P> {
    pub procs: &'a P,
    pub epoch: Epoch,
    pub asset_addresses_batch_size: Option<u64>,
}

impl<'a, P: AggregateProcedures> JobStep<PipelineContext<'a, P>> for PipelineStep {
    fn name(&self) -> String {
        self.label().to_string()
    }

    async fn execute(&self, ctx: &PipelineContext<'a, P>) -> Result<(), StoreError> {
        let procs = ctx.procs;

        match self {
            Self::ActiveStakeCache => procs.rebuild_active_stake_cache().await,
            Self::StakeDistributionCache => procs.rebuild_stake_distribution_cache().await,
            Self::PoolStatsCache => procs.rebuild_pool_stats_cache().await,
            Self::AssetCache => procs.rebuild_asset_cache().await,
            Self::AssetAddressesCache => {
                procs
                    .rebuild_asset_addresses_cache(ctx.asset_addresses_batch_size)
                    .await
            }
            Self::PoolParams => procs.upsert_missing_pool_params().await,
            Self::PoolStatsPerEpoch => procs.insert_pool_stats_for_epoch(ctx.epoch).await,
        }
    }
}
