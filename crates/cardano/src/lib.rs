use cbi_core::{Epoch, StoreError};

pub mod boundary;
pub mod polls;
pub mod timing;

pub use boundary::*;
pub use polls::*;
pub use timing::*;

/// Bech32 pool id (`pool1...`)
pub type PoolId = String;

/// Lovelace amount
pub type Lovelace = u64;

/// Rebuild procedures for the aggregate tables derived at epoch boundaries.
///
/// Each operation is expected to be atomic and idempotent on the database
/// side; running one twice for the same epoch must leave the same result.
#[trait_variant::make(Send)]
pub trait AggregateProcedures: Sync {
    async fn rebuild_active_stake_cache(&self) -> Result<(), StoreError>;

    async fn rebuild_stake_distribution_cache(&self) -> Result<(), StoreError>;

    async fn rebuild_pool_stats_cache(&self) -> Result<(), StoreError>;

    async fn rebuild_asset_cache(&self) -> Result<(), StoreError>;

    async fn rebuild_asset_addresses_cache(&self, batch_size: Option<u64>)
        -> Result<(), StoreError>;

    async fn upsert_missing_pool_params(&self) -> Result<(), StoreError>;

    async fn insert_pool_stats_for_epoch(&self, epoch: Epoch) -> Result<(), StoreError>;
}
