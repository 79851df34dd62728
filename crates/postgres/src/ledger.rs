use cbi_core::{AssetId, Epoch, LedgerReader, StoreError, TxId, WatermarkStore};

use crate::{from_row, to_i64, to_u64, DbSync};

const MAX_EPOCH: &str = include_str!("sql/max_epoch.sql");
const EPOCH_STAKE_COUNT: &str = include_str!("sql/epoch_stake_count.sql");
const MAX_TX: &str = include_str!("sql/max_tx.sql");
const MAX_ASSET: &str = include_str!("sql/max_asset.sql");
const WATERMARK_GET: &str = include_str!("sql/watermark_get.sql");
const WATERMARK_SET: &str = include_str!("sql/watermark_set.sql");

impl DbSync {
    async fn single_bigint(
        &self,
        sql: &str,
        field: &'static str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        let row = self.query_one(sql, params).await?;
        let value = from_row!(row, i64, 0);

        to_u64(field, value)
    }
}

impl LedgerReader for DbSync {
    async fn max_epoch_no(&self) -> Result<Epoch, StoreError> {
        self.single_bigint(MAX_EPOCH, "epoch_no", &[]).await
    }

    async fn epoch_stake_row_count(&self, epoch: Epoch) -> Result<u64, StoreError> {
        let epoch = to_i64("epoch_no", epoch)?;

        self.single_bigint(EPOCH_STAKE_COUNT, "row_count", &[&epoch])
            .await
    }

    async fn max_transaction_id(&self) -> Result<TxId, StoreError> {
        self.single_bigint(MAX_TX, "tx_id", &[]).await
    }

    async fn max_asset_id(&self) -> Result<AssetId, StoreError> {
        self.single_bigint(MAX_ASSET, "asset_id", &[]).await
    }
}

impl WatermarkStore for DbSync {
    async fn get_watermark(&self, table: &str) -> Result<u64, StoreError> {
        let row = self.query_opt(WATERMARK_GET, &[&table]).await?;

        match row {
            Some(row) => to_u64("last_processed_id", from_row!(row, i64, "last_processed_id")),
            None => Ok(0),
        }
    }

    async fn set_watermark(&self, table: &str, value: u64) -> Result<(), StoreError> {
        let value = to_i64("last_processed_id", value)?;

        self.execute(WATERMARK_SET, &[&table, &value]).await?;

        Ok(())
    }
}
