//! db-sync backed implementation of the ledger, watermark, procedure and poll
//! interfaces.
//!
//! Ledger tables are only ever read. The only writes issued from here are the
//! watermark upserts and the `CALL`s into the cache procedures, which own the
//! `_cbi_*` tables.

use std::str::FromStr;

use bb8::{Pool, PooledConnection, RunError};
use bb8_postgres::PostgresConnectionManager;
use tokio_postgres::{error::SqlState, types::ToSql, NoTls, Row};
use tracing::debug;

use cbi_core::{config::DatabaseConfig, StoreError};

mod ledger;
mod polls;
mod procedures;

pub use procedures::*;

type Manager = PostgresConnectionManager<NoTls>;

macro_rules! from_row {
    ($row:ident, $type:ty, $name:literal) => {
        $row.try_get::<_, $type>($name)
            .map_err(cbi_core::StoreError::query)?
    };
}

pub(crate) use from_row;

/// Split driver errors into the ones that mean the database went away and
/// the ones caused by a single statement.
pub(crate) fn classify(err: tokio_postgres::Error) -> StoreError {
    if err.is_closed() {
        return StoreError::connection(err);
    }

    match err.code() {
        Some(code) if code.code().starts_with("08") || *code == SqlState::ADMIN_SHUTDOWN => {
            StoreError::connection(err)
        }
        _ => StoreError::query(err),
    }
}

pub(crate) fn to_i64(field: &'static str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange {
        field,
        value: value.to_string(),
    })
}

pub(crate) fn to_u64(field: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::OutOfRange {
        field,
        value: value.to_string(),
    })
}

/// Parse a `numeric` column selected as text, db-sync stores lovelace amounts
/// as `numeric(20,0)`.
pub(crate) fn parse_numeric(field: &'static str, value: Option<String>) -> Result<u64, StoreError> {
    match value {
        Some(x) => x
            .parse()
            .map_err(|_| StoreError::OutOfRange { field, value: x }),
        None => Ok(0),
    }
}

/// Connection pool over a db-sync database
#[derive(Clone)]
pub struct DbSync {
    pool: Pool<Manager>,
}

impl DbSync {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pg_config =
            tokio_postgres::Config::from_str(&config.url).map_err(StoreError::connection)?;

        let manager = PostgresConnectionManager::new(pg_config, NoTls);

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .build(manager)
            .await
            .map_err(StoreError::connection)?;

        debug!(max_connections = config.max_connections, "database pool ready");

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<PooledConnection<'_, Manager>, StoreError> {
        self.pool.get().await.map_err(|err| match err {
            RunError::User(x) => StoreError::connection(x),
            RunError::TimedOut => StoreError::connection("timed out waiting for a connection"),
        })
    }

    pub(crate) async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn().await?;
        conn.query(sql, params).await.map_err(classify)
    }

    pub(crate) async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, StoreError> {
        let conn = self.conn().await?;
        conn.query_opt(sql, params).await.map_err(classify)
    }

    pub(crate) async fn query_one(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, StoreError> {
        let conn = self.conn().await?;
        conn.query_one(sql, params).await.map_err(classify)
    }

    pub(crate) async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        let conn = self.conn().await?;
        conn.execute(sql, params).await.map_err(classify)
    }
}
