use thiserror::Error;

pub mod catchup;
pub mod config;
pub mod delta;
pub mod executor;
pub mod lock;
pub mod timer;
pub mod watermark;

/// The number of an epoch as recorded by the ledger
pub type Epoch = u64;

/// The surrogate id of a transaction row
pub type TxId = u64;

/// The surrogate id of a multi-asset row
pub type AssetId = u64;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use catchup::*;
pub use delta::*;
pub use executor::*;
pub use lock::*;
pub use timer::*;
pub use watermark::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection error: {0}")]
    Connection(#[source] BoxError),

    #[error("query error: {0}")]
    Query(#[source] BoxError),

    #[error("value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("refusing to use {0:?} as a procedure name")]
    InvalidIdentifier(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn connection<T>(value: T) -> Self
    where
        T: Into<BoxError>,
    {
        StoreError::Connection(value.into())
    }

    pub fn query<T>(value: T) -> Self
    where
        T: Into<BoxError>,
    {
        StoreError::Query(value.into())
    }

    /// Connectivity problems are fatal to the running job, the next attempt is
    /// left to the external scheduler.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("step {step} failed")]
    Step {
        step: String,
        #[source]
        source: StoreError,
    },

    #[error("watermark of {table} would regress from {current} to {proposed}")]
    WatermarkRegression {
        table: String,
        current: u64,
        proposed: u64,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    pub fn step(step: impl Into<String>, source: StoreError) -> Self {
        JobError::Step {
            step: step.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    pub fn is_connection(&self) -> bool {
        match self {
            JobError::Store(x) => x.is_connection(),
            JobError::Step { source, .. } => source.is_connection(),
            _ => false,
        }
    }
}

/// Read-only view over the ledger tables maintained by the sync process
#[trait_variant::make(Send)]
pub trait LedgerReader: Sync {
    /// Highest epoch number with at least one row in the ledger
    async fn max_epoch_no(&self) -> Result<Epoch, StoreError>;

    /// Number of stake snapshot rows recorded for the given epoch
    async fn epoch_stake_row_count(&self, epoch: Epoch) -> Result<u64, StoreError>;

    async fn max_transaction_id(&self) -> Result<TxId, StoreError>;

    async fn max_asset_id(&self) -> Result<AssetId, StoreError>;
}

/// Idempotent procedures that move a derived table forward over an id range
#[trait_variant::make(Send)]
pub trait IncrementalProcedures: Sync {
    /// Fold every ledger row with `after < id <= up_to` into the table owned
    /// by `procedure`.
    async fn advance(&self, procedure: &str, after: u64, up_to: u64) -> Result<(), StoreError>;

    /// Process the half-open window `[start, end)` of a backfill.
    async fn process_window(&self, procedure: &str, start: u64, end: u64)
        -> Result<(), StoreError>;
}
