use std::{collections::HashMap, fmt::Display, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    /// libpq style connection string for the db-sync database
    pub url: String,

    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    fn default_max_connections() -> u32 {
        4
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KnownNetwork {
    #[default]
    Mainnet,
    Preprod,
    Preview,
}

impl Display for KnownNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Mainnet => "mainnet",
                Self::Preprod => "preprod",
                Self::Preview => "preview",
            }
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub name: KnownNetwork,

    /// Unix timestamp of the first epoch, overrides the network preset
    pub genesis_start: Option<u64>,

    /// Epoch length in seconds, overrides the network preset
    pub epoch_length: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StorageConfig {
    /// Directory holding one lock marker per job
    pub lock_dir: PathBuf,

    /// Directory holding cursor files of bulk catch-up jobs
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from("./data/locks"),
            state_dir: PathBuf::from("./data/state"),
        }
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug)]
pub struct LoggingConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub max_level: tracing::Level,

    /// Optional file receiving a copy of every log line
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub include_postgres: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_level: tracing::Level::INFO,
            file: None,
            include_postgres: Default::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Pause after a wall-clock epoch change before polling the ledger
    pub settle_delay_secs: u64,

    pub poll_interval_secs: u64,

    /// Unchanged stake snapshot samples that end the growth wait
    pub growth_stable_polls: u32,

    /// Additional unchanged samples required before the pipeline runs
    pub stability_confirm_polls: u32,

    /// Wait time after which a waiting state raises a warning
    pub stuck_alarm_secs: u64,

    /// Treat the epoch current at startup as a fresh transition
    pub run_on_start: bool,

    pub asset_addresses_batch_size: Option<u64>,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: 60,
            poll_interval_secs: 600,
            growth_stable_polls: 2,
            stability_confirm_polls: 1,
            stuck_alarm_secs: 6 * 3600,
            run_on_start: false,
            asset_addresses_batch_size: None,
        }
    }
}

impl BoundaryConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stuck_alarm(&self) -> Duration {
        Duration::from_secs(self.stuck_alarm_secs)
    }
}

/// Ledger id space a delta target follows
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TipSource {
    #[default]
    Tx,
    Asset,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeltaTarget {
    /// Derived table whose watermark is tracked
    pub table: String,

    /// Procedure that advances the table over an id range
    pub procedure: String,

    #[serde(default)]
    pub source: TipSource,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DeltaConfig {
    pub interval_secs: u64,
    pub batch_size: u64,
    pub targets: Vec<DeltaTarget>,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        let target = |table: &str, source| DeltaTarget {
            table: table.to_string(),
            procedure: format!("{table}_update"),
            source,
        };

        Self {
            interval_secs: 300,
            batch_size: 50_000,
            targets: vec![
                target("_cbi_active_stake_cache_account", TipSource::Tx),
                target("_cbi_asset_cache", TipSource::Asset),
                target("_cbi_address_stats_cache", TipSource::Tx),
            ],
        }
    }
}

impl DeltaConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CatchUpConfig {
    /// Job name used for the lock marker
    pub job: String,
    pub procedure: String,
    pub first_id: u64,

    /// Last id to process, defaults to the ledger's max asset id
    pub last_id: Option<u64>,
    pub batch_size: u64,
    pub delay_secs: u64,

    /// Cursor file, relative paths resolve from `storage.state_dir`
    pub cursor_file: PathBuf,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            job: "asset-addresses-catchup".to_string(),
            procedure: "_cbi_asset_addresses_cache_window".to_string(),
            first_id: 0,
            last_id: None,
            batch_size: 1_000,
            delay_secs: 5,
            cursor_file: PathBuf::from("asset_addresses.cursor"),
        }
    }
}

impl CatchUpConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PollsConfig {
    /// Epochs a poll stays open after the epoch it was published in
    pub default_lifetime_epochs: u64,

    /// Explicit end epoch per poll hash
    pub end_epochs: HashMap<String, u64>,
}

impl Default for PollsConfig {
    fn default() -> Self {
        Self {
            default_lifetime_epochs: 2,
            end_epochs: HashMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct RootConfig {
    pub database: DatabaseConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub boundary: BoundaryConfig,

    #[serde(default)]
    pub delta: DeltaConfig,

    #[serde(default)]
    pub catchup: CatchUpConfig,

    #[serde(default)]
    pub polls: PollsConfig,
}
