use std::time::Duration;

use cbi_core::{
    config::{KnownNetwork, NetworkConfig},
    Epoch, JobError, Timestamp,
};

/// Wall-clock epoch schedule of a network
///
/// Every era of the supported networks shares the same epoch duration in
/// seconds, so a single start time and length describe the whole schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochTiming {
    pub genesis_start: Timestamp,
    pub epoch_length: u64,
}

/// Where a point in time falls in the epoch schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochPosition {
    pub epoch: Epoch,
    pub next_epoch_start: Timestamp,
}

impl EpochPosition {
    /// Time left until the next epoch starts
    pub fn remaining(&self, now: Timestamp) -> Duration {
        Duration::from_secs(self.next_epoch_start.saturating_sub(now))
    }
}

impl EpochTiming {
    pub const MAINNET: Self = Self {
        genesis_start: 1_506_203_091,
        epoch_length: 432_000,
    };

    pub const PREPROD: Self = Self {
        genesis_start: 1_654_041_600,
        epoch_length: 432_000,
    };

    pub const PREVIEW: Self = Self {
        genesis_start: 1_666_656_000,
        epoch_length: 86_400,
    };

    pub fn known(network: KnownNetwork) -> Self {
        match network {
            KnownNetwork::Mainnet => Self::MAINNET,
            KnownNetwork::Preprod => Self::PREPROD,
            KnownNetwork::Preview => Self::PREVIEW,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self, JobError> {
        let preset = Self::known(config.name);

        let timing = Self {
            genesis_start: config.genesis_start.unwrap_or(preset.genesis_start),
            epoch_length: config.epoch_length.unwrap_or(preset.epoch_length),
        };

        if timing.epoch_length == 0 {
            return Err(JobError::Config("epoch length must be positive".into()));
        }

        Ok(timing)
    }

    /// Resolve the epoch containing `now` and the start of the one after it.
    ///
    /// Before genesis the position is epoch zero, starting at genesis.
    pub fn position(&self, now: Timestamp) -> EpochPosition {
        if now < self.genesis_start {
            return EpochPosition {
                epoch: 0,
                next_epoch_start: self.genesis_start,
            };
        }

        let epoch = (now - self.genesis_start) / self.epoch_length;

        EpochPosition {
            epoch,
            next_epoch_start: self.epoch_start(epoch + 1),
        }
    }

    pub fn epoch_start(&self, epoch: Epoch) -> Timestamp {
        self.genesis_start + epoch * self.epoch_length
    }
}
