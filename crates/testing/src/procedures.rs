use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use cbi_cardano::AggregateProcedures;
use cbi_core::{Epoch, IncrementalProcedures, StoreError};

use crate::TestFault;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureCall {
    pub name: String,
    pub args: Vec<Option<u64>>,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    fault: TestFault,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<ProcedureCall>,
    failures: HashMap<String, Failure>,
}

/// Records every procedure call and fails the ones it is told to.
///
/// Failed calls are recorded too.
#[derive(Debug, Clone, Default)]
pub struct RecordingProcedures {
    state: Arc<Mutex<State>>,
}

impl RecordingProcedures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `name` fail
    pub fn fail_on(&self, name: &str, fault: TestFault) {
        let failure = Failure {
            fault,
            remaining: None,
        };

        self.state
            .lock()
            .unwrap()
            .failures
            .insert(name.to_string(), failure);
    }

    /// Make the next `times` calls to `name` fail
    pub fn fail_times(&self, name: &str, fault: TestFault, times: usize) {
        let failure = Failure {
            fault,
            remaining: Some(times),
        };

        self.state
            .lock()
            .unwrap()
            .failures
            .insert(name.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn calls(&self) -> Vec<ProcedureCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.calls().into_iter().map(|x| x.name).collect()
    }

    pub fn calls_to(&self, name: &str) -> Vec<ProcedureCall> {
        self.calls().into_iter().filter(|x| x.name == name).collect()
    }

    fn record(&self, name: &str, args: Vec<Option<u64>>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();

        state.calls.push(ProcedureCall {
            name: name.to_string(),
            args,
        });

        let Some(failure) = state.failures.get_mut(name) else {
            return Ok(());
        };

        match failure.remaining {
            Some(0) => Ok(()),
            Some(ref mut x) => {
                *x -= 1;
                failure.fault.check(name)
            }
            None => failure.fault.check(name),
        }
    }
}

impl IncrementalProcedures for RecordingProcedures {
    async fn advance(&self, procedure: &str, after: u64, up_to: u64) -> Result<(), StoreError> {
        self.record(procedure, vec![Some(after), Some(up_to)])
    }

    async fn process_window(
        &self,
        procedure: &str,
        start: u64,
        end: u64,
    ) -> Result<(), StoreError> {
        self.record(procedure, vec![Some(start), Some(end)])
    }
}

impl AggregateProcedures for RecordingProcedures {
    async fn rebuild_active_stake_cache(&self) -> Result<(), StoreError> {
        self.record("rebuild_active_stake_cache", vec![])
    }

    async fn rebuild_stake_distribution_cache(&self) -> Result<(), StoreError> {
        self.record("rebuild_stake_distribution_cache", vec![])
    }

    async fn rebuild_pool_stats_cache(&self) -> Result<(), StoreError> {
        self.record("rebuild_pool_stats_cache", vec![])
    }

    async fn rebuild_asset_cache(&self) -> Result<(), StoreError> {
        self.record("rebuild_asset_cache", vec![])
    }

    async fn rebuild_asset_addresses_cache(
        &self,
        batch_size: Option<u64>,
    ) -> Result<(), StoreError> {
        self.record("rebuild_asset_addresses_cache", vec![batch_size])
    }

    async fn upsert_missing_pool_params(&self) -> Result<(), StoreError> {
        self.record("upsert_missing_pool_params", vec![])
    }

    async fn insert_pool_stats_for_epoch(&self, epoch: Epoch) -> Result<(), StoreError> {
        self.record("insert_pool_stats_for_epoch", vec![Some(epoch)])
    }
}
