use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use cbi_cardano::{PollRecord, PollSource, PollVoteCandidate, PoolId, PoolSnapshot};
use cbi_core::{Epoch, StoreError};

#[derive(Debug, Default)]
struct State {
    polls: Vec<PollRecord>,
    direct: Vec<PollVoteCandidate>,
    implicit: Vec<PollVoteCandidate>,
    snapshots: HashMap<(Epoch, PoolId), PoolSnapshot>,
    current_epoch: Epoch,
    snapshot_requests: Vec<Epoch>,
}

/// Poll data held in memory, filtered the same way the database does
#[derive(Debug, Clone, Default)]
pub struct MemoryPollSource {
    state: Arc<Mutex<State>>,
}

impl MemoryPollSource {
    pub fn new(current_epoch: Epoch) -> Self {
        let out = Self::default();
        out.state.lock().unwrap().current_epoch = current_epoch;
        out
    }

    pub fn add_poll(&self, poll: PollRecord) {
        self.state.lock().unwrap().polls.push(poll);
    }

    pub fn add_direct_vote(&self, vote: PollVoteCandidate) {
        self.state.lock().unwrap().direct.push(vote);
    }

    pub fn add_implicit_vote(&self, vote: PollVoteCandidate) {
        self.state.lock().unwrap().implicit.push(vote);
    }

    pub fn add_snapshot(&self, epoch: Epoch, snapshot: PoolSnapshot) {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .insert((epoch, snapshot.pool_id.clone()), snapshot);
    }

    /// Epochs the pool snapshots were requested for
    pub fn snapshot_requests(&self) -> Vec<Epoch> {
        self.state.lock().unwrap().snapshot_requests.clone()
    }
}

impl PollSource for MemoryPollSource {
    async fn find_poll(&self, hash: &str) -> Result<Option<PollRecord>, StoreError> {
        let state = self.state.lock().unwrap();

        Ok(state.polls.iter().find(|x| x.hash == hash).cloned())
    }

    async fn list_polls(&self) -> Result<Vec<PollRecord>, StoreError> {
        Ok(self.state.lock().unwrap().polls.clone())
    }

    async fn direct_votes(
        &self,
        hash: &str,
        end_epoch: Epoch,
    ) -> Result<Vec<PollVoteCandidate>, StoreError> {
        let state = self.state.lock().unwrap();

        let votes = state
            .direct
            .iter()
            .filter(|x| x.poll_hash == hash && x.epoch_no < end_epoch)
            .cloned()
            .collect();

        Ok(votes)
    }

    async fn implicit_votes(&self, hash: &str) -> Result<Vec<PollVoteCandidate>, StoreError> {
        let state = self.state.lock().unwrap();

        let votes = state
            .implicit
            .iter()
            .filter(|x| x.poll_hash == hash)
            .cloned()
            .collect();

        Ok(votes)
    }

    async fn pool_snapshots(
        &self,
        epoch: Epoch,
        pools: &[PoolId],
    ) -> Result<Vec<PoolSnapshot>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.snapshot_requests.push(epoch);

        let found = pools
            .iter()
            .filter_map(|pool| state.snapshots.get(&(epoch, pool.clone())).cloned())
            .collect();

        Ok(found)
    }

    async fn current_epoch(&self) -> Result<Epoch, StoreError> {
        Ok(self.state.lock().unwrap().current_epoch)
    }
}
