use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use cbi_core::{AssetId, Epoch, LedgerReader, StoreError, TxId};

use crate::{Script, TestFault};

#[derive(Debug, Default)]
struct State {
    max_epoch: Script<Epoch>,
    stake_rows: HashMap<Epoch, Script<u64>>,
    stake_row_calls: HashMap<Epoch, usize>,
    tx_tip: TxId,
    asset_tip: AssetId,
    fault: TestFault,
}

/// Ledger whose answers are scripted per call
#[derive(Debug, Clone, Default)]
pub struct ScriptedLedger {
    state: Arc<Mutex<State>>,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_epochs(self, values: impl IntoIterator<Item = Epoch>) -> Self {
        self.state.lock().unwrap().max_epoch = Script::new(values);
        self
    }

    /// Row counts of the stake snapshot of `epoch`, one per poll
    pub fn with_stake_rows(self, epoch: Epoch, values: impl IntoIterator<Item = u64>) -> Self {
        self.state
            .lock()
            .unwrap()
            .stake_rows
            .insert(epoch, Script::new(values));

        self
    }

    pub fn with_tips(self, tx: TxId, asset: AssetId) -> Self {
        self.set_tips(tx, asset);
        self
    }

    pub fn set_tips(&self, tx: TxId, asset: AssetId) {
        let mut state = self.state.lock().unwrap();
        state.tx_tip = tx;
        state.asset_tip = asset;
    }

    pub fn set_fault(&self, fault: TestFault) {
        self.state.lock().unwrap().fault = fault;
    }

    pub fn stake_row_calls(&self, epoch: Epoch) -> usize {
        let state = self.state.lock().unwrap();
        state.stake_row_calls.get(&epoch).copied().unwrap_or_default()
    }
}

impl LedgerReader for ScriptedLedger {
    async fn max_epoch_no(&self) -> Result<Epoch, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.fault.check("max_epoch_no")?;

        Ok(state.max_epoch.next().unwrap_or_default())
    }

    async fn epoch_stake_row_count(&self, epoch: Epoch) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.fault.check("epoch_stake_row_count")?;

        *state.stake_row_calls.entry(epoch).or_default() += 1;

        let rows = state
            .stake_rows
            .get_mut(&epoch)
            .and_then(|x| x.next())
            .unwrap_or_default();

        Ok(rows)
    }

    async fn max_transaction_id(&self) -> Result<TxId, StoreError> {
        let state = self.state.lock().unwrap();
        state.fault.check("max_transaction_id")?;

        Ok(state.tx_tip)
    }

    async fn max_asset_id(&self) -> Result<AssetId, StoreError> {
        let state = self.state.lock().unwrap();
        state.fault.check("max_asset_id")?;

        Ok(state.asset_tip)
    }
}
