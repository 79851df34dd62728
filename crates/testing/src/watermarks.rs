use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use cbi_core::{CursorStore, StoreError, WatermarkStore};

use crate::TestFault;

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, u64>,
    writes: Vec<(String, u64)>,
    write_fault: TestFault,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWatermarks {
    state: Arc<Mutex<State>>,
}

impl MemoryWatermarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, table: &str, value: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .values
            .insert(table.to_string(), value);

        self
    }

    pub fn value(&self, table: &str) -> u64 {
        let state = self.state.lock().unwrap();
        state.values.get(table).copied().unwrap_or_default()
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn fail_writes(&self, fault: TestFault) {
        self.state.lock().unwrap().write_fault = fault;
    }
}

impl WatermarkStore for MemoryWatermarks {
    async fn get_watermark(&self, table: &str) -> Result<u64, StoreError> {
        Ok(self.value(table))
    }

    async fn set_watermark(&self, table: &str, value: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.write_fault.check("set_watermark")?;

        state.values.insert(table.to_string(), value);
        state.writes.push((table.to_string(), value));

        Ok(())
    }
}

/// Cursor kept in memory, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryCursor {
    value: Arc<Mutex<Option<u64>>>,
    writes: Arc<Mutex<Vec<u64>>>,
}

impl MemoryCursor {
    pub fn at(cursor: u64) -> Self {
        let out = Self::default();
        *out.value.lock().unwrap() = Some(cursor);
        out
    }

    pub fn value(&self) -> Option<u64> {
        *self.value.lock().unwrap()
    }

    pub fn writes(&self) -> Vec<u64> {
        self.writes.lock().unwrap().clone()
    }
}

impl CursorStore for MemoryCursor {
    fn load(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.value())
    }

    fn store(&self, cursor: u64) -> Result<(), StoreError> {
        *self.value.lock().unwrap() = Some(cursor);
        self.writes.lock().unwrap().push(cursor);

        Ok(())
    }
}
