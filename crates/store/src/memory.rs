//! In-memory checkpoint store for tests and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use refine_core::{LatentState, RunId, StepIndex};

use crate::error::StoreError;
use crate::CheckpointStore;

/// Checkpoints kept in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<(RunId, StepIndex), LatentState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps stored for `run_id`, ascending.
    pub fn steps(&self, run_id: &RunId) -> Vec<StepIndex> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut steps: Vec<StepIndex> = entries
            .keys()
            .filter(|(run, _)| run == run_id)
            .map(|(_, step)| *step)
            .collect();
        steps.sort_unstable();
        steps
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn put(&self, run_id: &RunId, step: StepIndex, state: &LatentState) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let key = (run_id.clone(), step);
        if entries.contains_key(&key) {
            return Err(StoreError::DuplicateCheckpoint {
                run_id: run_id.clone(),
                step,
            });
        }
        entries.insert(key, state.clone());
        Ok(())
    }

    fn get(&self, run_id: &RunId, step: StepIndex) -> Result<LatentState, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(run_id.clone(), step))
            .cloned()
            .ok_or_else(|| StoreError::CheckpointNotFound {
                run_id: run_id.clone(),
                step,
            })
    }

    fn contains(&self, run_id: &RunId, step: StepIndex) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(&(run_id.clone(), step))
    }
}
