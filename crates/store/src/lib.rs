//! Write-once storage of intermediate latent states, keyed by run and step.
//!
//! The store is synchronous; async callers run it on a blocking thread.

pub mod error;
pub mod format;
pub mod fs;
pub mod memory;

use refine_core::{LatentState, RunId, StepIndex};

pub use error::StoreError;
pub use fs::FsCheckpointStore;
pub use memory::MemoryCheckpointStore;

/// Persistence of latent checkpoints.
///
/// Entries are scoped to a run and never overwritten: a second `put` for
/// the same `(run_id, step)` fails with [`StoreError::DuplicateCheckpoint`]
/// and leaves the first value intact. `get` returns exactly the value that
/// was put.
pub trait CheckpointStore: Send + Sync {
    fn put(&self, run_id: &RunId, step: StepIndex, state: &LatentState) -> Result<(), StoreError>;

    fn get(&self, run_id: &RunId, step: StepIndex) -> Result<LatentState, StoreError>;

    fn contains(&self, run_id: &RunId, step: StepIndex) -> bool;
}
