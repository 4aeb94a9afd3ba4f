use refine_core::{RunId, StepIndex};

/// Errors raised by [`crate::CheckpointStore`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A checkpoint already exists for this run and step. Checkpoints are
    /// write-once.
    #[error("Checkpoint for {run_id} at step {step} already exists")]
    DuplicateCheckpoint { run_id: RunId, step: StepIndex },

    #[error("No checkpoint for {run_id} at step {step}")]
    CheckpointNotFound { run_id: RunId, step: StepIndex },

    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored file could not be encoded or decoded.
    #[error("Checkpoint format error: {0}")]
    Format(String),
}
