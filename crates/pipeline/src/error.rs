use std::path::PathBuf;

use refine_core::CoreError;
use refine_engine::EngineError;
use refine_store::StoreError;

/// Errors that abort processing of one prompt.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Generation failed: {0}")]
    Generation(#[from] EngineError),

    #[error("Cannot write artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot encode report: {0}")]
    Report(#[from] serde_json::Error),

    /// A blocking store task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),
}
