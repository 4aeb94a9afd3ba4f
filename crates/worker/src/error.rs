use refine_core::CoreError;
use refine_critic::CritiqueError;
use refine_engine::EngineError;

/// Failures while assembling the worker's backends.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Configuration(#[from] CoreError),

    #[error("Cannot build generation engine: {0}")]
    Engine(#[from] EngineError),

    #[error("Cannot build critique backend: {0}")]
    Critique(#[from] CritiqueError),
}
