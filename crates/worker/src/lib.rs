//! Wiring for the `refine-worker` batch binary.
//!
//! [`config::WorkerConfig`] reads the environment; the `build_*` functions
//! turn it into the engine, critique oracle and controller the batch runs
//! with. [`watch_interrupts`] drives shutdown on Ctrl-C.

pub mod config;
mod error;

use std::future::Future;
use std::sync::Arc;

use refine_core::templates::TemplateRegistry;
use refine_critic::{CritiqueOracle, EchoBackend, OpenAiVisionBackend};
use refine_engine::{GenerationEngine, HttpEngine, SimulatedEngine};
use refine_events::EventBus;
use refine_pipeline::RefinementController;
use refine_store::FsCheckpointStore;
use tokio_util::sync::CancellationToken;

use config::{CriticKind, EngineKind, WorkerConfig};
pub use error::WorkerError;

/// Engine selected by `REFINE_ENGINE`.
pub fn build_engine(config: &WorkerConfig) -> Result<Arc<dyn GenerationEngine>, WorkerError> {
    Ok(match config.engine {
        EngineKind::Http => Arc::new(HttpEngine::new(&config.engine_url, config.engine_timeout)?),
        EngineKind::Simulated => Arc::new(SimulatedEngine::default()),
    })
}

/// Critique oracle with the built-in templates plus any from
/// `REFINE_TEMPLATES_FILE`.
pub fn build_oracle(config: &WorkerConfig) -> Result<CritiqueOracle, WorkerError> {
    let mut registry = TemplateRegistry::builtin();
    if let Some(path) = &config.templates_file {
        registry.extend_from_file(path)?;
        tracing::info!(path = %path.display(), "Loaded critique templates");
    }

    let oracle = match config.critic {
        CriticKind::OpenAi => {
            let backend = OpenAiVisionBackend::new(
                &config.critic_url,
                &config.critic_model,
                config.critic_timeout,
            )?
            .with_api_key(config.critic_api_key.clone())
            .with_max_tokens(config.critic_max_tokens);
            CritiqueOracle::new(Arc::new(backend), registry)
        }
        CriticKind::Echo => CritiqueOracle::new(Arc::new(EchoBackend::default()), registry),
    };
    Ok(oracle.with_placeholder_retries(config.critique_retries))
}

/// Controller storing checkpoints under the output directory.
pub fn build_controller(
    config: &WorkerConfig,
    events: Arc<EventBus>,
) -> Result<RefinementController, WorkerError> {
    Ok(RefinementController::new(
        build_engine(config)?,
        Arc::new(build_oracle(config)?),
        Arc::new(FsCheckpointStore::new(&config.output_dir)),
        events,
    ))
}

/// Cancel `cancel` on the first interrupt and return `true` on the second.
///
/// Returns `false` if waiting for an interrupt fails.
pub async fn watch_interrupts<F, Fut>(mut next_interrupt: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_interrupt().await {
        tracing::error!(error = %e, "Cannot listen for interrupts");
        return false;
    }
    tracing::warn!("Interrupt received, finishing running prompts (interrupt again to abort)");
    cancel.cancel();

    match next_interrupt().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Cannot listen for interrupts");
            false
        }
    }
}
