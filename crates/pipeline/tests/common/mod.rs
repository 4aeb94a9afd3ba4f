#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;

use refine_core::templates::TemplateRegistry;
use refine_core::{RunConfiguration, RunId, StepSchedule};
use refine_critic::{CritiqueOracle, ScriptedBackend, ScriptedReply};
use refine_engine::{
    EngineError, EngineOutput, EngineRequest, GenerationEngine, SimulatedConfig, SimulatedEngine,
};
use refine_events::{EventBus, RefinementEvent};
use refine_pipeline::{RefinementController, RunArtifacts};
use refine_store::FsCheckpointStore;

pub const DOG_PROMPT: &str = "A white dog on a couch under the sun";

pub fn continue_with(prompt: &str) -> ScriptedReply {
    ScriptedReply::Text(format!(
        "The dog is missing.\nDECISION: \"False\"\nREFINED PROMPT: \"{prompt}\""
    ))
}

pub fn accept() -> ScriptedReply {
    ScriptedReply::Text("DECISION: \"True\"\nREFINED PROMPT: \"fine as is\"".to_string())
}

pub fn no_refinement() -> ScriptedReply {
    ScriptedReply::Text("I am not sure.\nDECISION: \"False\"".to_string())
}

pub fn dog_config(steps: &[u32]) -> RunConfiguration {
    RunConfiguration::new(
        RunId::new("single_object", 1).unwrap(),
        DOG_PROMPT,
        StepSchedule {
            total_steps: 100,
            guidance_scale: 7.5,
            refinement_step: 40,
            checkpoint_steps: steps.to_vec(),
        },
    )
    .unwrap()
}

/// Engine wrapper that drops the checkpoints it returns.
pub struct ForgetfulEngine(pub SimulatedEngine);

#[async_trait]
impl GenerationEngine for ForgetfulEngine {
    fn name(&self) -> &str {
        "forgetful"
    }

    async fn run(&self, request: EngineRequest) -> Result<EngineOutput, EngineError> {
        let mut output = self.0.run(request).await?;
        output.checkpoints.clear();
        Ok(output)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub engine: Arc<SimulatedEngine>,
    pub backend: Arc<ScriptedBackend>,
    pub events: Arc<EventBus>,
    pub receiver: broadcast::Receiver<RefinementEvent>,
    pub controller: Arc<RefinementController>,
}

impl Harness {
    pub fn new(replies: Vec<ScriptedReply>, placeholder_retries: u32) -> Self {
        Self::with_engine_config(replies, placeholder_retries, SimulatedConfig::default())
    }

    pub fn with_engine_config(
        replies: Vec<ScriptedReply>,
        placeholder_retries: u32,
        engine_config: SimulatedConfig,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(SimulatedEngine::new(engine_config));
        let backend = Arc::new(ScriptedBackend::new(replies));
        let oracle = Arc::new(
            CritiqueOracle::new(backend.clone(), TemplateRegistry::builtin())
                .with_placeholder_retries(placeholder_retries),
        );
        let store = Arc::new(FsCheckpointStore::new(dir.path()));
        let events = Arc::new(EventBus::default());
        let receiver = events.subscribe();
        let controller = Arc::new(RefinementController::new(
            engine.clone(),
            oracle,
            store,
            events.clone(),
        ));
        Self {
            dir,
            engine,
            backend,
            events,
            receiver,
            controller,
        }
    }

    pub async fn artifacts(&self, config: &RunConfiguration) -> RunArtifacts {
        RunArtifacts::create(self.dir.path(), config.run_id())
            .await
            .unwrap()
    }

    pub fn run_file(&self, config: &RunConfiguration, name: &str) -> std::path::PathBuf {
        self.dir
            .path()
            .join(config.run_id().relative_dir())
            .join(name)
    }

    /// Events published so far.
    pub fn drain_events(&mut self) -> Vec<RefinementEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}
