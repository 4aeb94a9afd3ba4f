//! The per-prompt refinement state machine.
//!
//! ```text
//! Initializing -> Generating(0) -> Critiquing(0) -> Accepted
//!                                                -> Resuming(1) -> Critiquing(1) -> ...
//!                                                -> Exhausted
//! ```
//!
//! Round `r` critiques the image of the latest generation against the
//! ORIGINAL prompt. On continue it resumes from checkpoint
//! `checkpoint_steps[r]` with the refined prompt, starting at the
//! iteration after the checkpoint. Steps are consumed strictly in list
//! order, so a run makes at most `len(checkpoint_steps)` resumes. The image
//! produced by the last resume is not critiqued; the run is `Exhausted`.
//!
//! When the critique has no usable refinement the previous generation's
//! prompt is reused and the round is flagged `placeholder_fallback`.

use std::sync::Arc;

use chrono::Utc;

use refine_core::naming;
use refine_core::{Critique, LatentState, RunConfiguration, RunId, StepIndex, Verdict};
use refine_critic::CritiqueOracle;
use refine_engine::{EngineOutput, GenerateRequest, GenerationEngine, ResumeRequest};
use refine_events::{EventBus, EventKind};
use refine_store::CheckpointStore;

use crate::artifacts::RunArtifacts;
use crate::error::PipelineError;
use crate::outcome::{ResumeRecord, RoundRecord, RunOutcome, TerminalState};

/// The generation whose image the next round critiques.
struct Generation {
    prompt: String,
    image_name: String,
    output: EngineOutput,
}

/// Drives one prompt from initial generation to a terminal state.
pub struct RefinementController {
    engine: Arc<dyn GenerationEngine>,
    oracle: Arc<CritiqueOracle>,
    store: Arc<dyn CheckpointStore>,
    events: Arc<EventBus>,
}

impl RefinementController {
    pub fn new(
        engine: Arc<dyn GenerationEngine>,
        oracle: Arc<CritiqueOracle>,
        store: Arc<dyn CheckpointStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            engine,
            oracle,
            store,
            events,
        }
    }

    /// Run the refinement loop for one prompt and write its report.
    ///
    /// Errors abort this prompt only. A `run.failed` event is published
    /// before the error is returned.
    pub async fn run(
        &self,
        config: &RunConfiguration,
        artifacts: &RunArtifacts,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = config.run_id();
        match self.run_inner(config, artifacts).await {
            Ok(outcome) => {
                artifacts.write_report(&outcome).await?;
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Refinement run failed");
                self.events.emit(
                    run_id,
                    EventKind::RunFailed {
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        config: &RunConfiguration,
        artifacts: &RunArtifacts,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = config.run_id();
        let started_at = Utc::now();
        let steps = config.checkpoint_steps();

        tracing::info!(
            run_id = %run_id,
            engine = self.engine.name(),
            critic = self.oracle.backend_name(),
            checkpoint_steps = ?steps,
            "Starting refinement run",
        );
        self.events.emit(
            run_id,
            EventKind::RunStarted {
                prompt: config.prompt().to_string(),
                category: config.category().to_string(),
                checkpoint_steps: steps.to_vec(),
            },
        );

        // Generating(0)
        let output = self
            .engine
            .generate(GenerateRequest {
                prompt: config.prompt().to_string(),
                total_steps: config.total_steps(),
                guidance_scale: config.guidance_scale(),
                refinement_step: config.refinement_step(),
                checkpoint_steps: steps.to_vec(),
            })
            .await?;
        let checkpoints_saved = self.persist_checkpoints(config, &output).await?;

        let image_name = naming::initial_image();
        artifacts.write_image(&image_name, &output.image).await?;
        if let Some(preview) = &output.preview {
            artifacts
                .write_image(&naming::preview_image(0, config.refinement_step()), preview)
                .await?;
        }

        let mut images = vec![image_name.clone()];
        let mut rounds = Vec::with_capacity(steps.len());
        let mut current = Generation {
            prompt: config.prompt().to_string(),
            image_name,
            output,
        };

        for (round, &step) in steps.iter().enumerate() {
            // Critiquing(round)
            let critique = self
                .oracle
                .critique(config.prompt(), current.output.critique_image(), config.category())
                .await;
            let critiqued_image = critiqued_name(&current, round, config);
            let critique_file = naming::critique_text(round, critique.has_refinement());
            artifacts
                .write_text(&critique_file, &critique_text(&critique))
                .await?;

            self.events.emit(
                run_id,
                EventKind::CritiqueReceived {
                    round,
                    verdict: critique.verdict,
                    refined_prompt: critique.refined_prompt.clone(),
                    placeholder: !critique.has_refinement(),
                },
            );

            if critique.verdict == Verdict::Accept {
                let early_stop = naming::early_stop_image(round);
                artifacts.copy(&current.image_name, &early_stop).await?;

                tracing::info!(run_id = %run_id, round, image = %current.image_name, "Image accepted");
                self.events.emit(run_id, EventKind::Accepted { round });

                rounds.push(RoundRecord {
                    round,
                    critiqued_image,
                    critique_file,
                    verdict: critique.verdict,
                    refined_prompt: critique.refined_prompt,
                    placeholder_fallback: false,
                    issues: critique.issues,
                    resume: None,
                });

                return Ok(RunOutcome {
                    run_id: run_id.clone(),
                    prompt: config.prompt().to_string(),
                    terminal: TerminalState::Accepted { round },
                    rounds,
                    images,
                    final_image: current.image_name,
                    early_stop_image: Some(early_stop),
                    checkpoints_saved,
                    unconsumed_steps: steps[round..].to_vec(),
                    started_at,
                    finished_at: Utc::now(),
                });
            }

            // Resuming(round + 1)
            let placeholder_fallback = !critique.has_refinement();
            let prompt = if placeholder_fallback {
                tracing::warn!(
                    run_id = %run_id,
                    round,
                    prompt = %current.prompt,
                    "No usable refined prompt, reusing previous prompt",
                );
                current.prompt.clone()
            } else {
                critique.refined_prompt.clone()
            };

            let state = self.load_checkpoint(run_id, step).await?;
            let from_step = step + 1;
            self.events.emit(
                run_id,
                EventKind::Resumed {
                    round,
                    from_step,
                    prompt: prompt.clone(),
                },
            );
            tracing::info!(run_id = %run_id, round, checkpoint_step = step, from_step, "Resuming generation");

            let output = self
                .engine
                .resume(ResumeRequest {
                    prompt: prompt.clone(),
                    total_steps: config.total_steps(),
                    guidance_scale: config.guidance_scale(),
                    refinement_step: config.refinement_step(),
                    state,
                    from_step,
                })
                .await?;

            let image_name = naming::refined_image(round, step);
            artifacts.write_image(&image_name, &output.image).await?;
            let preview_name = match &output.preview {
                Some(preview) => {
                    let name = naming::preview_image(round + 1, config.refinement_step());
                    artifacts.write_image(&name, preview).await?;
                    Some(name)
                }
                None => None,
            };
            images.push(image_name.clone());

            rounds.push(RoundRecord {
                round,
                critiqued_image,
                critique_file,
                verdict: critique.verdict,
                refined_prompt: critique.refined_prompt,
                placeholder_fallback,
                issues: critique.issues,
                resume: Some(ResumeRecord {
                    checkpoint_step: step,
                    from_step,
                    prompt: prompt.clone(),
                    image: image_name.clone(),
                    preview: preview_name,
                }),
            });

            current = Generation {
                prompt,
                image_name,
                output,
            };
        }

        tracing::info!(run_id = %run_id, rounds = rounds.len(), "Checkpoint steps exhausted");
        self.events.emit(
            run_id,
            EventKind::Exhausted {
                rounds: rounds.len(),
            },
        );

        Ok(RunOutcome {
            run_id: run_id.clone(),
            prompt: config.prompt().to_string(),
            terminal: TerminalState::Exhausted,
            rounds,
            images,
            final_image: current.image_name,
            early_stop_image: None,
            checkpoints_saved,
            unconsumed_steps: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Store the checkpoints returned by the initial generation.
    ///
    /// Steps that were not requested are skipped. Requested steps the
    /// engine did not return surface later as `CheckpointNotFound`.
    async fn persist_checkpoints(
        &self,
        config: &RunConfiguration,
        output: &EngineOutput,
    ) -> Result<Vec<StepIndex>, PipelineError> {
        let run_id = config.run_id();
        let mut saved = Vec::with_capacity(output.checkpoints.len());

        for (step, state) in &output.checkpoints {
            if !config.checkpoint_steps().contains(step) {
                tracing::warn!(run_id = %run_id, step, "Engine returned an unrequested checkpoint");
                continue;
            }
            let digest = state.digest();
            self.save_checkpoint(run_id, *step, state.clone()).await?;
            self.events.emit(
                run_id,
                EventKind::CheckpointSaved {
                    step: *step,
                    digest,
                },
            );
            saved.push(*step);
        }

        for step in config.checkpoint_steps() {
            if !saved.contains(step) {
                tracing::warn!(run_id = %run_id, step, "Engine did not return a requested checkpoint");
            }
        }
        Ok(saved)
    }

    async fn save_checkpoint(
        &self,
        run_id: &RunId,
        step: StepIndex,
        state: LatentState,
    ) -> Result<(), PipelineError> {
        let store = Arc::clone(&self.store);
        let run_id = run_id.clone();
        tokio::task::spawn_blocking(move || store.put(&run_id, step, &state))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        run_id: &RunId,
        step: StepIndex,
    ) -> Result<LatentState, PipelineError> {
        let store = Arc::clone(&self.store);
        let run_id = run_id.clone();
        let state = tokio::task::spawn_blocking(move || store.get(&run_id, step))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;
        Ok(state)
    }
}

/// Name of the artifact the critique looked at.
fn critiqued_name(current: &Generation, round: usize, config: &RunConfiguration) -> String {
    if current.output.preview.is_some() {
        naming::preview_image(round, config.refinement_step())
    } else {
        current.image_name.clone()
    }
}

/// Text written to the critique artifact. Backend failures have no raw
/// text, so the recorded issues are written instead.
fn critique_text(critique: &Critique) -> String {
    if !critique.raw.is_empty() {
        return critique.raw.clone();
    }
    critique
        .issues
        .iter()
        .map(|issue| format!("{issue:?}"))
        .collect::<Vec<_>>()
        .join("\n")
}
