//! Strongly typed engine requests and outputs.
//!
//! A run starts with a [`GenerateRequest`] (pure noise to final image,
//! capturing checkpoints) and continues with [`ResumeRequest`]s (restart
//! from a stored latent with new conditioning). Both go through the single
//! [`crate::GenerationEngine::run`] entry point as an [`EngineRequest`].

use std::ops::Range;

use refine_core::{ImageData, LatentState, StepIndex};

use crate::error::EngineError;

/// Full denoising run from pure noise.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub total_steps: StepIndex,
    pub guidance_scale: f64,
    /// Iteration after which the critique preview is captured.
    pub refinement_step: StepIndex,
    /// Iterations whose resulting latent must be returned as checkpoints.
    pub checkpoint_steps: Vec<StepIndex>,
}

/// Continue a run from a stored latent with a new prompt.
///
/// Iterations `from_step..total_steps` are executed. The noise schedule
/// and step count are those of the original run; only the conditioning
/// changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeRequest {
    pub prompt: String,
    pub total_steps: StepIndex,
    pub guidance_scale: f64,
    /// Absolute iteration (in the original schedule) for the preview.
    pub refinement_step: StepIndex,
    /// Latent to continue from.
    pub state: LatentState,
    /// First iteration to execute.
    pub from_step: StepIndex,
}

/// A single call into the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    Generate(GenerateRequest),
    Resume(ResumeRequest),
}

impl EngineRequest {
    pub fn prompt(&self) -> &str {
        match self {
            Self::Generate(r) => &r.prompt,
            Self::Resume(r) => &r.prompt,
        }
    }

    pub fn total_steps(&self) -> StepIndex {
        match self {
            Self::Generate(r) => r.total_steps,
            Self::Resume(r) => r.total_steps,
        }
    }

    pub fn guidance_scale(&self) -> f64 {
        match self {
            Self::Generate(r) => r.guidance_scale,
            Self::Resume(r) => r.guidance_scale,
        }
    }

    pub fn refinement_step(&self) -> StepIndex {
        match self {
            Self::Generate(r) => r.refinement_step,
            Self::Resume(r) => r.refinement_step,
        }
    }

    /// First iteration this call executes.
    pub fn first_step(&self) -> StepIndex {
        match self {
            Self::Generate(_) => 0,
            Self::Resume(r) => r.from_step,
        }
    }

    /// Iterations this call executes.
    pub fn executed_steps(&self) -> Range<StepIndex> {
        self.first_step()..self.total_steps()
    }

    /// Whether this call captures the critique preview: the refinement
    /// step must lie inside the schedule and be executed by this call.
    pub fn captures_preview(&self) -> bool {
        self.executed_steps().contains(&self.refinement_step())
    }

    /// Checkpoint steps requested from this call. Resumes never checkpoint.
    pub fn checkpoint_steps(&self) -> &[StepIndex] {
        match self {
            Self::Generate(r) => &r.checkpoint_steps,
            Self::Resume(_) => &[],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Generate(_) => "generate",
            Self::Resume(_) => "resume",
        }
    }

    /// Check the request before any work is done.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.prompt().trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }
        if self.total_steps() == 0 {
            return Err(EngineError::InvalidRequest(
                "total_steps must be greater than zero".to_string(),
            ));
        }
        match self {
            Self::Generate(r) => {
                if let Some(step) = r.checkpoint_steps.iter().find(|s| **s >= r.total_steps) {
                    return Err(EngineError::InvalidRequest(format!(
                        "checkpoint step {step} is outside the {}-step schedule",
                        r.total_steps
                    )));
                }
            }
            Self::Resume(r) => {
                if r.from_step > r.total_steps {
                    return Err(EngineError::InvalidResumeStep {
                        from_step: r.from_step,
                        total_steps: r.total_steps,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Result of one engine call.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Decoded final image.
    pub image: ImageData,
    /// Decoded preview at the refinement step, when captured.
    pub preview: Option<ImageData>,
    /// Latents captured at the requested checkpoint steps.
    pub checkpoints: Vec<(StepIndex, LatentState)>,
    /// Iterations the engine executed.
    pub executed: Range<StepIndex>,
}

impl EngineOutput {
    /// Image the critique should look at: the preview when present,
    /// otherwise the final image.
    pub fn critique_image(&self) -> &ImageData {
        self.preview.as_ref().unwrap_or(&self.image)
    }

    /// Reject outputs carrying non-finite checkpoint values.
    pub fn ensure_finite(&self) -> Result<(), EngineError> {
        match self.checkpoints.iter().find(|(_, s)| !s.is_finite()) {
            Some((step, _)) => Err(EngineError::Diverged(format!(
                "non-finite latent values at step {step}"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn resume(from_step: StepIndex) -> EngineRequest {
        EngineRequest::Resume(ResumeRequest {
            prompt: "a red car".to_string(),
            total_steps: 100,
            guidance_scale: 7.5,
            refinement_step: 40,
            state: LatentState::new(vec![1], vec![0.0]).unwrap(),
            from_step,
        })
    }

    #[test]
    fn resume_past_end_rejected() {
        assert_matches!(
            resume(101).validate(),
            Err(EngineError::InvalidResumeStep {
                from_step: 101,
                total_steps: 100
            })
        );
    }

    #[test]
    fn resume_at_end_is_valid_and_empty() {
        let request = resume(100);
        assert!(request.validate().is_ok());
        assert!(request.executed_steps().is_empty());
        assert!(!request.captures_preview());
    }

    #[test]
    fn preview_only_when_refinement_step_is_executed() {
        assert!(resume(21).captures_preview());
        assert!(resume(40).captures_preview());
        assert!(!resume(41).captures_preview());
    }

    #[test]
    fn generate_rejects_checkpoint_outside_schedule() {
        let request = EngineRequest::Generate(GenerateRequest {
            prompt: "a cat".to_string(),
            total_steps: 10,
            guidance_scale: 7.5,
            refinement_step: 5,
            checkpoint_steps: vec![3, 10],
        });
        assert_matches!(request.validate(), Err(EngineError::InvalidRequest(_)));
    }
}
