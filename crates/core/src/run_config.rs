//! Run configuration: immutable per-prompt generation parameters and their
//! validation.
//!
//! A [`RunConfiguration`] is created once per prompt before any generation
//! begins and is never mutated afterwards. Fields are private; construction
//! goes through [`RunConfiguration::new`], which validates the schedule.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{RunId, StepIndex};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default number of denoising iterations per run.
pub const DEFAULT_TOTAL_STEPS: StepIndex = 100;

/// Default classifier-free guidance strength.
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;

/// Default iteration after which the critique preview is captured.
pub const DEFAULT_REFINEMENT_STEP: StepIndex = 75;

/// Default checkpoint steps, consumed coarse-to-fine.
pub const DEFAULT_RESTART_STEPS: &[StepIndex] = &[25, 10, 0];

/// Maximum accepted prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 10_000;

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Denoising schedule shared by every generation call of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSchedule {
    /// Total number of denoising iterations.
    pub total_steps: StepIndex,
    /// Guidance strength passed to the engine on every call.
    pub guidance_scale: f64,
    /// Absolute iteration after which the critique preview is captured.
    pub refinement_step: StepIndex,
    /// Ordered checkpoint steps; consumed strictly in this order.
    pub checkpoint_steps: Vec<StepIndex>,
}

impl Default for StepSchedule {
    fn default() -> Self {
        Self {
            total_steps: DEFAULT_TOTAL_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            refinement_step: DEFAULT_REFINEMENT_STEP,
            checkpoint_steps: DEFAULT_RESTART_STEPS.to_vec(),
        }
    }
}

impl StepSchedule {
    /// Validate the schedule.
    ///
    /// - `total_steps` must be positive.
    /// - `guidance_scale` must be finite and positive.
    /// - Every checkpoint step must be `< total_steps` (a checkpoint is the
    ///   state after that iteration completed).
    /// - Checkpoint steps must be unique (checkpoints are write-once).
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.total_steps == 0 {
            return Err(CoreError::Configuration(
                "total_steps must be greater than zero".to_string(),
            ));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale <= 0.0 {
            return Err(CoreError::Configuration(format!(
                "guidance_scale must be a positive finite number (got {})",
                self.guidance_scale
            )));
        }
        for (i, step) in self.checkpoint_steps.iter().enumerate() {
            if *step >= self.total_steps {
                return Err(CoreError::Configuration(format!(
                    "checkpoint step {step} must be below total_steps {}",
                    self.total_steps
                )));
            }
            if self.checkpoint_steps[..i].contains(step) {
                return Err(CoreError::Configuration(format!(
                    "checkpoint step {step} is listed more than once"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Immutable parameters of one controller session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfiguration {
    run_id: RunId,
    prompt: String,
    schedule: StepSchedule,
}

impl RunConfiguration {
    /// Create a validated configuration. The category tag is taken from
    /// `run_id` and selects the critique template.
    pub fn new(
        run_id: RunId,
        prompt: impl Into<String>,
        schedule: StepSchedule,
    ) -> Result<Self, CoreError> {
        let prompt = prompt.into();
        validate_prompt(&prompt)?;
        schedule.validate()?;
        Ok(Self {
            run_id,
            prompt,
            schedule,
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The original prompt. Critiques are always made against this text.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn category(&self) -> &str {
        self.run_id.category()
    }

    pub fn schedule(&self) -> &StepSchedule {
        &self.schedule
    }

    pub fn total_steps(&self) -> StepIndex {
        self.schedule.total_steps
    }

    pub fn guidance_scale(&self) -> f64 {
        self.schedule.guidance_scale
    }

    pub fn refinement_step(&self) -> StepIndex {
        self.schedule.refinement_step
    }

    pub fn checkpoint_steps(&self) -> &[StepIndex] {
        &self.schedule.checkpoint_steps
    }
}

/// Validate a prompt: must be non-blank and within the length limit.
pub fn validate_prompt(text: &str) -> Result<(), CoreError> {
    if text.trim().is_empty() {
        return Err(CoreError::Configuration(
            "Prompt must not be empty".to_string(),
        ));
    }
    if text.len() > MAX_PROMPT_LENGTH {
        return Err(CoreError::Configuration(format!(
            "Prompt exceeds maximum length of {MAX_PROMPT_LENGTH} characters (got {})",
            text.len()
        )));
    }
    Ok(())
}

/// Parse a comma- or whitespace-separated list of step indices, e.g.
/// `"25,10,0"` or `"25 10 0"`.
pub fn parse_step_list(raw: &str) -> Result<Vec<StepIndex>, CoreError> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<StepIndex>().map_err(|_| {
                CoreError::Configuration(format!("'{s}' is not a valid step index"))
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
