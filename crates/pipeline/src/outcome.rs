//! Per-run results recorded in `report.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use refine_core::{CritiqueIssue, RunId, StepIndex, Verdict};

/// How a run ended. Both are successful completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TerminalState {
    /// The critique accepted the image critiqued in `round`.
    Accepted { round: usize },
    /// Every checkpoint step was consumed without acceptance.
    Exhausted,
}

/// The resume performed at the end of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    /// Checkpoint step consumed by this round.
    pub checkpoint_step: StepIndex,
    /// First iteration executed (`checkpoint_step + 1`).
    pub from_step: StepIndex,
    /// Conditioning prompt used for the remaining iterations.
    pub prompt: String,
    pub image: String,
    pub preview: Option<String>,
}

/// One critique-then-resume cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    /// Artifact shown to the critique model.
    pub critiqued_image: String,
    pub critique_file: String,
    pub verdict: Verdict,
    /// Refined prompt as returned (possibly the placeholder).
    pub refined_prompt: String,
    /// The critique had no usable refinement and the previous prompt was
    /// reused for the resume.
    pub placeholder_fallback: bool,
    pub issues: Vec<CritiqueIssue>,
    /// `None` when the round ended in acceptance.
    pub resume: Option<ResumeRecord>,
}

/// Result of one controller session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub prompt: String,
    pub terminal: TerminalState,
    pub rounds: Vec<RoundRecord>,
    /// Final images in production order, starting with the initial
    /// generation.
    pub images: Vec<String>,
    /// Image considered the output of the run.
    pub final_image: String,
    pub early_stop_image: Option<String>,
    /// Checkpoints captured during the initial generation.
    pub checkpoints_saved: Vec<StepIndex>,
    /// Checkpoint steps never used for a resume.
    pub unconsumed_steps: Vec<StepIndex>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn images_produced(&self) -> usize {
        self.images.len()
    }

    pub fn resume_count(&self) -> usize {
        self.rounds.iter().filter(|r| r.resume.is_some()).count()
    }

    pub fn accepted_round(&self) -> Option<usize> {
        match self.terminal {
            TerminalState::Accepted { round } => Some(round),
            TerminalState::Exhausted => None,
        }
    }

    /// Rounds that resumed with a reused prompt.
    pub fn placeholder_rounds(&self) -> Vec<usize> {
        self.rounds
            .iter()
            .filter(|r| r.placeholder_fallback)
            .map(|r| r.round)
            .collect()
    }
}
