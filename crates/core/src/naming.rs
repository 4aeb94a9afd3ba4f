//! Artifact file names inside a run directory.
//!
//! Names are pure functions of the round and step indices so that two runs
//! with the same schedule produce the same layout.

use crate::types::StepIndex;

/// Per-run report.
pub const RUN_REPORT_FILE: &str = "report.json";

/// Batch-level report in the output root.
pub const BATCH_REPORT_FILE: &str = "batch_report.json";

/// Event log in the output root.
pub const EVENT_LOG_FILE: &str = "events.jsonl";

/// Final image of the initial generation.
pub fn initial_image() -> String {
    "final_0.png".to_string()
}

/// Preview captured at `refinement_step` during generation number
/// `generation` (0 for the initial generation, `r + 1` for round `r`).
pub fn preview_image(generation: usize, refinement_step: StepIndex) -> String {
    format!("preview_{generation}_step_{refinement_step}.png")
}

/// Final image produced by round `round`, resumed after checkpoint `step`.
pub fn refined_image(round: usize, step: StepIndex) -> String {
    format!("final_{}_from_{step}.png", round + 1)
}

/// Raw critique text for round `round`.
pub fn critique_text(round: usize, has_refinement: bool) -> String {
    if has_refinement {
        format!("critique_{round}.txt")
    } else {
        format!("critique_{round}_no_refinement.txt")
    }
}

/// Copy of the accepted image.
pub fn early_stop_image(round: usize) -> String {
    format!("early_stop_round_{round}.png")
}

/// Checkpoint file for `step`.
pub fn checkpoint_file(step: StepIndex) -> String {
    format!("latents_{step}.safetensors")
}
