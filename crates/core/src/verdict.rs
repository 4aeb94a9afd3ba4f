//! Critique verdicts and parsing of free-text critique responses.
//!
//! The critique model is instructed to end its answer with two marker
//! lines:
//!
//! ```text
//! DECISION: "True" | "False"
//! REFINED PROMPT: "<improved prompt>"
//! ```
//!
//! Parsing never fails. An unrecognized verdict becomes
//! [`Verdict::Continue`] (fail-open toward more refinement) and a missing
//! refined prompt becomes [`PLACEHOLDER_PROMPT`]. Both conditions are
//! reported through [`Critique::issues`] instead of an error.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Markers and literals
// ---------------------------------------------------------------------------

/// Line prefix carrying the verdict.
pub const DECISION_MARKER: &str = "DECISION:";

/// Line prefix carrying the refined prompt.
pub const REFINED_PROMPT_MARKER: &str = "REFINED PROMPT:";

/// Verdict literal meaning "the image matches the prompt".
pub const ACCEPT_LITERAL: &str = "True";

/// Verdict literal meaning "keep refining".
pub const CONTINUE_LITERAL: &str = "False";

/// Refined prompt used when the response carries none. Callers must treat
/// it as "no usable refinement".
pub const PLACEHOLDER_PROMPT: &str = "None";

/// Characters stripped from both ends of a marker value.
const VALUE_TRIM_CHARS: &[char] = &['"', '*'];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Stop-or-continue decision for one refinement round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The image represents the prompt; stop refining.
    Accept,
    /// Resume generation with the refined prompt.
    Continue,
}

/// A recovered defect in a critique response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CritiqueIssue {
    /// No `DECISION:` line was present.
    MissingVerdict,
    /// A `DECISION:` line carried something other than the two literals.
    UnrecognizedVerdict { value: String },
    /// No `REFINED PROMPT:` line, or an empty / placeholder value.
    MissingRefinedPrompt,
    /// The critique backend failed; the response is synthetic.
    BackendFailure { message: String },
}

/// Structured result of one critique call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub verdict: Verdict,
    /// The refined prompt, or [`PLACEHOLDER_PROMPT`].
    pub refined_prompt: String,
    /// Raw model text, kept for audit artifacts.
    pub raw: String,
    /// Recovered parse or transport problems.
    pub issues: Vec<CritiqueIssue>,
}

impl Critique {
    /// `true` unless the refined prompt is the placeholder.
    pub fn has_refinement(&self) -> bool {
        self.refined_prompt != PLACEHOLDER_PROMPT
    }

    /// Synthetic critique for a failed backend call: continue with no
    /// refinement.
    pub fn backend_failure(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Continue,
            refined_prompt: PLACEHOLDER_PROMPT.to_string(),
            raw: String::new(),
            issues: vec![
                CritiqueIssue::BackendFailure {
                    message: message.into(),
                },
                CritiqueIssue::MissingRefinedPrompt,
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Map a verdict value to a [`Verdict`]. Anything but the accept literal
/// is `Continue`; the second element reports whether the value was one of
/// the two known literals.
pub fn interpret_verdict(value: &str) -> (Verdict, bool) {
    match value {
        ACCEPT_LITERAL => (Verdict::Accept, true),
        CONTINUE_LITERAL => (Verdict::Continue, true),
        _ => (Verdict::Continue, false),
    }
}

/// Parse a free-text critique response.
///
/// Marker lines may be indented. When a marker appears more than once the
/// last occurrence wins.
pub fn parse_critique(raw: &str) -> Critique {
    let mut decision: Option<String> = None;
    let mut refined: Option<String> = None;

    for line in raw.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix(DECISION_MARKER) {
            decision = Some(clean_value(rest));
        } else if let Some(rest) = line.strip_prefix(REFINED_PROMPT_MARKER) {
            refined = Some(clean_value(rest));
        }
    }

    let mut issues = Vec::new();

    let verdict = match decision {
        Some(value) => {
            let (verdict, recognized) = interpret_verdict(&value);
            if !recognized {
                issues.push(CritiqueIssue::UnrecognizedVerdict { value });
            }
            verdict
        }
        None => {
            issues.push(CritiqueIssue::MissingVerdict);
            Verdict::Continue
        }
    };

    let refined_prompt = match refined {
        Some(text) if !text.is_empty() && text != PLACEHOLDER_PROMPT => text,
        _ => {
            issues.push(CritiqueIssue::MissingRefinedPrompt);
            PLACEHOLDER_PROMPT.to_string()
        }
    };

    Critique {
        verdict,
        refined_prompt,
        raw: raw.to_string(),
        issues,
    }
}

fn clean_value(rest: &str) -> String {
    rest.trim().trim_matches(VALUE_TRIM_CHARS).trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
