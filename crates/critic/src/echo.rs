//! Offline backend for dry runs without a critique model.

use async_trait::async_trait;

use refine_core::templates::extract_prompt;
use refine_core::verdict::{ACCEPT_LITERAL, CONTINUE_LITERAL, DECISION_MARKER, REFINED_PROMPT_MARKER};
use refine_core::{ImageData, Verdict};

use crate::error::CritiqueError;
use crate::CritiqueBackend;

/// Suffix appended to the original prompt when asking for another round.
const REFINEMENT_SUFFIX: &str = ", highly detailed, sharp focus";

/// Answers every critique with a fixed verdict, echoing the original
/// prompt (with a fixed suffix) as the refinement.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    verdict: Verdict,
}

impl EchoBackend {
    pub fn new(verdict: Verdict) -> Self {
        Self { verdict }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new(Verdict::Continue)
    }
}

#[async_trait]
impl CritiqueBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, instruction: &str, _image: &ImageData) -> Result<String, CritiqueError> {
        let prompt = extract_prompt(instruction).ok_or_else(|| {
            CritiqueError::Backend("instruction does not name an original prompt".to_string())
        })?;
        let literal = match self.verdict {
            Verdict::Accept => ACCEPT_LITERAL,
            Verdict::Continue => CONTINUE_LITERAL,
        };
        Ok(format!(
            "Offline critique.\n{DECISION_MARKER} \"{literal}\"\n{REFINED_PROMPT_MARKER} \"{prompt}{REFINEMENT_SUFFIX}\""
        ))
    }
}
