//! The critique oracle: template rendering, backend call, and parsing.
//!
//! [`CritiqueOracle::critique`] never fails. Transport errors become a
//! synthetic continue verdict with the placeholder prompt, and malformed
//! responses are recovered by [`parse_critique`]. When the response has no
//! usable refined prompt and the verdict is continue, the oracle asks
//! again up to `placeholder_retries` times.

use std::sync::Arc;

use refine_core::templates::TemplateRegistry;
use refine_core::verdict::parse_critique;
use refine_core::{Critique, ImageData, Verdict};

use crate::CritiqueBackend;

/// Vision critique of generated images against their original prompt.
pub struct CritiqueOracle {
    backend: Arc<dyn CritiqueBackend>,
    registry: TemplateRegistry,
    placeholder_retries: u32,
}

impl std::fmt::Debug for CritiqueOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CritiqueOracle")
            .field("backend", &self.backend.name())
            .field("registry", &self.registry)
            .field("placeholder_retries", &self.placeholder_retries)
            .finish()
    }
}

impl CritiqueOracle {
    pub fn new(backend: Arc<dyn CritiqueBackend>, registry: TemplateRegistry) -> Self {
        Self {
            backend,
            registry,
            placeholder_retries: 0,
        }
    }

    /// Extra queries made when a continue verdict carries no refinement.
    pub fn with_placeholder_retries(mut self, retries: u32) -> Self {
        self.placeholder_retries = retries;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Judge `image` against `prompt` using the template for `category`.
    pub async fn critique(&self, prompt: &str, image: &ImageData, category: &str) -> Critique {
        let instruction = self.registry.render(category, prompt);
        let template = self.registry.resolve(category);

        let mut attempt = 0u32;
        loop {
            let critique = self.query(&instruction, image).await;
            let needs_retry = critique.verdict == Verdict::Continue && !critique.has_refinement();

            tracing::debug!(
                backend = self.backend.name(),
                category,
                template,
                attempt,
                verdict = ?critique.verdict,
                issues = critique.issues.len(),
                "Critique received",
            );

            if !needs_retry || attempt >= self.placeholder_retries {
                if needs_retry {
                    tracing::warn!(
                        category,
                        attempts = attempt + 1,
                        "Critique gave no usable refined prompt",
                    );
                }
                return critique;
            }
            attempt += 1;
        }
    }

    async fn query(&self, instruction: &str, image: &ImageData) -> Critique {
        match self.backend.complete(instruction, image).await {
            Ok(raw) => parse_critique(&raw),
            Err(e) => {
                tracing::error!(
                    backend = self.backend.name(),
                    error = %e,
                    "Critique backend failed",
                );
                Critique::backend_failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedBackend, ScriptedReply};
    use crate::testing::tiny_image;
    use refine_core::verdict::PLACEHOLDER_PROMPT;
    use refine_core::CritiqueIssue;

    fn oracle(backend: Arc<ScriptedBackend>, retries: u32) -> CritiqueOracle {
        CritiqueOracle::new(backend, TemplateRegistry::builtin()).with_placeholder_retries(retries)
    }

    #[tokio::test]
    async fn parses_backend_text() {
        let backend = Arc::new(ScriptedBackend::from_texts([
            "The cow is brown.\nDECISION: \"False\"\nREFINED PROMPT: \"A vivid blue cow\"",
        ]));
        let critique = oracle(backend.clone(), 0)
            .critique("A photo of a blue cow", &tiny_image(), "colors")
            .await;

        assert_eq!(critique.verdict, Verdict::Continue);
        assert_eq!(critique.refined_prompt, "A vivid blue cow");
        let instructions = backend.instructions();
        assert_eq!(instructions.len(), 1);
        assert!(instructions[0].contains("\"A photo of a blue cow\""));
        assert!(instructions[0].contains("dominant color"));
    }

    #[tokio::test]
    async fn unknown_verdict_fails_open() {
        let backend = Arc::new(ScriptedBackend::from_texts([
            "DECISION: \"Maybe\"\nREFINED PROMPT: \"x\"",
        ]));
        let critique = oracle(backend, 0).critique("p", &tiny_image(), "generic").await;
        assert_eq!(critique.verdict, Verdict::Continue);
    }

    #[tokio::test]
    async fn backend_failure_becomes_continue_with_placeholder() {
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::Fail(
            "connection refused".to_string(),
        )]));
        let critique = oracle(backend, 0).critique("p", &tiny_image(), "counting").await;
        assert_eq!(critique.verdict, Verdict::Continue);
        assert_eq!(critique.refined_prompt, PLACEHOLDER_PROMPT);
        assert!(matches!(
            critique.issues[0],
            CritiqueIssue::BackendFailure { .. }
        ));
    }

    #[tokio::test]
    async fn placeholder_is_retried() {
        let backend = Arc::new(ScriptedBackend::from_texts([
            "DECISION: \"False\"",
            "DECISION: \"False\"\nREFINED PROMPT: \"second try\"",
        ]));
        let critique = oracle(backend.clone(), 1).critique("p", &tiny_image(), "negation").await;
        assert_eq!(critique.refined_prompt, "second try");
        assert_eq!(backend.instructions().len(), 2);
    }

    #[tokio::test]
    async fn placeholder_retries_are_bounded() {
        let backend = Arc::new(ScriptedBackend::from_texts([
            "DECISION: \"False\"",
            "DECISION: \"False\"",
            "DECISION: \"False\"",
        ]));
        let critique = oracle(backend.clone(), 1).critique("p", &tiny_image(), "negation").await;
        assert!(!critique.has_refinement());
        assert_eq!(backend.instructions().len(), 2);
        assert_eq!(backend.remaining(), 1);
    }

    #[tokio::test]
    async fn accept_without_refinement_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::from_texts(["DECISION: \"True\"", "unused"]));
        let critique = oracle(backend.clone(), 3).critique("p", &tiny_image(), "position").await;
        assert_eq!(critique.verdict, Verdict::Accept);
        assert_eq!(backend.instructions().len(), 1);
    }
}
