//! Category-specific critique instructions.
//!
//! Each category tag (e.g. `counting`, `color_attr`) maps to a
//! [`CritiqueTemplate`]: a few focus lines telling the critique model what
//! to check, plus worked examples. Rendering wraps them in a shared frame
//! that always ends with the `DECISION:` / `REFINED PROMPT:` output
//! contract parsed by [`crate::verdict::parse_critique`].
//!
//! The built-in set is embedded from `templates/builtin.json`. Additional
//! templates can be loaded from a JSON file with the same layout; they
//! replace built-ins with the same tag. Unknown tags fall back to the
//! `generic` template.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::verdict::{ACCEPT_LITERAL, CONTINUE_LITERAL, DECISION_MARKER, REFINED_PROMPT_MARKER};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The only placeholder allowed in template text.
pub const PROMPT_PLACEHOLDER: &str = "prompt";

/// Tag of the fallback template used for unknown categories.
pub const GENERIC_TEMPLATE: &str = "generic";

/// Heading followed by the quoted original prompt in every rendered
/// instruction.
pub const ORIGINAL_PROMPT_HEADING: &str = "1. Original User Prompt:";

const BUILTIN_TEMPLATES: &str = include_str!("../templates/builtin.json");

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("valid regex"));

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One annotated example shown to the critique model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkedExample {
    pub prompt: String,
    #[serde(default)]
    pub analysis: Vec<String>,
    pub accept: bool,
    pub refined_prompt: String,
}

/// Critique instructions for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueTemplate {
    /// Category-specific checks. May reference `{prompt}`.
    #[serde(default)]
    pub focus: Vec<String>,
    #[serde(default)]
    pub examples: Vec<WorkedExample>,
    /// Extra tags resolving to this template.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CritiqueTemplate {
    /// Reject any `{placeholder}` other than `{prompt}` in focus lines.
    pub fn validate(&self) -> Result<(), CoreError> {
        for line in &self.focus {
            let unknown: Vec<String> = extract_placeholders(line)
                .into_iter()
                .filter(|p| p != PROMPT_PLACEHOLDER)
                .collect();
            if !unknown.is_empty() {
                return Err(CoreError::Validation(format!(
                    "Template uses unsupported placeholders: {}",
                    unknown.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Render the full instruction for `prompt`.
    pub fn render(&self, prompt: &str) -> String {
        let mut out = String::new();

        out.push_str("### Evaluation Task:\n");
        out.push_str(
            "You are an Image Refinement Assistant. Your job is to check whether the \
             image is correct for the prompt and to refine the prompt. Do not judge \
             image quality.\n",
        );
        for line in &self.focus {
            out.push_str(&substitute_prompt(line, prompt));
            out.push('\n');
        }

        out.push_str("\n### Given Inputs:\n");
        out.push_str(ORIGINAL_PROMPT_HEADING);
        out.push('\n');
        out.push_str(&format!("   - \"{prompt}\"\n"));
        out.push_str("2. Look at what is within the image:\n");
        out.push_str("   - Describe what the generated image looks like.\n");
        out.push_str(&format!(
            "   - List any issues, inconsistencies, or missing details with respect to \"{prompt}\".\n"
        ));
        out.push_str("- Ignore visual noise, blur, and distortions.\n");
        out.push_str("- Only assess whether the image represents the original prompt.\n");

        for (i, example) in self.examples.iter().enumerate() {
            out.push_str(&format!("\n---\n### Example {}\n", i + 1));
            out.push_str(&format!("Original User Prompt: \"{}\"\n", example.prompt));
            if !example.analysis.is_empty() {
                out.push_str("Analysis:\n");
                for note in &example.analysis {
                    out.push_str(&format!("- {note}\n"));
                }
            }
            let literal = if example.accept {
                ACCEPT_LITERAL
            } else {
                CONTINUE_LITERAL
            };
            out.push_str(&format!("{DECISION_MARKER} \"{literal}\"\n"));
            out.push_str(&format!(
                "{REFINED_PROMPT_MARKER} \"{}\"\n",
                example.refined_prompt
            ));
        }

        out.push_str("\n---\n### Decision Process:\n");
        out.push_str(&format!(
            "1. If the image represents \"{prompt}\", answer \"{ACCEPT_LITERAL}\".\n"
        ));
        out.push_str(&format!(
            "2. Otherwise answer \"{CONTINUE_LITERAL}\" and write a refined prompt that fixes the issues.\n"
        ));
        out.push_str("\nStrictly follow this output format:\n");
        out.push_str(&format!(
            "{DECISION_MARKER} \"{ACCEPT_LITERAL}\" or \"{CONTINUE_LITERAL}\"\n"
        ));
        out.push_str(&format!(
            "{REFINED_PROMPT_MARKER} \"<your improved single prompt>\"\n"
        ));
        out
    }
}

/// Distinct `{placeholder}` names in `template`, sorted.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = PLACEHOLDER_RE
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Recover the original prompt from a rendered instruction.
pub fn extract_prompt(instruction: &str) -> Option<&str> {
    let mut lines = instruction.lines();
    lines.find(|line| line.trim() == ORIGINAL_PROMPT_HEADING)?;
    let value = lines.next()?.trim().strip_prefix('-')?.trim();
    let value = value.strip_prefix('"').unwrap_or(value);
    Some(value.strip_suffix('"').unwrap_or(value))
}

fn substitute_prompt(line: &str, prompt: &str) -> String {
    line.replace("{prompt}", prompt)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Lookup table from category tag to template.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, CritiqueTemplate>,
    aliases: HashMap<String, String>,
}

impl TemplateRegistry {
    /// Registry holding only the built-in templates.
    pub fn builtin() -> Self {
        let mut registry = Self {
            templates: HashMap::new(),
            aliases: HashMap::new(),
        };
        registry
            .extend_from_json(BUILTIN_TEMPLATES)
            .expect("built-in templates are valid");
        registry
    }

    /// Merge templates from a JSON object keyed by category tag.
    ///
    /// The whole document is validated before anything is inserted.
    pub fn extend_from_json(&mut self, json: &str) -> Result<(), CoreError> {
        let parsed: HashMap<String, CritiqueTemplate> = serde_json::from_str(json)
            .map_err(|e| CoreError::Configuration(format!("Invalid template file: {e}")))?;
        for (tag, template) in &parsed {
            template
                .validate()
                .map_err(|e| CoreError::Configuration(format!("Template '{tag}': {e}")))?;
        }
        for (tag, template) in parsed {
            self.insert(tag, template);
        }
        Ok(())
    }

    /// Load extra templates from a file.
    pub fn extend_from_file(&mut self, path: &Path) -> Result<(), CoreError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!(
                "Cannot read template file {}: {e}",
                path.display()
            ))
        })?;
        self.extend_from_json(&json)
    }

    /// Insert or replace the template for `tag`, registering its aliases.
    pub fn insert(&mut self, tag: impl Into<String>, template: CritiqueTemplate) {
        let tag = tag.into();
        self.aliases.retain(|_, target| *target != tag);
        for alias in &template.aliases {
            self.aliases.insert(alias.clone(), tag.clone());
        }
        self.aliases.remove(&tag);
        self.templates.insert(tag, template);
    }

    /// Canonical tag that `category` resolves to.
    pub fn resolve<'a>(&'a self, category: &'a str) -> &'a str {
        if self.templates.contains_key(category) {
            return category;
        }
        match self.aliases.get(category) {
            Some(target) => target.as_str(),
            None => GENERIC_TEMPLATE,
        }
    }

    /// Template for `category`, falling back to the generic one.
    pub fn get(&self, category: &str) -> Option<&CritiqueTemplate> {
        self.templates.get(self.resolve(category))
    }

    /// Render the instruction for `prompt` under `category`.
    pub fn render(&self, category: &str, prompt: &str) -> String {
        match self.get(category) {
            Some(template) => template.render(prompt),
            None => CritiqueTemplate {
                focus: Vec::new(),
                examples: Vec::new(),
                aliases: Vec::new(),
            }
            .render(prompt),
        }
    }

    /// Known canonical tags, sorted.
    pub fn categories(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn builtin_covers_all_categories() {
        let registry = TemplateRegistry::builtin();
        assert_eq!(
            registry.categories(),
            vec![
                "color_attr",
                "colors",
                "counting",
                "generic",
                "negation",
                "position",
                "single_object",
                "two_object"
            ]
        );
    }

    #[test]
    fn aliases_resolve_to_canonical_tag() {
        let registry = TemplateRegistry::builtin();
        assert_eq!(registry.resolve("single_object3"), "single_object");
        assert_eq!(registry.resolve("two_object2"), "two_object");
        assert_eq!(registry.resolve("position2"), "position");
    }

    #[test]
    fn unknown_category_falls_back_to_generic() {
        let registry = TemplateRegistry::builtin();
        assert_eq!(registry.resolve("landscapes"), GENERIC_TEMPLATE);
        let text = registry.render("landscapes", "A lighthouse at dusk");
        assert!(text.contains("A lighthouse at dusk"));
        assert!(text.contains(DECISION_MARKER));
    }

    #[test]
    fn rendered_text_ends_with_output_contract() {
        let registry = TemplateRegistry::builtin();
        let text = registry.render("counting", "A photo of three apples");
        assert!(text.contains("Count the objects"));
        assert!(text.contains("\"A photo of three apples\""));
        assert!(text.contains("### Example 2"));
        assert!(text.trim_end().ends_with("REFINED PROMPT: \"<your improved single prompt>\""));
        assert!(!text.contains("{prompt}"));
    }

    #[test]
    fn prompt_containing_braces_is_not_expanded_twice() {
        let registry = TemplateRegistry::builtin();
        let text = registry.render("colors", "a {prompt} sign");
        assert!(text.contains("a {prompt} sign"));
    }

    #[test]
    fn unknown_placeholder_rejected() {
        let mut registry = TemplateRegistry::builtin();
        let json = r#"{"custom": {"focus": ["Check {subject} in {prompt}"]}}"#;
        let err = registry.extend_from_json(json).unwrap_err();
        assert!(err.to_string().contains("subject"));
        assert_eq!(registry.resolve("custom"), GENERIC_TEMPLATE);
    }

    #[test]
    fn custom_template_replaces_builtin() {
        let mut registry = TemplateRegistry::builtin();
        let json = r#"{"counting": {"focus": ["Count twice for {prompt}"], "aliases": ["counting2"]}}"#;
        registry.extend_from_json(json).unwrap();
        let text = registry.render("counting2", "two cats");
        assert!(text.contains("Count twice for two cats"));
        assert!(!text.contains("### Example 1"));
    }

    #[test]
    fn malformed_json_is_configuration_error() {
        let mut registry = TemplateRegistry::builtin();
        assert_matches!(
            registry.extend_from_json("[1, 2"),
            Err(CoreError::Configuration(_))
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"animals": {{"focus": ["Is the animal in {{prompt}} real?"]}}}}"#)
            .unwrap();
        let mut registry = TemplateRegistry::builtin();
        registry.extend_from_file(file.path()).unwrap();
        assert_eq!(registry.resolve("animals"), "animals");
    }

    #[test]
    fn original_prompt_is_recoverable() {
        let registry = TemplateRegistry::builtin();
        let text = registry.render("position", "A \"red\" bus below a toothbrush");
        assert_eq!(
            extract_prompt(&text),
            Some("A \"red\" bus below a toothbrush")
        );
        assert_eq!(extract_prompt("no heading here"), None);
    }

    #[test]
    fn extract_placeholders_sorted_and_deduplicated() {
        assert_eq!(
            extract_placeholders("{prompt} and {b} and {prompt} and {a}"),
            vec!["a", "b", "prompt"]
        );
    }
}
