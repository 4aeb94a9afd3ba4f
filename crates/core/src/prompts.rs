//! Prompt collection input.
//!
//! The collection is a JSON object mapping a category tag to an array of
//! entries:
//!
//! ```json
//! { "single_object": [ { "prompt": "A photo of a potted plant", "line_number": 7 } ] }
//! ```
//!
//! A file that is not such an object fails as a whole, as does one where
//! two entries of a category share an ordinal. Otherwise a malformed entry
//! only fails itself.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::run_config::{RunConfiguration, StepSchedule};
use crate::types::{RunId, StepIndex};

/// One prompt of the collection with optional schedule overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub prompt: String,
    /// Identifying ordinal of the entry.
    #[serde(alias = "ordinal")]
    pub line_number: u32,
    #[serde(default)]
    pub restart_steps: Option<Vec<StepIndex>>,
    #[serde(default)]
    pub refinement_step: Option<StepIndex>,
    #[serde(default)]
    pub total_steps: Option<StepIndex>,
    #[serde(default)]
    pub guidance_scale: Option<f64>,
}

impl PromptEntry {
    /// Overlay this entry's overrides onto `defaults`.
    pub fn schedule(&self, defaults: &StepSchedule) -> StepSchedule {
        StepSchedule {
            total_steps: self.total_steps.unwrap_or(defaults.total_steps),
            guidance_scale: self.guidance_scale.unwrap_or(defaults.guidance_scale),
            refinement_step: self.refinement_step.unwrap_or(defaults.refinement_step),
            checkpoint_steps: self
                .restart_steps
                .clone()
                .unwrap_or_else(|| defaults.checkpoint_steps.clone()),
        }
    }
}

/// An entry as read from the file, decoded or not.
#[derive(Debug, Clone)]
pub struct LoadedEntry {
    pub category: String,
    /// 0-based position within the category array.
    pub position: usize,
    pub entry: Result<PromptEntry, CoreError>,
}

impl LoadedEntry {
    /// Ordinal used for the run id: the entry's `line_number`, or its
    /// 1-based position when the entry could not be decoded.
    pub fn ordinal(&self) -> u32 {
        match &self.entry {
            Ok(entry) => entry.line_number,
            Err(_) => u32::try_from(self.position + 1).unwrap_or(u32::MAX),
        }
    }

    /// Build the validated run configuration for this entry.
    pub fn to_run_configuration(
        &self,
        defaults: &StepSchedule,
    ) -> Result<RunConfiguration, CoreError> {
        let entry = self.entry.as_ref().map_err(Clone::clone)?;
        let run_id = RunId::new(self.category.clone(), entry.line_number)?;
        RunConfiguration::new(run_id, entry.prompt.clone(), entry.schedule(defaults))
    }
}

/// All prompts of a batch, grouped by category in lexicographic order.
#[derive(Debug, Clone, Default)]
pub struct PromptCollection {
    categories: BTreeMap<String, Vec<serde_json::Value>>,
}

impl PromptCollection {
    /// Parse a collection. Fails when two entries of one category resolve
    /// to the same ordinal, since they would share a run directory.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let categories = serde_json::from_str(json)
            .map_err(|e| CoreError::Configuration(format!("Invalid prompt collection: {e}")))?;
        let collection = Self { categories };
        collection.check_unique_ordinals()?;
        Ok(collection)
    }

    fn check_unique_ordinals(&self) -> Result<(), CoreError> {
        for (category, values) in &self.categories {
            let mut seen = HashMap::with_capacity(values.len());
            for (position, value) in values.iter().enumerate() {
                let ordinal = decode(category, position, value).ordinal();
                if let Some(first) = seen.insert(ordinal, position) {
                    return Err(CoreError::Configuration(format!(
                        "Entries {first} and {position} in category '{category}' share ordinal {ordinal}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!(
                "Cannot read prompt collection {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    /// Number of entries across all categories.
    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in processing order: categories sorted by tag, entries in
    /// file order.
    pub fn entries(&self) -> Vec<LoadedEntry> {
        self.categories
            .iter()
            .flat_map(|(category, values)| {
                values
                    .iter()
                    .enumerate()
                    .map(move |(position, value)| decode(category, position, value))
            })
            .collect()
    }
}

fn decode(category: &str, position: usize, value: &serde_json::Value) -> LoadedEntry {
    LoadedEntry {
        category: category.to_string(),
        position,
        entry: serde_json::from_value(value.clone()).map_err(|e| {
            CoreError::Configuration(format!(
                "Invalid entry {position} in category '{category}': {e}"
            ))
        }),
    }
}
