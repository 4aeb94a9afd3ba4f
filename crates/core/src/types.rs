//! Shared identifier types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Index of a denoising iteration (0-based) within a run's schedule.
pub type StepIndex = u32;

/// Identifies one image-generation session (one prompt of a batch).
///
/// Rendered as `<category>/prompt_<ordinal:03>`, which doubles as the
/// run's directory relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId {
    category: String,
    ordinal: u32,
}

impl RunId {
    /// Build a run id, rejecting category tags that are not safe path segments.
    pub fn new(category: impl Into<String>, ordinal: u32) -> Result<Self, CoreError> {
        let category = category.into();
        validate_path_segment(&category)?;
        Ok(Self { category, ordinal })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Directory of this run relative to the output root.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(&self.category).join(format!("prompt_{:03}", self.ordinal))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/prompt_{:03}", self.category, self.ordinal)
    }
}

/// Ensure a tag can be used as a single directory name.
fn validate_path_segment(segment: &str) -> Result<(), CoreError> {
    if segment.trim().is_empty() {
        return Err(CoreError::Configuration(
            "Category tag must not be empty".to_string(),
        ));
    }
    if segment == "." || segment == ".." {
        return Err(CoreError::Configuration(format!(
            "Category tag '{segment}' is not a valid directory name"
        )));
    }
    if segment
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(CoreError::Configuration(format!(
            "Category tag '{segment}' contains path separators or control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn display_pads_ordinal() {
        let id = RunId::new("single_object", 7).unwrap();
        assert_eq!(id.to_string(), "single_object/prompt_007");
    }

    #[test]
    fn relative_dir_matches_display() {
        let id = RunId::new("counting", 123).unwrap();
        assert_eq!(id.relative_dir(), PathBuf::from("counting/prompt_123"));
    }

    #[test]
    fn empty_category_rejected() {
        assert_matches!(RunId::new("  ", 1), Err(CoreError::Configuration(_)));
    }

    #[test]
    fn traversal_rejected() {
        assert_matches!(RunId::new("..", 1), Err(CoreError::Configuration(_)));
        assert_matches!(RunId::new("a/b", 1), Err(CoreError::Configuration(_)));
    }
}
