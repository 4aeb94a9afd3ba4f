//! Files produced for one run.
//!
//! Every artifact lives in the run directory
//! `<output_dir>/<category>/prompt_<ordinal:03>/`; names come from
//! [`refine_core::naming`].

use std::path::{Path, PathBuf};

use refine_core::naming::RUN_REPORT_FILE;
use refine_core::{ImageData, RunId};

use crate::error::PipelineError;
use crate::outcome::RunOutcome;

/// Writer for one run directory.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    dir: PathBuf,
}

impl RunArtifacts {
    /// Create (or reuse) the run directory under `output_dir`.
    pub async fn create(output_dir: &Path, run_id: &RunId) -> Result<Self, PipelineError> {
        let dir = output_dir.join(run_id.relative_dir());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| PipelineError::Artifact {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub async fn write_image(&self, name: &str, image: &ImageData) -> Result<PathBuf, PipelineError> {
        self.write_bytes(name, image.bytes()).await
    }

    pub async fn write_text(&self, name: &str, text: &str) -> Result<PathBuf, PipelineError> {
        self.write_bytes(name, text.as_bytes()).await
    }

    /// Copy an existing artifact to a new name.
    pub async fn copy(&self, from: &str, to: &str) -> Result<PathBuf, PipelineError> {
        let target = self.path(to);
        tokio::fs::copy(self.path(from), &target)
            .await
            .map_err(|source| PipelineError::Artifact {
                path: target.clone(),
                source,
            })?;
        Ok(target)
    }

    /// Write `report.json`.
    pub async fn write_report(&self, outcome: &RunOutcome) -> Result<PathBuf, PipelineError> {
        let json = serde_json::to_vec_pretty(outcome)?;
        self.write_bytes(RUN_REPORT_FILE, &json).await
    }

    async fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, PipelineError> {
        let path = self.path(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| PipelineError::Artifact {
                path: path.clone(),
                source,
            })?;
        tracing::trace!(path = %path.display(), bytes = bytes.len(), "Artifact written");
        Ok(path)
    }
}
