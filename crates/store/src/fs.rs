//! Filesystem-backed checkpoint store.
//!
//! Layout: `<root>/<category>/prompt_<ordinal:03>/latents_<step>.safetensors`.
//! Files are written to a temporary sibling, synced, and then linked into
//! place without overwriting, so a reader never observes a partial
//! checkpoint and a second write for the same step fails.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use refine_core::naming::checkpoint_file;
use refine_core::{LatentState, RunId, StepIndex};
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::{format, CheckpointStore};

/// Checkpoint store rooted at an output directory.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the checkpoint file for `(run_id, step)`.
    pub fn checkpoint_path(&self, run_id: &RunId, step: StepIndex) -> PathBuf {
        self.root
            .join(run_id.relative_dir())
            .join(checkpoint_file(step))
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn put(&self, run_id: &RunId, step: StepIndex, state: &LatentState) -> Result<(), StoreError> {
        let path = self.checkpoint_path(run_id, step);
        if path.exists() {
            return Err(StoreError::DuplicateCheckpoint {
                run_id: run_id.clone(),
                step,
            });
        }

        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Format(format!("no parent for {}", path.display())))?;
        std::fs::create_dir_all(dir)?;

        let encoded = format::encode(run_id, step, state)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                tracing::debug!(
                    run_id = %run_id,
                    step,
                    bytes = encoded.len(),
                    path = %path.display(),
                    "Checkpoint written"
                );
                Ok(())
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::DuplicateCheckpoint {
                    run_id: run_id.clone(),
                    step,
                })
            }
            Err(e) => Err(StoreError::Io(e.error)),
        }
    }

    fn get(&self, run_id: &RunId, step: StepIndex) -> Result<LatentState, StoreError> {
        let path = self.checkpoint_path(run_id, step);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::CheckpointNotFound {
                    run_id: run_id.clone(),
                    step,
                });
            }
            Err(e) => return Err(e.into()),
        };
        format::decode(step, &bytes)
    }

    fn contains(&self, run_id: &RunId, step: StepIndex) -> bool {
        self.checkpoint_path(run_id, step).is_file()
    }
}
