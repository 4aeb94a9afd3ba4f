//! Batch processing of a prompt collection.
//!
//! Prompts run with bounded concurrency. A failure in one prompt
//! (configuration, missing checkpoint, diverged generation) is recorded in
//! the batch report and never stops the others. When the cancellation
//! token fires, prompts that have not started are skipped and in-flight
//! prompts finish.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use refine_core::naming::BATCH_REPORT_FILE;
use refine_core::prompts::{LoadedEntry, PromptCollection};
use refine_core::StepSchedule;

use crate::artifacts::RunArtifacts;
use crate::controller::RefinementController;
use crate::error::PipelineError;
use crate::outcome::TerminalState;

/// Batch-wide settings.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub output_dir: PathBuf,
    /// Schedule used where an entry has no overrides.
    pub defaults: StepSchedule,
    /// Prompts processed in parallel.
    pub concurrency: usize,
}

/// Result of one prompt in the batch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryStatus {
    Completed {
        terminal: TerminalState,
        resumes: usize,
        images_produced: usize,
        final_image: String,
        placeholder_rounds: Vec<usize>,
    },
    Failed {
        error: String,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub category: String,
    pub ordinal: u32,
    /// Run directory relative to the output root.
    pub run_dir: String,
    #[serde(flatten)]
    pub status: EntryStatus,
}

/// Summary written to `batch_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub accepted: usize,
    pub exhausted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.accepted + self.exhausted
    }

    /// Write the report into `output_dir`.
    pub async fn write(&self, output_dir: &Path) -> Result<PathBuf, PipelineError> {
        let path = output_dir.join(BATCH_REPORT_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| PipelineError::Artifact {
                path: output_dir.to_path_buf(),
                source,
            })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| PipelineError::Artifact {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

/// Runs every prompt of a collection through a shared controller.
pub struct BatchRunner {
    controller: Arc<RefinementController>,
    settings: BatchSettings,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(
        controller: Arc<RefinementController>,
        settings: BatchSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller,
            settings,
            cancel,
        }
    }

    /// Process the whole collection and write `batch_report.json`.
    pub async fn run(&self, collection: &PromptCollection) -> Result<BatchReport, PipelineError> {
        let batch_id = Uuid::now_v7();
        let started_at = Utc::now();
        let entries = collection.entries();
        let concurrency = self.settings.concurrency.max(1);

        tracing::info!(
            %batch_id,
            prompts = entries.len(),
            concurrency,
            output_dir = %self.settings.output_dir.display(),
            "Starting batch",
        );

        let results: Vec<BatchEntry> = stream::iter(entries.iter())
            .map(|entry| self.process(entry))
            .buffered(concurrency)
            .collect()
            .await;

        let mut report = BatchReport {
            batch_id,
            started_at,
            finished_at: Utc::now(),
            total: results.len(),
            accepted: 0,
            exhausted: 0,
            failed: 0,
            skipped: 0,
            entries: Vec::new(),
        };
        for entry in &results {
            match &entry.status {
                EntryStatus::Completed { terminal, .. } => match terminal {
                    TerminalState::Accepted { .. } => report.accepted += 1,
                    TerminalState::Exhausted => report.exhausted += 1,
                },
                EntryStatus::Failed { .. } => report.failed += 1,
                EntryStatus::Skipped { .. } => report.skipped += 1,
            }
        }
        report.entries = results;

        let path = report.write(&self.settings.output_dir).await?;
        tracing::info!(
            %batch_id,
            accepted = report.accepted,
            exhausted = report.exhausted,
            failed = report.failed,
            skipped = report.skipped,
            report = %path.display(),
            "Batch finished",
        );
        Ok(report)
    }

    async fn process(&self, loaded: &LoadedEntry) -> BatchEntry {
        let ordinal = loaded.ordinal();
        let run_dir = format!("{}/prompt_{ordinal:03}", loaded.category);
        let entry = |status| BatchEntry {
            category: loaded.category.clone(),
            ordinal,
            run_dir: run_dir.clone(),
            status,
        };

        if self.cancel.is_cancelled() {
            return entry(EntryStatus::Skipped {
                reason: "batch cancelled".to_string(),
            });
        }

        match self.run_entry(loaded).await {
            Ok(status) => entry(status),
            Err(e) => {
                tracing::error!(run_dir = %run_dir, error = %e, "Prompt failed");
                entry(EntryStatus::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    async fn run_entry(&self, loaded: &LoadedEntry) -> Result<EntryStatus, PipelineError> {
        let config = loaded.to_run_configuration(&self.settings.defaults)?;
        let artifacts = RunArtifacts::create(&self.settings.output_dir, config.run_id()).await?;
        let outcome = self.controller.run(&config, &artifacts).await?;

        Ok(EntryStatus::Completed {
            terminal: outcome.terminal,
            resumes: outcome.resume_count(),
            images_produced: outcome.images_produced(),
            final_image: outcome.final_image.clone(),
            placeholder_rounds: outcome.placeholder_rounds(),
        })
    }
}
