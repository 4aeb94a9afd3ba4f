//! Event log writer.
//!
//! [`EventLog`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! appends every received [`RefinementEvent`] to a JSON-lines file. It runs
//! as a background task and shuts down when the bus is dropped.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use crate::bus::RefinementEvent;

/// Background service appending events to a file.
pub struct EventLog;

impl EventLog {
    /// Run the logging loop until the bus closes. Returns the number of
    /// events written.
    pub async fn run(
        path: PathBuf,
        mut receiver: broadcast::Receiver<RefinementEvent>,
    ) -> std::io::Result<u64> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut written = 0u64;

        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = Self::persist(&mut file, &event).await {
                        tracing::error!(
                            error = %e,
                            event_type = event.kind.event_type(),
                            run_id = %event.run_id,
                            "Failed to persist event"
                        );
                    } else {
                        written += 1;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        skipped = n,
                        "Event log lagged, some events were not persisted"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(path = %path.display(), written, "Event bus closed, event log shutting down");
                    break;
                }
            }
        }
        file.flush().await?;
        Ok(written)
    }

    async fn persist(file: &mut tokio::fs::File, event: &RefinementEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line).await
    }

    /// Read back an event log.
    pub async fn read(path: &Path) -> std::io::Result<Vec<RefinementEvent>> {
        let text = tokio::fs::read_to_string(path).await?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(std::io::Error::from))
            .collect()
    }
}
