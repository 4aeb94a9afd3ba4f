//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the batch runner,
//! every controller, and the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use refine_core::{RunId, StepIndex, Verdict};

// ---------------------------------------------------------------------------
// RefinementEvent
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        prompt: String,
        category: String,
        checkpoint_steps: Vec<StepIndex>,
    },
    CheckpointSaved {
        step: StepIndex,
        digest: String,
    },
    CritiqueReceived {
        round: usize,
        verdict: Verdict,
        refined_prompt: String,
        /// The critique carried no usable refinement.
        placeholder: bool,
    },
    Resumed {
        round: usize,
        from_step: StepIndex,
        prompt: String,
    },
    Accepted {
        round: usize,
    },
    Exhausted {
        rounds: usize,
    },
    RunFailed {
        error: String,
    },
}

impl EventKind {
    /// Dot-separated event name, e.g. `"run.accepted"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::CheckpointSaved { .. } => "checkpoint.saved",
            Self::CritiqueReceived { .. } => "critique.received",
            Self::Resumed { .. } => "run.resumed",
            Self::Accepted { .. } => "run.accepted",
            Self::Exhausted { .. } => "run.exhausted",
            Self::RunFailed { .. } => "run.failed",
        }
    }

    /// Whether the run ends with this event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Accepted { .. } | Self::Exhausted { .. } | Self::RunFailed { .. }
        )
    }
}

/// One event of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementEvent {
    /// `<category>/prompt_<ordinal>`.
    pub run_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl RefinementEvent {
    pub fn new(run_id: &RunId, kind: EventKind) -> Self {
        Self {
            run_id: run_id.to_string(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<RefinementEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: RefinementEvent) {
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Shorthand for publishing `kind` for `run_id`.
    pub fn emit(&self, run_id: &RunId, kind: EventKind) {
        self.publish(RefinementEvent::new(run_id, kind));
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<RefinementEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
