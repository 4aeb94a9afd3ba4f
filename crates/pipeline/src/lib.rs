//! The refinement control loop and batch processing.
//!
//! [`RefinementController`] drives one prompt through generate, critique
//! and resume rounds until the critique accepts or the checkpoint steps
//! run out. [`BatchRunner`] applies it to a whole prompt collection.

pub mod artifacts;
pub mod batch;
pub mod controller;
pub mod error;
pub mod outcome;

pub use artifacts::RunArtifacts;
pub use batch::{BatchEntry, BatchReport, BatchRunner, BatchSettings, EntryStatus};
pub use controller::RefinementController;
pub use error::PipelineError;
pub use outcome::{ResumeRecord, RoundRecord, RunOutcome, TerminalState};
