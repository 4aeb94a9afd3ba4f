//! Refinement event bus and event log.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`RefinementEvent`]: one controller transition for one run.
//! - [`EventLog`]: background task appending every event to a JSON-lines
//!   file.

pub mod bus;
pub mod persistence;

pub use bus::{EventBus, EventKind, RefinementEvent};
pub use persistence::EventLog;
