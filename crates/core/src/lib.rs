//! Domain types and pure logic for the iterative refinement loop.
//!
//! Nothing in this crate performs network I/O or spawns tasks. The store,
//! engine, critic, and pipeline crates build on these types.

pub mod error;
pub mod hashing;
pub mod image;
pub mod latent;
pub mod naming;
pub mod prompts;
pub mod run_config;
pub mod templates;
pub mod types;
pub mod verdict;

pub use error::CoreError;
pub use image::ImageData;
pub use latent::LatentState;
pub use run_config::{RunConfiguration, StepSchedule};
pub use types::{RunId, StepIndex};
pub use verdict::{Critique, CritiqueIssue, Verdict};
