//! Generation engine adapters.
//!
//! [`GenerationEngine`] is the seam between the refinement loop and the
//! iterative denoising backend. Two implementations ship here:
//! [`HttpEngine`] talks to a diffusion sidecar process, and
//! [`SimulatedEngine`] runs a deterministic walk in process.
//!
//! Engines return the latents captured at requested checkpoint steps in
//! [`EngineOutput::checkpoints`]; persisting them is the caller's job.

pub mod backoff;
pub mod error;
pub mod http;
pub mod request;
pub mod simulated;
pub mod wire;

use async_trait::async_trait;

pub use error::EngineError;
pub use http::HttpEngine;
pub use request::{EngineOutput, EngineRequest, GenerateRequest, ResumeRequest};
pub use simulated::{SimulatedConfig, SimulatedEngine};

/// An iterative denoising backend.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Execute one request.
    async fn run(&self, request: EngineRequest) -> Result<EngineOutput, EngineError>;

    /// Full run from pure noise.
    async fn generate(&self, request: GenerateRequest) -> Result<EngineOutput, EngineError> {
        self.run(EngineRequest::Generate(request)).await
    }

    /// Continue from a stored latent with new conditioning.
    async fn resume(&self, request: ResumeRequest) -> Result<EngineOutput, EngineError> {
        self.run(EngineRequest::Resume(request)).await
    }
}
