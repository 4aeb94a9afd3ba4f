//! JSON bodies exchanged with the diffusion sidecar.
//!
//! Requests go to `POST /generate` and `POST /resume`. Latents travel as
//! base64 of little-endian `f32` bytes with an explicit shape.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use refine_core::{ImageData, LatentState, StepIndex};

use crate::error::EngineError;
use crate::request::{EngineOutput, EngineRequest};

/// Only dtype understood on the wire.
pub const LATENT_DTYPE: &str = "F32";

/// Error code the sidecar uses for a numerically diverged run.
pub const DIVERGED_CODE: &str = "diverged";

/// A latent tensor as sent over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireLatent {
    pub shape: Vec<usize>,
    pub dtype: String,
    /// Base64 little-endian values.
    pub data: String,
}

impl WireLatent {
    pub fn encode(state: &LatentState) -> Self {
        Self {
            shape: state.shape().to_vec(),
            dtype: LATENT_DTYPE.to_string(),
            data: STANDARD.encode(state.to_le_bytes()),
        }
    }

    pub fn decode(&self) -> Result<LatentState, EngineError> {
        if self.dtype != LATENT_DTYPE {
            return Err(EngineError::Backend(format!(
                "unsupported latent dtype '{}'",
                self.dtype
            )));
        }
        let bytes = STANDARD
            .decode(&self.data)
            .map_err(|e| EngineError::Backend(format!("invalid latent base64: {e}")))?;
        LatentState::from_le_bytes(self.shape.clone(), &bytes)
            .map_err(|e| EngineError::Backend(e.to_string()))
    }
}

/// Body of `POST /generate`.
#[derive(Debug, Serialize)]
pub struct GenerateBody<'a> {
    pub prompt: &'a str,
    pub num_inference_steps: StepIndex,
    pub guidance_scale: f64,
    pub refinement_step: StepIndex,
    pub checkpoint_steps: &'a [StepIndex],
}

/// Body of `POST /resume`.
#[derive(Debug, Serialize)]
pub struct ResumeBody<'a> {
    pub prompt: &'a str,
    pub num_inference_steps: StepIndex,
    pub guidance_scale: f64,
    pub refinement_step: StepIndex,
    pub resume_step: StepIndex,
    pub latents: WireLatent,
}

/// Endpoint path and JSON body for a request.
pub fn encode_request(request: &EngineRequest) -> Result<(&'static str, serde_json::Value), EngineError> {
    let body = match request {
        EngineRequest::Generate(r) => serde_json::to_value(GenerateBody {
            prompt: &r.prompt,
            num_inference_steps: r.total_steps,
            guidance_scale: r.guidance_scale,
            refinement_step: r.refinement_step,
            checkpoint_steps: &r.checkpoint_steps,
        }),
        EngineRequest::Resume(r) => serde_json::to_value(ResumeBody {
            prompt: &r.prompt,
            num_inference_steps: r.total_steps,
            guidance_scale: r.guidance_scale,
            refinement_step: r.refinement_step,
            resume_step: r.from_step,
            latents: WireLatent::encode(&r.state),
        }),
    }
    .map_err(|e| EngineError::Backend(format!("cannot encode request: {e}")))?;

    let path = match request {
        EngineRequest::Generate(_) => "/generate",
        EngineRequest::Resume(_) => "/resume",
    };
    Ok((path, body))
}

/// One checkpoint in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCheckpoint {
    pub step: StepIndex,
    pub latents: WireLatent,
}

/// Successful response of either endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    /// Base64 final image.
    pub image: String,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub checkpoints: Vec<WireCheckpoint>,
}

impl EngineResponse {
    pub fn into_output(self, request: &EngineRequest) -> Result<EngineOutput, EngineError> {
        let image = ImageData::from_base64(&self.image)
            .map_err(|e| EngineError::Backend(format!("final image: {e}")))?;
        let preview = self
            .preview
            .as_deref()
            .map(ImageData::from_base64)
            .transpose()
            .map_err(|e| EngineError::Backend(format!("preview image: {e}")))?;
        let checkpoints = self
            .checkpoints
            .iter()
            .map(|c| Ok((c.step, c.latents.decode()?)))
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(EngineOutput {
            image,
            preview,
            checkpoints,
            executed: request.executed_steps(),
        })
    }
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub detail: Option<String>,
}
