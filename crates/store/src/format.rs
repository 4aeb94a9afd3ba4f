//! Safetensors encoding of a single latent checkpoint.
//!
//! A checkpoint file holds one `F32` tensor named `latents` plus string
//! metadata recording the run and step it belongs to. Values are stored as
//! raw little-endian bytes, so a read returns the exact bit pattern that
//! was written.

use std::collections::HashMap;

use refine_core::{LatentState, RunId, StepIndex};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;

use crate::error::StoreError;

/// Tensor name inside a checkpoint file.
pub const LATENTS_TENSOR: &str = "latents";

const META_RUN_ID: &str = "run_id";
const META_STEP: &str = "step";

/// Encode a latent as a safetensors byte buffer.
pub fn encode(run_id: &RunId, step: StepIndex, state: &LatentState) -> Result<Vec<u8>, StoreError> {
    let bytes = state.to_le_bytes();
    let view = TensorView::new(Dtype::F32, state.shape().to_vec(), &bytes)
        .map_err(|e| StoreError::Format(format!("cannot build tensor view: {e}")))?;

    let metadata = HashMap::from([
        (META_RUN_ID.to_string(), run_id.to_string()),
        (META_STEP.to_string(), step.to_string()),
    ]);

    safetensors::serialize([(LATENTS_TENSOR, view)], &Some(metadata))
        .map_err(|e| StoreError::Format(format!("cannot serialize checkpoint: {e}")))
}

/// Decode a checkpoint buffer, checking that it belongs to `step`.
pub fn decode(step: StepIndex, bytes: &[u8]) -> Result<LatentState, StoreError> {
    let (_, metadata) = SafeTensors::read_metadata(bytes)
        .map_err(|e| StoreError::Format(format!("cannot read checkpoint header: {e}")))?;
    if let Some(recorded) = metadata.metadata().as_ref().and_then(|m| m.get(META_STEP)) {
        if recorded != &step.to_string() {
            return Err(StoreError::Format(format!(
                "checkpoint header records step {recorded}, expected {step}"
            )));
        }
    }

    let tensors = SafeTensors::deserialize(bytes)
        .map_err(|e| StoreError::Format(format!("cannot parse checkpoint: {e}")))?;
    let view = tensors
        .tensor(LATENTS_TENSOR)
        .map_err(|e| StoreError::Format(format!("missing '{LATENTS_TENSOR}' tensor: {e}")))?;
    if view.dtype() != Dtype::F32 {
        return Err(StoreError::Format(format!(
            "expected F32 latents, found {:?}",
            view.dtype()
        )));
    }

    LatentState::from_le_bytes(view.shape().to_vec(), view.data())
        .map_err(|e| StoreError::Format(e.to_string()))
}
