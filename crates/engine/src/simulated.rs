//! Deterministic in-process engine.
//!
//! Models denoising as a walk from seeded Gaussian-ish noise toward a
//! target vector derived from the prompt. Each iteration moves the latent
//! a fraction of the way to the target and adds a shrinking, step-seeded
//! perturbation, so results depend on the starting latent, the prompt,
//! and the executed steps only. Images are grayscale renderings of the
//! first latent channel.
//!
//! Used for offline runs and as the engine of the integration tests.

use std::io::Cursor;
use std::ops::Range;
use std::sync::Mutex;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use refine_core::hashing::seed_from_text;
use refine_core::{ImageData, LatentState, StepIndex};

use crate::error::EngineError;
use crate::request::{EngineOutput, EngineRequest};
use crate::GenerationEngine;

/// Default latent layout `[batch, channels, height, width]`.
pub const DEFAULT_LATENT_SHAPE: [usize; 4] = [1, 4, 8, 8];

/// Default edge length of rendered images.
pub const DEFAULT_IMAGE_SIZE: u32 = 64;

/// Amplitude of the per-step perturbation at the first iteration.
const NOISE_SCALE: f32 = 0.1;

/// Configuration of a [`SimulatedEngine`].
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Seed of the initial noise and of the per-step perturbations.
    pub seed: u64,
    pub latent_shape: [usize; 4],
    pub image_size: u32,
    /// Prompts containing this text make the walk diverge.
    pub diverge_marker: Option<String>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            latent_shape: DEFAULT_LATENT_SHAPE,
            image_size: DEFAULT_IMAGE_SIZE,
            diverge_marker: None,
        }
    }
}

/// Record of one call, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedCall {
    pub kind: &'static str,
    pub prompt: String,
    pub executed: Range<StepIndex>,
    /// Number of denoising iterations actually applied.
    pub iterations: usize,
}

/// Engine computing a deterministic latent walk in process.
#[derive(Debug, Default)]
pub struct SimulatedEngine {
    config: SimulatedConfig,
    calls: Mutex<Vec<SimulatedCall>>,
}

impl SimulatedEngine {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<SimulatedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn element_count(&self) -> usize {
        self.config.latent_shape.iter().product()
    }

    fn initial_noise(&self) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        (0..self.element_count())
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect()
    }

    fn target(&self, prompt: &str) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed_from_text(prompt));
        (0..self.element_count())
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect()
    }

    /// Apply iteration `step` of a `total`-step schedule in place.
    fn denoise_step(&self, latent: &mut [f32], target: &[f32], step: StepIndex, total: StepIndex) {
        let remaining = (total - step) as f32;
        let pull = 1.0 / (remaining + 1.0);
        let sigma = NOISE_SCALE * (remaining - 1.0) / total as f32;
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(u64::from(step) + 1));
        for (value, goal) in latent.iter_mut().zip(target) {
            let noise: f32 = rng.random_range(-1.0f32..1.0);
            *value += (goal - *value) * pull + sigma * noise;
        }
    }

    /// Render the first channel of `latent` as a PNG.
    fn render(&self, latent: &[f32]) -> Result<ImageData, EngineError> {
        let [_, _, height, width] = self.config.latent_shape;
        let small = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let v = latent[y as usize * width + x as usize];
            let scaled = ((v.clamp(-1.5, 1.5) + 1.5) / 3.0 * 255.0).round() as u8;
            Luma([scaled])
        });
        let size = self.config.image_size;
        let big = image::imageops::resize(&small, size, size, FilterType::Nearest);

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(big)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| EngineError::Backend(format!("cannot encode image: {e}")))?;
        ImageData::from_bytes(out.into_inner()).map_err(|e| EngineError::Backend(e.to_string()))
    }

    fn snapshot(&self, latent: &[f32]) -> Result<LatentState, EngineError> {
        LatentState::new(self.config.latent_shape.to_vec(), latent.to_vec())
            .map_err(|e| EngineError::Backend(e.to_string()))
    }
}

#[async_trait]
impl GenerationEngine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn run(&self, request: EngineRequest) -> Result<EngineOutput, EngineError> {
        request.validate()?;

        if let Some(marker) = &self.config.diverge_marker {
            if request.prompt().contains(marker.as_str()) {
                return Err(EngineError::Diverged(format!(
                    "latent became non-finite at step {}",
                    request.first_step()
                )));
            }
        }

        let mut latent = match &request {
            EngineRequest::Generate(_) => self.initial_noise(),
            EngineRequest::Resume(r) => {
                if r.state.shape() != self.config.latent_shape.as_slice() {
                    return Err(EngineError::InvalidRequest(format!(
                        "latent shape {:?} does not match engine shape {:?}",
                        r.state.shape(),
                        self.config.latent_shape
                    )));
                }
                r.state.data().to_vec()
            }
        };

        let target = self.target(request.prompt());
        let total = request.total_steps();
        let executed = request.executed_steps();
        let mut preview = None;
        let mut checkpoints = Vec::new();
        let mut iterations = 0usize;

        for step in executed.clone() {
            self.denoise_step(&mut latent, &target, step, total);
            iterations += 1;

            if request.checkpoint_steps().contains(&step) {
                checkpoints.push((step, self.snapshot(&latent)?));
            }
            if step == request.refinement_step() {
                preview = Some(self.render(&latent)?);
            }
        }

        let image = self.render(&latent)?;

        tracing::debug!(
            kind = request.kind(),
            first_step = executed.start,
            iterations,
            checkpoints = checkpoints.len(),
            "Simulated denoising finished",
        );

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SimulatedCall {
                kind: request.kind(),
                prompt: request.prompt().to_string(),
                executed: executed.clone(),
                iterations,
            });

        let output = EngineOutput {
            image,
            preview,
            checkpoints,
            executed,
        };
        output.ensure_finite()?;
        Ok(output)
    }
}
