//! Opaque latent state captured from a denoising run.
//!
//! The control loop never interprets the numbers; it only moves them
//! between the engine and the checkpoint store. Values are `f32` in
//! row-major order with an explicit shape.

use crate::error::CoreError;
use crate::hashing::sha256_hex;

/// Size in bytes of one latent element.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// A multi-dimensional `f32` buffer with its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct LatentState {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl LatentState {
    /// Create a latent, checking that `data` holds exactly `product(shape)`
    /// elements.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, CoreError> {
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(CoreError::InvalidLatent(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Rebuild a latent from little-endian `f32` bytes.
    pub fn from_le_bytes(shape: Vec<usize>, bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() % ELEMENT_SIZE != 0 {
            return Err(CoreError::InvalidLatent(format!(
                "byte length {} is not a multiple of {ELEMENT_SIZE}",
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(ELEMENT_SIZE)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::new(shape, data)
    }

    /// Serialize the values as little-endian `f32` bytes.
    ///
    /// Bit patterns are preserved exactly (including NaN payloads), so
    /// `from_le_bytes(shape, to_le_bytes())` is bit-identical.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.data.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `true` when every element is finite. A diverged denoising run shows
    /// up as NaN or infinite values.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// SHA-256 over the shape and raw bytes, for logs and run reports.
    pub fn digest(&self) -> String {
        let mut buf = Vec::with_capacity(self.shape.len() * 8 + self.data.len() * ELEMENT_SIZE);
        for dim in &self.shape {
            buf.extend_from_slice(&(*dim as u64).to_le_bytes());
        }
        buf.extend(self.to_le_bytes());
        sha256_hex(&buf)
    }

    /// Bit-level equality, which unlike `==` treats identical NaNs as equal.
    pub fn bit_eq(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Number of elements described by `shape`, rejecting empty shapes and
/// overflow.
fn element_count(shape: &[usize]) -> Result<usize, CoreError> {
    if shape.is_empty() {
        return Err(CoreError::InvalidLatent("shape must not be empty".to_string()));
    }
    shape.iter().try_fold(1usize, |acc, dim| {
        acc.checked_mul(*dim)
            .ok_or_else(|| CoreError::InvalidLatent(format!("shape {shape:?} overflows")))
    })
}
