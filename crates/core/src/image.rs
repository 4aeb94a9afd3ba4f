//! Encoded image payloads exchanged between the engine, the critique
//! oracle, and the artifact writer.
//!
//! Only the container header is inspected (format sniffing and
//! dimension extraction); pixel data is never decoded here.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{ImageFormat, ImageReader};

use crate::error::CoreError;

/// An encoded image (PNG, JPEG, or WebP) with its sniffed format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    bytes: Vec<u8>,
    format: ImageFormat,
}

impl ImageData {
    /// Wrap encoded bytes, rejecting anything whose header is not a
    /// supported image format.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CoreError> {
        let format = image::guess_format(&bytes)
            .map_err(|e| CoreError::InvalidImage(format!("unrecognized image header: {e}")))?;
        match format {
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP => Ok(Self { bytes, format }),
            other => Err(CoreError::InvalidImage(format!(
                "unsupported image format {other:?}"
            ))),
        }
    }

    /// Decode a standard base64 string into an image.
    pub fn from_base64(encoded: &str) -> Result<Self, CoreError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CoreError::InvalidImage(format!("invalid base64: {e}")))?;
        Self::from_bytes(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// MIME type matching the sniffed format.
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    /// Standard base64 of the encoded bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:` URI suitable for vision chat APIs.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.to_base64())
    }

    /// Width and height read from the container header.
    pub fn dimensions(&self) -> Result<(u32, u32), CoreError> {
        ImageReader::with_format(Cursor::new(&self.bytes), self.format)
            .into_dimensions()
            .map_err(|e| CoreError::InvalidImage(format!("cannot read dimensions: {e}")))
    }
}
