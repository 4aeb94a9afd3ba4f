//! Domain error type shared by the pure modules of this crate.

/// Errors raised by configuration, validation, and value constructors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid latent state: {0}")]
    InvalidLatent(String),

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
