//! Critique oracle adapters.
//!
//! A [`CritiqueBackend`] sends a rendered instruction plus an image to a
//! vision-language model and returns its free text. The
//! [`CritiqueOracle`] owns template selection and parsing on top of any
//! backend.

pub mod echo;
pub mod error;
pub mod openai;
pub mod oracle;
pub mod retry;
pub mod scripted;

use async_trait::async_trait;

use refine_core::ImageData;

pub use echo::EchoBackend;
pub use error::CritiqueError;
pub use openai::OpenAiVisionBackend;
pub use oracle::CritiqueOracle;
pub use retry::RetryPolicy;
pub use scripted::{ScriptedBackend, ScriptedReply};

/// A vision+text model callable.
#[async_trait]
pub trait CritiqueBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Return the model's raw answer to `instruction` about `image`.
    async fn complete(&self, instruction: &str, image: &ImageData) -> Result<String, CritiqueError>;
}
