use refine_core::StepIndex;

/// Errors from a [`crate::GenerationEngine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A resume was requested past the end of the schedule.
    #[error("Resume step {from_step} exceeds total steps {total_steps}")]
    InvalidResumeStep {
        from_step: StepIndex,
        total_steps: StepIndex,
    },

    /// The request is malformed in some other way (empty prompt, checkpoint
    /// step outside the schedule).
    #[error("Invalid engine request: {0}")]
    InvalidRequest(String),

    /// The backend could not be reached or refused work.
    #[error("Generation engine unavailable: {0}")]
    Unavailable(String),

    /// The numeric process produced non-finite values.
    #[error("Denoising diverged: {0}")]
    Diverged(String),

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Engine API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// The backend answered with something that could not be used.
    #[error("Generation backend error: {0}")]
    Backend(String),
}

impl EngineError {
    /// Whether the request never started on the backend, so sending it
    /// again cannot run the same generation twice. Timeouts are not
    /// transient: the sidecar may still be working on the first call.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Request(e) => e.is_connect(),
            _ => false,
        }
    }
}
