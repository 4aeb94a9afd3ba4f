/// Errors from a [`crate::CritiqueBackend`].
///
/// These never escape [`crate::CritiqueOracle::critique`]; the oracle
/// turns them into a synthetic continue verdict.
#[derive(Debug, thiserror::Error)]
pub enum CritiqueError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Critique API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// The response carried no message text.
    #[error("Critique response contained no text")]
    EmptyResponse,

    #[error("Critique backend error: {0}")]
    Backend(String),
}

impl CritiqueError {
    /// Whether the call can be sent again: the connection never opened or
    /// the server reported a 5xx. Timeouts and 4xx replies are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect(),
            Self::ApiError { status, .. } => *status >= 500,
            Self::EmptyResponse | Self::Backend(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> CritiqueError {
        CritiqueError::ApiError {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn only_server_errors_are_retryable() {
        assert!(api(500).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(401).is_retryable());
        assert!(!api(429).is_retryable());
        assert!(!CritiqueError::EmptyResponse.is_retryable());
        assert!(!CritiqueError::Backend("down".to_string()).is_retryable());
    }
}
