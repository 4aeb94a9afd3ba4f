//! HTTP client for a diffusion sidecar process.
//!
//! The sidecar owns the model weights and the accelerator; this adapter
//! only moves prompts, latents, and images. Calls the sidecar never
//! started (connection refused, HTTP 503) are retried with exponential
//! backoff. A timed-out call is reported at once and never sent again.

use std::time::Duration;

use async_trait::async_trait;

use crate::backoff::{next_delay, BackoffConfig};
use crate::error::EngineError;
use crate::request::{EngineOutput, EngineRequest};
use crate::wire::{encode_request, EngineResponse, ErrorBody, DIVERGED_CODE};
use crate::GenerationEngine;

/// HTTP client for a single diffusion sidecar.
pub struct HttpEngine {
    client: reqwest::Client,
    api_url: String,
    backoff: BackoffConfig,
}

impl HttpEngine {
    /// Create a client for a sidecar.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    /// * `timeout` - Per-call timeout; a full generation can take minutes.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    async fn send_once(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<EngineResponse, EngineError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    EngineError::Unavailable(e.to_string())
                } else {
                    EngineError::Request(e)
                }
            })?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Map non-2xx responses to [`EngineError`]: 503 is `Unavailable`, an
    /// `error: "diverged"` body is `Diverged`, anything else `ApiError`.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(EngineError::Unavailable(body));
        }
        if let Ok(error) = serde_json::from_str::<ErrorBody>(&body) {
            if error.error == DIVERGED_CODE {
                return Err(EngineError::Diverged(
                    error.detail.unwrap_or_else(|| "reported by engine".to_string()),
                ));
            }
        }
        Err(EngineError::ApiError {
            status: status.as_u16(),
            body,
        })
    }

    async fn parse_response(response: reqwest::Response) -> Result<EngineResponse, EngineError> {
        let response = Self::ensure_success(response).await?;
        response
            .json::<EngineResponse>()
            .await
            .map_err(|e| EngineError::Backend(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl GenerationEngine for HttpEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn run(&self, request: EngineRequest) -> Result<EngineOutput, EngineError> {
        request.validate()?;
        let (path, body) = encode_request(&request)?;

        let mut delay = self.backoff.initial_delay;
        let mut attempt = 1u32;
        let response = loop {
            match self.send_once(path, &body).await {
                Ok(response) => break response,
                Err(e) if e.is_transient() && attempt < self.backoff.max_attempts => {
                    tracing::warn!(
                        api_url = %self.api_url,
                        kind = request.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Engine call failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, &self.backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let output = response.into_output(&request)?;
        output.ensure_finite()?;
        Ok(output)
    }
}
