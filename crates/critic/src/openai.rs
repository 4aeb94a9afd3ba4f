// OpenAI-compatible vision chat backend
//
// Works with any server exposing `POST /v1/chat/completions` with image
// content parts (vLLM, llama.cpp server, OpenAI itself).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use refine_core::ImageData;

use crate::error::CritiqueError;
use crate::retry::{with_retry, RetryPolicy};
use crate::CritiqueBackend;

/// Default generation budget for one critique.
pub const DEFAULT_MAX_TOKENS: u32 = 128;

/// Vision-language critique model behind an OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiVisionBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl OpenAiVisionBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CritiqueError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn to_request(&self, instruction: &str, image: &ImageData) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.to_data_uri(),
                        },
                    },
                    ContentPart::Text {
                        text: instruction.to_string(),
                    },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        }
    }

    async fn complete_once(&self, request: &ChatRequest) -> Result<String, CritiqueError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut builder = self.client.post(url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CritiqueError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(CritiqueError::EmptyResponse)
    }
}

#[async_trait]
impl CritiqueBackend for OpenAiVisionBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, instruction: &str, image: &ImageData) -> Result<String, CritiqueError> {
        let request = self.to_request(instruction, image);
        tracing::debug!(
            model = %self.model,
            image_bytes = image.bytes().len(),
            instruction_chars = instruction.len(),
            "Sending critique request",
        );
        with_retry(
            self.retry,
            || self.complete_once(&request),
            CritiqueError::is_retryable,
        )
        .await
    }
}

// ---- wire types ----

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
