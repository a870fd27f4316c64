//! Reviewer backed by an OpenAI-compatible chat completion API.
//!
//! Defaults to OpenRouter; any endpoint exposing `/chat/completions` with
//! bearer authentication works.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    build_review_prompt, changed_source_files, parse_review_response, Review, ReviewRequest,
    Reviewer, NO_SOURCE_FILES,
};
use crate::error::ReviewError;

/// Default API base URL.
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Default review model.
pub const DEFAULT_REVIEW_MODEL: &str = "anthropic/claude-sonnet-4.5";

const MAX_TOKENS: u32 = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Code reviewer that asks a language model for a `{score, review}` verdict.
pub struct LlmReviewer {
    api_base: String,
    api_key: String,
    model: String,
    http_client: Client,
}

impl LlmReviewer {
    /// Creates a reviewer for OpenRouter with the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ReviewError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ReviewError::RequestFailed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_REVIEW_MODEL.to_string(),
            http_client,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn complete(&self, prompt: String) -> Result<String, ReviewError> {
        let api_request = ApiRequest {
            model: &self.model,
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            temperature: 0.0,
            max_tokens: MAX_TOKENS,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let http_response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://langbench.local")
            .header("X-Title", "langbench")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ReviewError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);
            return Err(ReviewError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| ReviewError::Parse(format!("Failed to parse API response: {}", e)))?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ReviewError::Parse("response contained no choices".to_string()))
    }
}

#[async_trait]
impl Reviewer for LlmReviewer {
    fn model(&self) -> &str {
        &self.model
    }

    async fn review(&self, request: &ReviewRequest) -> Result<Review, ReviewError> {
        let files = changed_source_files(&request.workspace, request.scaffold.as_deref());
        if files.is_empty() {
            return Ok(Review {
                score: 0,
                review: NO_SOURCE_FILES.to_string(),
            });
        }

        debug!(
            model = %self.model,
            files = files.len(),
            workspace = %request.workspace.display(),
            "Requesting code review"
        );
        let prompt = build_review_prompt(&request.spec, &request.rubric, &files);
        let content = self.complete(prompt).await?;
        parse_review_response(&content)
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
