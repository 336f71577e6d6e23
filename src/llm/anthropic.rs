//! HTTP client for the Anthropic Messages API.
//!
//! Handles request construction, authentication headers, and a single retry
//! on transient errors (429, 500, 503, 529). Non-streaming only — the
//! pipeline needs exactly one JSON-object completion per invocation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

/// Base URL for the Anthropic Messages API.
const API_BASE_URL: &str = "https://api.anthropic.com/v1/messages";

/// Default max output tokens when the request doesn't set one.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    type_: String,
    message: String,
}

// ── Provider ────────────────────────────────────────────────────────

/// Anthropic Messages API backend.
pub struct AnthropicProvider {
    client: reqwest::Client,
    model: String,
    max_retries: u32,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new backend with authentication headers baked in.
    pub fn new(api_key: &str, api_version: &str, model: String) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key).map_err(|_| LlmError::AuthFailed {
                provider: "anthropic".to_string(),
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(api_version).map_err(|e| LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("invalid API version header value: {e}"),
            })?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            model,
            max_retries: 1,
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Overrides the base URL (for testing with wiremock).
    #[cfg(test)]
    fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn build_request(&self, request: &CompletionRequest) -> MessageRequest {
        // Anthropic takes the system instruction separately from the turns.
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();
        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.clone()),
                Role::User => messages.push(ApiMessage {
                    role: "user",
                    content: msg.content.clone(),
                }),
                Role::Assistant => messages.push(ApiMessage {
                    role: "assistant",
                    content: msg.content.clone(),
                }),
            }
        }

        MessageRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            temperature: request.temperature,
            messages,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request);

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, "retrying completion request after transient error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let response = self
                .client
                .post(&self.base_url)
                .json(&body)
                .send()
                .await
                .map_err(|e| LlmError::RequestFailed {
                    provider: "anthropic".to_string(),
                    reason: format!("HTTP request failed: {e}"),
                })?;

            let status = response.status();
            debug!(status = %status, attempt, "completion response received");

            if status.is_success() {
                let text = response.text().await.map_err(|e| LlmError::RequestFailed {
                    provider: "anthropic".to_string(),
                    reason: format!("failed to read response body: {e}"),
                })?;
                let parsed: MessageResponse =
                    serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                        provider: "anthropic".to_string(),
                        reason: format!("failed to parse API response: {e}"),
                    })?;

                let content = parsed
                    .content
                    .iter()
                    .filter(|block| block.block_type == "text")
                    .map(|block| block.text.as_str())
                    .collect::<Vec<_>>()
                    .join("");

                let finish_reason = match parsed.stop_reason.as_deref() {
                    Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
                    Some("max_tokens") => FinishReason::MaxTokens,
                    _ => FinishReason::Other,
                };

                return Ok(CompletionResponse {
                    content,
                    input_tokens: parsed.usage.input_tokens,
                    output_tokens: parsed.usage.output_tokens,
                    finish_reason,
                });
            }

            if is_transient_error(status) && attempt < self.max_retries {
                let text = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %text, "transient error, will retry");
                last_error = Some(LlmError::RequestFailed {
                    provider: "anthropic".to_string(),
                    reason: format!("API returned {status}: {text}"),
                });
                continue;
            }

            // Non-transient error or exhausted retries.
            let text = response.text().await.unwrap_or_default();
            let reason = if let Ok(api_err) = serde_json::from_str::<ApiErrorResponse>(&text) {
                format!("{}: {}", api_err.error.type_, api_err.error.message)
            } else {
                format!("API returned {status}: {text}")
            };
            return Err(LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason,
            });
        }

        Err(last_error.unwrap_or_else(|| LlmError::RequestFailed {
            provider: "anthropic".to_string(),
            reason: "completion request failed after retries".to_string(),
        }))
    }
}

/// True for HTTP status codes that indicate transient errors worth retrying.
fn is_transient_error(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 503 | 529)
}
