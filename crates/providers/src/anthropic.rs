//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//! Structured output is obtained by declaring the output schema as the only
//! tool and forcing the model to call it; the tool input streams back as
//! `input_json_delta` fragments.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via SSE with typed `content_block_delta` events

use std::time::Duration;

use async_trait::async_trait;
use fieldsage_core::error::ProviderError;
use fieldsage_core::provider::*;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::sse::{SseLine, SseLines};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the Messages API request body with the schema as a forced tool.
    fn request_body(request: &GenerationRequest) -> serde_json::Value {
        let tool_name = request.schema.name();
        serde_json::json!({
            "model": request.model,
            "system": request.system,
            "messages": [
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stream": true,
            "tools": [{
                "name": tool_name,
                "description": request.schema.description(),
                "input_schema": request.schema.json_schema(),
            }],
            "tool_choice": { "type": "tool", "name": tool_name },
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            schema = request.schema.name(),
            "Sending forced-tool streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(e.is_timeout(), e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLines::default();
            let mut state = EventState::default();

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!(provider = %provider_name, "Consumer dropped, aborting generation");
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let Some(chunk_result) = next else { break };

                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let err = if e.is_timeout() {
                            ProviderError::Timeout(e.to_string())
                        } else {
                            ProviderError::StreamInterrupted(e.to_string())
                        };
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    // Event names are repeated in each payload's `type`.
                    let SseLine::Data(data) = line else { continue };

                    let event: serde_json::Value = match serde_json::from_str(data.trim()) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match state.apply(&event) {
                        Some(Ok(chunk)) if chunk.done => {
                            let _ = tx.send(Ok(chunk)).await;
                            return;
                        }
                        Some(Err(e)) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                        Some(Ok(chunk)) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        None => {}
                    }
                }
            }

            // Stream ended without message_stop
            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(e.is_timeout(), e.to_string()))?;

        // 200 = works, 401 = bad key, anything else = reachable but error
        Ok(response.status().is_success() || response.status().as_u16() != 401)
    }
}

/// Per-stream decoding state for Anthropic's typed events.
#[derive(Debug, Default)]
struct EventState {
    input_tokens: u32,
    output_tokens: u32,
    in_tool_use: bool,
}

impl EventState {
    /// Translate one event into at most one chunk for the consumer.
    fn apply(&mut self, event: &serde_json::Value) -> Option<Result<GenerationChunk, ProviderError>> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(input) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = input as u32;
                }
                None
            }
            "content_block_start" => {
                self.in_tool_use = event["content_block"]["type"].as_str() == Some("tool_use");
                None
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("input_json_delta") if self.in_tool_use => delta["partial_json"]
                        .as_str()
                        .filter(|p| !p.is_empty())
                        .map(|p| Ok(GenerationChunk::delta(p))),
                    _ => None,
                }
            }
            "content_block_stop" => {
                self.in_tool_use = false;
                None
            }
            "message_delta" => {
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = out as u32;
                }
                None
            }
            "message_stop" => Some(Ok(GenerationChunk::done(Some(Usage {
                prompt_tokens: self.input_tokens,
                completion_tokens: self.output_tokens,
                total_tokens: self.input_tokens + self.output_tokens,
            })))),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown streaming error")
                    .to_string();
                Some(Err(ProviderError::StreamInterrupted(message)))
            }
            _ => None,
        }
    }
}
