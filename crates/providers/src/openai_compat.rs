//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Azure-style proxies, vLLM, Ollama and any
//! endpoint that honours `response_format: { type: "json_schema" }` on
//! `/v1/chat/completions`.
//!
//! The output document arrives as ordinary content deltas; each delta is a
//! fragment of the JSON object constrained by the request's schema.

use std::time::Duration;

use async_trait::async_trait;
use fieldsage_core::error::ProviderError;
use fieldsage_core::provider::*;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::sse::{SseLine, SseLines};

/// An OpenAI-compatible structured-output provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Build the chat completions request body.
    fn request_body(request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema.name(),
                    "description": request.schema.description(),
                    "schema": request.schema.json_schema(),
                    "strict": true,
                },
            },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            schema = request.schema.name(),
            "Sending structured streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and forward JSON fragments.
        // It exits as soon as the receiver is dropped, which drops the
        // response and closes the upstream connection.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLines::default();
            let mut state = StreamState::default();

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
                    let SseLine::Data(data) = line else { continue };

                    match state.apply(&data) {
                        Step::Emit(chunk) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        Step::Finished(result) => {
                            let _ = tx.send(result).await;
                            return;
                        }
                        Step::Skip => {}
                        Step::Unparseable(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(state.finish_without_done()).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(e.is_timeout(), e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- Stream decoding ---

/// What one SSE `data:` payload means for the consumer.
#[derive(Debug)]
enum Step {
    Emit(GenerationChunk),
    Finished(Result<GenerationChunk, ProviderError>),
    Skip,
    Unparseable(serde_json::Error),
}

/// Per-stream decoding state.
#[derive(Debug, Default)]
struct StreamState {
    usage: Option<Usage>,
    finish_reason: Option<String>,
    refusal: String,
}

impl StreamState {
    fn apply(&mut self, data: &str) -> Step {
        let data = data.trim();

        // "[DONE]" signals end of stream
        if data == "[DONE]" {
            return Step::Finished(self.finish());
        }

        let stream_resp: StreamResponse = match serde_json::from_str(data) {
            Ok(r) => r,
            Err(e) => return Step::Unparseable(e),
        };

        if let Some(usage) = stream_resp.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let Some(choice) = stream_resp.choices.into_iter().next() else {
            return Step::Skip;
        };

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        if let Some(refusal) = choice.delta.refusal {
            self.refusal.push_str(&refusal);
        }

        match choice.delta.content {
            Some(content) if !content.is_empty() => Step::Emit(GenerationChunk::delta(content)),
            _ => Step::Skip,
        }
    }

    fn finish(&mut self) -> Result<GenerationChunk, ProviderError> {
        if !self.refusal.is_empty() {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message: format!("Model refused to answer: {}", self.refusal),
            });
        }
        Ok(GenerationChunk::done(self.usage.take()))
    }

    fn finish_without_done(&mut self) -> Result<GenerationChunk, ProviderError> {
        if self.finish_reason.is_some() {
            self.finish()
        } else {
            Err(ProviderError::StreamInterrupted(
                "stream ended before completion".into(),
            ))
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
