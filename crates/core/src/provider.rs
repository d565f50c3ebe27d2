//! Provider trait: the abstraction over structured-generation backends.
//!
//! A Provider knows how to send a (system, user) prompt pair to an LLM with
//! the output constrained to an [`OutputSchema`], and how to relay the
//! generated JSON text back as a stream of fragments.
//!
//! Implementations: OpenAI-compatible (`json_schema` response format),
//! Anthropic (forced tool use).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::schema::OutputSchema;

/// Channel buffer between a provider's reader task and its consumer.
pub const STREAM_BUFFER: usize = 64;

/// A single structured generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The model to use (e.g., "gpt-4o-mini", "claude-sonnet-4-20250514")
    pub model: String,

    /// Instructional preamble and facts block
    pub system: String,

    /// The user's question, followed by any rendered history
    pub user: String,

    /// Output shape the model is constrained to
    pub schema: OutputSchema,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk of a structured generation stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationChunk {
    /// Raw JSON text appended to the output document
    #[serde(default)]
    pub json_delta: String,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl GenerationChunk {
    /// A fragment of the output document.
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            json_delta: text.into(),
            done: false,
            usage: None,
        }
    }

    /// The terminating chunk.
    pub fn done(usage: Option<Usage>) -> Self {
        Self {
            json_delta: String::new(),
            done: true,
            usage,
        }
    }
}

/// Receiving half of a generation stream.
///
/// Dropping it signals the provider's reader task to stop.
pub type GenerationStream = mpsc::Receiver<Result<GenerationChunk, ProviderError>>;

/// The core Provider trait.
///
/// The completion client calls `generate()` exactly once per answer without
/// knowing which backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Open a schema-constrained generation and stream its JSON text.
    ///
    /// Errors returned here happen before any output (connection refused,
    /// auth failure, non-200 status). Errors after the stream opened arrive
    /// as `Err` items on the channel. A well-behaved stream ends with exactly
    /// one chunk whose `done` flag is set.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationStream, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
