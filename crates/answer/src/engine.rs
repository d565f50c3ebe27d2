//! Answer engine: wires the pipeline for one request.
//!
//! ```text
//! AnswerRequest ──▶ build_prompt ──▶ + history ──▶ + schema instructions
//!                                                        │
//!                               resolve_schema ──▶ CompletionClient::stream_answer
//! ```
//!
//! Built once at startup and shared behind an `Arc`; holds no mutable state.

use std::sync::Arc;

use fieldsage_config::AppConfig;
use fieldsage_core::context::AnswerRequest;
use fieldsage_core::error::Result;
use fieldsage_core::provider::Provider;
use fieldsage_core::schema::{OutputSchema, SchemaKind, resolve_schema};
use tracing::debug;

use crate::assembler::{Prompt, build_prompt};
use crate::completion::{AnswerStream, CompletionClient, GenerationSettings};
use crate::history::{HISTORY_WINDOW, render_history_window};

pub struct AnswerEngine {
    client: CompletionClient,
    default_schema: SchemaKind,
    history_turns: usize,
}

impl AnswerEngine {
    pub fn new(client: CompletionClient) -> Self {
        Self {
            client,
            default_schema: SchemaKind::default(),
            history_turns: HISTORY_WINDOW,
        }
    }

    /// Build an engine for `provider` using the configured model settings.
    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        let settings = GenerationSettings {
            model: config.effective_model().to_string(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
        };
        Self::new(CompletionClient::new(provider, settings))
            .with_default_schema(config.answer.default_schema)
            .with_history_turns(config.answer.history_turns)
    }

    pub fn with_default_schema(mut self, kind: SchemaKind) -> Self {
        self.default_schema = kind;
        self
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.client.provider_name()
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Validate a request and assemble its full prompt and schema.
    ///
    /// Fails with `InvalidRequest` before anything is sent to a provider.
    pub fn prepare(&self, request: &AnswerRequest) -> Result<(Prompt, OutputSchema)> {
        let schema = resolve_schema(request.output_schema.unwrap_or(self.default_schema));
        let history = render_history_window(request.history(), self.history_turns);
        let prompt = build_prompt(request)?
            .with_history(&history)
            .with_instructions(schema.instructions());
        Ok((prompt, schema))
    }

    /// Answer a request as a stream of updates.
    pub async fn answer(&self, request: &AnswerRequest) -> Result<AnswerStream> {
        let (prompt, schema) = self.prepare(request)?;
        debug!(
            schema = %schema.kind(),
            history_messages = request.history().len().min(self.history_turns),
            system_bytes = prompt.system.len(),
            user_bytes = prompt.user.len(),
            "Prompt assembled"
        );
        self.client.stream_answer(prompt, schema).await
    }
}
