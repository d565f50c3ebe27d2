//! Structured completion client.
//!
//! Opens one schema-constrained generation per answer and turns the
//! provider's raw JSON fragments into validated snapshots:
//!
//! ```text
//! Provider chunks ──▶ buffer ──▶ parse_partial ──▶ check_partial ──▶ Partial
//!                                                         │
//!                        done chunk ──▶ strict parse ──▶ finalize ──▶ Complete
//! ```
//!
//! The returned stream is lazy and single-pass. Dropping it drops the
//! provider channel receiver, which stops the provider's reader task.

use std::pin::Pin;
use std::sync::Arc;

use fieldsage_core::error::{Error, ProviderError, Result, SchemaViolation};
use fieldsage_core::provider::{GenerationRequest, GenerationStream, Provider};
use fieldsage_core::schema::{AnswerResult, OutputSchema, PartialAnswer};
use futures::Stream;
use tracing::{debug, info};

use crate::assembler::Prompt;
use crate::partial_json::parse_partial;

/// One step of an answer being generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerUpdate {
    /// The answer so far. Each partial differs from the previous one.
    Partial(PartialAnswer),
    /// The finalized answer. Always the last item of a successful stream.
    Complete(AnswerResult),
}

/// Lazy sequence of answer updates. Ends after `Complete` or the first error.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<AnswerUpdate>> + Send>>;

/// Per-request generation parameters.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Client that streams structured answers from a single provider.
pub struct CompletionClient {
    provider: Arc<dyn Provider>,
    settings: GenerationSettings,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn Provider>, settings: GenerationSettings) -> Self {
        Self { provider, settings }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Start generating an answer for `prompt` constrained by `schema`.
    ///
    /// Makes exactly one provider call. Errors returned here happened before
    /// any output was produced.
    pub async fn stream_answer(&self, prompt: Prompt, schema: OutputSchema) -> Result<AnswerStream> {
        let request = GenerationRequest {
            model: self.settings.model.clone(),
            system: prompt.system,
            user: prompt.user,
            schema,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        debug!(
            provider = self.provider.name(),
            model = %request.model,
            schema = schema.name(),
            "Opening structured generation"
        );

        let rx = self.provider.generate(request).await?;
        let decoder = Decoder::new(rx, schema);

        Ok(Box::pin(futures::stream::unfold(decoder, |mut decoder| async move {
            let item = decoder.next_update().await?;
            Some((item, decoder))
        })))
    }
}

/// Accumulates provider output and produces updates.
struct Decoder {
    rx: GenerationStream,
    schema: OutputSchema,
    buffer: String,
    last: Option<PartialAnswer>,
    finished: bool,
}

impl Decoder {
    fn new(rx: GenerationStream, schema: OutputSchema) -> Self {
        Self {
            rx,
            schema,
            buffer: String::new(),
            last: None,
            finished: false,
        }
    }

    async fn next_update(&mut self) -> Option<Result<AnswerUpdate>> {
        if self.finished {
            return None;
        }

        loop {
            let Some(item) = self.rx.recv().await else {
                self.finished = true;
                return Some(Err(ProviderError::StreamInterrupted(
                    "provider closed the stream without completing".into(),
                )
                .into()));
            };

            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            };

            self.buffer.push_str(&chunk.json_delta);

            if chunk.done {
                self.finished = true;
                if let Some(usage) = chunk.usage {
                    info!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        total_tokens = usage.total_tokens,
                        "Generation complete"
                    );
                }
                return Some(self.finalize().map(AnswerUpdate::Complete));
            }

            if chunk.json_delta.is_empty() {
                continue;
            }

            match self.snapshot() {
                Ok(Some(partial)) => return Some(Ok(AnswerUpdate::Partial(partial))),
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Read the buffer leniently. `None` when nothing new is visible.
    fn snapshot(&mut self) -> Result<Option<PartialAnswer>> {
        let Some(value) = parse_partial(&self.buffer)
            .map_err(|e| SchemaViolation::MalformedJson(e.to_string()))?
        else {
            return Ok(None);
        };

        let partial = self.schema.check_partial(&value)?;
        if self.last.as_ref() == Some(&partial) {
            return Ok(None);
        }
        self.last = Some(partial.clone());
        Ok(Some(partial))
    }

    fn finalize(&self) -> Result<AnswerResult> {
        let value: serde_json::Value = serde_json::from_str(&self.buffer)
            .map_err(|e| Error::Schema(SchemaViolation::MalformedJson(e.to_string())))?;
        Ok(self.schema.finalize(&value)?)
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                buffered_bytes = self.buffer.len(),
                "Answer stream dropped before completion, releasing provider stream"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fieldsage_core::provider::{GenerationChunk, STREAM_BUFFER};
    use fieldsage_core::schema::{AssumptionSource, SchemaKind, resolve_schema};
    use futures::StreamExt;
    use std::sync::Mutex;
    use tokio::sync::{mpsc, oneshot};

    /// Replays a fixed list of chunks.
    struct Scripted {
        chunks: Vec<std::result::Result<GenerationChunk, ProviderError>>,
    }

    impl Scripted {
        fn deltas(parts: &[&str]) -> Self {
            let mut chunks: Vec<_> = parts.iter().map(|p| Ok(GenerationChunk::delta(*p))).collect();
            chunks.push(Ok(GenerationChunk::done(None)));
            Self { chunks }
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> std::result::Result<GenerationStream, ProviderError> {
            let (tx, rx) = mpsc::channel(self.chunks.len().max(1));
            for chunk in &self.chunks {
                tx.send(chunk.clone()).await.ok();
            }
            Ok(rx)
        }
    }

    fn client(provider: impl Provider + 'static) -> CompletionClient {
        CompletionClient::new(
            Arc::new(provider),
            GenerationSettings {
                model: "test-model".into(),
                temperature: 0.3,
                max_tokens: None,
            },
        )
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "system".into(),
            user: "user".into(),
        }
    }

    async fn collect(stream: AnswerStream) -> Vec<Result<AnswerUpdate>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn partials_then_complete() {
        let client = client(Scripted::deltas(&[
            r#"{"answer_"#,
            r#"markdown": "**Tar"#,
            r#"get** 70%"#,
            r#""}"#,
        ]));
        let stream = client
            .stream_answer(prompt(), resolve_schema(SchemaKind::Plain))
            .await
            .unwrap();
        let updates: Vec<_> = collect(stream).await.into_iter().map(Result::unwrap).collect();

        let texts: Vec<&str> = updates
            .iter()
            .filter_map(|u| match u {
                AnswerUpdate::Partial(p) => Some(p.answer_text()),
                AnswerUpdate::Complete(_) => None,
            })
            .collect();
        // The first fragment shows only an empty object.
        assert_eq!(texts, vec!["", "**Tar", "**Target** 70%"]);
        assert_eq!(
            updates.last(),
            Some(&AnswerUpdate::Complete(AnswerResult {
                answer_markdown: "**Target** 70%".into(),
                assumptions: vec![],
            }))
        );
    }

    #[tokio::test]
    async fn assumptions_are_finalized() {
        let client = client(Scripted::deltas(&[
            r#"{"answer_markdown": "Use 70%.", "assumptions": [{"text": "Market LTV", "#,
            r#""source": "industry", "citation": null}]}"#,
        ]));
        let stream = client
            .stream_answer(prompt(), resolve_schema(SchemaKind::WithAssumptions))
            .await
            .unwrap();
        let updates = collect(stream).await;
        let Some(Ok(AnswerUpdate::Complete(result))) = updates.last() else {
            panic!("expected completion, got {updates:?}");
        };
        assert_eq!(result.assumptions.len(), 1);
        assert_eq!(result.assumptions[0].source, AssumptionSource::Industry);
        assert_eq!(result.assumptions[0].citation, None);
    }

    #[tokio::test]
    async fn unknown_field_fails_mid_stream() {
        let client = client(Scripted::deltas(&[
            r#"{"answer_markdown": "Hi", "confidence": "hi"#,
            r#"gh"}"#,
        ]));
        let stream = client
            .stream_answer(prompt(), resolve_schema(SchemaKind::Plain))
            .await
            .unwrap();
        let updates = collect(stream).await;
        assert_eq!(updates.len(), 1);
        assert!(matches!(
            &updates[0],
            Err(Error::Schema(SchemaViolation::UnknownField { field, .. })) if field == "confidence"
        ));
    }

    #[tokio::test]
    async fn invalid_source_fails_at_completion() {
        let client = client(Scripted::deltas(&[
            r#"{"answer_markdown": "x", "assumptions": [{"text": "t", "source": "blog", "citation": null}]}"#,
        ]));
        let stream = client
            .stream_answer(prompt(), resolve_schema(SchemaKind::WithAssumptions))
            .await
            .unwrap();
        let updates = collect(stream).await;
        assert!(matches!(updates.first(), Some(Ok(AnswerUpdate::Partial(_)))));
        assert!(matches!(
            updates.last(),
            Some(Err(Error::Schema(SchemaViolation::InvalidSource { .. })))
        ));
    }

    #[tokio::test]
    async fn malformed_output_is_schema_violation() {
        let client = client(Scripted::deltas(&["Sure! Here is your answer"]));
        let stream = client
            .stream_answer(prompt(), resolve_schema(SchemaKind::Plain))
            .await
            .unwrap();
        let updates = collect(stream).await;
        assert_eq!(updates.len(), 1);
        assert!(matches!(
            updates[0],
            Err(Error::Schema(SchemaViolation::MalformedJson(_)))
        ));
    }

    #[tokio::test]
    async fn missing_required_field_at_completion() {
        let client = client(Scripted::deltas(&["{}"]));
        let stream = client
            .stream_answer(prompt(), resolve_schema(SchemaKind::Plain))
            .await
            .unwrap();
        let updates = collect(stream).await;
        assert!(matches!(
            updates.last(),
            Some(Err(Error::Schema(SchemaViolation::MissingField { .. })))
        ));
    }

    #[tokio::test]
    async fn provider_error_mid_stream_ends_sequence() {
        let client = client(Scripted {
            chunks: vec![
                Ok(GenerationChunk::delta(r#"{"answer_markdown": "Par"#)),
                Err(ProviderError::StreamInterrupted("connection reset".into())),
            ],
        });
        let stream = client
            .stream_answer(prompt(), resolve_schema(SchemaKind::Plain))
            .await
            .unwrap();
        let updates = collect(stream).await;
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[0], Ok(AnswerUpdate::Partial(_))));
        assert!(matches!(
            updates[1],
            Err(Error::Provider(ProviderError::StreamInterrupted(_)))
        ));
    }

    #[tokio::test]
    async fn closed_without_done_is_interrupted() {
        let client = client(Scripted {
            chunks: vec![Ok(GenerationChunk::delta(r#"{"answer_markdown": "Par"#))],
        });
        let stream = client
            .stream_answer(prompt(), resolve_schema(SchemaKind::Plain))
            .await
            .unwrap();
        let updates = collect(stream).await;
        assert!(matches!(
            updates.last(),
            Some(Err(Error::Provider(ProviderError::StreamInterrupted(_))))
        ));
    }

    struct Refusing;

    #[async_trait]
    impl Provider for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> std::result::Result<GenerationStream, ProviderError> {
            Err(ProviderError::AuthenticationFailed("bad key".into()))
        }
    }

    #[tokio::test]
    async fn pre_stream_failure_is_returned_directly() {
        let result = client(Refusing)
            .stream_answer(prompt(), resolve_schema(SchemaKind::Plain))
            .await;
        assert!(matches!(
            result,
            Err(Error::Provider(ProviderError::AuthenticationFailed(_)))
        ));
    }

    /// Emits one fragment, then waits until the consumer goes away.
    struct Watching {
        closed: Mutex<Option<oneshot::Sender<()>>>,
    }

    #[async_trait]
    impl Provider for Watching {
        fn name(&self) -> &str {
            "watching"
        }

        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> std::result::Result<GenerationStream, ProviderError> {
            let (tx, rx) = mpsc::channel(STREAM_BUFFER);
            let notify = self.closed.lock().unwrap().take();
            tokio::spawn(async move {
                tx.send(Ok(GenerationChunk::delta(r#"{"answer_markdown": "Hel"#)))
                    .await
                    .ok();
                tx.closed().await;
                if let Some(notify) = notify {
                    notify.send(()).ok();
                }
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn dropping_the_stream_closes_the_provider_channel() {
        let (notify, closed) = oneshot::channel();
        let client = client(Watching {
            closed: Mutex::new(Some(notify)),
        });
        let mut stream = client
            .stream_answer(prompt(), resolve_schema(SchemaKind::Plain))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, AnswerUpdate::Partial(ref p) if p.answer_text() == "Hel"));

        drop(stream);
        tokio::time::timeout(std::time::Duration::from_secs(5), closed)
            .await
            .expect("provider never observed the drop")
            .unwrap();
    }
}
