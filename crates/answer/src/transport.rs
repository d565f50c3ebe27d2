//! Stream transport: adapts answer updates to what callers receive.
//!
//! Text mode emits only the newly appended part of `answer_markdown`, with
//! no framing. Event mode emits a snapshot per update and exactly one
//! terminal event.

use std::convert::Infallible;
use std::pin::Pin;

use fieldsage_core::error::Result;
use fieldsage_core::schema::{AnswerResult, PartialAnswer};
use futures::stream::Fuse;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{error, warn};

use crate::completion::{AnswerStream, AnswerUpdate};

/// Message sent to callers when an answer fails. Details stay in the logs.
pub const GENERIC_FAILURE: &str = "Failed to get answer";

/// A chunked plain-text response body.
pub type TextBody = Pin<Box<dyn Stream<Item = std::result::Result<String, Infallible>> + Send>>;

/// Turn updates into a plain-text body of answer deltas.
///
/// Waits for the first piece of text before returning, so a failure before
/// any output is returned as `Err`. A failure after output has started is
/// logged and the body ends early.
pub async fn to_response_stream(updates: AnswerStream) -> Result<TextBody> {
    let mut deltas = TextDeltas::new(updates);
    let first = deltas.next_text().await.transpose()?;

    let rest = futures::stream::unfold(deltas, |mut deltas| async move {
        match deltas.next_text().await? {
            Ok(text) => Some((Ok::<_, Infallible>(text), deltas)),
            Err(e) => {
                error!(
                    error = %e,
                    kind = e.kind(),
                    emitted_bytes = deltas.emitted.len(),
                    "Answer failed after output started, closing response"
                );
                None
            }
        }
    });

    Ok(Box::pin(futures::stream::iter(first.map(Ok::<_, Infallible>)).chain(rest)))
}

/// Tracks what has been sent and yields only the new suffix.
struct TextDeltas {
    updates: Fuse<AnswerStream>,
    emitted: String,
}

impl TextDeltas {
    fn new(updates: AnswerStream) -> Self {
        Self {
            updates: updates.fuse(),
            emitted: String::new(),
        }
    }

    /// Next non-empty text delta, the error that ended the stream, or `None`.
    async fn next_text(&mut self) -> Option<Result<String>> {
        while let Some(update) = self.updates.next().await {
            let text = match update {
                Ok(AnswerUpdate::Partial(partial)) => partial.answer_markdown.unwrap_or_default(),
                Ok(AnswerUpdate::Complete(result)) => result.answer_markdown,
                Err(e) => return Some(Err(e)),
            };
            if let Some(delta) = self.extend(&text) {
                return Some(Ok(delta));
            }
        }
        None
    }

    fn extend(&mut self, text: &str) -> Option<String> {
        let Some(suffix) = text.strip_prefix(self.emitted.as_str()) else {
            warn!(
                emitted_bytes = self.emitted.len(),
                snapshot_bytes = text.len(),
                "Snapshot does not extend emitted text, skipping"
            );
            return None;
        };
        if suffix.is_empty() {
            return None;
        }
        let delta = suffix.to_string();
        self.emitted.push_str(&delta);
        Some(delta)
    }
}

/// A structured event sent to event-mode callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    Snapshot { answer: PartialAnswer },
    Done { answer: AnswerResult },
    Error { message: String },
}

impl TransportEvent {
    /// SSE event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => "snapshot",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Snapshot { .. })
    }
}

/// Turn updates into events. The last event is always `Done` or `Error`.
pub fn to_event_stream(updates: AnswerStream) -> impl Stream<Item = TransportEvent> + Send {
    futures::stream::unfold(Some(updates), |state| async move {
        let mut updates = state?;
        let event = match updates.next().await {
            Some(Ok(AnswerUpdate::Partial(answer))) => TransportEvent::Snapshot { answer },
            Some(Ok(AnswerUpdate::Complete(answer))) => TransportEvent::Done { answer },
            Some(Err(e)) => {
                error!(error = %e, kind = e.kind(), "Answer failed during event stream");
                TransportEvent::Error {
                    message: GENERIC_FAILURE.into(),
                }
            }
            None => {
                error!("Answer stream ended without completing");
                TransportEvent::Error {
                    message: GENERIC_FAILURE.into(),
                }
            }
        };
        let next = if event.is_terminal() { None } else { Some(updates) };
        Some((event, next))
    })
}
