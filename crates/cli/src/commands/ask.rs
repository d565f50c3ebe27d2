//! `fieldsage ask`: Answer a single request from the command line.

use std::path::Path;

use fieldsage_answer::{AnswerEngine, TransportEvent, to_event_stream, to_response_stream};
use fieldsage_core::context::AnswerRequest;
use fieldsage_core::schema::SchemaKind;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub async fn run(
    config_path: Option<&Path>,
    request_path: &Path,
    events: bool,
    schema: Option<SchemaKind>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;

    let raw = read_request(request_path).await?;
    let mut request: AnswerRequest =
        serde_json::from_str(&raw).map_err(|e| format!("Invalid request JSON: {e}"))?;
    if schema.is_some() {
        request.output_schema = schema;
    }

    let router = fieldsage_providers::router::build_from_config(&config);
    let provider = router.default().ok_or("No default provider configured")?;
    let engine = AnswerEngine::from_config(provider, &config);

    let mut stdout = tokio::io::stdout();
    stream_answer(&engine, &request, events, &mut stdout).await
}

async fn read_request(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    if path == Path::new("-") {
        let mut raw = String::new();
        tokio::io::stdin().read_to_string(&mut raw).await?;
        return Ok(raw);
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", path.display()).into())
}

/// Write an answer to `out` as it is generated.
///
/// Text mode writes the markdown deltas followed by a newline. Event mode
/// writes one JSON event per line and fails if the final event is an error.
async fn stream_answer<W: AsyncWrite + Unpin>(
    engine: &AnswerEngine,
    request: &AnswerRequest,
    events: bool,
    out: &mut W,
) -> Result<(), Box<dyn std::error::Error>> {
    let updates = engine.answer(request).await?;

    if events {
        let mut events = std::pin::pin!(to_event_stream(updates));
        while let Some(event) = events.next().await {
            let line = serde_json::to_string(&event)?;
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
            if let TransportEvent::Error { message } = event {
                return Err(message.into());
            }
        }
        return Ok(());
    }

    let mut body = to_response_stream(updates).await?;
    while let Some(Ok(text)) = body.next().await {
        out.write_all(text.as_bytes()).await?;
        out.flush().await?;
    }
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}
