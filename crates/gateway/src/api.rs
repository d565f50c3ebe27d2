//! `POST /answer`: stream an answer for one form field.
//!
//! Default mode streams plain text deltas. `?mode=events` streams
//! Server-Sent Events (`snapshot`, then `done` or `error`).

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::rejection::{BytesRejection, QueryRejection},
    extract::{Query, State},
    http::{StatusCode, header},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
};
use fieldsage_answer::transport::GENERIC_FAILURE;
use fieldsage_answer::{to_event_stream, to_response_stream};
use fieldsage_core::context::AnswerRequest;
use fieldsage_core::error::Error;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::SharedState;

/// Body returned for requests without both context objects.
pub const MISSING_CONTEXT: &str = "Missing required context";

/// Body returned when the request exceeds `gateway.body_limit_bytes`.
pub const BODY_TOO_LARGE: &str = "Request body too large";

/// Body returned for an unrecognised `?mode=` value.
pub const INVALID_MODE: &str = "Invalid stream mode";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Text,
    Events,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnswerQuery {
    #[serde(default)]
    pub mode: StreamMode,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

fn error_response(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

pub(crate) async fn answer_handler(
    State(state): State<SharedState>,
    query: Result<Query<AnswerQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = Uuid::new_v4();

    // Framework rejections are logged; callers only see the JSON error bodies.
    let query = match query {
        Ok(Query(query)) => query,
        Err(e) => {
            warn!(%request_id, error = %e.body_text(), "Rejected answer query");
            return error_response(StatusCode::BAD_REQUEST, INVALID_MODE);
        }
    };
    let body = match body {
        Ok(body) => body,
        Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            warn!(%request_id, "Answer request body over limit");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, BODY_TOO_LARGE);
        }
        Err(e) => {
            warn!(%request_id, error = %e.body_text(), "Unreadable answer body");
            return error_response(StatusCode::BAD_REQUEST, MISSING_CONTEXT);
        }
    };

    // A body that is not an answer request is treated like a missing context.
    let request: AnswerRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(%request_id, error = %e, "Unreadable answer request");
            return error_response(StatusCode::BAD_REQUEST, MISSING_CONTEXT);
        }
    };

    info!(
        %request_id,
        mode = ?query.mode,
        field = request.field_context.as_ref().map(|f| f.label.as_str()).unwrap_or(""),
        history = request.history().len(),
        "Answer request"
    );

    let updates = match state.engine.answer(&request).await {
        Ok(updates) => updates,
        Err(e) => return failure_response(request_id, e),
    };

    match query.mode {
        StreamMode::Text => match to_response_stream(updates).await {
            Ok(text) => (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                Body::from_stream(text),
            )
                .into_response(),
            Err(e) => failure_response(request_id, e),
        },
        StreamMode::Events => {
            let events = to_event_stream(updates).map(|event| {
                let data = serde_json::to_string(&event).unwrap_or_default();
                Ok::<_, Infallible>(SseEvent::default().event(event.event_type()).data(data))
            });
            Sse::new(events).into_response()
        }
    }
}

fn failure_response(request_id: Uuid, e: Error) -> Response {
    match e {
        Error::InvalidRequest(reason) => {
            warn!(%request_id, reason = %reason, "Rejected answer request");
            error_response(StatusCode::BAD_REQUEST, MISSING_CONTEXT)
        }
        other => {
            error!(%request_id, error = %other, kind = other.kind(), "Failed to get answer");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE)
        }
    }
}
