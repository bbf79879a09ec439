//! Axum handlers for the network transport.

use super::AppState;
use crate::config::HttpDefaults;
use crate::protocol::{codes, parse_message, Outgoing, Response as RpcResponse, RpcError};
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

/// Envelope-shaped error with no id.
fn error_response(status: StatusCode, error: RpcError) -> Response {
    (status, Json(RpcResponse::error(Value::Null, error))).into_response()
}

/// Check the `Authorization` header when a gatekeeper is attached.
fn authorize(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    let auth = state.auth.as_ref()?;
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let decision = auth.validate_header(header);
    if decision.valid {
        return None;
    }

    let message = decision.error.unwrap_or_else(|| "Unauthorized".to_string());
    warn!("Rejected unauthorized request: {}", message);
    Some(error_response(StatusCode::UNAUTHORIZED, RpcError::unauthorized(message)))
}

enum BodyError {
    TooLarge,
    Read(axum::Error),
}

/// Collect the body, giving up as soon as it passes `max` bytes.
async fn read_body(headers: &HeaderMap, body: Body, max: usize) -> Result<Vec<u8>, BodyError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max) {
        return Err(BodyError::TooLarge);
    }

    let mut bytes = Vec::with_capacity(declared.unwrap_or(0));
    let mut chunks = body.into_data_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if bytes.len() + chunk.len() > max {
            return Err(BodyError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// `POST /mcp`: one envelope or a batch.
pub(crate) async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if let Some(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    let bytes = match read_body(&headers, body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(BodyError::TooLarge) => {
            warn!("Request body exceeds {} bytes", state.max_body_bytes);
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, RpcError::too_large());
        }
        Err(BodyError::Read(e)) => {
            warn!("Failed to read request body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, RpcError::parse_error(e));
        }
    };

    let message = match parse_message(&bytes) {
        Ok(message) => message,
        Err(e) => {
            warn!("Rejecting malformed request body: {}", e.message);
            return error_response(StatusCode::BAD_REQUEST, e);
        }
    };

    match state.dispatcher.dispatch_message(message).await {
        None => StatusCode::NO_CONTENT.into_response(),
        Some(outgoing) => {
            let status = match &outgoing {
                Outgoing::Single(r) if r.error_code() == Some(codes::INTERNAL_ERROR) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::OK,
            };
            (status, Json(outgoing)).into_response()
        }
    }
}

/// `GET /mcp/health`
pub(crate) async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok", "transport": "sse"}))
}

/// `GET /mcp/events`: register an SSE subscriber.
///
/// Once this returns the response is committed; anything that goes wrong
/// afterwards can only end the stream.
pub(crate) async fn handle_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Some(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    let subscription = state.events.subscribe();
    let connected = Event::default()
        .event("connected")
        .data(json!({"status": "connected"}).to_string());

    let events = stream::once(async move { connected })
        .chain(
            subscription
                .into_stream()
                .map(|push| Event::default().event(&push.event).data(&push.data)),
        )
        .map(Ok::<_, Infallible>);

    debug!("SSE stream opened");
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(HttpDefaults::SSE_KEEP_ALIVE))
        .into_response()
}

/// Anything unrouted.
pub(crate) async fn handle_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, RpcError::not_found())
}
