//! The `/mcp` endpoint: POST (batch request/notification intake),
//! GET (standalone server-push stream, resumable via `Last-Event-Id`), and
//! DELETE (session termination) — generalized from "one request, one
//! response" to MCP's batch-and-multiplex contract.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use hatago_core::jsonrpc::{self, Frame, Message, RequestId};
use hatago_core::session::SessionId;

use crate::error::TransportError;
use crate::state::{ServerEvent, TransportState};

pub const SESSION_HEADER: &str = "mcp-session-id";

fn session_header() -> HeaderName {
    HeaderName::from_static(SESSION_HEADER)
}

fn accept_ok(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    accept.contains("application/json") && accept.contains("text/event-stream")
}

/// `GET /mcp` only ever opens an SSE stream, so it requires `Accept:
/// text/event-stream` rather than the POST endpoint's pair of media types.
fn sse_accept_ok(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

fn content_type_ok(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

fn parse_session_header(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(session_header())
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

/// Render a JSON-RPC error envelope as the HTTP response it maps to.
fn error_response(err: TransportError, id: Option<RequestId>) -> Response {
    let status = err.http_status();
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": err.rpc_code(),
            "message": err.to_string(),
        }
    });
    (status, Json(body)).into_response()
}

enum BatchEvent {
    Notification(Value),
    Response(Message),
}

/// **POST /mcp**: ingest a JSON-RPC message or batch.
pub async fn post_mcp(
    State(state): State<Arc<TransportState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.is_draining() {
        return error_response(TransportError::Draining, None);
    }
    if !accept_ok(&headers) {
        return error_response(TransportError::UnacceptableAccept, None);
    }
    if !content_type_ok(&headers) {
        return error_response(TransportError::UnsupportedContentType, None);
    }

    let frame = match jsonrpc::decode(&body) {
        Ok(frame) => frame,
        Err(e) => return error_response(TransportError::Codec(e), None),
    };

    let has_initialize = frame_has_method(&frame, "initialize");
    if has_initialize && frame.len() > 1 {
        return error_response(TransportError::InitializeNotAlone, None);
    }

    let (session_id, fresh_session) = if has_initialize {
        match state.sessions.create() {
            Ok((id, _evicted)) => (id, true),
            Err(e) => return error_response(TransportError::Session(e), None),
        }
    } else {
        let Some(id) = parse_session_header(&headers) else {
            return error_response(TransportError::MissingSessionHeader, None);
        };
        match state.sessions.get(id) {
            Ok(_) => (id, false),
            Err(e) => return error_response(TransportError::Session(e), None),
        }
    };

    let messages = frame.into_messages();
    let request_count = messages.iter().filter(|m| m.is_request()).count();

    let mut response = if request_count == 0 {
        for message in messages {
            state
                .handler
                .handle(session_id, message, Box::new(|_| {}))
                .await;
        }
        StatusCode::ACCEPTED.into_response()
    } else if state.config.json_mode {
        json_mode_response(&state, session_id, messages).await
    } else {
        sse_mode_response(&state, session_id, messages)
    };

    if fresh_session {
        if let Ok(value) = session_id.to_string().parse() {
            response.headers_mut().insert(session_header(), value);
        }
    }
    response
}

fn frame_has_method(frame: &Frame, method: &str) -> bool {
    match frame {
        Frame::Single(m) => m.method() == Some(method),
        Frame::Batch(ms) => ms.iter().any(|m| m.method() == Some(method)),
    }
}

/// Collect every request's response into one JSON body ("JSON mode").
/// Progress notifications have nowhere to go in this mode and are
/// dropped — there is no stream to write them to.
async fn json_mode_response(
    state: &TransportState,
    session_id: SessionId,
    messages: Vec<Message>,
) -> Response {
    let mut responses = Vec::new();
    for message in messages {
        let is_request = message.is_request();
        let result = state
            .handler
            .handle(session_id, message, Box::new(|_| {}))
            .await;
        if is_request {
            if let Some(response) = result {
                responses.push(jsonrpc::encode(&response));
            }
        }
    }

    if let [single] = responses.as_slice() {
        if let Some(retry_after_secs) = retry_after_seconds(single) {
            return rejected_response(single.clone(), retry_after_secs);
        }
    }

    let body = if responses.len() == 1 {
        responses.into_iter().next().unwrap()
    } else {
        Value::Array(responses)
    };
    Json(body).into_response()
}

/// `error.data.retryAfterSeconds`, as attached by `ToolRouter::dispatch`
/// for errors like a tripped circuit breaker.
fn retry_after_seconds(response: &Value) -> Option<u64> {
    response
        .get("error")?
        .get("data")?
        .get("retryAfterSeconds")?
        .as_u64()
}

/// A JSON-RPC error with a retry hint also carries a real HTTP status, so
/// the caller doesn't have to parse the body to back off correctly.
fn rejected_response(body: Value, retry_after_secs: u64) -> Response {
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// Open one SSE stream for the whole batch, writing each message's
/// response (and any progress notifications along the way) as it
/// completes, and closing once every request in the batch has answered.
fn sse_mode_response(
    state: &TransportState,
    session_id: SessionId,
    messages: Vec<Message>,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<BatchEvent>();
    let remaining = messages.iter().filter(|m| m.is_request()).count();

    for message in messages {
        let is_request = message.is_request();
        let tx = tx.clone();
        let handler = state.handler.clone();
        tokio::spawn(async move {
            let notify_tx = tx.clone();
            let notify: crate::handler::NotificationSink = Box::new(move |value| {
                let _ = notify_tx.send(BatchEvent::Notification(value));
            });
            let result = handler.handle(session_id, message, notify).await;
            if is_request {
                if let Some(response) = result {
                    let _ = tx.send(BatchEvent::Response(response));
                }
            }
        });
    }

    let keep_alive = state.config.keep_alive;
    let stream = batch_stream(rx, remaining, keep_alive);
    Sse::new(stream).into_response()
}

fn batch_stream(
    rx: mpsc::UnboundedReceiver<BatchEvent>,
    remaining: usize,
    keep_alive: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(
        (rx, remaining, tokio::time::interval(keep_alive)),
        move |(mut rx, mut remaining, mut ticker)| async move {
            if remaining == 0 {
                return None;
            }
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Some(BatchEvent::Notification(v)) => {
                        Some((Ok(Event::default().event("message").data(v.to_string())), (rx, remaining, ticker)))
                    }
                    Some(BatchEvent::Response(m)) => {
                        remaining -= 1;
                        let encoded = jsonrpc::encode(&m);
                        Some((Ok(Event::default().event("message").data(encoded.to_string())), (rx, remaining, ticker)))
                    }
                    None => None,
                },
                _ = ticker.tick() => {
                    Some((Ok(Event::default().event("ping").data("")), (rx, remaining, ticker)))
                }
            }
        },
    )
}

/// **GET /mcp**: the standalone server-push stream. 409s if one is
/// already open for this session; replays buffered events newer than
/// `Last-Event-Id` before going live.
pub async fn get_mcp(State(state): State<Arc<TransportState>>, headers: HeaderMap) -> Response {
    if !sse_accept_ok(&headers) {
        return error_response(TransportError::UnacceptableAccept, None);
    }
    if state.is_draining() {
        return error_response(TransportError::Draining, None);
    }
    let Some(session_id) = parse_session_header(&headers) else {
        return error_response(TransportError::MissingSessionHeader, None);
    };
    if state.sessions.get(session_id).is_err() {
        return error_response(
            TransportError::Session(hatago_core::error::SessionError::NotFound),
            None,
        );
    }

    let rx = match state.open_standalone_stream(session_id) {
        Ok(rx) => rx,
        Err(()) => return error_response(TransportError::DuplicateStandaloneStream, None),
    };

    let replay: Vec<ServerEvent> = headers
        .get(HeaderName::from_static("last-event-id"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|id| state.replay_standalone(session_id, id))
        .unwrap_or_default();

    debug!(session = %session_id, replayed = replay.len(), "standalone stream opened");

    let keep_alive = state.config.keep_alive;
    let stream = standalone_stream(state, session_id, replay, rx, keep_alive);
    Sse::new(stream).into_response()
}

/// Drops the standalone-stream registration when the client disconnects —
/// the stream's `Drop`, not an explicit close message, is how we learn
/// that.
struct StandaloneGuard {
    state: Arc<TransportState>,
    session_id: SessionId,
}

impl Drop for StandaloneGuard {
    fn drop(&mut self) {
        self.state.close_standalone_stream(self.session_id);
    }
}

fn standalone_stream(
    state: Arc<TransportState>,
    session_id: SessionId,
    replay: Vec<ServerEvent>,
    mut rx: mpsc::UnboundedReceiver<ServerEvent>,
    keep_alive: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = StandaloneGuard { state, session_id };
    let mut replay = replay.into_iter();
    let mut ticker = tokio::time::interval(keep_alive);

    futures::stream::unfold(
        (guard, false),
        move |(guard, mut closed)| {
            let next_replay = replay.next();
            async move {
                if closed {
                    return None;
                }
                if let Some(event) = next_replay {
                    return Some((Ok(render(event)), (guard, closed)));
                }
                tokio::select! {
                    biased;
                    msg = rx.recv() => {
                        match msg {
                            Some(event) => Some((Ok(render(event)), (guard, closed))),
                            None => {
                                closed = true;
                                None
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        Some((Ok(Event::default().event("ping").data("")), (guard, closed)))
                    }
                }
            }
        },
    )
}

fn render(event: ServerEvent) -> Event {
    let ServerEvent::Message { id, data } = event;
    Event::default().id(id.to_string()).event("message").data(data)
}

/// **DELETE /mcp**: terminate the session and close its streams.
pub async fn delete_mcp(State(state): State<Arc<TransportState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = parse_session_header(&headers) else {
        return error_response(TransportError::MissingSessionHeader, None);
    };
    state.forget_session(session_id);
    match state.sessions.delete(session_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(session = %session_id, error = %e, "delete of unknown session");
            error_response(TransportError::Session(e), None)
        }
    }
}

/// Any other verb on `/mcp`.
pub async fn method_not_allowed() -> Response {
    let mut response = error_response(TransportError::MethodNotAllowed, None);
    response.headers_mut().insert(
        header::ALLOW,
        HeaderValue::from_static("GET, POST, DELETE"),
    );
    response
}
