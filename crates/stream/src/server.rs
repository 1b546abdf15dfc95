//! HTTP server implementing the durable streams protocol.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{sse::Event, IntoResponse, Response, Sse},
    routing::{delete, get, head, options, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream as FStream;
use serde::Deserialize;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::{
    cursor::{generate_response_cursor, parse_cursor, CursorOptions},
    store::{StoreError, StreamStore},
    types::{
        format_offset, normalize_content_type, AppendOptions, ProducerHeaders, ProducerOutcome,
        ServerOptions, Stream, StreamConfig,
    },
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StreamStore>,
    pub options: ServerOptions,
}

/// Query parameters for GET requests.
#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub offset: Option<String>,
    pub live: Option<String>,
    pub cursor: Option<String>,
}

/// Create the router with all stream endpoints.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers(Any);

    let compression_enabled = state.options.compression;

    let router = Router::new()
        .route("/{*path}", put(handle_create))
        .route("/{*path}", head(handle_head))
        .route("/{*path}", get(handle_read))
        .route("/{*path}", post(handle_append))
        .route("/{*path}", delete(handle_delete))
        .route("/{*path}", options(handle_options))
        .layer(cors);

    let router = if compression_enabled {
        router.layer(CompressionLayer::new())
    } else {
        router
    };

    router.with_state(state)
}

async fn handle_options() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// PUT - create a new stream.
async fn handle_create(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> impl IntoResponse {
    let path = format!("/{}", path);
    debug!(path = %path, "creating stream");

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let ttl_seconds = match parse_ttl_header(&headers) {
        Ok(v) => v,
        Err(()) => return (StatusCode::BAD_REQUEST, "invalid Stream-TTL").into_response(),
    };
    let expires_at = match parse_expires_at_header(&headers) {
        Ok(v) => v,
        Err(()) => return (StatusCode::BAD_REQUEST, "invalid Stream-Expires-At").into_response(),
    };

    if ttl_seconds.is_some() && expires_at.is_some() {
        return (
            StatusCode::BAD_REQUEST,
            "cannot specify both Stream-TTL and Stream-Expires-At",
        )
            .into_response();
    }

    let closed = header_is_true(&headers, "Stream-Closed");

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return (StatusCode::BAD_REQUEST, "failed to read body").into_response(),
    };
    let initial_data = if body_bytes.is_empty() {
        None
    } else {
        Some(body_bytes)
    };

    let config = StreamConfig {
        content_type: content_type.clone(),
        ttl_seconds,
        expires_at,
        initial_data,
        closed,
    };

    match state.store.create(&path, config) {
        Ok(created) => {
            let next_offset = state.store.get_current_offset(&path).unwrap_or_default();

            let mut response = Response::builder()
                .status(if created {
                    StatusCode::CREATED
                } else {
                    StatusCode::OK
                })
                .header("Stream-Next-Offset", &next_offset)
                .header(header::LOCATION, &path);

            if let Some(ct) = content_type {
                response = response.header(header::CONTENT_TYPE, ct);
            }

            response.body(Body::empty()).unwrap().into_response()
        }
        Err(StoreError::ConfigMismatch) => (
            StatusCode::CONFLICT,
            "stream already exists with a different configuration",
        )
            .into_response(),
        Err(StoreError::TtlConflict) => (
            StatusCode::BAD_REQUEST,
            "cannot specify both Stream-TTL and Stream-Expires-At",
        )
            .into_response(),
        Err(StoreError::InvalidJson(msg)) => (StatusCode::BAD_REQUEST, msg).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to create stream");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// HEAD - metadata only.
async fn handle_head(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = format!("/{}", path);

    let stream = match state.store.get(&path) {
        Some(s) => s,
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    let start_offset = query.offset.as_deref().unwrap_or("-1");
    let etag = generate_etag(&path, start_offset, &stream.current_offset, stream.closed);

    if headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        == Some(etag.as_str())
    {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::CACHE_CONTROL, "no-store")
            .header(header::ETAG, etag)
            .body(Body::empty())
            .unwrap()
            .into_response();
    }

    let cursor_options = CursorOptions {
        interval_seconds: state.options.cursor_interval_seconds,
        epoch: state.options.cursor_epoch,
    };
    let client_cursor = query.cursor.as_deref().and_then(parse_cursor);
    let response_cursor = generate_response_cursor(client_cursor, &cursor_options);

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("Stream-Next-Offset", &stream.current_offset)
        .header("Stream-Cursor", response_cursor.to_string())
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::ETAG, etag);

    if stream.closed {
        response = response.header("Stream-Closed", "true");
    }
    if let Some(ct) = &stream.content_type {
        response = response.header(header::CONTENT_TYPE, ct.as_str());
    }

    response.body(Body::empty()).unwrap().into_response()
}

/// GET - read from a stream (catch-up, long-poll, or SSE).
async fn handle_read(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = format!("/{}", path);
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let stream = match state.store.get(&path) {
        Some(s) => s,
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    if query.live.is_some() && query.offset.is_none() {
        return (StatusCode::BAD_REQUEST, "offset is required with live reads").into_response();
    }

    let requested_now = query.offset.as_deref() == Some("now");
    let raw_offset = query.offset.as_deref().unwrap_or("-1");

    let start_offset = if requested_now {
        stream.current_offset.clone()
    } else if raw_offset == "-1" {
        "-1".to_string()
    } else if crate::types::parse_offset(raw_offset).is_some() {
        raw_offset.to_string()
    } else {
        return (StatusCode::BAD_REQUEST, "invalid offset parameter").into_response();
    };

    let cursor_options = CursorOptions {
        interval_seconds: state.options.cursor_interval_seconds,
        epoch: state.options.cursor_epoch,
    };
    let client_cursor = query.cursor.as_deref().and_then(parse_cursor);
    let response_cursor = generate_response_cursor(client_cursor, &cursor_options);

    match query.live.as_deref() {
        Some("sse") => handle_sse(state, path, start_offset, response_cursor, stream).await,
        Some("long-poll") => handle_long_poll(state, path, start_offset, response_cursor).await,
        _ => {
            handle_catch_up(
                state,
                path,
                start_offset,
                raw_offset.to_string(),
                response_cursor,
                stream,
                requested_now,
                if_none_match,
            )
            .await
        }
    }
}

/// Handle catch-up read (immediate response).
#[allow(clippy::too_many_arguments)]
async fn handle_catch_up(
    state: AppState,
    path: String,
    offset: String,
    raw_offset: String,
    cursor: u64,
    stream: Stream,
    requested_now: bool,
    if_none_match: Option<String>,
) -> Response {
    let result = match state.store.read(&path, &offset) {
        Ok(r) => r,
        Err(e) => return map_read_error(e),
    };

    let etag = generate_etag(&path, &raw_offset, &result.next_offset, result.stream_closed);

    if if_none_match.as_deref() == Some(etag.as_str()) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, &etag)
            .body(Body::empty())
            .unwrap();
    }

    let body = state.store.format_response(&path, &result.messages);

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("Stream-Next-Offset", &result.next_offset)
        .header("Stream-Cursor", cursor.to_string())
        .header("Stream-Up-To-Date", result.up_to_date.to_string())
        .header(header::ETAG, &etag);

    if requested_now {
        response = response.header(header::CACHE_CONTROL, "no-store");
    }
    if result.stream_closed {
        response = response.header("Stream-Closed", "true");
    }
    if let Some(ct) = &stream.content_type {
        response = response.header(header::CONTENT_TYPE, ct.as_str());
    }

    response.body(Body::from(body)).unwrap()
}

/// Handle long-poll read (wait for new data, bounded by the server timeout).
async fn handle_long_poll(state: AppState, path: String, offset: String, cursor: u64) -> Response {
    let timeout_duration = Duration::from_millis(state.options.long_poll_timeout_ms);

    let result = match state.store.wait_for_messages(&path, &offset, timeout_duration).await {
        Ok(r) => r,
        Err(e) => return map_read_error(e),
    };

    if result.messages.is_empty() {
        let mut response = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("Stream-Next-Offset", &result.next_offset)
            .header("Stream-Cursor", cursor.to_string())
            .header("Stream-Up-To-Date", "true");

        if result.stream_closed {
            response = response.header("Stream-Closed", "true");
        }

        return response.body(Body::empty()).unwrap();
    }

    let stream_ct = state.store.get(&path).and_then(|s| s.content_type);
    let body = state.store.format_response(&path, &result.messages);
    let etag = generate_etag(&path, &offset, &result.next_offset, result.stream_closed);

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header("Stream-Next-Offset", &result.next_offset)
        .header("Stream-Cursor", cursor.to_string())
        .header("Stream-Up-To-Date", result.up_to_date.to_string())
        .header(header::ETAG, etag);

    if result.stream_closed {
        response = response.header("Stream-Closed", "true");
    }
    if let Some(ct) = stream_ct {
        response = response.header(header::CONTENT_TYPE, ct.as_str());
    }

    response.body(Body::from(body)).unwrap()
}

/// Handle SSE streaming.
async fn handle_sse(
    state: AppState,
    path: String,
    offset: String,
    cursor: u64,
    stream: Stream,
) -> Response {
    let cursor_options = CursorOptions {
        interval_seconds: state.options.cursor_interval_seconds,
        epoch: state.options.cursor_epoch,
    };
    let is_binary = stream_is_binary(stream.content_type.as_deref());
    let is_json = stream
        .content_type
        .as_deref()
        .map(|ct| normalize_content_type(ct) == "application/json")
        .unwrap_or(false);

    let sse_stream = create_sse_stream(state, path, offset, cursor, cursor_options, is_binary, is_json);

    let mut response = Sse::new(sse_stream)
        .keep_alive(
            axum::response::sse::KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response();

    if is_binary {
        response.headers_mut().insert(
            "Stream-SSE-Data-Encoding",
            header::HeaderValue::from_static("base64"),
        );
    }

    response
}

fn create_sse_stream(
    state: AppState,
    path: String,
    mut offset: String,
    cursor: u64,
    cursor_options: CursorOptions,
    is_binary: bool,
    is_json: bool,
) -> impl FStream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let mut rx = state.store.subscribe();
        let mut current_cursor = cursor;

        if let Ok(result) = state.store.read(&path, &offset) {
            for msg in &result.messages {
                yield Ok(sse_data_event(&msg.data, is_binary, is_json));
            }
            offset = result.next_offset.clone();

            current_cursor = generate_response_cursor(Some(current_cursor), &cursor_options);
            yield Ok(sse_control_event(&result.next_offset, current_cursor, result.up_to_date, result.stream_closed));

            if result.stream_closed {
                return;
            }
        }

        loop {
            let timeout_duration = Duration::from_millis(state.options.long_poll_timeout_ms);

            match tokio::time::timeout(timeout_duration, rx.recv()).await {
                Ok(Ok(notification)) if notification.path == path => {
                    if let Ok(result) = state.store.read(&path, &offset) {
                        for msg in &result.messages {
                            yield Ok(sse_data_event(&msg.data, is_binary, is_json));
                        }
                        offset = result.next_offset.clone();
                        current_cursor = generate_response_cursor(Some(current_cursor), &cursor_options);
                        yield Ok(sse_control_event(&result.next_offset, current_cursor, result.up_to_date, result.stream_closed));

                        if result.stream_closed {
                            return;
                        }
                    } else {
                        // stream was deleted mid-wait
                        return;
                    }
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => break,
                Err(_) => {
                    current_cursor = generate_response_cursor(Some(current_cursor), &cursor_options);
                    let current_offset = state
                        .store
                        .get_current_offset(&path)
                        .unwrap_or_else(|| format_offset(0, 0));
                    yield Ok(sse_control_event(&current_offset, current_cursor, true, false));
                }
            }
        }
    }
}

fn sse_data_event(data: &[u8], is_binary: bool, is_json: bool) -> Event {
    if is_binary {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        return Event::default().event("data").data(encoded);
    }

    if is_json {
        let mut trimmed = data;
        while matches!(trimmed.last(), Some(b) if b.is_ascii_whitespace() || *b == b',') {
            trimmed = &trimmed[..trimmed.len() - 1];
        }
        let text = String::from_utf8_lossy(trimmed);
        return Event::default().event("data").data(text);
    }

    let text = String::from_utf8_lossy(data);
    Event::default().event("data").data(text)
}

fn sse_control_event(next_offset: &str, cursor: u64, up_to_date: bool, stream_closed: bool) -> Event {
    let mut control = serde_json::json!({
        "streamNextOffset": next_offset,
        "streamCursor": cursor.to_string(),
    });
    if up_to_date {
        control["upToDate"] = serde_json::Value::Bool(true);
    }
    if stream_closed {
        control["streamClosed"] = serde_json::Value::Bool(true);
    }
    Event::default().event("control").data(control.to_string())
}

/// Decide whether a stream's content is treated as opaque binary for SSE framing.
fn stream_is_binary(content_type: Option<&str>) -> bool {
    match content_type {
        None => false,
        Some(ct) => {
            let normalized = normalize_content_type(ct);
            normalized != "application/json" && !normalized.starts_with("text/")
        }
    }
}

/// POST - append data to a stream, optionally under producer control and/or closing it.
async fn handle_append(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> impl IntoResponse {
    let path = format!("/{}", path);

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let seq = headers.get("Stream-Seq").and_then(|v| v.to_str().ok());
    let close = header_is_true(&headers, "Stream-Closed");

    let producer = match parse_producer_headers(&headers) {
        Ok(p) => p,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return (StatusCode::BAD_REQUEST, "failed to read body").into_response(),
    };

    if body_bytes.is_empty() && !close {
        return (StatusCode::BAD_REQUEST, "empty body not allowed").into_response();
    }
    if !body_bytes.is_empty() && content_type.is_none() {
        return (StatusCode::BAD_REQUEST, "missing Content-Type").into_response();
    }

    let producer_for_headers = producer.clone();

    let opts = AppendOptions {
        seq,
        content_type,
        producer,
        close,
    };

    match state.store.append(&path, body_bytes, opts) {
        Ok(outcome) => append_success_response(outcome, producer_for_headers),
        Err(StoreError::NotFound(p)) => {
            (StatusCode::NOT_FOUND, format!("stream not found: {}", p)).into_response()
        }
        Err(StoreError::ContentTypeMismatch { expected, actual }) => (
            StatusCode::CONFLICT,
            format!("content-type mismatch: expected {}, got {}", expected, actual),
        )
            .into_response(),
        Err(StoreError::SequenceConflict(msg)) => (StatusCode::CONFLICT, msg).into_response(),
        Err(StoreError::StreamClosed) => {
            (StatusCode::CONFLICT, "stream is closed").into_response()
        }
        Err(StoreError::EmptyBody) => {
            (StatusCode::BAD_REQUEST, "empty body not allowed").into_response()
        }
        Err(StoreError::EmptyArrayNotAllowed) => {
            (StatusCode::BAD_REQUEST, "empty JSON array not allowed").into_response()
        }
        Err(StoreError::InvalidJson(msg)) => (StatusCode::BAD_REQUEST, msg).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to append to stream");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn append_success_response(
    outcome: crate::types::AppendOutcome,
    producer: Option<ProducerHeaders>,
) -> Response {
    let mut builder = Response::builder().header("Stream-Next-Offset", &outcome.offset);

    if outcome.stream_closed {
        builder = builder.header("Stream-Closed", "true");
    }

    match outcome.producer_outcome {
        Some(ProducerOutcome::Accepted) => {
            if let Some(p) = producer {
                builder = builder
                    .header("Producer-Epoch", p.epoch.to_string())
                    .header("Producer-Seq", p.seq.to_string());
            }
            // an accepted, non-closing append with producer echo is 200; a close
            // (with or without producer attribution) reports 204 per the status table
            let status = if outcome.stream_closed {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::OK
            };
            builder.status(status).body(Body::empty()).unwrap()
        }
        Some(ProducerOutcome::Duplicate { last_seq }) => {
            if let Some(p) = producer {
                builder = builder
                    .header("Producer-Epoch", p.epoch.to_string())
                    .header("Producer-Seq", last_seq.to_string());
            }
            builder.status(StatusCode::NO_CONTENT).body(Body::empty()).unwrap()
        }
        Some(ProducerOutcome::StaleEpoch { current_epoch }) => {
            builder = builder.header("Producer-Epoch", current_epoch.to_string());
            builder.status(StatusCode::FORBIDDEN).body(Body::empty()).unwrap()
        }
        Some(ProducerOutcome::InvalidEpochSeq) => {
            builder.status(StatusCode::BAD_REQUEST).body(Body::empty()).unwrap()
        }
        Some(ProducerOutcome::SequenceGap {
            expected_seq,
            received_seq,
        }) => {
            builder = builder
                .header("Producer-Expected-Seq", expected_seq.to_string())
                .header("Producer-Received-Seq", received_seq.to_string());
            builder.status(StatusCode::CONFLICT).body(Body::empty()).unwrap()
        }
        None => builder.status(StatusCode::NO_CONTENT).body(Body::empty()).unwrap(),
    }
}

fn map_read_error(e: StoreError) -> Response {
    match e {
        StoreError::NotFound(p) => {
            (StatusCode::NOT_FOUND, format!("stream not found: {}", p)).into_response()
        }
        StoreError::InvalidOffset(o) => {
            (StatusCode::BAD_REQUEST, format!("invalid offset: {}", o)).into_response()
        }
        e => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// DELETE - remove a stream.
async fn handle_delete(State(state): State<AppState>, Path(path): Path<String>) -> impl IntoResponse {
    let path = format!("/{}", path);

    if state.store.delete(&path) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Generate an ETag for a read response: `"path:start:end[:c]"`.
fn generate_etag(path: &str, start_offset: &str, end_offset: &str, closed_at_tail: bool) -> String {
    let marker = if closed_at_tail { ":c" } else { "" };
    format!("\"{}:{}:{}{}\"", path, start_offset, end_offset, marker)
}

/// Parse the `Stream-TTL` header: a non-negative decimal with no leading zeros
/// (except the single digit `0`).
fn parse_ttl_header(headers: &HeaderMap) -> Result<Option<u64>, ()> {
    let Some(raw) = headers.get("Stream-TTL").and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(());
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return Err(());
    }
    raw.parse().map(Some).map_err(|_| ())
}

/// Parse the `Stream-Expires-At` header as an RFC 3339 timestamp.
fn parse_expires_at_header(headers: &HeaderMap) -> Result<Option<DateTime<Utc>>, ()> {
    let Some(raw) = headers.get("Stream-Expires-At").and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|_| ())
}

fn header_is_true(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Parse the producer header triple (`Producer-Id`, `Producer-Epoch`, `Producer-Seq`).
/// All three must be present together, or none at all.
fn parse_producer_headers(headers: &HeaderMap) -> Result<Option<ProducerHeaders>, &'static str> {
    let id = headers.get("Producer-Id").and_then(|v| v.to_str().ok());
    let epoch = headers.get("Producer-Epoch").and_then(|v| v.to_str().ok());
    let seq = headers.get("Producer-Seq").and_then(|v| v.to_str().ok());

    match (id, epoch, seq) {
        (None, None, None) => Ok(None),
        (Some(id), Some(epoch), Some(seq)) => {
            if id.is_empty() {
                return Err("Producer-Id must not be empty");
            }
            let epoch: u64 = epoch.parse().map_err(|_| "Producer-Epoch must be a non-negative integer")?;
            let seq: u64 = seq.parse().map_err(|_| "Producer-Seq must be a non-negative integer")?;
            Ok(Some(ProducerHeaders {
                producer_id: id.to_string(),
                epoch,
                seq,
            }))
        }
        _ => Err("Producer-Id, Producer-Epoch, and Producer-Seq must be supplied together"),
    }
}

/// Start the server.
pub async fn start_server(options: ServerOptions) -> std::io::Result<()> {
    let store = StreamStore::new();
    let state = AppState {
        store,
        options: options.clone(),
    };

    let router = create_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!(%addr, "starting durable streams server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;

    fn create_test_app() -> Router {
        let state = AppState {
            store: StreamStore::new(),
            options: ServerOptions::default(),
        };
        create_router(state)
    }

    #[tokio::test]
    async fn test_create_stream() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/test/stream")
                    .header("Content-Type", "text/plain")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().contains_key("stream-next-offset"));
    }

    #[tokio::test]
    async fn test_create_idempotent() {
        let store = StreamStore::new();
        let app = create_router(AppState {
            store: store.clone(),
            options: ServerOptions::default(),
        });

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/test/stream")
                    .header("Content-Type", "text/plain")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/test/stream")
                    .header("Content-Type", "text/plain")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_append_accepted_is_204_and_read_roundtrips() {
        let store = StreamStore::new();
        let app = create_router(AppState {
            store: store.clone(),
            options: ServerOptions::default(),
        });

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/a")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/a")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/a?offset=-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn test_json_flatten_over_http() {
        let store = StreamStore::new();
        let app = create_router(AppState {
            store: store.clone(),
            options: ServerOptions::default(),
        });

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/b")
                    .header("Content-Type", "application/json")
                    .body(Body::from("[1,2]"))
                    .unwrap(),
            )
            .await
            .unwrap();

        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/b")
                    .header("Content-Type", "application/json")
                    .body(Body::from("[3,4]"))
                    .unwrap(),
            )
            .await
            .unwrap();

        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/b")
                    .header("Content-Type", "application/json")
                    .body(Body::from("5"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/b?offset=-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"[1,2,3,4,5]");
    }

    #[tokio::test]
    async fn test_producer_accepted_append_is_200() {
        let store = StreamStore::new();
        let app = create_router(AppState {
            store: store.clone(),
            options: ServerOptions::default(),
        });

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/c")
                    .header("Content-Type", "application/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/c")
                    .header("Content-Type", "application/json")
                    .header("Producer-Id", "p")
                    .header("Producer-Epoch", "0")
                    .header("Producer-Seq", "0")
                    .body(Body::from("[1]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // replay is a duplicate, 204
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/c")
                    .header("Content-Type", "application/json")
                    .header("Producer-Id", "p")
                    .header("Producer-Epoch", "0")
                    .header("Producer-Seq", "0")
                    .body(Body::from("[1]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_append_to_missing_stream_404() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/missing")
                    .header("Content-Type", "text/plain")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_stream() {
        let store = StreamStore::new();
        let app = create_router(AppState {
            store: store.clone(),
            options: ServerOptions::default(),
        });

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/test/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/test/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/test/stream?offset=-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_etag_304() {
        let store = StreamStore::new();
        let app = create_router(AppState {
            store: store.clone(),
            options: ServerOptions::default(),
        });

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/a")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/a")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/a?offset=-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let etag = response
            .headers()
            .get(header::ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(
            etag,
            "\"/a:-1:0000000000000000_0000000000000005\""
        );
    }

    #[tokio::test]
    async fn test_options_is_204() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
