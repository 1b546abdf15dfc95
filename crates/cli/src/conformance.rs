//! Stdin/stdout JSON adapter driving an external conformance-test runner
//! against this crate's HTTP protocol and client library.
//!
//! One JSON object per line in, one JSON object per line out. Mirrors the
//! command set of the reference C adapter: `init`, `create`, `connect`,
//! `append`, `read`, `head`, `delete`, `close`, the `idempotent-*` producer
//! commands, dynamic header/param injection, and `shutdown`.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use durable_stream_client::{Chunk, ClientError, LiveMode, Producer, ReadOptions, StreamReader};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Clone)]
struct DynamicValue {
    value_type: String,
    counter: u64,
    token_value: Option<String>,
}

struct AdapterState {
    server_url: Option<String>,
    http: reqwest::Client,
    content_types: HashMap<String, String>,
    producers: HashMap<(String, String), Producer>,
    dynamic_headers: HashMap<String, DynamicValue>,
    dynamic_params: HashMap<String, DynamicValue>,
}

impl AdapterState {
    fn new() -> Self {
        Self {
            server_url: None,
            http: reqwest::Client::new(),
            content_types: HashMap::new(),
            producers: HashMap::new(),
            dynamic_headers: HashMap::new(),
            dynamic_params: HashMap::new(),
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.server_url.as_deref().unwrap_or(""), path)
    }

    fn resolve_dynamic(values: &mut HashMap<String, DynamicValue>, include_timestamp: bool) -> Value {
        let mut out = serde_json::Map::new();
        for (name, value) in values.iter_mut() {
            let resolved = match value.value_type.as_str() {
                "counter" => {
                    value.counter += 1;
                    value.counter.to_string()
                }
                "timestamp" if include_timestamp => chrono_now_millis(),
                "token" => value.token_value.clone().unwrap_or_default(),
                _ => continue,
            };
            out.insert(name.clone(), Value::String(resolved));
        }
        if out.is_empty() {
            Value::Null
        } else {
            Value::Object(out)
        }
    }
}

fn chrono_now_millis() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    millis.to_string()
}

pub async fn run() -> Result<(), std::io::Error> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();
    let mut state = AdapterState::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Ok(command) => dispatch(&mut state, command).await,
            Err(_) => error_response("unknown", "PARSE_ERROR", "invalid JSON line"),
        };

        let is_shutdown = response
            .get("type")
            .and_then(|v| v.as_str())
            .map(|t| t == "shutdown")
            .unwrap_or(false);

        let mut serialized = serde_json::to_string(&response).unwrap_or_default();
        serialized.push('\n');
        stdout.write_all(serialized.as_bytes()).await?;
        stdout.flush().await?;

        if is_shutdown {
            break;
        }
    }

    Ok(())
}

fn success(command_type: &str, fields: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("type".to_string(), Value::String(command_type.to_string()));
    map.insert("success".to_string(), Value::Bool(true));
    if let Value::Object(extra) = fields {
        map.extend(extra);
    }
    Value::Object(map)
}

fn error_response(command_type: &str, error_code: &str, message: &str) -> Value {
    json!({
        "type": "error",
        "success": false,
        "commandType": command_type,
        "errorCode": error_code,
        "message": message,
    })
}

fn client_error_code(err: &ClientError) -> &'static str {
    match err {
        ClientError::NotFound => "NOT_FOUND",
        ClientError::Conflict => "SEQUENCE_CONFLICT",
        ClientError::StaleEpoch { .. } => "STALE_EPOCH",
        ClientError::AutoClaimExhausted => "STALE_EPOCH",
        ClientError::SequenceGap { .. } => "SEQUENCE_GAP",
        ClientError::StreamClosed => "STREAM_CLOSED",
        ClientError::UnexpectedStatus(_) => "INTERNAL_ERROR",
        ClientError::Connection(_) => "NETWORK_ERROR",
        ClientError::Http(_) => "NETWORK_ERROR",
        ClientError::Serialization(_) => "PARSE_ERROR",
    }
}

async fn dispatch(state: &mut AdapterState, command: Value) -> Value {
    let command_type = command.get("type").and_then(|v| v.as_str()).unwrap_or("").to_string();

    match command_type.as_str() {
        "init" => handle_init(state, &command),
        "create" => handle_create(state, &command).await,
        "connect" => handle_connect(state, &command).await,
        "append" => handle_append(state, &command).await,
        "read" => handle_read(state, &command).await,
        "head" => handle_head(state, &command).await,
        "delete" => handle_delete(state, &command).await,
        "close" => handle_close(state, &command).await,
        "set-dynamic-header" => handle_set_dynamic_header(state, &command),
        "set-dynamic-param" => handle_set_dynamic_param(state, &command),
        "clear-dynamic" => handle_clear_dynamic(state),
        "idempotent-append" => handle_idempotent_append(state, &command).await,
        "idempotent-append-batch" => handle_idempotent_append_batch(state, &command).await,
        "idempotent-close" | "idempotent-producer-close" => handle_idempotent_close(state, &command).await,
        "idempotent-detach" | "idempotent-producer-detach" => handle_idempotent_detach(state, &command),
        "shutdown" => json!({"type": "shutdown", "success": true}),
        other => error_response(other, "NOT_SUPPORTED", "unknown command type"),
    }
}

fn handle_init(state: &mut AdapterState, command: &Value) -> Value {
    let server_url = match command.get("serverUrl").and_then(|v| v.as_str()) {
        Some(url) => url.to_string(),
        None => return error_response("init", "PARSE_ERROR", "missing serverUrl"),
    };

    *state = AdapterState::new();
    state.server_url = Some(server_url);

    success(
        "init",
        json!({
            "clientName": "durable-streams-rs",
            "clientVersion": env!("CARGO_PKG_VERSION"),
            "features": {
                "batching": true,
                "sse": true,
                "longPoll": true,
                "streaming": true,
                "dynamicHeaders": true,
            },
        }),
    )
}

async fn handle_create(state: &mut AdapterState, command: &Value) -> Value {
    let Some(path) = command.get("path").and_then(|v| v.as_str()) else {
        return error_response("create", "PARSE_ERROR", "missing path");
    };

    let content_type = command
        .get("contentType")
        .and_then(|v| v.as_str())
        .unwrap_or("application/octet-stream")
        .to_string();
    let ttl_seconds = command.get("ttlSeconds").and_then(|v| v.as_u64()).unwrap_or(0);
    let expires_at = command.get("expiresAt").and_then(|v| v.as_str());
    let closed = command.get("closed").and_then(|v| v.as_bool()).unwrap_or(false);
    let binary = command.get("binary").and_then(|v| v.as_bool()).unwrap_or(false);
    let data = command.get("data").and_then(|v| v.as_str());

    let already_exists = state
        .http
        .head(state.url_for(path))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false);

    let mut request = state
        .http
        .put(state.url_for(path))
        .header("Content-Type", &content_type);

    if ttl_seconds > 0 {
        request = request.header("Stream-TTL", ttl_seconds.to_string());
    }
    if let Some(expires_at) = expires_at {
        request = request.header("Stream-Expires-At", expires_at);
    }
    if closed {
        request = request.header("Stream-Closed", "true");
    }

    if let Some(data) = data {
        let body = if binary {
            base64::engine::general_purpose::STANDARD
                .decode(data.as_bytes())
                .unwrap_or_default()
        } else {
            data.as_bytes().to_vec()
        };
        request = request.body(body);
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let offset = header_string(&response, "Stream-Next-Offset");
            if response.status().is_success() {
                state.content_types.insert(path.to_string(), content_type);
                success(
                    "create",
                    json!({"status": if already_exists { 200 } else { status }, "offset": offset}),
                )
            } else {
                error_response("create", "CONFLICT", &format!("unexpected status {status}"))
            }
        }
        Err(err) => error_response("create", "NETWORK_ERROR", &err.to_string()),
    }
}

async fn handle_connect(state: &mut AdapterState, command: &Value) -> Value {
    let Some(path) = command.get("path").and_then(|v| v.as_str()) else {
        return error_response("connect", "PARSE_ERROR", "missing path");
    };

    match state.http.head(state.url_for(path)).send().await {
        Ok(response) if response.status().is_success() => {
            if let Some(content_type) = header_string(&response, "Content-Type") {
                state.content_types.insert(path.to_string(), content_type);
            }
            let offset = header_string(&response, "Stream-Next-Offset");
            success("connect", json!({"status": 200, "offset": offset}))
        }
        Ok(response) if response.status().as_u16() == 404 => {
            error_response("connect", "NOT_FOUND", "stream not found")
        }
        Ok(response) => error_response("connect", "INTERNAL_ERROR", &response.status().to_string()),
        Err(err) => error_response("connect", "NETWORK_ERROR", &err.to_string()),
    }
}

async fn handle_append(state: &mut AdapterState, command: &Value) -> Value {
    let (Some(path), Some(data)) = (
        command.get("path").and_then(|v| v.as_str()),
        command.get("data").and_then(|v| v.as_str()),
    ) else {
        return error_response("append", "PARSE_ERROR", "missing path or data");
    };
    let binary = command.get("binary").and_then(|v| v.as_bool()).unwrap_or(false);
    let seq = command.get("seq").and_then(|v| v.as_u64());

    let body = if binary {
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .unwrap_or_default()
    } else {
        data.as_bytes().to_vec()
    };

    let content_type = state
        .content_types
        .get(path)
        .cloned()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let headers_sent = AdapterState::resolve_dynamic(&mut state.dynamic_headers, true);
    let params_sent = AdapterState::resolve_dynamic(&mut state.dynamic_params, true);

    let mut request = state.http.post(state.url_for(path)).header("Content-Type", &content_type);
    if let Some(seq) = seq {
        request = request.header("Stream-Seq", seq.to_string());
    }
    if let Value::Object(headers) = &headers_sent {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                request = request.header(name.as_str(), value);
            }
        }
    }
    if let Value::Object(params) = &params_sent {
        let query: Vec<(String, String)> = params
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect();
        request = request.query(&query);
    }

    match request.body(body).send().await {
        Ok(response) if response.status().is_success() => {
            let offset = header_string(&response, "Stream-Next-Offset");
            let mut fields = json!({"status": 200, "offset": offset});
            if let Value::Object(map) = &mut fields {
                if headers_sent != Value::Null {
                    map.insert("headersSent".to_string(), headers_sent);
                }
                if params_sent != Value::Null {
                    map.insert("paramsSent".to_string(), params_sent);
                }
            }
            success("append", fields)
        }
        Ok(response) => error_response("append", status_to_code(response.status().as_u16()), "append rejected"),
        Err(err) => error_response("append", "NETWORK_ERROR", &err.to_string()),
    }
}

async fn handle_read(state: &mut AdapterState, command: &Value) -> Value {
    let Some(path) = command.get("path").and_then(|v| v.as_str()) else {
        return error_response("read", "PARSE_ERROR", "missing path");
    };
    let offset = command.get("offset").and_then(|v| v.as_str()).unwrap_or("-1").to_string();
    let live = match command.get("live").and_then(|v| v.as_str()) {
        Some("long-poll") => LiveMode::LongPoll,
        Some("sse") => LiveMode::Sse,
        _ => LiveMode::CatchUp,
    };
    let timeout_ms = command.get("timeoutMs").and_then(|v| v.as_u64()).unwrap_or(5000);
    let max_chunks = command.get("maxChunks").and_then(|v| v.as_u64()).unwrap_or(100) as usize;
    let wait_for_up_to_date = command.get("waitForUpToDate").and_then(|v| v.as_bool()).unwrap_or(false);

    let options = ReadOptions {
        live,
        timeout: Duration::from_millis(timeout_ms),
        sse_max_retries: 3,
    };
    let mut reader = StreamReader::new(state.url_for(path), offset.clone(), options);

    let mut chunks = Vec::new();
    let mut up_to_date = false;
    let mut stream_closed = false;
    let mut status = 200u16;

    for _ in 0..max_chunks {
        match reader.next().await {
            Ok(Some(chunk)) => {
                status = chunk.status_code;
                up_to_date = chunk.up_to_date;
                stream_closed = stream_closed || chunk.stream_closed;
                if !chunk.data.is_empty() {
                    chunks.push(chunk_to_json(&chunk));
                }
                if stream_closed || (wait_for_up_to_date && up_to_date) || (live == LiveMode::CatchUp && up_to_date) {
                    break;
                }
            }
            Ok(None) => {
                up_to_date = true;
                break;
            }
            Err(err) => return error_response("read", client_error_code(&err), &err.to_string()),
        }
    }

    success(
        "read",
        json!({
            "status": status,
            "chunks": chunks,
            "offset": reader.offset(),
            "upToDate": up_to_date,
            "streamClosed": stream_closed,
        }),
    )
}

fn chunk_to_json(chunk: &Chunk) -> Value {
    if chunk.is_binary {
        json!({
            "data": base64::engine::general_purpose::STANDARD.encode(&chunk.data),
            "offset": chunk.offset,
            "binary": true,
        })
    } else {
        json!({
            "data": String::from_utf8_lossy(&chunk.data),
            "offset": chunk.offset,
        })
    }
}

async fn handle_head(state: &mut AdapterState, command: &Value) -> Value {
    let Some(path) = command.get("path").and_then(|v| v.as_str()) else {
        return error_response("head", "PARSE_ERROR", "missing path");
    };

    match state.http.head(state.url_for(path)).send().await {
        Ok(response) if response.status().is_success() => {
            let offset = header_string(&response, "Stream-Next-Offset");
            let content_type = header_string(&response, "Content-Type").unwrap_or_default();
            let stream_closed = header_string(&response, "Stream-Closed")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            success(
                "head",
                json!({"status": 200, "offset": offset, "contentType": content_type, "streamClosed": stream_closed}),
            )
        }
        Ok(response) if response.status().as_u16() == 404 => error_response("head", "NOT_FOUND", "stream not found"),
        Ok(response) => error_response("head", "INTERNAL_ERROR", &response.status().to_string()),
        Err(err) => error_response("head", "NETWORK_ERROR", &err.to_string()),
    }
}

async fn handle_delete(state: &mut AdapterState, command: &Value) -> Value {
    let Some(path) = command.get("path").and_then(|v| v.as_str()) else {
        return error_response("delete", "PARSE_ERROR", "missing path");
    };

    match state.http.delete(state.url_for(path)).send().await {
        Ok(response) if response.status().is_success() => {
            state.content_types.remove(path);
            success("delete", json!({"status": 200}))
        }
        Ok(response) if response.status().as_u16() == 404 => error_response("delete", "NOT_FOUND", "stream not found"),
        Ok(response) => error_response("delete", "INTERNAL_ERROR", &response.status().to_string()),
        Err(err) => error_response("delete", "NETWORK_ERROR", &err.to_string()),
    }
}

async fn handle_close(state: &mut AdapterState, command: &Value) -> Value {
    let Some(path) = command.get("path").and_then(|v| v.as_str()) else {
        return error_response("close", "PARSE_ERROR", "missing path");
    };
    let binary = command.get("binary").and_then(|v| v.as_bool()).unwrap_or(false);
    let data = command.get("data").and_then(|v| v.as_str());

    let content_type = state
        .content_types
        .get(path)
        .cloned()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let mut request = state
        .http
        .post(state.url_for(path))
        .header("Stream-Closed", "true")
        .header("Content-Type", &content_type);

    if let Some(data) = data {
        let body = if binary {
            base64::engine::general_purpose::STANDARD
                .decode(data.as_bytes())
                .unwrap_or_default()
        } else {
            data.as_bytes().to_vec()
        };
        request = request.body(body);
    }

    match request.send().await {
        Ok(response) if response.status().is_success() => {
            let final_offset = header_string(&response, "Stream-Next-Offset");
            success("close", json!({"finalOffset": final_offset}))
        }
        Ok(response) if response.status().as_u16() == 404 => error_response("close", "NOT_FOUND", "stream not found"),
        Ok(response) => error_response("close", status_to_code(response.status().as_u16()), "close rejected"),
        Err(err) => error_response("close", "NETWORK_ERROR", &err.to_string()),
    }
}

fn handle_set_dynamic_header(state: &mut AdapterState, command: &Value) -> Value {
    let (Some(name), Some(value_type)) = (
        command.get("name").and_then(|v| v.as_str()),
        command.get("valueType").and_then(|v| v.as_str()),
    ) else {
        return error_response("set-dynamic-header", "PARSE_ERROR", "missing name or valueType");
    };
    let initial = command.get("initialValue").and_then(|v| v.as_str()).map(str::to_string);
    state.dynamic_headers.insert(
        name.to_string(),
        DynamicValue {
            value_type: value_type.to_string(),
            counter: 0,
            token_value: initial,
        },
    );
    success("set-dynamic-header", json!({}))
}

fn handle_set_dynamic_param(state: &mut AdapterState, command: &Value) -> Value {
    let (Some(name), Some(value_type)) = (
        command.get("name").and_then(|v| v.as_str()),
        command.get("valueType").and_then(|v| v.as_str()),
    ) else {
        return error_response("set-dynamic-param", "PARSE_ERROR", "missing name or valueType");
    };
    state.dynamic_params.insert(
        name.to_string(),
        DynamicValue {
            value_type: value_type.to_string(),
            counter: 0,
            token_value: None,
        },
    );
    success("set-dynamic-param", json!({}))
}

fn handle_clear_dynamic(state: &mut AdapterState) -> Value {
    state.dynamic_headers.clear();
    state.dynamic_params.clear();
    success("clear-dynamic", json!({}))
}

fn producer_for<'a>(
    state: &'a mut AdapterState,
    path: &str,
    producer_id: &str,
    epoch: u64,
    auto_claim: bool,
) -> &'a mut Producer {
    let key = (path.to_string(), producer_id.to_string());
    let content_type = state
        .content_types
        .get(path)
        .cloned()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let url = state.url_for(path);
    state.producers.entry(key).or_insert_with(move || {
        Producer::new(url, producer_id)
            .with_content_type(content_type)
            .with_auto_claim(auto_claim)
            .with_epoch(epoch)
    })
}

async fn handle_idempotent_append(state: &mut AdapterState, command: &Value) -> Value {
    let (Some(path), Some(producer_id)) = (
        command.get("path").and_then(|v| v.as_str()),
        command.get("producerId").and_then(|v| v.as_str()),
    ) else {
        return error_response("idempotent-append", "PARSE_ERROR", "missing path or producerId");
    };
    let epoch = command.get("epoch").and_then(|v| v.as_u64()).unwrap_or(0);
    let auto_claim = command.get("autoClaim").and_then(|v| v.as_bool()).unwrap_or(false);
    let data = command.get("data").and_then(|v| v.as_str()).unwrap_or("");

    let producer = producer_for(state, path, producer_id, epoch, auto_claim);
    if let Err(err) = producer.append(data.as_bytes()) {
        return error_response("idempotent-append", client_error_code(&err), &err.to_string());
    }
    match producer.flush().await {
        Ok(()) => success("idempotent-append", json!({"status": 200})),
        Err(err) => error_response("idempotent-append", client_error_code(&err), &err.to_string()),
    }
}

async fn handle_idempotent_append_batch(state: &mut AdapterState, command: &Value) -> Value {
    let (Some(path), Some(producer_id)) = (
        command.get("path").and_then(|v| v.as_str()),
        command.get("producerId").and_then(|v| v.as_str()),
    ) else {
        return error_response("idempotent-append-batch", "PARSE_ERROR", "missing path or producerId");
    };
    let epoch = command.get("epoch").and_then(|v| v.as_u64()).unwrap_or(0);
    let auto_claim = command.get("autoClaim").and_then(|v| v.as_bool()).unwrap_or(false);
    let items: Vec<String> = command
        .get("items")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let producer = producer_for(state, path, producer_id, epoch, auto_claim);
    for item in &items {
        if let Err(err) = producer.append(item.as_bytes()) {
            return error_response("idempotent-append-batch", client_error_code(&err), &err.to_string());
        }
    }
    match producer.flush().await {
        Ok(()) => success("idempotent-append-batch", json!({"status": 200})),
        Err(err) => error_response("idempotent-append-batch", client_error_code(&err), &err.to_string()),
    }
}

async fn handle_idempotent_close(state: &mut AdapterState, command: &Value) -> Value {
    let (Some(path), Some(producer_id)) = (
        command.get("path").and_then(|v| v.as_str()),
        command.get("producerId").and_then(|v| v.as_str()),
    ) else {
        return error_response("idempotent-close", "PARSE_ERROR", "missing path or producerId");
    };
    let epoch = command.get("epoch").and_then(|v| v.as_u64()).unwrap_or(0);
    let auto_claim = command.get("autoClaim").and_then(|v| v.as_bool()).unwrap_or(false);
    let binary = command.get("binary").and_then(|v| v.as_bool()).unwrap_or(false);
    let data = command.get("data").and_then(|v| v.as_str());

    let final_data = data.map(|d| {
        if binary {
            base64::engine::general_purpose::STANDARD.decode(d.as_bytes()).unwrap_or_default()
        } else {
            d.as_bytes().to_vec()
        }
    });

    let producer = producer_for(state, path, producer_id, epoch, auto_claim);
    match producer.close_stream(final_data.as_deref()).await {
        Ok(()) => success("idempotent-close", json!({"status": 200})),
        Err(err) => error_response("idempotent-close", client_error_code(&err), &err.to_string()),
    }
}

fn handle_idempotent_detach(state: &mut AdapterState, command: &Value) -> Value {
    if let (Some(path), Some(producer_id)) = (
        command.get("path").and_then(|v| v.as_str()),
        command.get("producerId").and_then(|v| v.as_str()),
    ) {
        state.producers.remove(&(path.to_string(), producer_id.to_string()));
    }
    success("idempotent-detach", json!({"status": 200}))
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn status_to_code(status: u16) -> &'static str {
    match status {
        400 => "PARSE_ERROR",
        403 => "STALE_EPOCH",
        404 => "NOT_FOUND",
        409 => "SEQUENCE_CONFLICT",
        _ => "INTERNAL_ERROR",
    }
}
