//! In-memory stream storage.
//!
//! Provides a thread-safe in-memory implementation of stream storage
//! with support for long-polling and SSE. All mutation of a given stream's
//! state (messages, producer map, closed flag) happens inside the single
//! write-lock critical section below; there is no separate per-stream lock.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::producer;
use crate::types::{
    compare_offsets, format_offset, normalize_content_type, parse_offset, AppendOptions,
    AppendOutcome, ProducerOutcome, ProducerState, ReadResult, Stream, StreamConfig,
    StreamLifecycleEvent, StreamMessage,
};

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stream not found: {0}")]
    NotFound(String),

    #[error("stream already exists with a different configuration")]
    ConfigMismatch,

    #[error("content-type mismatch: expected {expected}, got {actual}")]
    ContentTypeMismatch { expected: String, actual: String },

    #[error("stream-seq regression: {0}")]
    SequenceConflict(String),

    #[error("invalid offset format: {0}")]
    InvalidOffset(String),

    #[error("empty body not allowed")]
    EmptyBody,

    #[error("cannot specify both Stream-TTL and Stream-Expires-At")]
    TtlConflict,

    #[error("empty JSON array not allowed on a non-initial append")]
    EmptyArrayNotAllowed,

    #[error("malformed JSON: {0}")]
    InvalidJson(String),

    #[error("stream is closed")]
    StreamClosed,
}

/// Notification sent when new data is appended to, or a stream is removed from, the store.
#[derive(Debug, Clone)]
pub struct AppendNotification {
    pub path: String,
    pub offset: String,
}

/// In-memory stream store with long-poll support.
pub struct StreamStore {
    /// Streams indexed by path
    streams: RwLock<HashMap<String, Stream>>,
    /// Broadcast channel for append/close/delete notifications
    notify_tx: broadcast::Sender<AppendNotification>,
    /// Lifecycle event callback
    on_lifecycle: Option<Box<dyn Fn(StreamLifecycleEvent) + Send + Sync>>,
}

impl StreamStore {
    /// Create a new empty stream store.
    pub fn new() -> Arc<Self> {
        let (notify_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            streams: RwLock::new(HashMap::new()),
            notify_tx,
            on_lifecycle: None,
        })
    }

    /// Create a new stream store with lifecycle callbacks.
    pub fn with_lifecycle<F>(on_lifecycle: F) -> Arc<Self>
    where
        F: Fn(StreamLifecycleEvent) + Send + Sync + 'static,
    {
        let (notify_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            streams: RwLock::new(HashMap::new()),
            notify_tx,
            on_lifecycle: Some(Box::new(on_lifecycle)),
        })
    }

    /// Subscribe to append/close/delete notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AppendNotification> {
        self.notify_tx.subscribe()
    }

    /// Check if a stream exists (and is not expired).
    pub fn has(&self, path: &str) -> bool {
        let streams = self.streams.read();
        streams.get(path).map(|s| !s.is_expired()).unwrap_or(false)
    }

    /// Get a stream by path, evicting it first if it has expired.
    pub fn get(&self, path: &str) -> Option<Stream> {
        let mut streams = self.streams.write();
        if let Some(stream) = streams.get(path) {
            if stream.is_expired() {
                streams.remove(path);
                self.emit_lifecycle(StreamLifecycleEvent::Deleted {
                    path: path.to_string(),
                    timestamp: Utc::now().timestamp_millis(),
                });
                return None;
            }
            Some(stream.clone())
        } else {
            None
        }
    }

    /// Create a new stream.
    ///
    /// Returns Ok(true) if created, Ok(false) if already exists with an identical configuration.
    pub fn create(&self, path: &str, config: StreamConfig) -> Result<bool, StoreError> {
        if config.ttl_seconds.is_some() && config.expires_at.is_some() {
            return Err(StoreError::TtlConflict);
        }

        let mut streams = self.streams.write();

        if let Some(existing) = streams.get(path) {
            if existing.is_expired() {
                streams.remove(path);
                self.emit_lifecycle(StreamLifecycleEvent::Deleted {
                    path: path.to_string(),
                    timestamp: Utc::now().timestamp_millis(),
                });
            } else {
                let existing_ct = existing.content_type.as_deref().map(normalize_content_type);
                let new_ct = config.content_type.as_deref().map(normalize_content_type);

                if existing_ct != new_ct
                    || existing.ttl_seconds != config.ttl_seconds
                    || existing.expires_at != config.expires_at
                    || existing.closed != config.closed
                {
                    return Err(StoreError::ConfigMismatch);
                }

                return Ok(false);
            }
        }

        let mut stream = Stream::new(path.to_string());
        stream.content_type = config.content_type.clone();
        stream.ttl_seconds = config.ttl_seconds;
        stream.expires_at = config.expires_at;
        stream.closed = config.closed;

        if let Some(data) = config.initial_data {
            if !data.is_empty() {
                let is_json = stream
                    .content_type
                    .as_deref()
                    .map(|ct| normalize_content_type(ct) == "application/json")
                    .unwrap_or(false);

                let fragment = if is_json {
                    flatten_json_fragment(&data, true)?
                } else {
                    Some(data)
                };

                if let Some(fragment) = fragment {
                    let (seq, byte_offset) = parse_offset(&stream.current_offset).unwrap();
                    stream.current_offset = format_offset(seq, byte_offset + fragment.len() as u64);
                    let message = StreamMessage {
                        data: fragment,
                        offset: stream.current_offset.clone(),
                        timestamp: Utc::now().timestamp_millis(),
                    };
                    stream.messages.push(message);
                }
            }
        }

        info!(path = %path, "created stream");
        streams.insert(path.to_string(), stream);

        self.emit_lifecycle(StreamLifecycleEvent::Created {
            path: path.to_string(),
            content_type: config.content_type,
            timestamp: Utc::now().timestamp_millis(),
        });

        Ok(true)
    }

    /// Delete a stream, waking any long-poll/SSE waiters.
    pub fn delete(&self, path: &str) -> bool {
        let mut streams = self.streams.write();
        let removed = streams.remove(path).is_some();

        if removed {
            info!(path = %path, "deleted stream");
            self.emit_lifecycle(StreamLifecycleEvent::Deleted {
                path: path.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            });
            let _ = self.notify_tx.send(AppendNotification {
                path: path.to_string(),
                offset: String::new(),
            });
        }

        removed
    }

    /// Append data to a stream, optionally under producer-epoch/sequence control
    /// and optionally closing the stream once committed.
    pub fn append(
        &self,
        path: &str,
        data: Vec<u8>,
        opts: AppendOptions,
    ) -> Result<AppendOutcome, StoreError> {
        if data.is_empty() && !opts.close {
            return Err(StoreError::EmptyBody);
        }

        let mut streams = self.streams.write();

        let stream = streams
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        if stream.is_expired() {
            streams.remove(path);
            self.emit_lifecycle(StreamLifecycleEvent::Deleted {
                path: path.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            });
            return Err(StoreError::NotFound(path.to_string()));
        }

        if stream.closed {
            if let Some(ref p) = opts.producer {
                if stream.closed_by_matches(&p.producer_id, p.epoch, p.seq) {
                    return Ok(AppendOutcome {
                        offset: stream.current_offset.clone(),
                        producer_outcome: Some(ProducerOutcome::Duplicate { last_seq: p.seq }),
                        stream_closed: true,
                    });
                }
            }
            return Err(StoreError::StreamClosed);
        }

        if let Some(ct) = opts.content_type {
            if let Some(ref stream_ct) = stream.content_type {
                if normalize_content_type(ct) != normalize_content_type(stream_ct) {
                    return Err(StoreError::ContentTypeMismatch {
                        expected: stream_ct.clone(),
                        actual: ct.to_string(),
                    });
                }
            }
        }

        if let Some(ref p) = opts.producer {
            let outcome = producer::validate(stream.producers.get(&p.producer_id), p.epoch, p.seq);
            if !outcome.is_accepted() {
                return Ok(AppendOutcome {
                    offset: stream.current_offset.clone(),
                    producer_outcome: Some(outcome),
                    stream_closed: stream.closed,
                });
            }
        }

        if let Some(s) = opts.seq {
            if let Some(ref last_seq) = stream.last_seq {
                if s <= last_seq.as_str() {
                    return Err(StoreError::SequenceConflict(format!(
                        "Stream-Seq {} did not sort after last accepted {}",
                        s, last_seq
                    )));
                }
            }
        }

        let is_json = stream.is_json();
        let fragment = if data.is_empty() {
            None
        } else if is_json {
            match flatten_json_fragment(&data, false) {
                Ok(f) => f,
                Err(e) => return Err(e),
            }
        } else {
            Some(data)
        };

        if let Some(fragment) = fragment {
            let (seq_num, byte_offset) = parse_offset(&stream.current_offset).unwrap();
            stream.current_offset = format_offset(seq_num, byte_offset + fragment.len() as u64);
            let message = StreamMessage {
                data: fragment,
                offset: stream.current_offset.clone(),
                timestamp: Utc::now().timestamp_millis(),
            };
            stream.messages.push(message);
        }

        if let Some(s) = opts.seq {
            stream.last_seq = Some(s.to_string());
        }

        let producer_outcome = if let Some(p) = opts.producer {
            stream.producers.insert(
                p.producer_id.clone(),
                ProducerState {
                    epoch: p.epoch,
                    last_seq: p.seq,
                    last_updated_ms: Utc::now().timestamp_millis(),
                },
            );
            if opts.close {
                stream.closed_by = Some(crate::types::ClosedBy {
                    producer_id: p.producer_id,
                    epoch: p.epoch,
                    seq: p.seq,
                });
            }
            Some(ProducerOutcome::Accepted)
        } else {
            None
        };

        if opts.close {
            stream.closed = true;
        }

        let new_offset = stream.current_offset.clone();
        let stream_closed = stream.closed;

        debug!(path = %path, offset = %new_offset, closed = stream_closed, "appended to stream");

        let _ = self.notify_tx.send(AppendNotification {
            path: path.to_string(),
            offset: new_offset.clone(),
        });

        Ok(AppendOutcome {
            offset: new_offset,
            producer_outcome,
            stream_closed,
        })
    }

    /// Close a stream without appending data. Thin convenience over `append`.
    pub fn close(
        &self,
        path: &str,
        producer: Option<crate::types::ProducerHeaders>,
    ) -> Result<AppendOutcome, StoreError> {
        self.append(
            path,
            Vec::new(),
            AppendOptions {
                seq: None,
                content_type: None,
                producer,
                close: true,
            },
        )
    }

    /// Read messages from a stream whose offset is strictly greater than `offset`
    /// (or all messages, if `offset` is absent or `-1`).
    pub fn read(&self, path: &str, offset: &str) -> Result<ReadResult, StoreError> {
        let stream = self
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        if offset != "-1" && parse_offset(offset).is_none() {
            return Err(StoreError::InvalidOffset(offset.to_string()));
        }

        let messages: Vec<StreamMessage> = if offset == "-1" {
            stream.messages.clone()
        } else {
            stream
                .messages
                .iter()
                .filter(|m| compare_offsets(&m.offset, offset) == std::cmp::Ordering::Greater)
                .cloned()
                .collect()
        };

        Ok(ReadResult {
            messages,
            next_offset: stream.current_offset.clone(),
            up_to_date: true,
            stream_closed: stream.closed,
        })
    }

    /// Wait (bounded by `timeout`) for new messages beyond `offset`, returning
    /// immediately if data is already available or the stream is closed at tail.
    pub async fn wait_for_messages(
        &self,
        path: &str,
        offset: &str,
        timeout: Duration,
    ) -> Result<ReadResult, StoreError> {
        let result = self.read(path, offset)?;
        if !result.messages.is_empty() || result.stream_closed {
            return Ok(result);
        }

        let mut rx = self.subscribe();
        let woken = tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(notification) if notification.path == path => return,
                    Ok(_) => continue,
                    Err(_) => return,
                }
            }
        })
        .await;

        match woken {
            Ok(()) => self.read(path, offset),
            Err(_) => self.read(path, offset),
        }
    }

    /// Get the current tail offset of a stream.
    pub fn get_current_offset(&self, path: &str) -> Option<String> {
        self.get(path).map(|s| s.current_offset)
    }

    /// Format a read response based on content type.
    ///
    /// For JSON streams, concatenates fragments, strips the trailing comma and
    /// whitespace, and wraps the result in array brackets.
    pub fn format_response(&self, path: &str, messages: &[StreamMessage]) -> Vec<u8> {
        if let Some(stream) = self.get(path) {
            if stream.is_json() {
                let mut data: Vec<u8> = messages.iter().flat_map(|m| m.data.clone()).collect();
                while matches!(data.last(), Some(b) if b.is_ascii_whitespace() || *b == b',') {
                    data.pop();
                }
                let mut result = vec![b'['];
                result.extend(data);
                result.push(b']');
                return result;
            }
        }

        messages.iter().flat_map(|m| m.data.clone()).collect()
    }

    fn emit_lifecycle(&self, event: StreamLifecycleEvent) {
        if let Some(ref callback) = self.on_lifecycle {
            callback(event);
        }
    }
}

impl Default for StreamStore {
    fn default() -> Self {
        let (notify_tx, _) = broadcast::channel(1024);
        Self {
            streams: RwLock::new(HashMap::new()),
            notify_tx,
            on_lifecycle: None,
        }
    }
}

/// Apply the append-time JSON-flatten rule to a body that is already known to
/// belong to a JSON-typed stream.
///
/// Returns `Ok(None)` when the body is an empty array on the stream's initial
/// data (a legitimate zero-message success); any other empty-array case is a
/// hard error.
fn flatten_json_fragment(body: &[u8], initial: bool) -> Result<Option<Vec<u8>>, StoreError> {
    let trimmed = trim_ascii(body);
    if trimmed.is_empty() {
        return Err(StoreError::InvalidJson("empty body".to_string()));
    }

    let inner = if trimmed[0] == b'[' {
        let end = find_matching_bracket(trimmed)
            .ok_or_else(|| StoreError::InvalidJson("unbalanced brackets".to_string()))?;
        trim_ascii(&trimmed[1..end])
    } else {
        trimmed
    };

    if inner.is_empty() {
        return if initial {
            Ok(None)
        } else {
            Err(StoreError::EmptyArrayNotAllowed)
        };
    }

    let mut fragment = inner.to_vec();
    fragment.push(b',');
    Ok(Some(fragment))
}

/// Scan `body` (which begins with `[`) for the index of its matching `]`,
/// respecting string literals and backslash escapes.
fn find_matching_bracket(body: &[u8]) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in body.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn trim_ascii(body: &[u8]) -> &[u8] {
    let start = body.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(body.len());
    let end = body.iter().rposition(|b| !b.is_ascii_whitespace()).map(|i| i + 1).unwrap_or(0);
    if start >= end {
        &[]
    } else {
        &body[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProducerHeaders;

    fn append_opts() -> AppendOptions<'static> {
        AppendOptions::default()
    }

    #[test]
    fn test_create_and_get_stream() {
        let store = StreamStore::new();

        let config = StreamConfig {
            content_type: Some("text/plain".to_string()),
            ..Default::default()
        };

        assert!(store.create("/test/stream", config).unwrap());

        let stream = store.get("/test/stream").unwrap();
        assert_eq!(stream.path, "/test/stream");
        assert_eq!(stream.content_type, Some("text/plain".to_string()));
    }

    #[test]
    fn test_create_idempotent() {
        let store = StreamStore::new();
        let config = StreamConfig {
            content_type: Some("text/plain".to_string()),
            ..Default::default()
        };

        assert!(store.create("/test/stream", config.clone()).unwrap());
        assert!(!store.create("/test/stream", config).unwrap());
    }

    #[test]
    fn test_create_config_mismatch() {
        let store = StreamStore::new();

        let config1 = StreamConfig {
            content_type: Some("text/plain".to_string()),
            ..Default::default()
        };
        let config2 = StreamConfig {
            content_type: Some("application/json".to_string()),
            ..Default::default()
        };

        store.create("/test/stream", config1).unwrap();
        let result = store.create("/test/stream", config2);
        assert!(matches!(result, Err(StoreError::ConfigMismatch)));
    }

    #[test]
    fn test_append_and_read_binary() {
        let store = StreamStore::new();
        store
            .create(
                "/test/stream",
                StreamConfig {
                    content_type: Some("application/octet-stream".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        store
            .append("/test/stream", b"hello".to_vec(), append_opts())
            .unwrap();
        store
            .append("/test/stream", b"world".to_vec(), append_opts())
            .unwrap();

        let result = store.read("/test/stream", "-1").unwrap();
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].data, b"hello");
        assert_eq!(result.messages[1].data, b"world");
        assert!(result.up_to_date);
    }

    #[test]
    fn test_read_strictly_after_offset() {
        let store = StreamStore::new();
        store
            .create(
                "/test/stream",
                StreamConfig {
                    content_type: Some("application/octet-stream".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let first = store
            .append("/test/stream", b"msg1".to_vec(), append_opts())
            .unwrap();
        store
            .append("/test/stream", b"msg2".to_vec(), append_opts())
            .unwrap();

        // reading at the offset returned after msg1 should only surface msg2
        let result = store.read("/test/stream", &first.offset).unwrap();
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].data, b"msg2");

        let before = format_offset(0, 0);
        let result = store.read("/test/stream", &before).unwrap();
        assert_eq!(result.messages.len(), 2);
    }

    #[test]
    fn test_json_flatten_and_format() {
        let store = StreamStore::new();
        store
            .create(
                "/test/json",
                StreamConfig {
                    content_type: Some("application/json".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        store
            .append(
                "/test/json",
                br#"[1,2]"#.to_vec(),
                AppendOptions {
                    content_type: Some("application/json"),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .append(
                "/test/json",
                br#"[3,4]"#.to_vec(),
                AppendOptions {
                    content_type: Some("application/json"),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .append(
                "/test/json",
                b"5".to_vec(),
                AppendOptions {
                    content_type: Some("application/json"),
                    ..Default::default()
                },
            )
            .unwrap();

        let result = store.read("/test/json", "-1").unwrap();
        let formatted = store.format_response("/test/json", &result.messages);
        assert_eq!(String::from_utf8(formatted).unwrap(), "[1,2,3,4,5]");
    }

    #[test]
    fn test_json_string_with_bracket_survives_flatten() {
        let store = StreamStore::new();
        store
            .create(
                "/test/json",
                StreamConfig {
                    content_type: Some("application/json".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        store
            .append(
                "/test/json",
                br#"["a]b"]"#.to_vec(),
                AppendOptions {
                    content_type: Some("application/json"),
                    ..Default::default()
                },
            )
            .unwrap();

        let result = store.read("/test/json", "-1").unwrap();
        let formatted = store.format_response("/test/json", &result.messages);
        assert_eq!(String::from_utf8(formatted).unwrap(), r#"["a]b"]"#);
    }

    #[test]
    fn test_empty_array_on_initial_data_succeeds() {
        let store = StreamStore::new();
        let created = store
            .create(
                "/test/json",
                StreamConfig {
                    content_type: Some("application/json".to_string()),
                    initial_data: Some(b"[]".to_vec()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(created);

        let result = store.read("/test/json", "-1").unwrap();
        assert!(result.messages.is_empty());
    }

    #[test]
    fn test_empty_array_on_append_rejected() {
        let store = StreamStore::new();
        store
            .create(
                "/test/json",
                StreamConfig {
                    content_type: Some("application/json".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let result = store.append(
            "/test/json",
            b"[]".to_vec(),
            AppendOptions {
                content_type: Some("application/json"),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(StoreError::EmptyArrayNotAllowed)));
    }

    #[test]
    fn test_delete_stream_wakes_waiters() {
        let store = StreamStore::new();
        store
            .create("/test/stream", StreamConfig::default())
            .unwrap();

        assert!(store.has("/test/stream"));
        assert!(store.delete("/test/stream"));
        assert!(!store.has("/test/stream"));
    }

    #[test]
    fn test_legacy_sequence_conflict() {
        let store = StreamStore::new();
        store
            .create(
                "/test/stream",
                StreamConfig {
                    content_type: Some("text/plain".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        store
            .append(
                "/test/stream",
                b"msg1".to_vec(),
                AppendOptions {
                    seq: Some("2"),
                    ..Default::default()
                },
            )
            .unwrap();

        let result = store.append(
            "/test/stream",
            b"msg2".to_vec(),
            AppendOptions {
                seq: Some("1"),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(StoreError::SequenceConflict(_))));
    }

    #[test]
    fn test_producer_accept_then_duplicate() {
        let store = StreamStore::new();
        store
            .create("/test/stream", StreamConfig::default())
            .unwrap();

        let producer = ProducerHeaders {
            producer_id: "p1".to_string(),
            epoch: 0,
            seq: 0,
        };

        let outcome = store
            .append(
                "/test/stream",
                b"hello".to_vec(),
                AppendOptions {
                    producer: Some(producer.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(outcome.producer_outcome, Some(ProducerOutcome::Accepted));

        let replay = store
            .append(
                "/test/stream",
                b"hello".to_vec(),
                AppendOptions {
                    producer: Some(producer),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            replay.producer_outcome,
            Some(ProducerOutcome::Duplicate { last_seq: 0 })
        );

        let result = store.read("/test/stream", "-1").unwrap();
        assert_eq!(result.messages.len(), 1);
    }

    #[test]
    fn test_producer_stale_epoch() {
        let store = StreamStore::new();
        store
            .create("/test/stream", StreamConfig::default())
            .unwrap();

        store
            .append(
                "/test/stream",
                b"a".to_vec(),
                AppendOptions {
                    producer: Some(ProducerHeaders {
                        producer_id: "p1".to_string(),
                        epoch: 1,
                        seq: 0,
                    }),
                    ..Default::default()
                },
            )
            .unwrap();

        let outcome = store
            .append(
                "/test/stream",
                b"b".to_vec(),
                AppendOptions {
                    producer: Some(ProducerHeaders {
                        producer_id: "p1".to_string(),
                        epoch: 0,
                        seq: 0,
                    }),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(
            outcome.producer_outcome,
            Some(ProducerOutcome::StaleEpoch { current_epoch: 1 })
        );
        // no mutation: stream should still have exactly one message
        let result = store.read("/test/stream", "-1").unwrap();
        assert_eq!(result.messages.len(), 1);
    }

    #[test]
    fn test_close_then_append_rejected_unless_same_producer_replay() {
        let store = StreamStore::new();
        store
            .create("/test/stream", StreamConfig::default())
            .unwrap();

        let producer = ProducerHeaders {
            producer_id: "p1".to_string(),
            epoch: 0,
            seq: 0,
        };

        store
            .append(
                "/test/stream",
                b"final".to_vec(),
                AppendOptions {
                    producer: Some(producer.clone()),
                    close: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let stream = store.get("/test/stream").unwrap();
        assert!(stream.closed);

        // a different producer writing to a closed stream is rejected
        let rejected = store.append(
            "/test/stream",
            b"nope".to_vec(),
            AppendOptions {
                producer: Some(ProducerHeaders {
                    producer_id: "p2".to_string(),
                    epoch: 0,
                    seq: 0,
                }),
                ..Default::default()
            },
        );
        assert!(matches!(rejected, Err(StoreError::StreamClosed)));

        // replaying the exact close is a duplicate, not an error
        let replay = store
            .append(
                "/test/stream",
                b"final".to_vec(),
                AppendOptions {
                    producer: Some(producer),
                    close: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(replay.stream_closed);
        assert_eq!(
            replay.producer_outcome,
            Some(ProducerOutcome::Duplicate { last_seq: 0 })
        );
    }
}
