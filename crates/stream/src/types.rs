//! Core types for the durable streams server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message stored in a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Raw message bytes (already flattened for JSON streams - trailing comma included)
    pub data: Vec<u8>,
    /// Offset this message was appended at
    pub offset: String,
    /// Timestamp when the message was appended (milliseconds since epoch)
    pub timestamp: i64,
}

/// Producer state for idempotent writes, keyed by producer id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerState {
    pub epoch: u64,
    pub last_seq: u64,
    pub last_updated_ms: i64,
}

/// Records which producer closed a stream, for idempotent close replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedBy {
    pub producer_id: String,
    pub epoch: u64,
    pub seq: u64,
}

/// Stream metadata and messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    /// URL path identifying the stream
    pub path: String,
    /// MIME type of the stream content
    pub content_type: Option<String>,
    /// Messages stored in the stream
    pub messages: Vec<StreamMessage>,
    /// Current tail offset (points to next write position)
    pub current_offset: String,
    /// Last `Stream-Seq` writer token accepted (distinct from producer epoch/seq)
    pub last_seq: Option<String>,
    /// Time-to-live in seconds (relative TTL)
    pub ttl_seconds: Option<u64>,
    /// Absolute expiration timestamp (ISO 8601)
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation timestamp (milliseconds since epoch)
    pub created_at: i64,
    /// Whether the stream has been closed to further appends
    pub closed: bool,
    /// Producer that closed the stream, if any (enables idempotent close replay)
    pub closed_by: Option<ClosedBy>,
    /// Producer states, keyed by producer id
    pub producers: std::collections::HashMap<String, ProducerState>,
}

impl Stream {
    /// Create a new stream with the given path.
    pub fn new(path: String) -> Self {
        Self {
            path,
            content_type: None,
            messages: Vec::new(),
            current_offset: format_offset(0, 0),
            last_seq: None,
            ttl_seconds: None,
            expires_at: None,
            created_at: Utc::now().timestamp_millis(),
            closed: false,
            closed_by: None,
            producers: std::collections::HashMap::new(),
        }
    }

    /// Check if the stream has expired.
    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            return Utc::now() >= expires_at;
        }
        if let Some(ttl_seconds) = self.ttl_seconds {
            let expiry = self.created_at + (ttl_seconds as i64 * 1000);
            return Utc::now().timestamp_millis() >= expiry;
        }
        false
    }

    /// Check if this stream uses JSON content type.
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_ref()
            .map(|ct| normalize_content_type(ct) == "application/json")
            .unwrap_or(false)
    }

    /// Check whether a producer triple matches the recorded close attribution.
    pub fn closed_by_matches(&self, producer_id: &str, epoch: u64, seq: u64) -> bool {
        self.closed_by
            .as_ref()
            .map(|c| c.producer_id == producer_id && c.epoch == epoch && c.seq == seq)
            .unwrap_or(false)
    }
}

/// Stream lifecycle event for hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamLifecycleEvent {
    Created {
        path: String,
        content_type: Option<String>,
        timestamp: i64,
    },
    Deleted {
        path: String,
        timestamp: i64,
    },
}

/// Configuration for creating a stream.
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    pub content_type: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub initial_data: Option<Vec<u8>>,
    pub closed: bool,
}

/// Producer headers carried on an append or close request.
#[derive(Debug, Clone)]
pub struct ProducerHeaders {
    pub producer_id: String,
    pub epoch: u64,
    pub seq: u64,
}

/// Options for an append operation.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions<'a> {
    /// `Stream-Seq` writer-token, distinct from producer epoch/seq.
    pub seq: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub producer: Option<ProducerHeaders>,
    /// Close the stream once this append is committed.
    pub close: bool,
}

/// Outcome of the producer epoch/sequence state machine (spec.md 4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerOutcome {
    Accepted,
    Duplicate { last_seq: u64 },
    StaleEpoch { current_epoch: u64 },
    InvalidEpochSeq,
    SequenceGap { expected_seq: u64, received_seq: u64 },
}

impl ProducerOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProducerOutcome::Accepted)
    }
}

/// Result of an append, enough for the HTTP layer to choose a status code
/// and echo headers without re-deriving producer state.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub offset: String,
    pub producer_outcome: Option<ProducerOutcome>,
    pub stream_closed: bool,
}

/// Result of reading from a stream.
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// Messages read from the stream
    pub messages: Vec<StreamMessage>,
    /// Next offset to use for subsequent reads
    pub next_offset: String,
    /// Whether we've caught up to the tail
    pub up_to_date: bool,
    /// Whether the stream is closed and at tail
    pub stream_closed: bool,
}

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Port to listen on (0 for auto-assign)
    pub port: u16,
    /// Host to bind to
    pub host: String,
    /// Long-poll timeout in milliseconds
    pub long_poll_timeout_ms: u64,
    /// Enable compression
    pub compression: bool,
    /// Cursor interval in seconds
    pub cursor_interval_seconds: u64,
    /// Cursor epoch for interval calculation
    pub cursor_epoch: DateTime<Utc>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 4437,
            host: "127.0.0.1".to_string(),
            long_poll_timeout_ms: 30_000,
            compression: true,
            cursor_interval_seconds: 20,
            // October 9, 2024 as default epoch
            cursor_epoch: DateTime::parse_from_rfc3339("2024-10-09T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }
}

/// Format an offset string from read sequence and byte offset.
/// Format: "readSeq_byteOffset" with 16-digit zero-padding each.
pub fn format_offset(read_seq: u64, byte_offset: u64) -> String {
    format!("{:016}_{:016}", read_seq, byte_offset)
}

/// Parse an offset string into (read_seq, byte_offset).
/// Returns None if the format is invalid.
pub fn parse_offset(offset: &str) -> Option<(u64, u64)> {
    let parts: Vec<&str> = offset.split('_').collect();
    if parts.len() != 2 || parts[0].len() != 16 || parts[1].len() != 16 {
        return None;
    }
    let read_seq = parts[0].parse().ok()?;
    let byte_offset = parts[1].parse().ok()?;
    Some((read_seq, byte_offset))
}

/// Normalize a content type by stripping charset/parameters and lowercasing.
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_lowercase()
}

/// Compare two offsets lexicographically.
/// Returns Ordering::Less if a < b, Equal if a == b, Greater if a > b.
pub fn compare_offsets(a: &str, b: &str) -> std::cmp::Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(0, 0), "0000000000000000_0000000000000000");
        assert_eq!(format_offset(0, 1024), "0000000000000000_0000000000001024");
        assert_eq!(format_offset(1, 0), "0000000000000001_0000000000000000");
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(
            parse_offset("0000000000000000_0000000000001024"),
            Some((0, 1024))
        );
        assert_eq!(parse_offset("invalid"), None);
        assert_eq!(parse_offset("abc_def"), None);
        assert_eq!(parse_offset("0_0"), None);
    }

    #[test]
    fn test_parse_format_roundtrip() {
        for s in [
            "0000000000000000_0000000000000000",
            "0000000000000000_0000000000000005",
            "0000000000000001_0000000000000042",
        ] {
            let (rs, bo) = parse_offset(s).unwrap();
            assert_eq!(format_offset(rs, bo), s);
        }
    }

    #[test]
    fn test_normalize_content_type() {
        assert_eq!(
            normalize_content_type("application/json; charset=utf-8"),
            "application/json"
        );
        assert_eq!(normalize_content_type("Text/Plain"), "text/plain");
    }

    #[test]
    fn test_compare_offsets() {
        use std::cmp::Ordering;
        let a = format_offset(0, 100);
        let b = format_offset(0, 200);
        let c = format_offset(1, 0);

        assert_eq!(compare_offsets(&a, &b), Ordering::Less);
        assert_eq!(compare_offsets(&b, &c), Ordering::Less);
        assert_eq!(compare_offsets(&a, &a), Ordering::Equal);
    }
}
