//! Error types for the producer and read-iterator clients.

/// Errors surfaced by the idempotent producer and the read iterator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed JSON payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stream not found")]
    NotFound,

    #[error("content-type mismatch or sequence conflict")]
    Conflict,

    #[error("producer epoch {current_epoch} is ahead of the requested epoch")]
    StaleEpoch { current_epoch: u64 },

    #[error("auto-claim retry budget exceeded")]
    AutoClaimExhausted,

    #[error("sequence gap: expected {expected_seq}, server reported {received_seq}")]
    SequenceGap { expected_seq: u64, received_seq: u64 },

    #[error("stream is closed")]
    StreamClosed,

    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),

    #[error("sse connection error: {0}")]
    Connection(String),
}
