//! Client library for the durable streams protocol.
//!
//! Provides an idempotent [`producer::Producer`] for appending data and a
//! [`reader::StreamReader`] for catch-up, long-poll and SSE reads.

pub mod error;
pub mod producer;
pub mod reader;
mod sse;

pub use error::ClientError;
pub use producer::Producer;
pub use reader::{Chunk, LiveMode, ReadOptions, StreamReader};

pub(crate) fn is_json_content_type(content_type: &str) -> bool {
    let normalized = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    normalized == "application/json"
}
