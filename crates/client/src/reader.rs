//! Read iterator: catch-up, long-poll and SSE reads against one stream.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::ClientError;
use crate::sse::SseParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveMode {
    CatchUp,
    LongPoll,
    Sse,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub live: LiveMode,
    pub timeout: Duration,
    pub sse_max_retries: u32,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            live: LiveMode::CatchUp,
            timeout: Duration::from_secs(30),
            sse_max_retries: 3,
        }
    }
}

/// One delivered unit of stream data, annotated with protocol metadata.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Vec<u8>,
    pub offset: String,
    pub up_to_date: bool,
    pub stream_closed: bool,
    pub status_code: u16,
    pub is_binary: bool,
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Iterates over a stream's data, catching up, long-polling or following SSE.
pub struct StreamReader {
    client: reqwest::Client,
    url: String,
    offset: String,
    options: ReadOptions,
    done: bool,
    queued: VecDeque<Chunk>,
    sse_stream: Option<ByteStream>,
    sse_parser: SseParser,
    sse_is_base64: bool,
    sse_retry_count: u32,
}

impl StreamReader {
    pub fn new(url: impl Into<String>, start_offset: impl Into<String>, options: ReadOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            offset: start_offset.into(),
            options,
            done: false,
            queued: VecDeque::new(),
            sse_stream: None,
            sse_parser: SseParser::new(),
            sse_is_base64: false,
            sse_retry_count: 0,
        }
    }

    pub fn offset(&self) -> &str {
        &self.offset
    }

    /// Return the next chunk, or `None` once the iterator is exhausted
    /// (catch-up delivered its one response, or the stream closed).
    pub async fn next(&mut self) -> Result<Option<Chunk>, ClientError> {
        if let Some(chunk) = self.queued.pop_front() {
            return Ok(Some(chunk));
        }
        if self.done {
            return Ok(None);
        }

        match self.options.live {
            LiveMode::CatchUp => self.next_catch_up().await,
            LiveMode::LongPoll => self.next_long_poll().await,
            LiveMode::Sse => self.next_sse().await,
        }
    }

    async fn next_catch_up(&mut self) -> Result<Option<Chunk>, ClientError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("offset", self.offset.as_str())])
            .send()
            .await?;
        self.done = true;
        self.chunk_from_response(response).await.map(Some)
    }

    async fn next_long_poll(&mut self) -> Result<Option<Chunk>, ClientError> {
        loop {
            let response = self
                .client
                .get(&self.url)
                .query(&[("offset", self.offset.as_str()), ("live", "long-poll")])
                .timeout(self.options.timeout + Duration::from_secs(5))
                .send()
                .await?;

            if response.status().as_u16() == 204 {
                if let Some(next_offset) = header_str(&response, "Stream-Next-Offset") {
                    self.offset = next_offset;
                }
                if header_is_true(&response, "Stream-Closed") {
                    self.done = true;
                    return Ok(None);
                }
                continue;
            }

            return self.chunk_from_response(response).await.map(Some);
        }
    }

    async fn chunk_from_response(&mut self, response: reqwest::Response) -> Result<Chunk, ClientError> {
        let status = response.status().as_u16();
        match status {
            404 => return Err(ClientError::NotFound),
            200 | 204 => {}
            other => return Err(ClientError::UnexpectedStatus(other)),
        }

        let up_to_date = header_is_true(&response, "Stream-Up-To-Date");
        let stream_closed = header_is_true(&response, "Stream-Closed");
        let next_offset = header_str(&response, "Stream-Next-Offset").unwrap_or_else(|| self.offset.clone());
        let is_binary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| !ct.starts_with("application/json") && !ct.starts_with("text/"))
            .unwrap_or(false);

        self.offset = next_offset.clone();
        if stream_closed {
            self.done = true;
        }

        let data = response.bytes().await?.to_vec();

        Ok(Chunk {
            data,
            offset: next_offset,
            up_to_date,
            stream_closed,
            status_code: status,
            is_binary,
        })
    }

    async fn next_sse(&mut self) -> Result<Option<Chunk>, ClientError> {
        loop {
            if self.sse_stream.is_none() {
                self.open_sse_connection().await?;
            }

            let stream = self.sse_stream.as_mut().expect("just opened");
            match stream.next().await {
                Some(Ok(bytes)) => {
                    let events = self.sse_parser.push(&bytes);
                    for event in events {
                        if let Some(chunk) = self.apply_sse_event(event) {
                            self.queued.push_back(chunk);
                        }
                    }
                    if let Some(chunk) = self.queued.pop_front() {
                        return Ok(Some(chunk));
                    }
                    if self.done {
                        return Ok(None);
                    }
                }
                Some(Err(err)) => {
                    self.sse_stream = None;
                    if self.sse_retry_count >= self.options.sse_max_retries {
                        return Err(ClientError::Connection(err.to_string()));
                    }
                    self.sse_retry_count += 1;
                }
                None => {
                    self.sse_stream = None;
                    if self.done {
                        return Ok(None);
                    }
                    if self.sse_retry_count >= self.options.sse_max_retries {
                        return Err(ClientError::Connection(
                            "SSE connection closed without a terminal control frame".to_string(),
                        ));
                    }
                    self.sse_retry_count += 1;
                }
            }
        }
    }

    async fn open_sse_connection(&mut self) -> Result<(), ClientError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("offset", self.offset.as_str()), ("live", "sse")])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        match response.status().as_u16() {
            404 => return Err(ClientError::NotFound),
            200 => {}
            other => return Err(ClientError::UnexpectedStatus(other)),
        }

        self.sse_is_base64 = response
            .headers()
            .get("Stream-SSE-Data-Encoding")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("base64"))
            .unwrap_or(false);

        self.sse_retry_count = 0;
        self.sse_stream = Some(Box::pin(response.bytes_stream()));
        Ok(())
    }

    fn apply_sse_event(&mut self, event: crate::sse::SseEvent) -> Option<Chunk> {
        match event.event_type.as_str() {
            "control" => {
                let parsed: serde_json::Value = serde_json::from_str(&event.data).ok()?;
                if let Some(next_offset) = parsed.get("streamNextOffset").and_then(|v| v.as_str()) {
                    self.offset = next_offset.to_string();
                }
                let up_to_date = parsed.get("upToDate").and_then(|v| v.as_bool()).unwrap_or(false);
                let stream_closed = parsed.get("streamClosed").and_then(|v| v.as_bool()).unwrap_or(false);
                if stream_closed {
                    self.done = true;
                    self.sse_stream = None;
                }
                if up_to_date || stream_closed {
                    return Some(Chunk {
                        data: Vec::new(),
                        offset: self.offset.clone(),
                        up_to_date,
                        stream_closed,
                        status_code: 200,
                        is_binary: false,
                    });
                }
                None
            }
            "data" => {
                let data = if self.sse_is_base64 {
                    base64::engine::general_purpose::STANDARD
                        .decode(event.data.as_bytes())
                        .ok()?
                } else {
                    event.data.into_bytes()
                };
                Some(Chunk {
                    data,
                    offset: self.offset.clone(),
                    up_to_date: false,
                    stream_closed: false,
                    status_code: 200,
                    is_binary: self.sse_is_base64,
                })
            }
            _ => None,
        }
    }
}

fn header_str(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn header_is_true(response: &reqwest::Response, name: &str) -> bool {
    header_str(response, name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
