//! Idempotent producer: batches appends and auto-reclaims a stale epoch.

use crate::error::ClientError;

const MAX_AUTO_CLAIM_RETRIES: u32 = 3;

/// An idempotent producer bound to one stream path.
pub struct Producer {
    client: reqwest::Client,
    url: String,
    producer_id: String,
    content_type: String,
    epoch: u64,
    seq: u64,
    auto_claim: bool,
    max_in_flight: usize,
    linger_ms: u64,
    max_batch_bytes: usize,
    is_json: bool,
    batch: Vec<u8>,
    batch_items: usize,
}

impl Producer {
    /// Create a producer posting to `url` as `producer_id`, starting at epoch 0, seq 0.
    pub fn new(url: impl Into<String>, producer_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            producer_id: producer_id.into(),
            content_type: "application/octet-stream".to_string(),
            epoch: 0,
            seq: 0,
            auto_claim: true,
            max_in_flight: 1,
            linger_ms: 0,
            max_batch_bytes: 1_048_576,
            is_json: false,
            batch: Vec::new(),
            batch_items: 0,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        self.is_json = crate::is_json_content_type(&content_type);
        self.content_type = content_type;
        self
    }

    pub fn with_auto_claim(mut self, auto_claim: bool) -> Self {
        self.auto_claim = auto_claim;
        self
    }

    /// Start at a specific epoch instead of 0 (e.g. resuming after a restart).
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_linger(mut self, linger_ms: u64) -> Self {
        self.linger_ms = linger_ms;
        self
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Place `data` into the in-memory batch. Returns immediately; no I/O occurs.
    /// For a JSON-typed producer, `data` is validated as well-formed JSON eagerly.
    pub fn append(&mut self, data: &[u8]) -> Result<(), ClientError> {
        if self.is_json {
            serde_json::from_slice::<serde_json::Value>(data)?;
            if self.batch_items > 0 {
                self.batch.push(b',');
            }
            self.batch.extend_from_slice(data);
        } else {
            self.batch.extend_from_slice(data);
        }
        self.batch_items += 1;
        Ok(())
    }

    /// Number of bytes currently buffered (advisory, for callers honoring `max_batch_bytes`).
    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    pub fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    /// Flush the batch as a single POST. On a stale epoch with auto-claim enabled,
    /// re-reads the advertised epoch and retries with `epoch = advertised + 1, seq = 0`,
    /// bounded at 3 attempts.
    pub async fn flush(&mut self) -> Result<(), ClientError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        self.send_batch(0).await
    }

    fn send_batch<'a>(
        &'a mut self,
        retry_count: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ClientError>> + Send + 'a>>
    {
        Box::pin(async move {
            if retry_count > MAX_AUTO_CLAIM_RETRIES {
                return Err(ClientError::AutoClaimExhausted);
            }

            let body = self.finalize_batch();
            let response = self
                .client
                .post(&self.url)
                .header("Content-Type", &self.content_type)
                .header("Producer-Id", &self.producer_id)
                .header("Producer-Epoch", self.epoch.to_string())
                .header("Producer-Seq", self.seq.to_string())
                .body(body)
                .send()
                .await?;

            match response.status().as_u16() {
                200 | 204 => {
                    self.seq += 1;
                    self.batch.clear();
                    self.batch_items = 0;
                    Ok(())
                }
                403 => {
                    let advertised_epoch = header_u64(&response, "Producer-Epoch");
                    if self.auto_claim {
                        if let Some(advertised) = advertised_epoch {
                            self.epoch = advertised + 1;
                            self.seq = 0;
                            return self.send_batch(retry_count + 1).await;
                        }
                    }
                    Err(ClientError::StaleEpoch {
                        current_epoch: advertised_epoch.unwrap_or(self.epoch),
                    })
                }
                409 => {
                    if response.headers().contains_key("Stream-Closed") {
                        Err(ClientError::StreamClosed)
                    } else if let Some(expected_seq) = header_u64(&response, "Producer-Expected-Seq")
                    {
                        let received_seq =
                            header_u64(&response, "Producer-Received-Seq").unwrap_or(self.seq);
                        Err(ClientError::SequenceGap {
                            expected_seq,
                            received_seq,
                        })
                    } else {
                        Err(ClientError::Conflict)
                    }
                }
                404 => Err(ClientError::NotFound),
                status => Err(ClientError::UnexpectedStatus(status)),
            }
        })
    }

    /// Flush any pending batch, then close the stream with an optional final payload.
    pub async fn close_stream(&mut self, final_data: Option<&[u8]>) -> Result<(), ClientError> {
        if !self.batch.is_empty() {
            self.flush().await?;
        }

        let body = match final_data {
            Some(data) if self.is_json => {
                serde_json::from_slice::<serde_json::Value>(data)?;
                let mut framed = Vec::with_capacity(data.len() + 2);
                framed.push(b'[');
                framed.extend_from_slice(data);
                framed.push(b']');
                framed
            }
            Some(data) => data.to_vec(),
            None => Vec::new(),
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("Producer-Id", &self.producer_id)
            .header("Producer-Epoch", self.epoch.to_string())
            .header("Producer-Seq", self.seq.to_string())
            .header("Stream-Closed", "true");

        if !body.is_empty() {
            request = request.header("Content-Type", &self.content_type).body(body);
        }

        let response = request.send().await?;

        match response.status().as_u16() {
            200 | 204 => {
                self.seq += 1;
                Ok(())
            }
            403 => Err(ClientError::StaleEpoch {
                current_epoch: header_u64(&response, "Producer-Epoch").unwrap_or(self.epoch),
            }),
            409 => Err(ClientError::StreamClosed),
            404 => Err(ClientError::NotFound),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    fn finalize_batch(&self) -> Vec<u8> {
        if self.is_json {
            let mut framed = Vec::with_capacity(self.batch.len() + 2);
            framed.push(b'[');
            framed.extend_from_slice(&self.batch);
            framed.push(b']');
            framed
        } else {
            self.batch.clone()
        }
    }
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_rejects_malformed_json() {
        let mut producer = Producer::new("http://localhost/x", "p1").with_content_type("application/json");
        assert!(producer.append(b"{not json").is_err());
        assert_eq!(producer.batch_len(), 0);
    }

    #[test]
    fn finalize_batch_frames_json_array() {
        let mut producer = Producer::new("http://localhost/x", "p1").with_content_type("application/json");
        producer.append(br#"{"a":1}"#).unwrap();
        producer.append(br#"{"b":2}"#).unwrap();
        assert_eq!(producer.finalize_batch(), br#"[{"a":1},{"b":2}]"#);
    }

    #[test]
    fn finalize_batch_concatenates_binary() {
        let mut producer = Producer::new("http://localhost/x", "p1");
        producer.append(b"hello").unwrap();
        producer.append(b"world").unwrap();
        assert_eq!(producer.finalize_batch(), b"helloworld");
    }
}
