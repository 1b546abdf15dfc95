//! Hand-rolled Server-Sent-Events frame parser.
//!
//! Events are delimited by a blank line; within an event, `event:` and
//! `data:` lines are the only ones we care about. This mirrors the
//! line-oriented parser in the C reference client rather than pulling in an
//! SSE crate, to keep the client's event handling next to the HTTP call
//! site.

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: String,
    pub data: String,
}

#[derive(Default)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed newly received bytes and drain any complete events.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        let mut pos = 0usize;

        while let Some(rel) = find_double_newline(&self.buf[pos..]) {
            let event_end = pos + rel;
            let raw = &self.buf[pos..event_end];
            if let Some(event) = parse_one_event(raw) {
                events.push(event);
            }
            pos = event_end + 2;
        }

        if pos > 0 {
            self.buf.drain(0..pos);
        }
        events
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_one_event(raw: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(raw);
    let mut event_type: Option<String> = None;
    let mut data = String::new();

    for line in text.split('\n') {
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.trim_start());
        }
    }

    event_type.map(|event_type| SseEvent { event_type, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_data_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: data\ndata: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "data");
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn buffers_partial_events_across_pushes() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: control\ndata: {\"streamNextOff").is_empty());
        let events = parser.push(b"set\":\"x\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "control");
        assert_eq!(events[0].data, "{\"streamNextOffset\":\"x\"}");
    }

    #[test]
    fn parses_multiple_events_in_one_push() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: data\ndata: a\n\nevent: data\ndata: b\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "a");
        assert_eq!(events[1].data, "b");
    }
}
