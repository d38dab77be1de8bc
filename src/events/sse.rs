//! Server-sent event stream parsing and the idle-timeout reader that wraps
//! it, per the W3C `text/event-stream` grammar.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum SseError {
    #[error("SSE stream idle for longer than {idle_timeout:?}")]
    IdleTimeout { idle_timeout: Duration },

    #[error("SSE stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed SSE record. `retry` is `Some` only when the `retry:` field
/// carried a valid non-negative integer, per the grammar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: String,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Incremental parser over a line-oriented SSE byte stream.
///
/// Tracks the sticky `last_event_id` across dispatched events, as the spec
/// requires for `Last-Event-ID` resumption after a reconnect.
#[derive(Default)]
pub struct SseParser {
    event_type: String,
    data_lines: Vec<String>,
    pending_id: Option<String>,
    last_event_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feeds one line (without its trailing newline) into the parser.
    /// Returns `Some(event)` if this line completed a dispatchable event.
    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                // Consecutive blank lines must not emit spurious events.
                self.event_type.clear();
                return None;
            }
            let event = SseEvent {
                event_type: if self.event_type.is_empty() {
                    "message".to_string()
                } else {
                    std::mem::take(&mut self.event_type)
                },
                data: self.data_lines.join("\n"),
                id: self.pending_id.clone(),
                retry: None,
            };
            self.data_lines.clear();
            if let Some(id) = &self.pending_id {
                self.last_event_id = Some(id.clone());
            }
            return Some(event);
        }

        if let Some(rest) = line.strip_prefix(':') {
            let _ = rest; // comment / keepalive line, ignored
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = value.to_string(),
            "data" => self.data_lines.push(value.to_string()),
            "id" => self.pending_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    return Some(SseEvent {
                        event_type: "__retry__".to_string(),
                        data: String::new(),
                        id: None,
                        retry: Some(ms),
                    });
                }
            }
            _ => {}
        }
        None
    }
}

/// Reads lines from `reader`, closing the stream and yielding
/// `SseError::IdleTimeout` if no bytes arrive within `idle_timeout`.
pub async fn read_events<R, F>(
    reader: R,
    idle_timeout: Duration,
    mut on_event: F,
) -> Result<(), SseError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(SseEvent),
{
    let mut reader = reader;
    let mut parser = SseParser::new();
    let mut line = String::new();

    loop {
        line.clear();
        let read = timeout(idle_timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| SseError::IdleTimeout { idle_timeout })??;

        if read == 0 {
            return Ok(()); // clean EOF
        }

        let trimmed = line.trim_end_matches(['\n', '\r']);
        if let Some(event) = parser.feed_line(trimmed) {
            if event.event_type == "__retry__" {
                // Surfaced to callers via on_event; callers that care about
                // reconnection intervals inspect `retry` and ignore `data`.
                on_event(event);
            } else {
                on_event(event);
            }
        }
    }
}

/// Drains `reader` fully, discarding bytes; used to release a response body
/// promptly when a stream is abandoned mid-read.
pub async fn drain<R: AsyncBufRead + Unpin>(mut reader: R) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

pub fn buffered<R: tokio::io::AsyncRead + Unpin>(reader: R) -> BufReader<R> {
    BufReader::new(reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed_line("event: peer_added").is_none());
        assert!(parser.feed_line("data: {\"a\":1}").is_none());
        assert!(parser.feed_line("id: e1").is_none());
        let event = parser.feed_line("").unwrap();
        assert_eq!(event.event_type, "peer_added");
        assert_eq!(event.data, "{\"a\":1}");
        assert_eq!(event.id.as_deref(), Some("e1"));
        assert_eq!(parser.last_event_id(), Some("e1"));
    }

    #[test]
    fn default_event_type_is_message() {
        let mut parser = SseParser::new();
        parser.feed_line("data: hello");
        let event = parser.feed_line("").unwrap();
        assert_eq!(event.event_type, "message");
    }

    #[test]
    fn multiple_data_lines_are_joined_with_lf() {
        let mut parser = SseParser::new();
        parser.feed_line("data: line1");
        parser.feed_line("data: line2");
        let event = parser.feed_line("").unwrap();
        assert_eq!(event.data, "line1\nline2");
    }

    #[test]
    fn consecutive_blank_lines_emit_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.feed_line("").is_none());
        assert!(parser.feed_line("").is_none());
    }

    #[test]
    fn comment_lines_are_ignored() {
        let mut parser = SseParser::new();
        parser.feed_line(": keepalive");
        parser.feed_line("data: x");
        let event = parser.feed_line("").unwrap();
        assert_eq!(event.data, "x");
    }

    #[test]
    fn retry_field_parsed_as_u64() {
        let mut parser = SseParser::new();
        let event = parser.feed_line("retry: 3000").unwrap();
        assert_eq!(event.retry, Some(3000));
    }

    #[tokio::test]
    async fn read_events_reports_idle_timeout() {
        let (client, _server) = tokio::io::duplex(64);
        let reader = BufReader::new(client);
        let result = read_events(reader, Duration::from_millis(20), |_| {}).await;
        assert!(matches!(result, Err(SseError::IdleTimeout { .. })));
    }

    #[tokio::test]
    async fn read_events_dispatches_each_event() {
        let (mut client, server) = tokio::io::duplex(256);
        let reader = BufReader::new(server);

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client
                .write_all(b"event: peer_added\ndata: {}\nid: e1\n\n")
                .await
                .unwrap();
            client.shutdown().await.unwrap();
        });

        let mut seen = Vec::new();
        read_events(reader, Duration::from_secs(1), |event| {
            seen.push(event.event_type);
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["peer_added".to_string()]);
    }
}
